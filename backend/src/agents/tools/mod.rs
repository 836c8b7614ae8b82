//! Concrete tools handed to the agent team.

mod documents;
mod web;

pub use documents::{DocumentRequestTool, DEFAULT_DISTANCE_THRESHOLD, DEFAULT_N_DOCUMENTS};
pub use web::{
    html_to_text, parse_search_results, SearchHit, VisitWebpageTool, WebSearchTool,
    WikipediaSearchTool, MAX_PAGE_CHARS,
};
