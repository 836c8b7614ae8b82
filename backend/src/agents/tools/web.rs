use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::agents::tool::{required_str, Tool, ToolError};

pub const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
pub const WIKIPEDIA_URL: &str = "https://en.wikipedia.org";
pub const MAX_PAGE_CHARS: usize = 10_000;
const MAX_SEARCH_RESULTS: usize = 10;

static SCRIPT_OR_STYLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<!--.*?-->")
        .expect("valid script regex")
});
static BLOCK_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(p|div|br|hr|h[1-6]|li|ul|ol|tr|table|section|article|header|footer|title)\b[^>]*>")
        .expect("valid block tag regex")
});
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid tag regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\f\v]+").expect("valid regex"));
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static RESULT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a([^>]*class="result__a"[^>]*)>(.*?)</a>"#).expect("valid link regex")
});
static RESULT_SNIPPET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#)
        .expect("valid snippet regex")
});
static HREF: Lazy<Regex> = Lazy::new(|| Regex::new(r#"href="([^"]+)""#).expect("valid regex"));

fn request_error(service: &str, err: reqwest::Error) -> ToolError {
    if err.is_timeout() {
        ToolError::with_status(format!("{} request timed out", service), 504)
    } else if err.is_connect() {
        ToolError::with_status(format!("{} is not reachable", service), 503)
    } else {
        ToolError::new(format!("{} request failed: {}", service, err))
    }
}

async fn fetch_text(request: reqwest::RequestBuilder, service: &str) -> Result<String, ToolError> {
    let response = request
        .send()
        .await
        .map_err(|e| request_error(service, e))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ToolError::with_status(
            format!("{} returned {}", service, status),
            status.as_u16(),
        ));
    }
    response.text().await.map_err(|e| request_error(service, e))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Drops scripts, styles and tags, then normalises whitespace.
pub fn html_to_text(html: &str) -> String {
    let without_code = SCRIPT_OR_STYLE.replace_all(html, " ");
    let with_breaks = BLOCK_TAG.replace_all(&without_code, "\n");
    let without_tags = TAG.replace_all(&with_breaks, "");
    let decoded = decode_entities(&without_tags);
    let collapsed = WHITESPACE.replace_all(&decoded, " ");
    let lines: Vec<&str> = collapsed.lines().map(str::trim).collect();
    BLANK_LINES
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

fn inline_text(html: &str) -> String {
    let text = decode_entities(&TAG.replace_all(html, ""));
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}\n..._This content has been truncated to stay below {} characters_...",
            &text[..cut],
            max_chars
        ),
        None => text,
    }
}

/// DuckDuckGo wraps result links in a redirect carrying the target in `uddg`.
fn resolve_result_link(href: &str) -> String {
    let href = decode_entities(href);
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.clone()
    };
    Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "uddg")
                .map(|(_, target)| target.into_owned())
        })
        .unwrap_or(absolute)
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

pub fn parse_search_results(html: &str) -> Vec<SearchHit> {
    let snippets: Vec<String> = RESULT_SNIPPET
        .captures_iter(html)
        .map(|caps| inline_text(&caps[1]))
        .collect();

    RESULT_LINK
        .captures_iter(html)
        .filter_map(|caps| {
            let href = HREF.captures(&caps[1])?.get(1)?.as_str().to_string();
            Some((resolve_result_link(&href), inline_text(&caps[2])))
        })
        .enumerate()
        .map(|(i, (link, title))| SearchHit {
            title,
            link,
            snippet: snippets.get(i).cloned().unwrap_or_default(),
        })
        .take(MAX_SEARCH_RESULTS)
        .collect()
}

pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_endpoint(client, DUCKDUCKGO_HTML_URL)
    }

    pub fn with_endpoint(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Performs a DuckDuckGo web search for the query and returns the top results."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string", "description": "The search query" } },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let query = required_str(self.name(), &arguments, "query")?;
        debug!("Searching the web for '{}'", query);

        let request = self.client.get(&self.endpoint).query(&[("q", query)]);
        let html = fetch_text(request, "DuckDuckGo").await?;
        let hits = parse_search_results(&html);
        if hits.is_empty() {
            return Err(ToolError::new(format!(
                "No results found for '{}'. Try a less restrictive query.",
                query
            )));
        }

        let results: Vec<String> = hits
            .iter()
            .map(|hit| format!("[{}]({})\n{}", hit.title, hit.link, hit.snippet))
            .collect();
        Ok(format!("## Search Results\n\n{}", results.join("\n\n")))
    }
}

pub struct VisitWebpageTool {
    client: reqwest::Client,
}

impl VisitWebpageTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for VisitWebpageTool {
    fn name(&self) -> &str {
        "visit_webpage"
    }

    fn description(&self) -> &str {
        "Visits a webpage at the given url and reads its content as text."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "url": { "type": "string", "description": "The url of the webpage to visit" } },
            "required": ["url"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let raw = required_str(self.name(), &arguments, "url")?;
        let url = Url::parse(raw).map_err(|e| ToolError::invalid_arguments(self.name(), e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::invalid_arguments(
                self.name(),
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        debug!("Visiting {}", url);
        let body = fetch_text(self.client.get(url.clone()), url.as_str()).await?;
        Ok(truncate_chars(html_to_text(&body), MAX_PAGE_CHARS))
    }
}

pub struct WikipediaSearchTool {
    client: reqwest::Client,
    base_url: String,
}

impl WikipediaSearchTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, WIKIPEDIA_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Tool for WikipediaSearchTool {
    fn name(&self) -> &str {
        "wikipedia_search"
    }

    fn description(&self) -> &str {
        "Searches Wikipedia and returns the introduction of the best matching article."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string", "description": "The topic to look up" } },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let query = required_str(self.name(), &arguments, "query")?;
        let request = self
            .client
            .get(format!("{}/w/api.php", self.base_url))
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("generator", "search"),
                ("gsrsearch", query),
                ("gsrlimit", "1"),
                ("prop", "extracts"),
                ("exintro", "1"),
                ("explaintext", "1"),
                ("redirects", "1"),
            ]);
        let body = fetch_text(request, "Wikipedia").await?;
        let payload: Value = serde_json::from_str(&body)
            .map_err(|e| ToolError::new(format!("invalid Wikipedia response: {}", e)))?;

        let page = payload
            .pointer("/query/pages")
            .and_then(Value::as_object)
            .and_then(|pages| pages.values().next());
        let Some(page) = page else {
            return Ok(format!("No Wikipedia page found for '{}'.", query));
        };

        let title = page.get("title").and_then(Value::as_str).unwrap_or(query);
        let extract = page.get("extract").and_then(Value::as_str).unwrap_or("");
        Ok(format!(
            "{}\n\n{}\n\nRead more: {}/wiki/{}",
            title,
            extract.trim(),
            self.base_url,
            title.replace(' ', "_")
        ))
    }
}
