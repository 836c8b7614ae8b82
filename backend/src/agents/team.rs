use std::sync::Arc;
use std::time::Duration;

use super::model::ChatModel;
use super::registry::{AgentRegistry, RegistryError};
use super::tool::Tool;
use super::tools::{DocumentRequestTool, VisitWebpageTool, WebSearchTool, WikipediaSearchTool};
use super::Agent;
use crate::retrieval::DocumentSource;

pub const WEB_AGENT: &str = "web_agent";
pub const RAG_AGENT: &str = "rag_agent";
pub const MANAGER_AGENT: &str = "manager";

const USER_AGENT: &str = concat!("agent-rag-backend/", env!("CARGO_PKG_VERSION"));

/// Shared client for the web tools.
pub fn web_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

/// Builds the web agent, the RAG agent and the manager coordinating both.
/// `documents` is the retrieval capability handed to the RAG agent.
pub fn build_agent_team(
    model: Arc<dyn ChatModel>,
    documents: Arc<dyn DocumentSource>,
    web: reqwest::Client,
) -> Result<AgentRegistry, RegistryError> {
    let web_agent = Agent::new(
        model.clone(),
        WEB_AGENT,
        "Runs web searches for you. Give it your query as an argument. It can search the \
         web, visit webpages and look things up on Wikipedia.",
    )
    .with_tools(vec![
        Arc::new(WebSearchTool::new(web.clone())) as Arc<dyn Tool>,
        Arc::new(VisitWebpageTool::new(web.clone())),
        Arc::new(WikipediaSearchTool::new(web)),
    ])
    .with_max_steps(4);

    let rag_agent = Agent::new(
        model.clone(),
        RAG_AGENT,
        "Queries a vector database of Wikipedia articles about pythons, the snakes and the \
         programming language. Give it your query as an argument. It reports database errors.",
    )
    .with_tools(vec![Arc::new(DocumentRequestTool::new(documents))])
    .with_max_steps(2);

    let manager = Agent::new(
        model,
        MANAGER_AGENT,
        "Answers user queries by delegating to the web agent and the RAG agent.",
    )
    .with_max_steps(5)
    .with_planning_interval(5);

    let mut registry = AgentRegistry::new();
    registry.add_sub_agent(web_agent)?;
    registry.add_sub_agent(rag_agent)?;
    registry.add_manager(manager, &[WEB_AGENT, RAG_AGENT])?;
    Ok(registry)
}
