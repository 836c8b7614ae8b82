use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use agent_rag_backend::agents::{build_agent_team, web_client, InferenceClient};
use agent_rag_backend::api::{self, AgentContext};
use agent_rag_backend::config::AgentConfig;
use agent_rag_backend::logging;
use agent_rag_backend::retrieval::RetrievalClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::from_env()?;
    logging::init("agent_server", &config.log);

    info!("Starting agent service");
    if config.inference_api_key.is_none() {
        info!("No inference API key set, sending unauthenticated requests");
    }

    let model = InferenceClient::new(
        &config.inference_url,
        &config.inference_model,
        config.inference_api_key.clone(),
        config.inference_timeout(),
    )?;
    let documents = RetrievalClient::new(&config.retrieval_url, config.retrieval_timeout())?;
    let registry = build_agent_team(
        Arc::new(model),
        Arc::new(documents),
        web_client(config.web_timeout())?,
    )?;
    info!(
        "Agent team ready, retrieval service at {}",
        config.retrieval_url
    );

    let ctx = Arc::new(AgentContext {
        registry,
        min_query_words: config.min_query_words,
    });
    let routes = api::agent_routes(ctx);

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown((config.host, config.port), async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .context("failed to bind the agent service")?;
    info!("Server listening on {}", addr);
    server.await;

    info!("Agent service stopped");
    Ok(())
}
