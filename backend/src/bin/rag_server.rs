use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use agent_rag_backend::api::{self, RagContext};
use agent_rag_backend::config::RagConfig;
use agent_rag_backend::logging;
use agent_rag_backend::retrieval::{embedder_for, SqliteCollection, VectorCollection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RagConfig::from_env()?;
    logging::init("rag_server", &config.log);

    info!("Starting retrieval service");

    let embedder = embedder_for(config.embedding_service_url.as_deref())?;
    let collection =
        SqliteCollection::open(&config.vector_store_dir, &config.collection_name, embedder)
            .await
            .with_context(|| {
                format!(
                    "collection '{}' not found in {}; run setup_db first",
                    config.collection_name,
                    config.vector_store_dir.display()
                )
            })?;
    info!(
        "Opened collection '{}' with {} documents",
        collection.name(),
        collection.count().await?
    );

    let ctx = Arc::new(RagContext {
        collection: Arc::new(collection),
        default_n_results: config.default_n_results,
        default_distance_threshold: config.default_distance_threshold,
    });
    let routes = api::rag_routes(ctx);

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown((config.host, config.port), async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .context("failed to bind the retrieval service")?;
    info!("Server listening on {}", addr);
    server.await;

    info!("Retrieval service stopped");
    Ok(())
}
