use anyhow::Context;
use tracing::info;

use agent_rag_backend::config::{SetupConfig, SEED_TABLE_NAME};
use agent_rag_backend::logging;
use agent_rag_backend::retrieval::{embedder_for, VectorCollection};
use agent_rag_backend::retrieval::seed::{build_collection, connect_seed_db, seed_table};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SetupConfig::from_env()?;
    logging::init("setup_db", &config.log);

    let pool = connect_seed_db(&config.seed_db_path)
        .await
        .with_context(|| format!("cannot open {}", config.seed_db_path.display()))?;
    let report = seed_table(&pool, &config.text_files_dir).await?;
    info!(
        "Seeded {}: {} inserted, {} skipped",
        SEED_TABLE_NAME, report.inserted, report.skipped
    );

    let embedder = embedder_for(config.embedding_service_url.as_deref())?;
    let collection = build_collection(
        &pool,
        &config.vector_store_dir,
        &config.collection_name,
        embedder,
    )
    .await?;
    info!(
        "Collection '{}' holds {} documents",
        collection.name(),
        collection.count().await?
    );
    Ok(())
}
