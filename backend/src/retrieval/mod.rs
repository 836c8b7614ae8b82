//! Retrieval side: the persisted vector collection, distance filtering, the
//! one-time seeding step, and the HTTP client agents use to reach the service.

pub mod client;
pub mod collection;
pub mod embedding;
pub mod seed;

use std::sync::Arc;

use tracing::debug;

pub use client::{DocumentQuery, DocumentSource, RetrievalClient, RetrievalError};
pub use collection::{
    CollectionError, CollectionRecord, ScoredDocument, SqliteCollection, VectorCollection,
};
pub use embedding::{Embedder, HashEmbedder, HttpEmbedder};

/// Picks the embedder: the external service when configured, otherwise the
/// local hashed embedding.
pub fn embedder_for(
    service_url: Option<&str>,
) -> Result<Arc<dyn Embedder>, embedding::EmbeddingError> {
    match service_url {
        Some(url) => Ok(Arc::new(HttpEmbedder::new(url)?)),
        None => Ok(Arc::new(HashEmbedder)),
    }
}

/// Keeps documents strictly closer than `distance_threshold`, in rank order.
pub fn filter_by_distance(
    documents: Vec<ScoredDocument>,
    distance_threshold: f32,
) -> Vec<ScoredDocument> {
    documents
        .into_iter()
        .filter(|doc| doc.distance < distance_threshold)
        .collect()
}

/// Similarity search followed by the distance filter.
pub async fn get_documents(
    collection: &dyn VectorCollection,
    query: &str,
    n_results: usize,
    distance_threshold: f32,
) -> Result<Vec<ScoredDocument>, CollectionError> {
    if distance_threshold.is_nan() || distance_threshold < 0.0 {
        return Err(CollectionError::InvalidQuery(format!(
            "distance_threshold must be a non-negative number, got {}",
            distance_threshold
        )));
    }

    let nearest = collection.query(query, n_results).await?;
    let found = nearest.len();
    let filtered = filter_by_distance(nearest, distance_threshold);
    debug!(
        "{} of {} nearest documents within distance {}",
        filtered.len(),
        found,
        distance_threshold
    );
    Ok(filtered)
}
