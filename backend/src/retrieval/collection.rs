use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use tracing::{debug, info};

use super::embedding::{Embedder, EmbeddingError};

pub const STORE_FILE_NAME: &str = "collections.sqlite3";

#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("collection '{0}' does not exist")]
    NotFound(String),

    #[error("collection '{0}' already exists")]
    AlreadyExists(String),

    #[error("{0}")]
    InvalidQuery(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt record '{id}': {reason}")]
    Corrupt { id: String, reason: String },
}

/// A document with its distance to the query. Lower is more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: String,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: String,
    pub document: String,
    pub metadata: serde_json::Value,
}

/// A named set of embedded documents. Construction (create or open) is left
/// to the implementation.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Embeds and stores `records`, all or nothing.
    async fn add(&self, records: &[CollectionRecord]) -> Result<usize, CollectionError>;

    async fn count(&self) -> Result<usize, CollectionError>;

    /// Nearest `n_results` documents for `text`, closest first.
    async fn query(
        &self,
        text: &str,
        n_results: usize,
    ) -> Result<Vec<ScoredDocument>, CollectionError>;
}

#[derive(Debug, sqlx::FromRow)]
struct StoredRecord {
    id: String,
    document: String,
    vector_json: String,
}

/// A named collection persisted in a SQLite file under the store directory.
pub struct SqliteCollection {
    pool: SqlitePool,
    name: String,
    embedder: Arc<dyn Embedder>,
}

impl SqliteCollection {
    /// Opens an existing collection.
    pub async fn open(
        store_dir: &Path,
        name: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, CollectionError> {
        let path = store_path(store_dir);
        if !path.exists() {
            return Err(CollectionError::NotFound(name.to_string()));
        }

        let pool = connect_pool(&path).await?;
        let exists: Option<(String,)> =
            sqlx::query_as("SELECT name FROM collections WHERE name = ?")
                .bind(name)
                .fetch_optional(&pool)
                .await?;
        if exists.is_none() {
            return Err(CollectionError::NotFound(name.to_string()));
        }

        info!("Opened collection '{}' at {}", name, path.display());
        Ok(Self {
            pool,
            name: name.to_string(),
            embedder,
        })
    }

    /// Creates a new, empty collection. Fails if the name is taken.
    pub async fn create(
        store_dir: &Path,
        name: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, CollectionError> {
        Self::create_with(store_dir, name, embedder, &[]).await
    }

    /// Creates a collection holding `records`. The records are embedded before
    /// anything is written, and the collection only exists once they are all
    /// stored.
    pub async fn create_with(
        store_dir: &Path,
        name: &str,
        embedder: Arc<dyn Embedder>,
        records: &[CollectionRecord],
    ) -> Result<Self, CollectionError> {
        let vectors = embed_records(embedder.as_ref(), records).await?;

        std::fs::create_dir_all(store_dir)
            .map_err(|e| CollectionError::Storage(sqlx::Error::Io(e)))?;
        let pool = connect_pool(&store_path(store_dir)).await?;

        let mut tx = pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO collections (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(CollectionError::AlreadyExists(name.to_string()));
        }
        insert_records(&mut tx, name, records, vectors).await?;
        tx.commit().await?;

        info!("Created collection '{}' with {} records", name, records.len());
        Ok(Self {
            pool,
            name: name.to_string(),
            embedder,
        })
    }
}

#[async_trait]
impl VectorCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(&self, records: &[CollectionRecord]) -> Result<usize, CollectionError> {
        if records.is_empty() {
            return Ok(0);
        }

        let vectors = embed_records(self.embedder.as_ref(), records).await?;
        let mut tx = self.pool.begin().await?;
        insert_records(&mut tx, &self.name, records, vectors).await?;
        tx.commit().await?;

        debug!("Added {} records to '{}'", records.len(), self.name);
        Ok(records.len())
    }

    async fn count(&self) -> Result<usize, CollectionError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM embeddings WHERE collection = ?")
                .bind(&self.name)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as usize)
    }

    async fn query(
        &self,
        text: &str,
        n_results: usize,
    ) -> Result<Vec<ScoredDocument>, CollectionError> {
        if text.trim().is_empty() {
            return Err(CollectionError::InvalidQuery(
                "query text must not be empty".to_string(),
            ));
        }
        if n_results == 0 {
            return Err(CollectionError::InvalidQuery(format!(
                "Number of requested results {} cannot be less than 1",
                n_results
            )));
        }

        let query_vector = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                CollectionError::Embedding(EmbeddingError::InvalidResponse(
                    "no embedding returned for query".to_string(),
                ))
            })?;

        let rows = sqlx::query_as::<_, StoredRecord>(
            "SELECT id, document, vector_json FROM embeddings WHERE collection = ?",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let vector: Vec<f32> =
                serde_json::from_str(&row.vector_json).map_err(|e| CollectionError::Corrupt {
                    id: row.id.clone(),
                    reason: e.to_string(),
                })?;
            if vector.len() != query_vector.len() {
                return Err(CollectionError::InvalidQuery(format!(
                    "Embedding dimension {} does not match collection dimensionality {}",
                    query_vector.len(),
                    vector.len()
                )));
            }
            scored.push(ScoredDocument {
                document: row.document,
                distance: squared_l2(&query_vector, &vector),
            });
        }

        scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        scored.truncate(n_results);
        Ok(scored)
    }
}

/// One serialized vector per record, in order.
async fn embed_records(
    embedder: &dyn Embedder,
    records: &[CollectionRecord],
) -> Result<Vec<String>, CollectionError> {
    if records.is_empty() {
        return Ok(Vec::new());
    }

    let texts: Vec<String> = records.iter().map(|r| r.document.clone()).collect();
    let vectors = embedder.embed(&texts).await?;
    if vectors.len() != records.len() {
        return Err(CollectionError::Embedding(EmbeddingError::InvalidResponse(
            format!("expected {} embeddings, got {}", records.len(), vectors.len()),
        )));
    }

    records
        .iter()
        .zip(vectors)
        .map(|(record, vector)| {
            serde_json::to_string(&vector).map_err(|e| CollectionError::Corrupt {
                id: record.id.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

async fn insert_records(
    tx: &mut Transaction<'_, Sqlite>,
    collection: &str,
    records: &[CollectionRecord],
    vectors: Vec<String>,
) -> Result<(), CollectionError> {
    for (record, vector_json) in records.iter().zip(vectors) {
        sqlx::query(
            "INSERT INTO embeddings (collection, id, document, metadata_json, vector_json)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(collection)
        .bind(&record.id)
        .bind(&record.document)
        .bind(record.metadata.to_string())
        .bind(vector_json)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn store_path(store_dir: &Path) -> PathBuf {
    store_dir.join(STORE_FILE_NAME)
}

async fn connect_pool(path: &Path) -> Result<SqlitePool, CollectionError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations/vector").run(&pool).await?;
    Ok(pool)
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::embedding::HashEmbedder;
    use tempfile::tempdir;

    fn record(id: &str, document: &str) -> CollectionRecord {
        CollectionRecord {
            id: id.to_string(),
            document: document.to_string(),
            metadata: serde_json::json!({ "section": id }),
        }
    }

    #[tokio::test]
    async fn open_missing_collection_fails() {
        let dir = tempdir().unwrap();
        let err = SqliteCollection::open(dir.path(), "python_wiki", Arc::new(HashEmbedder))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CollectionError::NotFound(_)));
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let dir = tempdir().unwrap();
        SqliteCollection::create(dir.path(), "python_wiki", Arc::new(HashEmbedder))
            .await
            .unwrap();
        let err = SqliteCollection::create(dir.path(), "python_wiki", Arc::new(HashEmbedder))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CollectionError::AlreadyExists(_)));
    }

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Unreachable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn failed_embedding_leaves_no_collection_behind() {
        let dir = tempdir().unwrap();
        let records = [record("1", "Ball python"), record("2", "Pythonidae")];

        let err = SqliteCollection::create_with(
            dir.path(),
            "python_wiki",
            Arc::new(DownEmbedder),
            &records,
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, CollectionError::Embedding(_)));
        assert!(matches!(
            SqliteCollection::open(dir.path(), "python_wiki", Arc::new(HashEmbedder)).await,
            Err(CollectionError::NotFound(_))
        ));

        let collection = SqliteCollection::create_with(
            dir.path(),
            "python_wiki",
            Arc::new(HashEmbedder),
            &records,
        )
        .await
        .unwrap();
        assert_eq!(collection.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn query_returns_nearest_first() {
        let dir = tempdir().unwrap();
        let collection =
            SqliteCollection::create(dir.path(), "python_wiki", Arc::new(HashEmbedder))
                .await
                .unwrap();
        collection
            .add(&[
                record("1", "Ball python care and feeding"),
                record(
                    "2",
                    "Python taxonomy: python taxonomy of the family Pythonidae",
                ),
                record("3", "Reticulated python habitat in Asia"),
            ])
            .await
            .unwrap();
        assert_eq!(collection.count().await.unwrap(), 3);

        let reopened = SqliteCollection::open(dir.path(), "python_wiki", Arc::new(HashEmbedder))
            .await
            .unwrap();
        let results = reopened.query("python taxonomy", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].document.contains("taxonomy"));
        assert!(results[0].distance <= results[1].distance);
    }

    #[tokio::test]
    async fn identical_text_has_zero_distance() {
        let dir = tempdir().unwrap();
        let collection = SqliteCollection::create(dir.path(), "c", Arc::new(HashEmbedder))
            .await
            .unwrap();
        collection
            .add(&[record("1", "Burmese python")])
            .await
            .unwrap();
        let results = collection.query("Burmese python", 1).await.unwrap();
        assert_eq!(results[0].distance, 0.0);
    }

    #[tokio::test]
    async fn rejects_zero_results_and_empty_text() {
        let dir = tempdir().unwrap();
        let collection = SqliteCollection::create(dir.path(), "c", Arc::new(HashEmbedder))
            .await
            .unwrap();
        assert!(matches!(
            collection.query("python", 0).await,
            Err(CollectionError::InvalidQuery(_))
        ));
        assert!(matches!(
            collection.query("   ", 1).await,
            Err(CollectionError::InvalidQuery(_))
        ));
    }
}
