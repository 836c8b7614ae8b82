//! One-time setup: text files → `Pythons` table → vector collection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info};

use super::collection::{CollectionError, CollectionRecord, SqliteCollection};
use super::embedding::Embedder;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("{} is missing", .0.display())]
    MissingDirectory(PathBuf),

    #[error("no text files found in {}", .0.display())]
    NoTextFiles(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("seed table is empty")]
    EmptyTable,

    #[error(transparent)]
    Collection(#[from] CollectionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SeedReport {
    pub inserted: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SeedRow {
    pub id: i64,
    pub subject: String,
    pub text: String,
}

pub async fn connect_seed_db(db_path: &Path) -> Result<SqlitePool, SeedError> {
    let parent = db_path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() && !parent.is_dir() {
        return Err(SeedError::MissingDirectory(parent.to_path_buf()));
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    sqlx::migrate!("./migrations/seed").run(&pool).await?;
    Ok(pool)
}

/// Reads `*.txt` files as `(subject, text)`, subject being the file stem.
pub fn read_text_files(text_dir: &Path) -> Result<Vec<(String, String)>, SeedError> {
    if !text_dir.is_dir() {
        return Err(SeedError::MissingDirectory(text_dir.to_path_buf()));
    }

    let entries = std::fs::read_dir(text_dir)
        .map_err(|source| SeedError::Io {
            path: text_dir.to_path_buf(),
            source,
        })?
        .map(|entry| entry.map(|e| e.path()));
    let paths = text_file_paths(text_dir, entries)?;

    paths
        .into_iter()
        .map(|path| {
            let text = std::fs::read_to_string(&path).map_err(|source| SeedError::Io {
                path: path.clone(),
                source,
            })?;
            let subject = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok((subject, text))
        })
        .collect()
}

/// Sorted `*.txt` paths among `entries`. An unreadable entry fails the whole
/// listing.
fn text_file_paths(
    text_dir: &Path,
    entries: impl Iterator<Item = std::io::Result<PathBuf>>,
) -> Result<Vec<PathBuf>, SeedError> {
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|source| SeedError::Io {
            path: text_dir.to_path_buf(),
            source,
        })?;
        if path.extension().map(|ext| ext == "txt").unwrap_or(false) {
            paths.push(path);
        }
    }
    paths.sort();

    if paths.is_empty() {
        return Err(SeedError::NoTextFiles(text_dir.to_path_buf()));
    }
    Ok(paths)
}

/// Inserts every text file into the seed table. Duplicate subjects are skipped.
pub async fn seed_table(pool: &SqlitePool, text_dir: &Path) -> Result<SeedReport, SeedError> {
    let mut report = SeedReport::default();

    for (subject, text) in read_text_files(text_dir)? {
        let preview: String = text.chars().take(20).collect();
        info!("adding \"{}\" w. text {}...", subject, preview);

        let inserted = sqlx::query("INSERT INTO Pythons (subject, text) VALUES (?, ?)")
            .bind(&subject)
            .bind(&text)
            .execute(pool)
            .await;

        match inserted {
            Ok(_) => report.inserted += 1,
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                error!(
                    "Error in inserting data for {}: probably not a unique subject",
                    subject
                );
                report.skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(report)
}

pub async fn load_rows(pool: &SqlitePool) -> Result<Vec<SeedRow>, SeedError> {
    let rows = sqlx::query_as::<_, SeedRow>("SELECT id, subject, text FROM Pythons ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Creates `name` under `store_dir` and fills it from the seed table. A failed
/// build leaves no collection behind, so it can simply be rerun.
pub async fn build_collection(
    pool: &SqlitePool,
    store_dir: &Path,
    name: &str,
    embedder: Arc<dyn Embedder>,
) -> Result<SqliteCollection, SeedError> {
    let rows = load_rows(pool).await?;
    let first = rows.first().ok_or(SeedError::EmptyTable)?;
    info!("Got documents, example document: {:?}", first.subject);

    let records: Vec<CollectionRecord> = rows
        .iter()
        .map(|row| CollectionRecord {
            id: row.id.to_string(),
            document: format!("{} {}", row.subject, row.text),
            metadata: serde_json::json!({ "section": row.subject }),
        })
        .collect();

    let collection = SqliteCollection::create_with(store_dir, name, embedder, &records).await?;
    info!("Added {} documents to collection '{}'", records.len(), name);
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::embedding::{EmbeddingError, HashEmbedder};
    use crate::retrieval::{get_documents, VectorCollection};
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Unreachable("connection refused".to_string()))
        }
    }

    fn write_fixture(dir: &Path) {
        let texts = dir.join("python_wiki");
        std::fs::create_dir_all(&texts).unwrap();
        std::fs::write(
            texts.join("Pythonidae.txt"),
            "Python taxonomy: in taxonomy the python family is Pythonidae.",
        )
        .unwrap();
        std::fs::write(
            texts.join("Ball python.txt"),
            "The ball python is a small species kept as a pet.",
        )
        .unwrap();
        std::fs::write(
            texts.join("Monty Python.txt"),
            "Monty Python was a British comedy troupe.",
        )
        .unwrap();
        std::fs::write(texts.join("notes.md"), "ignored").unwrap();
    }

    #[test]
    fn reads_only_text_files_with_stem_as_subject() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path());
        let files = read_text_files(&dir.path().join("python_wiki")).unwrap();
        let subjects: Vec<&str> = files.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(subjects, vec!["Ball python", "Monty Python", "Pythonidae"]);
    }

    #[test]
    fn missing_or_empty_directories_are_errors() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            read_text_files(&dir.path().join("nope")),
            Err(SeedError::MissingDirectory(_))
        ));
        assert!(matches!(
            read_text_files(dir.path()),
            Err(SeedError::NoTextFiles(_))
        ));
    }

    #[test]
    fn unreadable_entries_fail_the_listing() {
        let dir = Path::new("python_wiki");
        let entries = vec![
            Ok(dir.join("Pythonidae.txt")),
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")),
            Ok(dir.join("Ball python.txt")),
        ];
        let err = text_file_paths(dir, entries.into_iter()).unwrap_err();
        assert!(matches!(err, SeedError::Io { ref path, .. } if path == dir));
    }

    #[tokio::test]
    async fn reseeding_skips_duplicate_subjects() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path());
        let pool = connect_seed_db(&dir.path().join("python.db")).await.unwrap();

        let first = seed_table(&pool, &dir.path().join("python_wiki")).await.unwrap();
        assert_eq!(first, SeedReport { inserted: 3, skipped: 0 });

        let second = seed_table(&pool, &dir.path().join("python_wiki")).await.unwrap();
        assert_eq!(second, SeedReport { inserted: 0, skipped: 3 });
        assert_eq!(load_rows(&pool).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn seeded_collection_answers_filtered_queries() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path());
        let pool = connect_seed_db(&dir.path().join("python.db")).await.unwrap();
        seed_table(&pool, &dir.path().join("python_wiki")).await.unwrap();

        let store = dir.path().join("chroma");
        let collection = build_collection(&pool, &store, "python_wiki", Arc::new(HashEmbedder))
            .await
            .unwrap();
        assert_eq!(collection.count().await.unwrap(), 3);

        let nearest = collection.query("python taxonomy", 5).await.unwrap();
        assert_eq!(nearest.len(), 3);
        assert!(nearest[0].document.starts_with("Pythonidae"));

        let docs = get_documents(&collection, "python taxonomy", 5, 0.9)
            .await
            .unwrap();
        assert!(!docs.is_empty());
        assert!(docs[0].document.starts_with("Pythonidae"));
        assert!(docs.iter().all(|d| d.distance < 0.9));
        assert!(docs.windows(2).all(|w| w[0].distance <= w[1].distance));
        let expected = nearest.iter().filter(|d| d.distance < 0.9).count();
        assert_eq!(docs.len(), expected);

        // the store is one-time setup
        let again = build_collection(&pool, &store, "python_wiki", Arc::new(HashEmbedder)).await;
        assert!(matches!(
            again,
            Err(SeedError::Collection(CollectionError::AlreadyExists(_)))
        ));
    }

    #[tokio::test]
    async fn failed_build_can_be_rerun() {
        let dir = tempdir().unwrap();
        write_fixture(dir.path());
        let pool = connect_seed_db(&dir.path().join("python.db")).await.unwrap();
        seed_table(&pool, &dir.path().join("python_wiki")).await.unwrap();
        let store = dir.path().join("chroma");

        let failed = build_collection(&pool, &store, "python_wiki", Arc::new(DownEmbedder)).await;
        assert!(matches!(
            failed,
            Err(SeedError::Collection(CollectionError::Embedding(_)))
        ));

        let collection = build_collection(&pool, &store, "python_wiki", Arc::new(HashEmbedder))
            .await
            .unwrap();
        assert_eq!(collection.count().await.unwrap(), 3);
    }
}
