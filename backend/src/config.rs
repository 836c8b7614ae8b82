use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_COLLECTION_NAME: &str = "python_wiki";
pub const SEED_TABLE_NAME: &str = "Pythons";

const DEFAULT_INFERENCE_URL: &str = "https://router.huggingface.co/v1/chat/completions";
const DEFAULT_INFERENCE_MODEL: &str = "Qwen/Qwen2.5-Coder-32B-Instruct";

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl LogConfig {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        LogConfig {
            level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            json: lookup("LOG_FORMAT")
                .map(|format| format.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }
}

/// Settings for the retrieval service.
#[derive(Debug, Clone, Deserialize)]
pub struct RagConfig {
    pub host: [u8; 4],
    pub port: u16,
    pub vector_store_dir: PathBuf,
    pub collection_name: String,
    pub embedding_service_url: Option<String>,
    pub default_n_results: usize,
    pub default_distance_threshold: f32,
    pub log: LogConfig,
}

impl RagConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = RagConfig {
            host: parse_host(lookup("RAG_HOST").as_deref().unwrap_or("127.0.0.1"))?,
            port: lookup("RAG_PORT")
                .unwrap_or_else(|| "9000".to_string())
                .parse()
                .context("RAG_PORT must be a port number")?,
            vector_store_dir: lookup("VECTOR_STORE_DIR")
                .unwrap_or_else(|| "./data/chroma/".to_string())
                .into(),
            collection_name: lookup("COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_COLLECTION_NAME.to_string()),
            embedding_service_url: lookup("EMBEDDING_SERVICE_URL").filter(|url| !url.is_empty()),
            default_n_results: lookup("DEFAULT_N_RESULTS")
                .unwrap_or_else(|| "2".to_string())
                .parse()
                .context("DEFAULT_N_RESULTS must be a positive integer")?,
            default_distance_threshold: lookup("DEFAULT_DISTANCE_THRESHOLD")
                .unwrap_or_else(|| "1.1".to_string())
                .parse()
                .context("DEFAULT_DISTANCE_THRESHOLD must be a number")?,
            log: LogConfig::from_lookup(&lookup),
        };

        anyhow::ensure!(
            config.default_n_results >= 1,
            "DEFAULT_N_RESULTS must be a positive integer, got {}",
            config.default_n_results
        );
        anyhow::ensure!(
            config.default_distance_threshold >= 0.0,
            "DEFAULT_DISTANCE_THRESHOLD must not be negative, got {}",
            config.default_distance_threshold
        );
        Ok(config)
    }
}

/// Settings for the agent orchestration service.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub host: [u8; 4],
    pub port: u16,
    /// Full URL of the retrieval service's `/get_documents` endpoint.
    pub retrieval_url: String,
    pub retrieval_timeout_secs: u64,
    pub inference_url: String,
    pub inference_model: String,
    pub inference_api_key: Option<String>,
    pub inference_timeout_secs: u64,
    pub web_timeout_secs: u64,
    pub min_query_words: usize,
    pub log: LogConfig,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // the retrieval service location has no sensible default
        let db_host = lookup("DB_HOST")
            .filter(|value| !value.is_empty())
            .context("DB_HOST must be set")?;
        let db_port = lookup("DB_PORT")
            .filter(|value| !value.is_empty())
            .context("DB_PORT must be set")?;

        Ok(AgentConfig {
            host: parse_host(lookup("AGENT_HOST").as_deref().unwrap_or("127.0.0.1"))?,
            port: lookup("AGENT_PORT")
                .unwrap_or_else(|| "8000".to_string())
                .parse()
                .context("AGENT_PORT must be a port number")?,
            retrieval_url: format!("http://{}:{}/get_documents", db_host, db_port),
            retrieval_timeout_secs: lookup("RETRIEVAL_TIMEOUT_SECS")
                .unwrap_or_else(|| "10".to_string())
                .parse()
                .context("RETRIEVAL_TIMEOUT_SECS must be an integer")?,
            inference_url: lookup("INFERENCE_URL")
                .unwrap_or_else(|| DEFAULT_INFERENCE_URL.to_string()),
            inference_model: lookup("INFERENCE_MODEL")
                .unwrap_or_else(|| DEFAULT_INFERENCE_MODEL.to_string()),
            inference_api_key: lookup("INFERENCE_API_KEY")
                .or_else(|| lookup("HF_TOKEN"))
                .filter(|key| !key.trim().is_empty()),
            inference_timeout_secs: lookup("INFERENCE_TIMEOUT_SECS")
                .unwrap_or_else(|| "60".to_string())
                .parse()
                .context("INFERENCE_TIMEOUT_SECS must be an integer")?,
            web_timeout_secs: lookup("WEB_TIMEOUT_SECS")
                .unwrap_or_else(|| "20".to_string())
                .parse()
                .context("WEB_TIMEOUT_SECS must be an integer")?,
            min_query_words: lookup("MIN_QUERY_WORDS")
                .unwrap_or_else(|| "3".to_string())
                .parse()
                .context("MIN_QUERY_WORDS must be an integer")?,
            log: LogConfig::from_lookup(&lookup),
        })
    }

    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_secs(self.retrieval_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs)
    }

    pub fn web_timeout(&self) -> Duration {
        Duration::from_secs(self.web_timeout_secs)
    }
}

/// Settings for the one-time `setup_db` run.
#[derive(Debug, Clone, Deserialize)]
pub struct SetupConfig {
    pub seed_db_path: PathBuf,
    pub text_files_dir: PathBuf,
    pub vector_store_dir: PathBuf,
    pub collection_name: String,
    pub embedding_service_url: Option<String>,
    pub log: LogConfig,
}

impl SetupConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(SetupConfig {
            seed_db_path: lookup("SEED_DB_PATH")
                .unwrap_or_else(|| "data/sqlite/python.db".to_string())
                .into(),
            text_files_dir: lookup("TEXT_FILES_DIR")
                .unwrap_or_else(|| "data/python_wiki/".to_string())
                .into(),
            vector_store_dir: lookup("VECTOR_STORE_DIR")
                .unwrap_or_else(|| "./data/chroma/".to_string())
                .into(),
            collection_name: lookup("COLLECTION_NAME")
                .unwrap_or_else(|| DEFAULT_COLLECTION_NAME.to_string()),
            embedding_service_url: lookup("EMBEDDING_SERVICE_URL").filter(|url| !url.is_empty()),
            log: LogConfig::from_lookup(&lookup),
        })
    }
}

fn parse_host(raw: &str) -> Result<[u8; 4]> {
    let addr: std::net::Ipv4Addr = raw
        .parse()
        .with_context(|| format!("'{}' is not an IPv4 address", raw))?;
    Ok(addr.octets())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn agent_config_requires_retrieval_location() {
        let err = AgentConfig::from_lookup(lookup_from(&[("DB_PORT", "9000")])).unwrap_err();
        assert!(err.to_string().contains("DB_HOST"));

        let err = AgentConfig::from_lookup(lookup_from(&[("DB_HOST", "db")])).unwrap_err();
        assert!(err.to_string().contains("DB_PORT"));
    }

    #[test]
    fn agent_config_builds_retrieval_url_and_defaults() {
        let config =
            AgentConfig::from_lookup(lookup_from(&[("DB_HOST", "db"), ("DB_PORT", "9000")]))
                .unwrap();
        assert_eq!(config.retrieval_url, "http://db:9000/get_documents");
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, [127, 0, 0, 1]);
        assert_eq!(config.min_query_words, 3);
        assert_eq!(config.retrieval_timeout(), Duration::from_secs(10));
        assert!(config.inference_api_key.is_none());
        assert!(!config.log.json);
    }

    #[test]
    fn agent_config_falls_back_to_hf_token() {
        let config = AgentConfig::from_lookup(lookup_from(&[
            ("DB_HOST", "db"),
            ("DB_PORT", "9000"),
            ("HF_TOKEN", "hf_abc"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();
        assert_eq!(config.inference_api_key.as_deref(), Some("hf_abc"));
        assert!(config.log.json);
    }

    #[test]
    fn rag_config_defaults() {
        let config = RagConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.collection_name, "python_wiki");
        assert_eq!(config.default_n_results, 2);
        assert!((config.default_distance_threshold - 1.1).abs() < f32::EPSILON);
        assert!(config.embedding_service_url.is_none());
    }

    #[test]
    fn rejects_malformed_port() {
        let err = RagConfig::from_lookup(lookup_from(&[("RAG_PORT", "nine")])).unwrap_err();
        assert!(err.to_string().contains("RAG_PORT"));
    }

    #[test]
    fn rejects_defaults_every_request_would_fail_on() {
        let err = RagConfig::from_lookup(lookup_from(&[("DEFAULT_N_RESULTS", "0")])).unwrap_err();
        assert!(err.to_string().contains("DEFAULT_N_RESULTS"));

        let err = RagConfig::from_lookup(lookup_from(&[("DEFAULT_DISTANCE_THRESHOLD", "-0.5")]))
            .unwrap_err();
        assert!(err.to_string().contains("DEFAULT_DISTANCE_THRESHOLD"));

        let err =
            RagConfig::from_lookup(lookup_from(&[("DEFAULT_DISTANCE_THRESHOLD", "NaN")])).unwrap_err();
        assert!(err.to_string().contains("DEFAULT_DISTANCE_THRESHOLD"));
    }
}
