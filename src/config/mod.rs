//! Configuration management
//!
//! Configuration loads from a TOML file, applies environment variable
//! overrides, and is validated before use. All tunables default to the
//! values the retrieval and graph algorithms were designed around.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RagraphError, Result};
use crate::provider::CallPolicy;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Which entity extraction backend the graph builder uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Deterministic regex extraction
    Pattern,
    /// Completion-provider-backed named entity recognition
    Model,
}

/// Graph construction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Entities mentioned fewer times are dropped at finalization
    pub min_mentions: usize,
    /// Extraction backend
    pub extractor: ExtractorKind,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            min_mentions: 2,
            extractor: ExtractorKind::Pattern,
        }
    }
}

/// Retrieval settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Default result count
    pub top_k: usize,
    /// Bound on graph expansion depth
    pub max_hops: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_hops: 2,
        }
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            timeout_secs: 10,
        }
    }
}

/// Completion provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Whether a failed call is retried once with backoff
    pub retry: bool,
    pub backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "llama3".to_string(),
            timeout_secs: 30,
            retry: true,
            backoff_ms: 500,
        }
    }
}

impl LlmConfig {
    /// Timeout/retry bounds applied to completion calls
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            retry: self.retry,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }
}

impl EmbeddingConfig {
    /// Timeout/retry bounds applied to embedding calls
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy::new(Duration::from_secs(self.timeout_secs))
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RagraphError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| RagraphError::Io {
            source: e,
            context: format!("failed to read config file {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| RagraphError::Io {
            source: e,
            context: format!("failed to write config file {:?}", path),
        })
    }

    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ragraph")
            .join("config.toml")
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("RAGRAPH_TOP_K") {
            if let Ok(parsed) = v.parse() {
                self.retrieval.top_k = parsed;
            }
        }
        if let Ok(v) = std::env::var("RAGRAPH_MAX_HOPS") {
            if let Ok(parsed) = v.parse() {
                self.retrieval.max_hops = parsed;
            }
        }
        if let Ok(v) = std::env::var("RAGRAPH_MIN_MENTIONS") {
            if let Ok(parsed) = v.parse() {
                self.graph.min_mentions = parsed;
            }
        }
        if let Ok(v) = std::env::var("RAGRAPH_LLM_ENDPOINT") {
            self.llm.endpoint = v;
        }
        if let Ok(v) = std::env::var("RAGRAPH_LLM_MODEL") {
            self.llm.model = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
        assert_eq!(config.graph.min_mentions, 2);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.graph.extractor, ExtractorKind::Pattern);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.retrieval.top_k = 7;
        config.llm.model = "mistral".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retrieval.top_k, 7);
        assert_eq!(loaded.llm.model, "mistral");
    }

    #[test]
    fn test_missing_file_is_distinct_error() {
        let err = Config::load(Path::new("/nonexistent/ragraph.toml")).unwrap_err();
        assert!(matches!(err, RagraphError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retrieval]\ntop_k = 3\nmax_hops = 2\n").unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.retrieval.top_k, 3);
        assert_eq!(loaded.graph.min_mentions, 2);
    }
}
