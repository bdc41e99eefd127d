//! Local embedding provider backed by FastEmbed
//!
//! Models download on first use to the Hugging Face cache; the default
//! all-MiniLM-L6-v2 model is ~90MB at 384 dimensions.

use ::fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{EmbeddingProvider, ProviderError};

/// FastEmbed provider for offline embedding generation
pub struct FastEmbedProvider {
    model: Arc<TextEmbedding>,
    dimension: usize,
}

impl FastEmbedProvider {
    pub fn new(model_name: &str) -> Result<Self, ProviderError> {
        let (embedding_model, dimension) = match model_name {
            "all-MiniLM-L6-v2" | "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
            other => {
                return Err(ProviderError::Unavailable(format!(
                    "unsupported embedding model: {}. Supported: all-MiniLM-L6-v2, bge-small-en-v1.5",
                    other
                )));
            }
        };

        info!(model = model_name, dimension, "initializing embedding model");

        let model = TextEmbedding::try_new(
            InitOptions::new(embedding_model).with_show_download_progress(true),
        )
        .map_err(|e| ProviderError::Unavailable(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            dimension,
        })
    }

    pub fn with_default_model() -> Result<Self, ProviderError> {
        Self::new("all-MiniLM-L6-v2")
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.is_empty() {
            return Err(ProviderError::Failure("cannot embed empty text".to_string()));
        }

        let mut embeddings = self
            .model
            .embed(vec![text.to_string()], None)
            .map_err(|e| ProviderError::Failure(e.to_string()))?;

        let embedding = embeddings
            .pop()
            .ok_or_else(|| ProviderError::Failure("backend returned no embedding".to_string()))?;

        if embedding.len() != self.dimension {
            return Err(ProviderError::Failure(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| ProviderError::Failure(e.to_string()))?;

        for embedding in &embeddings {
            if embedding.len() != self.dimension {
                return Err(ProviderError::Failure(format!(
                    "dimension mismatch: expected {}, got {}",
                    self.dimension,
                    embedding.len()
                )));
            }
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
