//! External collaborator boundary: embedding and completion providers
//!
//! The core never talks to a model backend directly. Both provider
//! capabilities are traits so backends can be swapped, and every call
//! site goes through the bounded wrappers which enforce a caller
//! timeout and at most one retry with backoff.

mod fastembed;
mod mock;
mod ollama;

pub use self::fastembed::FastEmbedProvider;
pub use mock::{MockCompletion, MockEmbedding};
pub use ollama::OllamaProvider;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider call failed: {0}")]
    Failure(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Produces fixed-length embedding vectors for text.
///
/// Must be deterministic for identical input within a session.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed multiple texts (batched where the backend supports it)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embedding dimension
    fn dimension(&self) -> usize;
}

/// Produces completion text from a prompt plus accumulated context.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, ProviderError>;
}

/// Timeout and retry bounds applied to every provider call
#[derive(Debug, Clone)]
pub struct CallPolicy {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Whether a single retry is attempted after a failure
    pub retry: bool,
    /// Delay before the retry attempt
    pub backoff: Duration,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: true,
            backoff: Duration::from_millis(500),
        }
    }
}

impl CallPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }
}

/// Run a completion call under the policy's timeout, retrying at most once.
pub async fn complete_bounded(
    provider: &dyn CompletionProvider,
    prompt: &str,
    context: &str,
    policy: &CallPolicy,
) -> Result<String, ProviderError> {
    match attempt_complete(provider, prompt, context, policy.timeout).await {
        Ok(text) => Ok(text),
        Err(err) if policy.retry => {
            warn!(error = %err, "completion attempt failed, retrying once");
            tokio::time::sleep(policy.backoff).await;
            attempt_complete(provider, prompt, context, policy.timeout).await
        }
        Err(err) => Err(err),
    }
}

/// Run an embedding call under the policy's timeout, retrying at most once.
pub async fn embed_bounded(
    provider: &dyn EmbeddingProvider,
    text: &str,
    policy: &CallPolicy,
) -> Result<Vec<f32>, ProviderError> {
    match attempt_embed(provider, text, policy.timeout).await {
        Ok(vector) => Ok(vector),
        Err(err) if policy.retry => {
            warn!(error = %err, "embedding attempt failed, retrying once");
            tokio::time::sleep(policy.backoff).await;
            attempt_embed(provider, text, policy.timeout).await
        }
        Err(err) => Err(err),
    }
}

async fn attempt_complete(
    provider: &dyn CompletionProvider,
    prompt: &str,
    context: &str,
    timeout: Duration,
) -> Result<String, ProviderError> {
    tokio::time::timeout(timeout, provider.complete(prompt, context))
        .await
        .map_err(|_| ProviderError::Timeout(timeout))?
}

async fn attempt_embed(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>, ProviderError> {
    tokio::time::timeout(timeout, provider.embed(text))
        .await
        .map_err(|_| ProviderError::Timeout(timeout))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_call_retries_once_then_succeeds() {
        let provider = MockCompletion::new();
        provider.push_failure("transient backend error");
        provider.push_response("recovered");

        let policy = CallPolicy::new(Duration::from_secs(1));
        let out = complete_bounded(&provider, "prompt", "", &policy)
            .await
            .unwrap();
        assert_eq!(out, "recovered");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_bounded_call_surfaces_failure_without_retry() {
        let provider = MockCompletion::new();
        provider.push_failure("down");
        provider.push_response("never reached");

        let policy = CallPolicy::new(Duration::from_secs(1)).no_retry();
        let err = complete_bounded(&provider, "prompt", "", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Failure(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_bounded_call_times_out() {
        let provider = MockCompletion::new().with_delay(Duration::from_millis(200));
        provider.push_response("too slow");
        provider.push_response("too slow");

        let policy = CallPolicy {
            timeout: Duration::from_millis(20),
            retry: true,
            backoff: Duration::from_millis(1),
        };
        let err = complete_bounded(&provider, "prompt", "", &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }
}
