//! Queue-backed mock providers for tests
//!
//! The completion mock replays scripted responses in order; the embedding
//! mock derives a deterministic bag-of-tokens vector so cosine similarity
//! between related texts behaves plausibly without a model download.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CompletionProvider, EmbeddingProvider, ProviderError};

enum Scripted {
    Response(String),
    Failure(String),
}

/// Completion provider replaying a scripted queue of responses
#[derive(Clone, Default)]
pub struct MockCompletion {
    queue: Arc<Mutex<VecDeque<Scripted>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, for exercising timeout paths
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_response(&self, text: impl Into<String>) {
        self.queue
            .lock()
            .expect("mock queue poisoned")
            .push_back(Scripted::Response(text.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.queue
            .lock()
            .expect("mock queue poisoned")
            .push_back(Scripted::Failure(message.into()));
    }

    /// Number of complete() calls observed
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for MockCompletion {
    async fn complete(&self, _prompt: &str, _context: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .queue
            .lock()
            .expect("mock queue poisoned")
            .pop_front();
        match next {
            Some(Scripted::Response(text)) => Ok(text),
            Some(Scripted::Failure(message)) => Err(ProviderError::Failure(message)),
            None => Err(ProviderError::Unavailable(
                "no scripted response left".to_string(),
            )),
        }
    }
}

/// Deterministic embedding provider for tests
///
/// Each lowercase whitespace token is hashed into one of `dimension`
/// buckets; the resulting count vector is L2-normalized. Identical input
/// always embeds identically.
#[derive(Clone)]
pub struct MockEmbedding {
    dimension: usize,
}

impl MockEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in token.bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x100_0000_01b3);
            }
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbedding {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_embedding_deterministic() {
        let provider = MockEmbedding::default();
        let a = provider.embed_sync("AuthService handles user login");
        let b = provider.embed_sync("AuthService handles user login");
        assert_eq!(a, b);
    }

    #[test]
    fn test_mock_embedding_normalized() {
        let provider = MockEmbedding::default();
        let v = provider.embed_sync("payment routing through PaymentRouter");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_completion_replays_in_order() {
        let provider = MockCompletion::new();
        provider.push_response("first");
        provider.push_response("second");

        assert_eq!(provider.complete("p", "").await.unwrap(), "first");
        assert_eq!(provider.complete("p", "").await.unwrap(), "second");
        assert!(provider.complete("p", "").await.is_err());
    }
}
