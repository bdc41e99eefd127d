//! Ollama-backed completion provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CompletionProvider, ProviderError};

/// Completion provider talking to a local Ollama server
pub struct OllamaProvider {
    endpoint: String,
    model: String,
    http: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("HTTP client init failed: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into(),
            model: model.into(),
            http,
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, ProviderError> {
        let payload = GenerateRequest {
            model: &self.model,
            prompt,
            system: context,
            stream: false,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(Duration::ZERO)
                } else if e.is_connect() {
                    ProviderError::Unavailable(e.to_string())
                } else {
                    ProviderError::Failure(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| ProviderError::Failure(format!("completion backend status: {}", e)))?;

        let raw: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Failure(format!("unreadable completion reply: {}", e)))?;

        Ok(raw.response)
    }
}
