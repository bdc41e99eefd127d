//! Entity extraction capability
//!
//! Two interchangeable implementations of the same capability: a
//! deterministic regex extractor and a model-backed extractor that asks
//! the completion provider to act as a named-entity recognizer. The
//! graph builder depends only on the trait.

use ahash::AHashSet;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use super::EntityKind;
use crate::provider::{complete_bounded, CallPolicy, CompletionProvider, ProviderError};

/// One entity occurrence reported by an extractor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMention {
    pub name: String,
    pub kind: EntityKind,
}

#[async_trait]
pub trait EntityExtractor: Send + Sync {
    /// Report every entity occurrence in the text, in document order.
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedMention>, ProviderError>;
}

/// Deterministic pattern-based extractor
///
/// Recognizes component-suffix names (`AuthService`, `PaymentRouter`),
/// camel-case identifiers, and capitalized multi-word phrases. A name
/// matched by a more specific class is not re-reported by a weaker one,
/// but repeated occurrences of the same name all count.
pub struct PatternExtractor {
    service: Regex,
    camel_case: Regex,
    proper_noun: Regex,
}

impl PatternExtractor {
    pub fn new() -> Self {
        Self {
            service: Regex::new(
                r"\b([A-Z][A-Za-z]*(?:Service|Router|Module|Engine|Manager|Controller|Handler))\b",
            )
            .expect("service pattern is valid"),
            camel_case: Regex::new(r"\b[A-Z][a-z]+(?:[A-Z][a-z0-9]+)+\b")
                .expect("camel-case pattern is valid"),
            proper_noun: Regex::new(r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b")
                .expect("proper-noun pattern is valid"),
        }
    }

    fn extract_sync(&self, text: &str) -> Vec<ExtractedMention> {
        let mut mentions = Vec::new();
        let mut services: AHashSet<String> = AHashSet::new();
        let mut identifiers: AHashSet<String> = AHashSet::new();

        for m in self.service.find_iter(text) {
            services.insert(m.as_str().to_string());
            mentions.push(ExtractedMention {
                name: m.as_str().to_string(),
                kind: EntityKind::Service,
            });
        }

        for m in self.camel_case.find_iter(text) {
            let name = m.as_str();
            if services.contains(name) {
                continue;
            }
            identifiers.insert(name.to_string());
            mentions.push(ExtractedMention {
                name: name.to_string(),
                kind: EntityKind::Identifier,
            });
        }

        for m in self.proper_noun.find_iter(text) {
            let name = m.as_str();
            if name.len() <= 2 || services.contains(name) || identifiers.contains(name) {
                continue;
            }
            mentions.push(ExtractedMention {
                name: name.to_string(),
                kind: EntityKind::Generic,
            });
        }

        mentions
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityExtractor for PatternExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedMention>, ProviderError> {
        Ok(self.extract_sync(text))
    }
}

const NER_PROMPT: &str = "Extract named entities from the text below. Report services \
and components, technical identifiers, and other named concepts.\n\
Respond with a JSON array only, one object per occurrence:\n\
[{\"name\": \"AuthService\", \"kind\": \"SERVICE\"}]\n\
Valid kinds: SERVICE, IDENTIFIER, GENERIC.\n\nText:\n";

/// Model-backed extractor using the completion provider as an NER
pub struct LlmExtractor {
    provider: Arc<dyn CompletionProvider>,
    policy: CallPolicy,
}

impl LlmExtractor {
    pub fn new(provider: Arc<dyn CompletionProvider>, policy: CallPolicy) -> Self {
        Self { provider, policy }
    }

    fn parse_reply(reply: &str) -> Result<Vec<ExtractedMention>, ProviderError> {
        let value = salvage_json_array(reply).ok_or_else(|| {
            ProviderError::Failure("no JSON array found in extractor reply".to_string())
        })?;

        let items = value
            .as_array()
            .ok_or_else(|| ProviderError::Failure("extractor reply is not an array".to_string()))?;

        let mut mentions = Vec::new();
        for item in items {
            let Some(name) = item.get("name").and_then(Value::as_str) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let kind = match item.get("kind").and_then(Value::as_str) {
                Some("SERVICE") => EntityKind::Service,
                Some("IDENTIFIER") => EntityKind::Identifier,
                _ => EntityKind::Generic,
            };
            mentions.push(ExtractedMention {
                name: name.to_string(),
                kind,
            });
        }
        Ok(mentions)
    }
}

#[async_trait]
impl EntityExtractor for LlmExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedMention>, ProviderError> {
        let prompt = format!("{}{}", NER_PROMPT, text);
        let reply = complete_bounded(self.provider.as_ref(), &prompt, "", &self.policy).await?;
        Self::parse_reply(&reply)
    }
}

/// Pull a JSON array out of free-form model output.
///
/// Tries a direct parse, then the outermost bracket span, then a fenced
/// code block.
fn salvage_json_array(text: &str) -> Option<Value> {
    let trimmed = text.trim().trim_start_matches('\u{feff}');

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Some(value);
            }
        }
    }

    if let Some(start) = trimmed.find("```") {
        let body = &trimmed[start + 3..];
        let body = body.strip_prefix("json").unwrap_or(body);
        if let Some(end) = body.find("```") {
            if let Ok(value) = serde_json::from_str::<Value>(body[..end].trim()) {
                return Some(value);
            }
        }
    }

    None
}
