//! Configuration validation

use super::Config;
use crate::error::{RagraphError, Result, ValidationError};

/// Validates configuration values before the system starts
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        if config.graph.min_mentions == 0 {
            errors.push(ValidationError::new(
                "graph.min_mentions",
                "must be at least 1",
            ));
        }

        if config.retrieval.top_k == 0 {
            errors.push(ValidationError::new("retrieval.top_k", "must be at least 1"));
        }

        if !(1..=8).contains(&config.retrieval.max_hops) {
            errors.push(ValidationError::new(
                "retrieval.max_hops",
                "must be between 1 and 8",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new("embedding.model", "must not be empty"));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "must be positive",
            ));
        }

        if config.embedding.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_secs",
                "must be positive",
            ));
        }

        if config.llm.endpoint.is_empty() {
            errors.push(ValidationError::new("llm.endpoint", "must not be empty"));
        }

        if config.llm.model.is_empty() {
            errors.push(ValidationError::new("llm.model", "must not be empty"));
        }

        if config.llm.timeout_secs == 0 {
            errors.push(ValidationError::new("llm.timeout_secs", "must be positive"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RagraphError::ConfigValidation { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_top_k_and_hops() {
        let mut config = Config::default();
        config.retrieval.top_k = 0;
        config.retrieval.max_hops = 0;

        let err = ConfigValidator::validate(&config).unwrap_err();
        match err {
            RagraphError::ConfigValidation { errors } => {
                assert_eq!(errors.len(), 2);
                assert!(errors.iter().any(|e| e.path == "retrieval.top_k"));
                assert!(errors.iter().any(|e| e.path == "retrieval.max_hops"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_empty_provider_settings() {
        let mut config = Config::default();
        config.llm.endpoint = String::new();
        config.embedding.model = String::new();

        assert!(ConfigValidator::validate(&config).is_err());
    }
}
