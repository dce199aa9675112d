//! Error types for Quill Core.
//!
//! Only batch-level failures surface here. Per-row problems (timeouts, upstream
//! errors, unparseable replies) are recorded on the row instead and never abort a
//! batch.

use crate::config::ConfigError;
use crate::prompts::PromptError;
use quill_abstraction::ModelError;
use thiserror::Error;

/// Core error type for enrichment operations.
#[derive(Error, Debug)]
pub enum EnrichError {
    /// Input is malformed or missing required fields; raised before dispatch.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Configuration could not be resolved; raised before dispatch.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Prompt could not be selected or loaded.
    #[error("Prompt error: {0}")]
    Prompt(#[from] PromptError),

    /// The upstream model client could not be constructed.
    #[error("Model setup error: {0}")]
    Model(#[from] ModelError),

    /// The output artifact could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for enrichment operations.
pub type Result<T> = std::result::Result<T, EnrichError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_conversion() {
        let err: EnrichError = ConfigError::MissingApiKey.into();
        assert!(matches!(err, EnrichError::Configuration(ConfigError::MissingApiKey)));
        assert!(err.to_string().starts_with("Configuration error: No API key configured"));
    }

    #[test]
    fn test_prompt_conversion() {
        let err: EnrichError = PromptError::UnknownId("x".to_string()).into();
        assert_eq!(err.to_string(), "Prompt error: unknown prompt id: x");
    }

    #[test]
    fn test_model_conversion() {
        let err: EnrichError = ModelError::RequestError("no TLS backend".to_string()).into();
        assert_eq!(err.to_string(), "Model setup error: Request Error: no TLS backend");
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let err: EnrichError = io_err.into();
        assert!(matches!(err, EnrichError::Io(_)));
    }

    #[test]
    fn test_validation_display() {
        let err = EnrichError::Validation("no rows".to_string());
        assert_eq!(err.to_string(), "Invalid input: no rows");
    }
}
