//! Error types for the ingestion pipeline
//!
//! [`PipelineError`] covers everything that stops a run: bad configuration
//! and failures while pulling data. Per-record problems are never raised;
//! they travel as [`crate::mapper::MappingError`] values inside batch results.

use focus_common::FocusError;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Source or provider configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport, auth or decode failure while pulling records
    #[error("Extraction from '{source_name}' failed: {message}")]
    Extraction {
        source_name: String,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to read Parquet: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn extraction(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Configuration errors are raised before any I/O takes place
    pub fn is_fatal_before_extraction(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<PipelineError> for FocusError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Configuration(msg) => FocusError::Config(msg),
            PipelineError::Io(err) => FocusError::Io(err),
            PipelineError::Json(err) => FocusError::Serialization(err),
            other => FocusError::Extraction(other.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_pre_extraction() {
        assert!(PipelineError::configuration("missing name").is_fatal_before_extraction());
        assert!(!PipelineError::extraction("s3", "timeout").is_fatal_before_extraction());
    }

    #[test]
    fn test_extraction_message_names_source() {
        let err = PipelineError::extraction("billing-bucket", "access denied");
        assert_eq!(
            err.to_string(),
            "Extraction from 'billing-bucket' failed: access denied"
        );
    }

    #[test]
    fn test_conversion_to_shared_error_keeps_kind() {
        let shared: FocusError = PipelineError::configuration("bad").into();
        assert_eq!(shared.kind(), "ConfigurationError");

        let shared: FocusError = PipelineError::extraction("api", "503").into();
        assert_eq!(shared.kind(), "ExtractionError");
        assert!(shared.is_fatal());
    }
}
