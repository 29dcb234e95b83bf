//! Error types shared across the FOCUS workspace

use thiserror::Error;

/// Result type alias for FOCUS operations
pub type Result<T> = std::result::Result<T, FocusError>;

/// Error kinds surfaced by the pipeline.
///
/// `Config` and `Extraction` stop a run. `Mapping` and `Validation` describe a
/// single record and are normally carried as data in batch summaries rather
/// than propagated.
#[derive(Error, Debug)]
pub enum FocusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl FocusError {
    /// Short classification used in failure entries and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            FocusError::Io(_) => "IoError",
            FocusError::Serialization(_) => "SerializationError",
            FocusError::Config(_) => "ConfigurationError",
            FocusError::Extraction(_) => "ExtractionError",
            FocusError::Mapping(_) => "MappingError",
            FocusError::Validation(_) => "ValidationError",
            FocusError::Parse(_) => "ParseError",
        }
    }

    /// Whether this error must abort the current run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FocusError::Config(_) | FocusError::Extraction(_) | FocusError::Io(_)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(FocusError::Config("x".into()).kind(), "ConfigurationError");
        assert_eq!(FocusError::Mapping("x".into()).kind(), "MappingError");
        assert_eq!(FocusError::Validation("x".into()).kind(), "ValidationError");
    }

    #[test]
    fn test_record_level_errors_are_not_fatal() {
        assert!(FocusError::Config("missing name".into()).is_fatal());
        assert!(FocusError::Extraction("timeout".into()).is_fatal());
        assert!(!FocusError::Mapping("bad record".into()).is_fatal());
        assert!(!FocusError::Validation("negative cost".into()).is_fatal());
    }

    #[test]
    fn test_display_includes_message() {
        let err = FocusError::Extraction("HTTP 503 from /usage".into());
        assert_eq!(err.to_string(), "Extraction error: HTTP 503 from /usage");
    }
}
