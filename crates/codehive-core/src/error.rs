//! Error types shared across Codehive crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodehiveError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task store error: {0}")]
    Store(String),

    #[error("Invalid payload: {0}")]
    Payload(String),

    #[error("Reporter error: {0}")]
    Reporter(String),
}

pub type Result<T> = std::result::Result<T, CodehiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = CodehiveError::Payload("missing repository_id".into());
        assert_eq!(err.to_string(), "Invalid payload: missing repository_id");
    }

    #[test]
    fn test_from_serde_error() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: CodehiveError = parse.unwrap_err().into();
        assert!(matches!(err, CodehiveError::Serialization(_)));
    }
}
