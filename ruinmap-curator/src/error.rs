//! Per-Discovery processing errors
//!
//! The `Display` text of a [`ProcessingError`] is what a failed Discovery
//! shows curators as its reason.

use crate::services::llm_client::LlmError;
use crate::services::verdict_parser::VerdictParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The primary model could not be reached
    #[error("Language model unavailable: {0}")]
    Transport(#[from] LlmError),

    #[error("Malformed verdict: {0}")]
    MalformedVerdict(#[from] VerdictParseError),

    /// The adjudication prompt could not be assembled
    #[error("Unencodable adjudication request: {0}")]
    Request(#[from] serde_json::Error),

    /// Stored data contradicts itself (e.g. a verdict names a record that does not exist)
    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Database error: {0}")]
    Database(ruinmap_common::Error),
}

/// Missing records and refused transitions are integrity failures;
/// everything else from the store is a database failure
impl From<ruinmap_common::Error> for ProcessingError {
    fn from(err: ruinmap_common::Error) -> Self {
        if err.is_integrity_violation() {
            ProcessingError::Integrity(err.to_string())
        } else {
            ProcessingError::Database(err)
        }
    }
}

impl From<sqlx::Error> for ProcessingError {
    fn from(err: sqlx::Error) -> Self {
        ProcessingError::Database(ruinmap_common::Error::Database(err))
    }
}

pub type ProcessingResult<T> = std::result::Result<T, ProcessingError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_missing_record_is_integrity_failure() {
        let id = Uuid::new_v4();
        let err = ProcessingError::from(ruinmap_common::Error::SiteNotFound(id));
        assert!(matches!(err, ProcessingError::Integrity(_)));
        assert!(err.to_string().contains(&id.to_string()));

        let err = ProcessingError::from(ruinmap_common::Error::Internal("pool closed".to_string()));
        assert!(matches!(err, ProcessingError::Database(_)));
    }

    #[test]
    fn test_encoding_failure_is_its_own_kind() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = ProcessingError::from(json_err);
        assert!(matches!(err, ProcessingError::Request(_)));
        assert!(err.to_string().starts_with("Unencodable adjudication request"));
    }
}
