//! Error taxonomy shared by the coordinator and the player agent
//!
//! The variants map one-to-one onto the protocol error classes: a device
//! reacts differently to `Unauthorized` (stop polling, re-provision) than to
//! `Transient` (retry on the next scheduled tick), so the distinction is part
//! of the wire contract and not an implementation detail.

use actix_web::{http::StatusCode, HttpResponse};
use serde_json::json;

/// Signage gateway error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum SignageError {
    /// Credential missing, wrong, or rotated away
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown device, broadcast, update, or delivery row
    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal state machine transition
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Downloaded artifact does not match the catalog checksum
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Progress report below the recorded high-water mark
    #[error("invalid progress: reported {reported}% below recorded {recorded}%")]
    InvalidProgress { reported: u8, recorded: u8 },

    /// Network or timeout failure, always retryable
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed or out-of-range input
    #[error("validation failed: {0}")]
    Validation(String),

    /// Bad or missing configuration at startup
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        key: Option<String>,
    },

    /// Storage layer failure
    #[error("storage error: {0}")]
    Storage(String),
}

impl SignageError {
    /// Stable machine-readable code carried in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            SignageError::Unauthorized(_) => "unauthorized",
            SignageError::NotFound(_) => "not_found",
            SignageError::InvalidState(_) => "invalid_state",
            SignageError::ChecksumMismatch { .. } => "checksum_mismatch",
            SignageError::InvalidProgress { .. } => "invalid_progress",
            SignageError::Transient(_) => "transient",
            SignageError::Validation(_) => "validation",
            SignageError::Configuration { .. } => "configuration",
            SignageError::Storage(_) => "storage",
        }
    }

    /// Whether the device sync loop may retry the same request unchanged
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SignageError::Transient(_) | SignageError::Storage(_)
        )
    }
}

impl actix_web::ResponseError for SignageError {
    fn status_code(&self) -> StatusCode {
        match self {
            SignageError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SignageError::NotFound(_) => StatusCode::NOT_FOUND,
            SignageError::InvalidState(_) => StatusCode::CONFLICT,
            SignageError::ChecksumMismatch { .. } | SignageError::InvalidProgress { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            SignageError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            SignageError::Validation(_) => StatusCode::BAD_REQUEST,
            SignageError::Configuration { .. } | SignageError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        assert_eq!(
            SignageError::Unauthorized("bad key".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            SignageError::NotFound("device".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SignageError::InvalidState("cancel on expired".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            SignageError::InvalidProgress {
                reported: 40,
                recorded: 60
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            SignageError::Transient("timeout".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn transient_classification() {
        assert!(SignageError::Transient("io".into()).is_transient());
        assert!(!SignageError::Unauthorized("rotated".into()).is_transient());
        assert!(!SignageError::ChecksumMismatch {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_transient());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            SignageError::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .code(),
            "checksum_mismatch"
        );
        assert_eq!(
            SignageError::InvalidProgress {
                reported: 1,
                recorded: 2
            }
            .code(),
            "invalid_progress"
        );
    }
}
