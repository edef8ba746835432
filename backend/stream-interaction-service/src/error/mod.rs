use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("payment failed: {0}")]
    Payment(String),

    #[error("invalid state: cannot {command} while stream is {from}")]
    InvalidState { from: String, command: String },

    #[error("session queue saturated (capacity {capacity})")]
    Backpressure { capacity: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound(format!("{} {}", what, id))
    }

    pub fn invalid_state(from: impl std::fmt::Display, command: &str) -> Self {
        EngineError::InvalidState {
            from: from.to_string(),
            command: command.to_string(),
        }
    }

    /// Stable machine-readable code, used in outbound error frames
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::Permission(_) => "permission_error",
            EngineError::Payment(_) => "payment_error",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::Backpressure { .. } => "backpressure",
            EngineError::Config(_) => "config_error",
            EngineError::Internal(_) => "internal_error",
        }
    }

    /// Only a saturated queue is worth retrying; everything else is permanent
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Backpressure { .. })
    }

    /// Returns HTTP status code for an outer API layer
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::Payment(_) => 402,
            EngineError::Permission(_) => 403,
            EngineError::NotFound(_) => 404,
            EngineError::InvalidState { .. } => 409,
            EngineError::Backpressure { .. } => 503,
            EngineError::Config(_) | EngineError::Internal(_) => 500,
        }
    }
}

impl From<validator::ValidationErrors> for EngineError {
    fn from(errors: validator::ValidationErrors) -> Self {
        EngineError::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(EngineError::validation("bad").status_code(), 400);
        assert_eq!(EngineError::not_found("message", 7).status_code(), 404);
        assert_eq!(EngineError::Payment("declined".into()).status_code(), 402);
        assert_eq!(EngineError::Backpressure { capacity: 4 }.status_code(), 503);
    }

    #[test]
    fn test_only_backpressure_is_retryable() {
        assert!(EngineError::Backpressure { capacity: 1 }.is_retryable());
        assert!(!EngineError::Permission("nope".into()).is_retryable());
        assert!(!EngineError::invalid_state("ended", "start").is_retryable());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = EngineError::invalid_state("live", "start the stream");
        assert_eq!(err.kind(), "invalid_state");
        assert_eq!(
            err.to_string(),
            "invalid state: cannot start the stream while stream is live"
        );
    }
}
