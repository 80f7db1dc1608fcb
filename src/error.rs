//! Error types for the matchmaking service
//!
//! Expected queue outcomes (already queued, queue full, ...) are not errors;
//! they are variants of the per-operation outcome enums in [`crate::types`].
//! The errors here cover operational and internal failures only.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Service-level error conditions
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("Match not found: {match_id}")]
    MatchNotFound { match_id: String },

    #[error("Provisioning request failed: {message}")]
    ProvisioningFailed { message: String },

    #[error("Record store failure: {message}")]
    RecordStoreFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Build the error used when a mutex guarding shared state is poisoned
    pub fn lock_poisoned(what: &str) -> Self {
        MatchmakingError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MatchmakingError::MatchNotFound {
            match_id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Match not found: abc");

        let err = MatchmakingError::lock_poisoned("queue state");
        assert_eq!(
            err.to_string(),
            "Internal service error: Failed to acquire queue state lock"
        );
    }

    #[test]
    fn test_errors_convert_into_anyhow() {
        let result: Result<()> = Err(MatchmakingError::InvalidCommand {
            reason: "empty player id".to_string(),
        }
        .into());

        let err = result.unwrap_err();
        assert!(err.downcast_ref::<MatchmakingError>().is_some());
    }
}
