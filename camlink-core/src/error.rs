//! Error types for camlink

use thiserror::Error;

/// Main error type for camlink session and pairing operations
#[derive(Error, Debug)]
pub enum CamlinkError {
    /// Missing configuration error
    #[error("Missing required configuration: {field}")]
    MissingConfiguration {
        /// Missing configuration field
        field: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// Offending configuration field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Login attempt rejected by the local gate
    #[error("Login rejected: {reason}")]
    LoginRejected {
        /// Message shown next to the login form
        reason: String,
    },

    /// Operation requires an authenticated session
    #[error("Not logged in")]
    NotAuthenticated,

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Session identifier failed validation
    #[error("Invalid session id: {value:?}")]
    InvalidSessionId {
        /// Rejected value
        value: String,
    },

    /// Pairing URL could not be built
    #[error("Invalid pairing origin {origin}: {reason}")]
    InvalidOrigin {
        /// Origin that was supplied
        origin: String,
        /// Parse failure
        reason: String,
    },

    /// Retry budget used up
    #[error("Gave up on {operation} after {attempts} attempts")]
    RetriesExhausted {
        /// Operation that kept failing
        operation: String,
        /// Number of attempts made
        attempts: u32,
    },
}

impl CamlinkError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            CamlinkError::MissingConfiguration { .. } => "MISSING_CONFIGURATION".to_string(),
            CamlinkError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION".to_string(),
            CamlinkError::LoginRejected { .. } => "LOGIN_REJECTED".to_string(),
            CamlinkError::NotAuthenticated => "NOT_AUTHENTICATED".to_string(),
            CamlinkError::InvalidState { .. } => "INVALID_STATE".to_string(),
            CamlinkError::InvalidSessionId { .. } => "INVALID_SESSION_ID".to_string(),
            CamlinkError::InvalidOrigin { .. } => "INVALID_ORIGIN".to_string(),
            CamlinkError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED".to_string(),
        }
    }

    /// Check if the user can fix the problem by trying again
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CamlinkError::LoginRejected { .. }
                | CamlinkError::NotAuthenticated
                | CamlinkError::RetriesExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CamlinkError::LoginRejected {
            reason: "please fill in username and password".to_string(),
        };
        assert_eq!(err.error_code(), "LOGIN_REJECTED");
        assert!(err.is_recoverable());

        let err = CamlinkError::InvalidSessionId {
            value: "no spaces".to_string(),
        };
        assert_eq!(err.error_code(), "INVALID_SESSION_ID");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = CamlinkError::InvalidState {
            expected: "offering".to_string(),
            actual: "closed".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid state: expected offering, got closed");

        let err = CamlinkError::RetriesExhausted {
            operation: "signaling connection".to_string(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "Gave up on signaling connection after 3 attempts"
        );
    }
}
