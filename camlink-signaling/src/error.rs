//! Signaling and peer-connection errors

use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the relay or driving a peer connection
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Relay URL could not be used
    #[error("Invalid signaling URL {url}: {reason}")]
    InvalidUrl {
        /// URL as configured
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Connecting to the relay failed
    #[error("Signaling connection to {url} failed: {reason}")]
    ConnectionFailed {
        /// Relay URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// The relay connection is gone
    #[error("Signaling connection closed")]
    ConnectionClosed,

    /// WebSocket protocol error
    #[error("WebSocket error: {source}")]
    WebSocket {
        /// Underlying error
        #[from]
        source: tungstenite::Error,
    },

    /// Message could not be encoded or decoded
    #[error("Malformed signaling message: {source}")]
    Serialization {
        /// Underlying error
        #[from]
        source: serde_json::Error,
    },

    /// Relay reported an error
    #[error("Relay error {code}: {message}")]
    Relay {
        /// Relay error code
        code: String,
        /// Relay message
        message: String,
    },

    /// Peer connection operation failed
    #[error("Peer connection error: {reason}")]
    Peer {
        /// What went wrong
        reason: String,
    },

    /// Operation timed out
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Timeout duration
        duration: Duration,
    },

    /// Pairing could not be set up
    #[error(transparent)]
    Core(#[from] camlink_core::CamlinkError),
}

impl SignalingError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            SignalingError::InvalidUrl { .. } => "INVALID_SIGNALING_URL".to_string(),
            SignalingError::ConnectionFailed { .. } => "SIGNALING_CONNECTION_FAILED".to_string(),
            SignalingError::ConnectionClosed => "SIGNALING_CONNECTION_CLOSED".to_string(),
            SignalingError::WebSocket { .. } => "WEBSOCKET_ERROR".to_string(),
            SignalingError::Serialization { .. } => "MALFORMED_MESSAGE".to_string(),
            SignalingError::Relay { .. } => "RELAY_ERROR".to_string(),
            SignalingError::Peer { .. } => "PEER_CONNECTION_ERROR".to_string(),
            SignalingError::Timeout { .. } => "TIMEOUT".to_string(),
            SignalingError::Core(inner) => inner.error_code(),
        }
    }

    /// Whether reconnecting may help
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SignalingError::ConnectionFailed { .. }
                | SignalingError::ConnectionClosed
                | SignalingError::WebSocket { .. }
                | SignalingError::Timeout { .. }
        )
    }
}
