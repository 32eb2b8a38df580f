//! Analysis upload errors

use std::time::Duration;
use thiserror::Error;

/// Errors raised while submitting a recording for analysis
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Endpoint URL could not be used
    #[error("Invalid analysis endpoint {url}: {reason}")]
    InvalidEndpoint {
        /// URL as configured
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// The endpoint rejected the credentials
    #[error("HTTP error! status: 401 (credentials rejected)")]
    Unauthorized,

    /// The endpoint answered with a non-success status
    #[error("HTTP error! status: {status}")]
    Http {
        /// Response status code
        status: u16,
        /// Response body, for logs
        body: String,
    },

    /// The request did not complete
    #[error("Request failed: {source}")]
    Request {
        /// Underlying error
        #[from]
        source: reqwest::Error,
    },

    /// No response within the configured timeout
    #[error("Analysis request timed out after {duration:?}")]
    Timeout {
        /// Timeout duration
        duration: Duration,
    },

    /// The response body was not the expected JSON
    #[error("Invalid analysis response: {reason}")]
    InvalidResponse {
        /// Parse failure
        reason: String,
    },

    /// Nothing was recorded
    #[error("Recording is empty")]
    EmptyRecording,
}

impl AnalysisError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AnalysisError::InvalidEndpoint { .. } => "INVALID_ENDPOINT",
            AnalysisError::Unauthorized => "UNAUTHORIZED",
            AnalysisError::Http { .. } => "HTTP_ERROR",
            AnalysisError::Request { .. } => "REQUEST_FAILED",
            AnalysisError::Timeout { .. } => "TIMEOUT",
            AnalysisError::InvalidResponse { .. } => "INVALID_RESPONSE",
            AnalysisError::EmptyRecording => "EMPTY_RECORDING",
        }
    }

    /// Whether submitting the same recording again may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            AnalysisError::Http { status, .. } => *status >= 500,
            AnalysisError::Request { .. } | AnalysisError::Timeout { .. } => true,
            _ => false,
        }
    }
}
