//! Application-level errors
//!
//! Each variant's message is the text the user sees in an alert or status line.

use camlink_analysis::AnalysisError;
use camlink_core::CamlinkError;
use camlink_media::MediaError;
use camlink_signaling::SignalingError;
use thiserror::Error;

/// Alert shown when recording is requested without a stream
pub const NO_VIDEO_MESSAGE: &str = "No video to record.";

/// Errors surfaced by the application controller
#[derive(Error, Debug)]
pub enum AppError {
    /// Session, state or configuration problem
    #[error(transparent)]
    Core(#[from] CamlinkError),

    /// Camera could not be opened
    #[error("Error accessing webcam: {0}")]
    Webcam(#[source] MediaError),

    /// Screen capture could not be started
    #[error("Error sharing screen: {0}")]
    ScreenShare(#[source] MediaError),

    /// Capture source exists but is not available in this build
    #[error("{message}")]
    Unsupported {
        /// Text for the user
        message: String,
    },

    /// Recording requested without a stream
    #[error("{}", NO_VIDEO_MESSAGE)]
    NoVideo,

    /// Recorder could not start or finish
    #[error("Recording error: {0}")]
    Recording(#[source] MediaError),

    /// Mobile pairing could not start
    #[error("Error connecting mobile camera: {0}")]
    Pairing(#[source] SignalingError),

    /// Upload or analysis failed
    #[error("Analysis error: {0}")]
    Analysis(#[source] AnalysisError),

    /// Configuration file could not be used
    #[error("Configuration error in {path}: {reason}")]
    Config {
        /// File that was read
        path: String,
        /// What went wrong
        reason: String,
    },
}

impl AppError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        match self {
            AppError::Core(inner) => inner.error_code(),
            AppError::Webcam(_) => "WEBCAM_ERROR".to_string(),
            AppError::ScreenShare(_) => "SCREEN_SHARE_ERROR".to_string(),
            AppError::Unsupported { .. } => "UNSUPPORTED".to_string(),
            AppError::NoVideo => "NO_VIDEO".to_string(),
            AppError::Recording(_) => "RECORDING_ERROR".to_string(),
            AppError::Pairing(inner) => inner.error_code(),
            AppError::Analysis(inner) => inner.error_code().to_string(),
            AppError::Config { .. } => "CONFIG_ERROR".to_string(),
        }
    }

    /// Whether the user can simply try again
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Core(inner) => inner.is_recoverable(),
            AppError::Webcam(inner) | AppError::ScreenShare(inner) | AppError::Recording(inner) => {
                inner.is_recoverable()
            }
            AppError::Pairing(inner) => inner.is_recoverable(),
            AppError::Analysis(inner) => inner.is_recoverable(),
            AppError::NoVideo => true,
            AppError::Unsupported { .. } | AppError::Config { .. } => false,
        }
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::NotImplemented { hint, .. } => AppError::Unsupported { message: hint },
            other => AppError::Recording(other),
        }
    }
}
