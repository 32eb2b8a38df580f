//! Errors raised by capture, streams and recording

use thiserror::Error;

/// Main error type for media operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// I/O operation failed
    #[error("I/O error: {source}")]
    Io {
        /// Underlying error
        #[from]
        source: std::io::Error,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Encoding operation failed
    #[error("Encoding failed: {codec} - {reason}")]
    EncodingFailed {
        /// Codec name
        codec: String,
        /// Failure reason
        reason: String,
    },

    /// None of the requested codecs can be produced
    #[error("No supported codec among: {requested}")]
    NoSupportedCodec {
        /// Codecs that were tried, in preference order
        requested: String,
    },

    /// Unsupported platform error
    #[error("Unsupported platform: {platform}")]
    UnsupportedPlatform {
        /// Platform name
        platform: String,
    },

    /// Capture source that exists in the UI but has no implementation
    #[error("{feature} is not implemented: {hint}")]
    NotImplemented {
        /// Feature name
        feature: String,
        /// What would be needed
        hint: String,
    },

    /// Invalid frame data error
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Expected data size
        expected: usize,
        /// Actual data size
        actual: usize,
    },

    /// Device not found error
    #[error("Device not found: {device_id}")]
    DeviceNotFound {
        /// Device identifier
        device_id: String,
    },

    /// Permission denied error
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },

    /// Capture not active error
    #[error("Capture not active")]
    CaptureNotActive,

    /// Timeout error
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// Duration after which timeout occurred
        duration: std::time::Duration,
    },

    /// ffmpeg could not be started or exited abnormally
    #[error("ffmpeg error: {message}")]
    Ffmpeg {
        /// Error message, usually including ffmpeg's stderr tail
        message: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Whether retrying the same operation can succeed, e.g. after plugging in
    /// a camera or granting a permission
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MediaError::Io { .. }
                | MediaError::Timeout { .. }
                | MediaError::DeviceNotFound { .. }
                | MediaError::PermissionDenied { .. }
                | MediaError::CaptureNotActive
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        let io_error = MediaError::Io {
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "ffmpeg not found"),
        };
        assert!(io_error.is_recoverable());

        let codec_error = MediaError::NoSupportedCodec {
            requested: "vp9, vp8".to_string(),
        };
        assert!(!codec_error.is_recoverable());
        assert!(!MediaError::Ffmpeg {
            message: "exit status 1".to_string()
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = MediaError::InvalidFrameData {
            expected: 1024,
            actual: 512,
        };
        assert_eq!(
            error.to_string(),
            "Invalid frame data: expected 1024 bytes, got 512"
        );

        let error = MediaError::NotImplemented {
            feature: "IP camera".to_string(),
            hint: "wire up your device protocol".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "IP camera is not implemented: wire up your device protocol"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let media_error = MediaError::from(io_error);

        match media_error {
            MediaError::Io { .. } => (),
            _ => panic!("Expected Io error variant"),
        }
    }
}
