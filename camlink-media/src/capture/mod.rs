//! Local media capture
//!
//! [`MediaDevices`] is the entry point: it opens the webcam or the screen and
//! hands back a live [`MediaStream`]. The default backends drive ffmpeg input
//! devices; tests and embedders can swap in any [`CaptureBackend`].

pub mod ffmpeg_capture;
pub mod platform;

pub use ffmpeg_capture::FfmpegCapture;
pub use platform::CapturePlatform;

use crate::error::{MediaError, MediaResult};
use crate::ffmpeg::FfmpegBinary;
use crate::tracks::{MediaStream, StreamSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Shown when the network camera source is selected
pub const IP_CAMERA_UNSUPPORTED: &str =
    "IP camera support must be implemented for your device and protocol.";

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Create a resolution
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which local source to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    /// Webcam
    Camera,
    /// Screen
    Display,
}

impl CaptureKind {
    /// Stream source produced by this kind of capture
    pub fn source(&self) -> StreamSource {
        match self {
            CaptureKind::Camera => StreamSource::Camera,
            CaptureKind::Display => StreamSource::Display,
        }
    }
}

/// What the caller asks of a capture source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Video requested
    pub video: bool,
    /// Audio requested. Accepted but not captured; streams are video-only.
    pub audio: bool,
    /// Output frame size
    pub resolution: Resolution,
    /// Output frames per second
    pub framerate: u32,
    /// Platform device name; the platform default when unset
    pub device: Option<String>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::camera()
    }
}

impl MediaConstraints {
    /// Webcam with video and audio, 720p at 30 fps
    pub fn camera() -> Self {
        Self {
            video: true,
            audio: true,
            resolution: Resolution::new(1280, 720),
            framerate: 30,
            device: None,
        }
    }

    /// Screen without audio, 1080p at 30 fps
    pub fn display() -> Self {
        Self {
            video: true,
            audio: false,
            resolution: Resolution::new(1920, 1080),
            framerate: 30,
            device: None,
        }
    }

    /// Select a specific device
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Override the output size
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Resolution::new(width, height);
        self
    }

    /// Override the frame rate
    pub fn with_framerate(mut self, framerate: u32) -> Self {
        self.framerate = framerate;
        self
    }

    /// Reject constraints no backend can satisfy
    pub fn validate(&self) -> MediaResult<()> {
        if !self.video {
            return Err(MediaError::InvalidConfiguration {
                message: "video must be requested".to_string(),
            });
        }
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: format!("invalid resolution {}", self.resolution),
            });
        }
        // Encoders for 4:2:0 output need even dimensions.
        if self.resolution.width % 2 != 0 || self.resolution.height % 2 != 0 {
            return Err(MediaError::InvalidConfiguration {
                message: format!("resolution {} must have even sides", self.resolution),
            });
        }
        if self.framerate == 0 || self.framerate > 120 {
            return Err(MediaError::InvalidConfiguration {
                message: format!("framerate {} outside 1..=120", self.framerate),
            });
        }
        Ok(())
    }
}

/// A source of local video
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Open the source and start producing frames
    async fn open(&self, constraints: &MediaConstraints) -> MediaResult<MediaStream>;
}

/// Access to the local camera and screen
#[derive(Clone)]
pub struct MediaDevices {
    camera: Arc<dyn CaptureBackend>,
    display: Arc<dyn CaptureBackend>,
}

impl fmt::Debug for MediaDevices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaDevices").finish_non_exhaustive()
    }
}

impl MediaDevices {
    /// ffmpeg-backed camera and screen capture
    pub fn new(ffmpeg: FfmpegBinary) -> Self {
        Self {
            camera: Arc::new(FfmpegCapture::new(ffmpeg.clone(), CaptureKind::Camera)),
            display: Arc::new(FfmpegCapture::new(ffmpeg, CaptureKind::Display)),
        }
    }

    /// Use custom backends
    pub fn with_backends(
        camera: Arc<dyn CaptureBackend>,
        display: Arc<dyn CaptureBackend>,
    ) -> Self {
        Self { camera, display }
    }

    /// Open the webcam
    pub async fn get_user_media(&self, constraints: &MediaConstraints) -> MediaResult<MediaStream> {
        constraints.validate()?;
        if constraints.audio {
            tracing::debug!("Audio requested; camera streams are video-only");
        }
        self.camera.open(constraints).await
    }

    /// Open the screen
    pub async fn get_display_media(
        &self,
        constraints: &MediaConstraints,
    ) -> MediaResult<MediaStream> {
        constraints.validate()?;
        self.display.open(constraints).await
    }

    /// Network cameras need a device-specific protocol that is not provided
    pub fn ip_camera(&self) -> MediaResult<MediaStream> {
        Err(MediaError::NotImplemented {
            feature: "IP camera".to_string(),
            hint: IP_CAMERA_UNSUPPORTED.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_defaults() {
        let camera = MediaConstraints::camera();
        assert!(camera.video && camera.audio);
        assert_eq!(camera.resolution.to_string(), "1280x720");

        let display = MediaConstraints::display();
        assert!(display.video && !display.audio);
        assert!(display.validate().is_ok());
    }

    #[test]
    fn test_constraint_validation() {
        let mut constraints = MediaConstraints::camera();
        constraints.video = false;
        assert!(constraints.validate().is_err());

        assert!(MediaConstraints::camera()
            .with_resolution(641, 480)
            .validate()
            .is_err());
        assert!(MediaConstraints::camera()
            .with_resolution(0, 480)
            .validate()
            .is_err());
        assert!(MediaConstraints::camera()
            .with_framerate(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_ip_camera_is_not_implemented() {
        let devices = MediaDevices::new(FfmpegBinary::default());
        match devices.ip_camera() {
            Err(MediaError::NotImplemented { hint, .. }) => {
                assert_eq!(hint, IP_CAMERA_UNSUPPORTED)
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
