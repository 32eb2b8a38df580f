//! Configuration types and defaults
//!
//! Settings come from three layers: built-in defaults, then
//! `<config dir>/camlink/config.json`, then `CAMLINK_*` environment variables.

use crate::error::AppError;
use camlink_analysis::DEFAULT_ANALYZE_URL;
use camlink_core::{CamlinkError, RetryPolicy};
use camlink_media::MediaConstraints;
use camlink_signaling::{normalize_url, HandshakeConfig, PeerConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Environment variable overriding the signaling relay URL
pub const ENV_SIGNALING_URL: &str = "CAMLINK_SIGNALING_URL";
/// Environment variable overriding the analysis endpoint
pub const ENV_ANALYZE_URL: &str = "CAMLINK_ANALYZE_URL";
/// Environment variable overriding the pairing origin
pub const ENV_PAIRING_ORIGIN: &str = "CAMLINK_PAIRING_ORIGIN";
/// Environment variable overriding the ffmpeg binary
pub const ENV_FFMPEG: &str = "CAMLINK_FFMPEG";

/// Capture device settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Device override; platform default when `None`
    pub device: Option<String>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Frames per second
    pub framerate: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: None,
            width: 1280,
            height: 720,
            framerate: 30,
        }
    }
}

impl CaptureSettings {
    fn apply(&self, constraints: MediaConstraints) -> MediaConstraints {
        let constraints = constraints
            .with_resolution(self.width, self.height)
            .with_framerate(self.framerate);
        match &self.device {
            Some(device) => constraints.with_device(device.clone()),
            None => constraints,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Signaling relay (`ws`, `wss`, `http` or `https`)
    pub signaling_url: String,
    /// Analysis endpoint receiving the recordings
    pub analyze_url: String,
    /// Origin encoded in the pairing QR code
    pub pairing_origin: String,
    /// ffmpeg executable used for capture and encoding
    pub ffmpeg: PathBuf,
    /// Seconds allowed for each relay connection attempt
    pub connect_timeout_secs: u64,
    /// Seconds to wait for the phone's video
    pub pairing_timeout_secs: u64,
    /// Relay connection attempts before giving up
    pub signaling_attempts: u32,
    /// Seconds allowed for an upload
    pub upload_timeout_secs: u64,
    /// Camera capture
    pub camera: CaptureSettings,
    /// Screen capture
    pub display: CaptureSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3001".to_string(),
            analyze_url: DEFAULT_ANALYZE_URL.to_string(),
            pairing_origin: "http://localhost:3000".to_string(),
            ffmpeg: PathBuf::from("ffmpeg"),
            connect_timeout_secs: 10,
            pairing_timeout_secs: 120,
            signaling_attempts: 5,
            upload_timeout_secs: 60,
            camera: CaptureSettings::default(),
            display: CaptureSettings {
                width: 1920,
                height: 1080,
                ..CaptureSettings::default()
            },
        }
    }
}

impl AppConfig {
    /// Default config file location: `<config dir>/camlink/config.json`
    pub fn default_path() -> PathBuf {
        let mut p = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        p.push("camlink");
        p.push("config.json");
        p
    }

    /// Load the default file (if any), apply the environment and validate
    pub fn load() -> Result<Self, AppError> {
        let mut config = Self::load_from(&Self::default_path())?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config file at {}; using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(AppError::Config {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let config = serde_json::from_str(&data).map_err(|e| AppError::Config {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Persist to `path`, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<(), AppError> {
        let to_error = |reason: String| AppError::Config {
            path: path.display().to_string(),
            reason,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| to_error(e.to_string()))?;
        }
        let data = serde_json::to_string_pretty(self).map_err(|e| to_error(e.to_string()))?;
        fs::write(path, data).map_err(|e| to_error(e.to_string()))
    }

    /// Override fields from `CAMLINK_*` variables, read through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(value) = non_empty(ENV_SIGNALING_URL) {
            self.signaling_url = value;
        }
        if let Some(value) = non_empty(ENV_ANALYZE_URL) {
            self.analyze_url = value;
        }
        if let Some(value) = non_empty(ENV_PAIRING_ORIGIN) {
            self.pairing_origin = value;
        }
        if let Some(value) = non_empty(ENV_FFMPEG) {
            self.ffmpeg = PathBuf::from(value);
        }
    }

    /// Check URLs and limits
    pub fn validate(&self) -> Result<(), CamlinkError> {
        normalize_url(&self.signaling_url).map_err(|e| CamlinkError::InvalidConfiguration {
            field: "signaling_url".to_string(),
            reason: e.to_string(),
        })?;

        let analyze = Url::parse(&self.analyze_url).map_err(|e| invalid("analyze_url", e))?;
        if !matches!(analyze.scheme(), "http" | "https") {
            return Err(invalid("analyze_url", "must be an http(s) URL"));
        }

        let origin = Url::parse(&self.pairing_origin).map_err(|e| invalid("pairing_origin", e))?;
        if origin.cannot_be_a_base() {
            return Err(invalid("pairing_origin", "must be a hierarchical URL"));
        }

        if self.ffmpeg.as_os_str().is_empty() {
            return Err(CamlinkError::MissingConfiguration {
                field: "ffmpeg".to_string(),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(invalid("connect_timeout_secs", "must be positive"));
        }
        if self.pairing_timeout_secs == 0 {
            return Err(invalid("pairing_timeout_secs", "must be positive"));
        }
        if self.upload_timeout_secs == 0 {
            return Err(invalid("upload_timeout_secs", "must be positive"));
        }
        if self.signaling_attempts == 0 {
            return Err(invalid("signaling_attempts", "must be at least 1"));
        }

        self.camera_constraints()
            .validate()
            .map_err(|e| invalid("camera", e))?;
        self.display_constraints()
            .validate()
            .map_err(|e| invalid("display", e))?;
        Ok(())
    }

    /// Constraints for the camera
    pub fn camera_constraints(&self) -> MediaConstraints {
        self.camera.apply(MediaConstraints::camera())
    }

    /// Constraints for screen capture
    pub fn display_constraints(&self) -> MediaConstraints {
        self.display.apply(MediaConstraints::display())
    }

    /// Pairing handshake settings
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            signaling_url: self.signaling_url.clone(),
            pairing_origin: self.pairing_origin.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            handshake_timeout: Duration::from_secs(self.pairing_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.signaling_attempts,
                ..RetryPolicy::default()
            },
            peer: PeerConfig::default(),
        }
    }

    /// Upload timeout
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

fn invalid(field: &str, reason: impl std::fmt::Display) -> CamlinkError {
    CamlinkError::InvalidConfiguration {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
