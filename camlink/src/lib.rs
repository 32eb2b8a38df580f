//! # camlink
//!
//! Capture video from the webcam, the screen or a phone paired through a QR
//! code, record it as WebM and submit it to a remote analysis endpoint.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use camlink::{AppConfig, CaptureApp, Services};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let services = Services::from_config(&config)?;
//!     let app = CaptureApp::new(config, services);
//!
//!     app.login("admin", "1234").await?;
//!     app.use_webcam().await?;
//!     app.start_recording().await?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     if let Some(verdict) = app.stop_recording().await? {
//!         println!("Analysis result: {}", verdict.summary());
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export the building blocks for embedders
pub use camlink_analysis::{AnalysisClient, AnalysisError, Analyzer, Verdict};
pub use camlink_core::{CamlinkError, Credentials, PairingState, SessionId};
pub use camlink_media::{MediaDevices, MediaError, MediaStream, RecorderFactory, StreamSource};
pub use camlink_signaling::{PeerConnector, SignalingError};

// Public API modules
pub mod app;
pub mod config;
pub mod console;
pub mod error;
pub mod event;
pub mod qr;

// Re-export main API types
pub use app::{AppSnapshot, CaptureApp, PairingInfo, Services, UnavailableConnector};
pub use config::{AppConfig, CaptureSettings};
pub use error::AppError;
pub use event::{AppEvent, EventReceiver};
