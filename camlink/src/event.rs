//! Events published by the application controller

use camlink_core::PairingState;
use camlink_media::StreamSource;
use tokio::sync::broadcast;

/// Capacity of the event channel; slow listeners lag rather than block handlers
pub const EVENT_CAPACITY: usize = 128;

/// Something the presentation layer should reflect
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// A user logged in
    LoggedIn {
        /// Username as typed
        username: String,
    },
    /// Login form rejected
    LoginFailed {
        /// Message for the form
        message: String,
    },
    /// Session ended
    LoggedOut,
    /// Status line changed
    StatusChanged {
        /// New status text
        status: String,
    },
    /// Blocking message for the user
    Alert {
        /// Alert text
        message: String,
    },
    /// Active stream changed
    StreamChanged {
        /// Source of the new stream, `None` once released
        source: Option<StreamSource>,
    },
    /// Recorder started or stopped
    RecordingChanged {
        /// Whether a recording is active
        recording: bool,
    },
    /// Pairing started; show the URL as a QR code
    PairingStarted {
        /// Session identifier
        session_id: String,
        /// URL for the phone
        url: String,
    },
    /// Pairing handshake progressed
    PairingStateChanged {
        /// New state
        state: PairingState,
    },
    /// QR code and room discarded
    PairingCleared,
}

impl AppEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            AppEvent::LoggedIn { .. } => "logged_in",
            AppEvent::LoginFailed { .. } => "login_failed",
            AppEvent::LoggedOut => "logged_out",
            AppEvent::StatusChanged { .. } => "status_changed",
            AppEvent::Alert { .. } => "alert",
            AppEvent::StreamChanged { .. } => "stream_changed",
            AppEvent::RecordingChanged { .. } => "recording_changed",
            AppEvent::PairingStarted { .. } => "pairing_started",
            AppEvent::PairingStateChanged { .. } => "pairing_state_changed",
            AppEvent::PairingCleared => "pairing_cleared",
        }
    }
}

/// Receiver for controller events
pub type EventReceiver = broadcast::Receiver<AppEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        assert_eq!(AppEvent::LoggedOut.event_type(), "logged_out");
        assert_eq!(AppEvent::PairingCleared.event_type(), "pairing_cleared");
        assert_eq!(
            AppEvent::StreamChanged { source: None }.event_type(),
            "stream_changed"
        );
    }
}
