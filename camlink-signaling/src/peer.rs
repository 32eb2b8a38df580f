//! Peer connection seam
//!
//! The pairing handshake only needs a handful of operations from a peer
//! connection. They are expressed as traits so the handshake can run against
//! the WebRTC backend, or against an in-memory fake in tests.

use crate::error::SignalingError;
use crate::protocol::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use camlink_media::MediaStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Public STUN server used when nothing else is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// A STUN or TURN server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// A server without credentials
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Peer connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// ICE servers for candidate gathering
    pub ice_servers: Vec<IceServer>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
        }
    }
}

/// Connection state reported by the peer backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Created, nothing negotiated
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media path established
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity lost for good
    Failed,
    /// Closed locally or remotely
    Closed,
}

/// Asynchronous notifications from a peer connection
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local ICE candidate to trickle to the remote side
    LocalCandidate(IceCandidate),
    /// The remote side started sending video
    Track(MediaStream),
    /// Connection state changed
    StateChanged(PeerState),
}

/// Receiver of a connection's [`PeerEvent`]s
pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// Operations the handshake performs on a peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Apply the remote side's offer or answer
    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), SignalingError>;

    /// Create an answer to the applied remote offer
    async fn create_answer(&self) -> Result<SessionDescription, SignalingError>;

    /// Apply our own description
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), SignalingError>;

    /// The applied local description, including gathered candidates if any
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Add a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SignalingError>;

    /// Tear the connection down
    async fn close(&self) -> Result<(), SignalingError>;
}

/// Creates peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a connection configured with `config`
    async fn connect(
        &self,
        config: &PeerConfig,
    ) -> Result<(Arc<dyn PeerConnection>, PeerEvents), SignalingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ice_servers() {
        let config = PeerConfig::default();
        assert_eq!(config.ice_servers.len(), 1);
        assert_eq!(config.ice_servers[0].urls, vec![DEFAULT_STUN_SERVER]);
        assert!(config.ice_servers[0].username.is_none());
    }
}
