//! # camlink signaling
//!
//! Client side of the signaling relay and the mobile pairing handshake.
//! The relay itself is external; this crate speaks its JSON protocol,
//! drives a peer connection through offer/answer and candidate exchange,
//! and hands the phone's video over as a media stream.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod handshake;
pub mod peer;
pub mod protocol;
#[cfg(feature = "webrtc")]
pub mod webrtc_peer;

// Re-export main types
pub use client::{normalize_url, SignalingClient};
pub use error::SignalingError;
pub use handshake::{HandshakeConfig, PairingControl, PairingEvent, PairingHandle, PairingHandshake};
pub use peer::{
    IceServer, PeerConfig, PeerConnection, PeerConnector, PeerEvent, PeerEvents, PeerState,
    DEFAULT_STUN_SERVER,
};
pub use protocol::{
    ClientMessage, IceCandidate, SdpType, ServerMessage, SessionDescription, SignalData,
};
#[cfg(feature = "webrtc")]
pub use webrtc_peer::WebRtcConnector;
