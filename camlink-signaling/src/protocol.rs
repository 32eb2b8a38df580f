//! Signaling protocol messages
//!
//! Every WebSocket text frame carries one JSON object of the form
//! `{"event": <name>, "payload": {...}}`. Negotiation data travels inside
//! `signal` events, keyed by the pairing room.

use crate::error::SignalingError;
use camlink_core::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer
    Offer,
    /// Provisional answer
    Pranswer,
    /// Answer
    Answer,
    /// Rollback
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// A session description as exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub kind: SdpType,
    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// An offer
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// An answer
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// An ICE candidate as exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the media description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Negotiation payload of a `signal` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalData {
    /// Offer or answer
    Sdp(SessionDescription),
    /// Trickled ICE candidate
    Candidate(IceCandidate),
}

/// Messages sent to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Enter a room
    #[serde(rename_all = "camelCase")]
    Join {
        /// Room to join
        room_id: String,
    },
    /// Leave a room
    #[serde(rename_all = "camelCase")]
    Leave {
        /// Room to leave
        room_id: String,
    },
    /// Relay negotiation data to the other peers in the room
    #[serde(rename_all = "camelCase")]
    Signal {
        /// Target room
        room_id: String,
        /// Negotiation payload
        data: SignalData,
    },
}

impl ClientMessage {
    /// Join `room`
    pub fn join(room: &SessionId) -> Self {
        ClientMessage::Join {
            room_id: room.to_string(),
        }
    }

    /// Leave `room`
    pub fn leave(room: &SessionId) -> Self {
        ClientMessage::Leave {
            room_id: room.to_string(),
        }
    }

    /// Send `data` to the peers in `room`
    pub fn signal(room: &SessionId, data: SignalData) -> Self {
        ClientMessage::Signal {
            room_id: room.to_string(),
            data,
        }
    }

    /// Encode as a JSON text frame
    pub fn to_json(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages received from the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The relay accepted our join
    #[serde(rename_all = "camelCase")]
    Joined {
        /// Joined room
        room_id: String,
        /// Other peers already present
        #[serde(default)]
        peers: usize,
    },
    /// Another peer entered the room
    #[serde(rename_all = "camelCase")]
    PeerJoined {
        /// Room
        room_id: String,
    },
    /// Another peer left the room
    #[serde(rename_all = "camelCase")]
    PeerLeft {
        /// Room
        room_id: String,
    },
    /// Negotiation data from another peer
    #[serde(rename_all = "camelCase")]
    Signal {
        /// Source room
        room_id: String,
        /// Negotiation payload
        data: SignalData,
    },
    /// Relay-side failure
    #[serde(rename_all = "camelCase")]
    Error {
        /// Human readable message
        error: String,
        /// Machine readable code
        #[serde(default)]
        error_code: Option<String>,
    },
}

impl ServerMessage {
    /// Decode a JSON text frame
    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The relay-side failure carried by an `error` event
    pub fn relay_error(&self) -> Option<SignalingError> {
        match self {
            ServerMessage::Error { error, error_code } => Some(SignalingError::Relay {
                code: error_code.clone().unwrap_or_else(|| "UNKNOWN".to_string()),
                message: error.clone(),
            }),
            _ => None,
        }
    }

    /// Room the message refers to, if any
    pub fn room_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Joined { room_id, .. }
            | ServerMessage::PeerJoined { room_id }
            | ServerMessage::PeerLeft { room_id }
            | ServerMessage::Signal { room_id, .. } => Some(room_id),
            ServerMessage::Error { .. } => None,
        }
    }
}
