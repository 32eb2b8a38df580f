//! Mobile pairing primitives
//!
//! A desktop viewer and a phone are correlated through a short random
//! session identifier. The phone learns it out of band by scanning a QR code
//! of the pairing URL; both sides then exchange negotiation data through the
//! signaling relay, keyed by that identifier.

use crate::error::CamlinkError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

const SESSION_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of generated session identifiers
pub const SESSION_ID_LEN: usize = 6;

/// Longest identifier accepted from the outside
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Query parameter carrying the session identifier in the pairing URL
pub const ROOM_QUERY_PARAM: &str = "roomId";

/// Short token correlating a viewer and a mobile camera
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh base-36 identifier
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..SESSION_ID_LEN)
            .map(|_| SESSION_ID_ALPHABET[rng.gen_range(0..SESSION_ID_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// Validate an identifier received from a peer or a URL
    pub fn parse(value: &str) -> Result<Self, CamlinkError> {
        let valid = !value.is_empty()
            && value.len() <= MAX_SESSION_ID_LEN
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CamlinkError::InvalidSessionId {
                value: value.to_string(),
            });
        }
        Ok(Self(value.to_string()))
    }

    /// Identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = CamlinkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Build the URL the phone opens: `{origin}/?roomId={id}`
pub fn pairing_url(origin: &str, id: &SessionId) -> Result<Url, CamlinkError> {
    let mut url = Url::parse(origin).map_err(|e| CamlinkError::InvalidOrigin {
        origin: origin.to_string(),
        reason: e.to_string(),
    })?;

    if url.cannot_be_a_base() {
        return Err(CamlinkError::InvalidOrigin {
            origin: origin.to_string(),
            reason: "origin must be a hierarchical URL".to_string(),
        });
    }

    url.set_path("/");
    url.set_fragment(None);
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair(ROOM_QUERY_PARAM, id.as_str());
    Ok(url)
}

/// Extract the session identifier from a pairing URL
pub fn session_from_url(url: &Url) -> Result<SessionId, CamlinkError> {
    let value = url
        .query_pairs()
        .find(|(key, _)| key == ROOM_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| CamlinkError::InvalidSessionId {
            value: url.to_string(),
        })?;
    SessionId::parse(&value)
}

/// Pairing lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    /// Nothing started yet
    Idle,
    /// Waiting for the phone to offer and deliver media
    Offering,
    /// Signaling dropped before media arrived; reconnecting
    Retrying {
        /// 1-based reconnect attempt
        attempt: u32,
    },
    /// Remote media is flowing
    Connected,
    /// Pairing gave up
    Failed {
        /// Human-readable cause
        reason: String,
    },
    /// Pairing was torn down
    Closed,
}

impl PairingState {
    /// Short name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            PairingState::Idle => "idle",
            PairingState::Offering => "offering",
            PairingState::Retrying { .. } => "retrying",
            PairingState::Connected => "connected",
            PairingState::Failed { .. } => "failed",
            PairingState::Closed => "closed",
        }
    }

    /// Whether no further transition other than close is expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, PairingState::Failed { .. } | PairingState::Closed)
    }
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingState::Retrying { attempt } => write!(f, "retrying (attempt {})", attempt),
            PairingState::Failed { reason } => write!(f, "failed: {}", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// Inputs that move the pairing state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingTrigger {
    /// Signaling joined and peer connection created
    Start,
    /// First remote track arrived
    RemoteTrack,
    /// Signaling connection dropped
    SignalingLost,
    /// Signaling connection re-established
    Reconnected,
    /// Unrecoverable failure
    Fail(String),
    /// Local teardown
    Close,
}

/// Validated pairing state transitions
#[derive(Debug)]
pub struct PairingStateMachine {
    state: PairingState,
}

impl Default for PairingStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingStateMachine {
    /// Start in `Idle`
    pub fn new() -> Self {
        Self {
            state: PairingState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> &PairingState {
        &self.state
    }

    /// Apply a trigger, returning the new state
    pub fn apply(&mut self, trigger: PairingTrigger) -> Result<&PairingState, CamlinkError> {
        let next = match (&self.state, trigger) {
            (PairingState::Idle, PairingTrigger::Start) => PairingState::Offering,
            (PairingState::Offering, PairingTrigger::RemoteTrack) => PairingState::Connected,
            (PairingState::Connected, PairingTrigger::RemoteTrack) => PairingState::Connected,
            (PairingState::Offering, PairingTrigger::SignalingLost) => {
                PairingState::Retrying { attempt: 1 }
            }
            (PairingState::Retrying { attempt }, PairingTrigger::SignalingLost) => {
                PairingState::Retrying {
                    attempt: attempt + 1,
                }
            }
            (PairingState::Retrying { .. }, PairingTrigger::Reconnected) => PairingState::Offering,
            // Media no longer depends on the relay once the peer path is up.
            (PairingState::Connected, PairingTrigger::SignalingLost) => PairingState::Connected,
            (
                PairingState::Offering | PairingState::Retrying { .. } | PairingState::Connected,
                PairingTrigger::Fail(reason),
            ) => PairingState::Failed { reason },
            (_, PairingTrigger::Close) => PairingState::Closed,
            (current, trigger) => {
                return Err(CamlinkError::InvalidState {
                    expected: format!("a state accepting {:?}", trigger),
                    actual: current.name().to_string(),
                });
            }
        };

        if next != self.state {
            tracing::debug!("Pairing state {} -> {}", self.state, next);
        }
        self.state = next;
        Ok(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_use_base36() {
        for _ in 0..100 {
            let id = SessionId::generate();
            assert_eq!(id.as_str().len(), SESSION_ID_LEN);
            assert!(id
                .as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        }
    }

    #[test]
    fn test_parse_rejects_bad_ids() {
        assert!(SessionId::parse("abc123").is_ok());
        assert!(SessionId::parse("room_1-b").is_ok());
        assert!(SessionId::parse("").is_err());
        assert!(SessionId::parse("has space").is_err());
        assert!(SessionId::parse("a/b").is_err());
        assert!(SessionId::parse(&"x".repeat(MAX_SESSION_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_session_id_serde() {
        let id = SessionId::parse("k3x9q2").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"k3x9q2\"");
        assert!(serde_json::from_str::<SessionId>("\"bad id\"").is_err());
    }

    #[test]
    fn test_pairing_url_shape() {
        let id = SessionId::parse("k3x9q2").unwrap();
        let url = pairing_url("http://localhost:3000", &id).unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/?roomId=k3x9q2");

        let url = pairing_url("https://cam.example.com/app/index.html?x=1#top", &id).unwrap();
        assert_eq!(url.as_str(), "https://cam.example.com/?roomId=k3x9q2");
        assert_eq!(session_from_url(&url).unwrap(), id);
    }

    #[test]
    fn test_pairing_url_rejects_bad_origin() {
        let id = SessionId::generate();
        assert!(pairing_url("not a url", &id).is_err());
        assert!(pairing_url("mailto:someone@example.com", &id).is_err());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut machine = PairingStateMachine::new();
        assert_eq!(machine.apply(PairingTrigger::Start).unwrap(), &PairingState::Offering);
        assert_eq!(
            machine.apply(PairingTrigger::RemoteTrack).unwrap(),
            &PairingState::Connected
        );
        assert_eq!(machine.apply(PairingTrigger::Close).unwrap(), &PairingState::Closed);
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn test_retry_transitions() {
        let mut machine = PairingStateMachine::new();
        machine.apply(PairingTrigger::Start).unwrap();
        machine.apply(PairingTrigger::SignalingLost).unwrap();
        assert_eq!(
            machine.apply(PairingTrigger::SignalingLost).unwrap(),
            &PairingState::Retrying { attempt: 2 }
        );
        assert_eq!(
            machine.apply(PairingTrigger::Reconnected).unwrap(),
            &PairingState::Offering
        );
        assert_eq!(
            machine
                .apply(PairingTrigger::Fail("timed out".to_string()))
                .unwrap(),
            &PairingState::Failed {
                reason: "timed out".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = PairingStateMachine::new();
        assert!(machine.apply(PairingTrigger::RemoteTrack).is_err());
        assert!(machine.apply(PairingTrigger::Fail("x".to_string())).is_err());
        assert_eq!(machine.state(), &PairingState::Idle);

        machine.apply(PairingTrigger::Close).unwrap();
        assert!(machine.apply(PairingTrigger::Start).is_err());
    }
}
