//! # camlink core
//!
//! Session gate, pairing identifiers and the pairing state machine shared by
//! the media, signaling and application crates.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod pairing;
pub mod retry;
pub mod session;

// Re-export main types
pub use error::CamlinkError;
pub use pairing::{
    pairing_url, session_from_url, PairingState, PairingStateMachine, PairingTrigger, SessionId,
    ROOM_QUERY_PARAM, SESSION_ID_LEN,
};
pub use retry::RetryPolicy;
pub use session::{Credentials, SessionGate, LOGIN_REQUIRED_MESSAGE};
