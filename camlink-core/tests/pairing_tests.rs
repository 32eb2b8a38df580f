//! Integration tests for the session gate and pairing primitives

use camlink_core::*;
use std::time::Duration;

#[test]
fn test_pairing_url_round_trips_generated_ids() {
    for _ in 0..20 {
        let id = SessionId::generate();
        let url = pairing_url("http://192.168.0.10:3000", &id).unwrap();
        assert!(url.as_str().starts_with("http://192.168.0.10:3000/?roomId="));
        assert_eq!(session_from_url(&url).unwrap(), id);
    }
}

#[test]
fn test_url_without_room_is_rejected() {
    let url = url::Url::parse("http://localhost:3000/?other=1").unwrap();
    let err = session_from_url(&url).unwrap_err();
    assert_eq!(err.error_code(), "INVALID_SESSION_ID");
}

#[test]
fn test_failed_pairing_can_still_be_closed() {
    let mut machine = PairingStateMachine::new();
    machine.apply(PairingTrigger::Start).unwrap();
    machine
        .apply(PairingTrigger::Fail("peer connection failed".to_string()))
        .unwrap();
    assert!(machine.state().is_terminal());
    assert!(machine.apply(PairingTrigger::RemoteTrack).is_err());
    assert_eq!(machine.apply(PairingTrigger::Close).unwrap(), &PairingState::Closed);
    assert_eq!(machine.apply(PairingTrigger::Close).unwrap(), &PairingState::Closed);
}

#[test]
fn test_signaling_loss_after_connect_keeps_media() {
    let mut machine = PairingStateMachine::new();
    machine.apply(PairingTrigger::Start).unwrap();
    machine.apply(PairingTrigger::RemoteTrack).unwrap();
    assert_eq!(
        machine.apply(PairingTrigger::SignalingLost).unwrap(),
        &PairingState::Connected
    );
}

#[test]
fn test_state_display() {
    assert_eq!(PairingState::Offering.to_string(), "offering");
    assert_eq!(
        PairingState::Retrying { attempt: 3 }.to_string(),
        "retrying (attempt 3)"
    );
    assert_eq!(
        PairingState::Failed {
            reason: "timed out".to_string()
        }
        .to_string(),
        "failed: timed out"
    );
}

#[test]
fn test_custom_retry_policy() {
    let policy = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(250),
        multiplier: 3.0,
    };
    assert_eq!(policy.delay_for(1), Duration::from_millis(100));
    assert_eq!(policy.delay_for(2), Duration::from_millis(250));
    assert!(policy.should_retry(2));
    assert!(!policy.should_retry(3));
}

#[test]
fn test_gate_relogin_replaces_credentials() {
    let mut gate = SessionGate::new();
    gate.login("alice", "one").unwrap();
    gate.login("bob", "two").unwrap();
    assert_eq!(gate.credentials().unwrap().username(), "bob");
}
