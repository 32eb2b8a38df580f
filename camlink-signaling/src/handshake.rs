//! Mobile pairing handshake
//!
//! The desktop side generates a session id, shows it to the phone as a QR
//! code of the pairing URL, joins the id's room on the relay and then waits:
//! the phone joins the same room and offers its camera. The driver task
//! answers the offer, trickles candidates both ways and publishes the remote
//! stream once it arrives.

use crate::client::SignalingClient;
use crate::error::SignalingError;
use crate::peer::{PeerConfig, PeerConnection, PeerConnector, PeerEvent, PeerEvents, PeerState};
use crate::protocol::{SdpType, ServerMessage, SignalData};
use camlink_core::{
    pairing_url, PairingState, PairingStateMachine, PairingTrigger, RetryPolicy, SessionId,
};
use camlink_media::MediaStream;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Handshake settings
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Relay address (`ws://`, `wss://`, `http://` or `https://`)
    pub signaling_url: String,
    /// Origin the phone opens, the session id is appended as a query
    pub pairing_origin: String,
    /// Timeout for each relay connection attempt
    pub connect_timeout: Duration,
    /// How long to wait for the phone's video before failing
    pub handshake_timeout: Duration,
    /// Reconnect budget for the relay connection
    pub retry: RetryPolicy,
    /// Peer connection settings
    pub peer: PeerConfig,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3001".to_string(),
            pairing_origin: "http://localhost:3000".to_string(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            peer: PeerConfig::default(),
        }
    }
}

/// Progress reported by a running handshake
#[derive(Debug, Clone)]
pub enum PairingEvent {
    /// Pairing state changed
    StateChanged(PairingState),
    /// The phone's video arrived
    RemoteStream(MediaStream),
    /// A non-fatal problem worth showing
    Warning(String),
}

/// Starts pairing handshakes
pub struct PairingHandshake {
    config: HandshakeConfig,
    connector: Arc<dyn PeerConnector>,
}

impl std::fmt::Debug for PairingHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingHandshake")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PairingHandshake {
    /// Create a handshake factory
    pub fn new(config: HandshakeConfig, connector: Arc<dyn PeerConnector>) -> Self {
        Self { config, connector }
    }

    /// Settings in use
    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Generate a session, join its room and start waiting for the phone
    pub async fn start(&self) -> Result<PairingHandle, SignalingError> {
        let session_id = SessionId::generate();
        let url = pairing_url(&self.config.pairing_origin, &session_id)?;
        info!("Starting pairing session {}", session_id);

        let client = SignalingClient::connect_with_retry(
            &self.config.signaling_url,
            self.config.connect_timeout,
            &self.config.retry,
        )
        .await?;
        client.join(&session_id)?;

        let (peer, peer_events) = match self.connector.connect(&self.config.peer).await {
            Ok(parts) => parts,
            Err(e) => {
                let _ = client.leave(&session_id);
                client.close().await;
                return Err(e);
            }
        };

        let mut machine = PairingStateMachine::new();
        machine.apply(PairingTrigger::Start)?;

        let state = Arc::new(Mutex::new(machine.state().clone()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = events_tx.send(PairingEvent::StateChanged(PairingState::Offering));
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let driver = Driver {
            session_id: session_id.clone(),
            config: self.config.clone(),
            signaling: Some(client),
            peer,
            peer_events,
            machine,
            state: state.clone(),
            events: events_tx,
        };
        let task = tokio::spawn(driver.run(cancel_rx));

        Ok(PairingHandle {
            events: events_rx,
            control: PairingControl {
                session_id,
                pairing_url: url,
                state,
                cancel: Some(cancel_tx),
                task: Some(task),
            },
        })
    }
}

/// A running pairing handshake
#[derive(Debug)]
pub struct PairingHandle {
    events: mpsc::UnboundedReceiver<PairingEvent>,
    control: PairingControl,
}

impl PairingHandle {
    /// Session id shown to the phone
    pub fn session_id(&self) -> &SessionId {
        &self.control.session_id
    }

    /// URL encoded in the QR code
    pub fn pairing_url(&self) -> &Url {
        &self.control.pairing_url
    }

    /// Current pairing state
    pub fn state(&self) -> PairingState {
        self.control.state()
    }

    /// Next progress event; `None` once the handshake has finished
    pub async fn next_event(&mut self) -> Option<PairingEvent> {
        self.events.recv().await
    }

    /// Separate the event stream from the control half
    pub fn split(self) -> (PairingControl, mpsc::UnboundedReceiver<PairingEvent>) {
        (self.control, self.events)
    }

    /// Stop pairing and wait for teardown
    pub async fn cancel(self) -> PairingState {
        self.control.cancel().await
    }
}

/// Control half of a running handshake; dropping it cancels the handshake
#[derive(Debug)]
pub struct PairingControl {
    session_id: SessionId,
    pairing_url: Url,
    state: Arc<Mutex<PairingState>>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<PairingState>>,
}

impl PairingControl {
    /// Session id shown to the phone
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// URL encoded in the QR code
    pub fn pairing_url(&self) -> &Url {
        &self.pairing_url
    }

    /// Current pairing state
    pub fn state(&self) -> PairingState {
        self.state.lock().clone()
    }

    /// Stop pairing: close the peer, leave the room and wait for the driver
    pub async fn cancel(mut self) -> PairingState {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        match self.task.take() {
            Some(task) => match task.await {
                Ok(state) => state,
                Err(e) => {
                    warn!("Pairing driver did not shut down cleanly: {}", e);
                    self.state()
                }
            },
            None => self.state(),
        }
    }
}

enum Reconnect {
    Reconnected(SignalingClient),
    Exhausted(u32),
    Cancelled,
}

struct Driver {
    session_id: SessionId,
    config: HandshakeConfig,
    signaling: Option<SignalingClient>,
    peer: Arc<dyn PeerConnection>,
    peer_events: PeerEvents,
    machine: PairingStateMachine,
    state: Arc<Mutex<PairingState>>,
    events: mpsc::UnboundedSender<PairingEvent>,
}

impl Driver {
    async fn run(mut self, mut cancel: oneshot::Receiver<()>) -> PairingState {
        let deadline = tokio::time::sleep(self.config.handshake_timeout);
        tokio::pin!(deadline);

        loop {
            let connected = *self.machine.state() == PairingState::Connected;
            tokio::select! {
                _ = &mut cancel => {
                    debug!("Pairing {} cancelled", self.session_id);
                    self.transition(PairingTrigger::Close);
                    break;
                }
                _ = &mut deadline, if !connected => {
                    let reason = format!(
                        "no video from the phone within {:?}",
                        self.config.handshake_timeout
                    );
                    warn!("Pairing {} timed out", self.session_id);
                    self.transition(PairingTrigger::Fail(reason));
                    break;
                }
                message = next_message(&mut self.signaling) => match message {
                    // Peer calls can hang on a bad remote; cancellation must not wait for them.
                    Some(message) => tokio::select! {
                        _ = &mut cancel => {
                            debug!("Pairing {} cancelled during negotiation", self.session_id);
                            self.transition(PairingTrigger::Close);
                            break;
                        }
                        _ = self.on_server_message(message) => {}
                    },
                    None => {
                        if !self.on_signaling_lost(&mut cancel).await {
                            break;
                        }
                    }
                },
                event = self.peer_events.recv() => {
                    if !self.on_peer_event(event) {
                        break;
                    }
                }
            }
        }

        self.teardown().await;
        self.machine.state().clone()
    }

    fn transition(&mut self, trigger: PairingTrigger) {
        let before = self.machine.state().clone();
        match self.machine.apply(trigger) {
            Ok(next) => {
                let next = next.clone();
                *self.state.lock() = next.clone();
                if next != before {
                    let _ = self.events.send(PairingEvent::StateChanged(next));
                }
            }
            Err(e) => debug!("Ignoring pairing transition: {}", e),
        }
    }

    fn warn_user(&self, message: String) {
        warn!("{}", message);
        let _ = self.events.send(PairingEvent::Warning(message));
    }

    fn send_signal(&self, data: SignalData) {
        match &self.signaling {
            Some(client) => {
                if let Err(e) = client.signal(&self.session_id, data) {
                    warn!("Failed to relay signaling data: {}", e);
                }
            }
            None => debug!("No relay connection; dropping outbound signal"),
        }
    }

    async fn on_server_message(&mut self, message: ServerMessage) {
        if let Some(room) = message.room_id() {
            if room != self.session_id.as_str() {
                debug!("Ignoring message for room {}", room);
                return;
            }
        }

        match message {
            ServerMessage::Signal {
                data: SignalData::Sdp(desc),
                ..
            } => {
                let kind = desc.kind;
                debug!("Received remote {}", kind);
                if let Err(e) = self.peer.set_remote_description(desc).await {
                    self.warn_user(format!("Could not apply remote {}: {}", kind, e));
                    return;
                }
                if kind == SdpType::Offer {
                    if let Err(e) = self.answer().await {
                        self.warn_user(format!("Could not answer the phone's offer: {}", e));
                    }
                }
            }
            ServerMessage::Signal {
                data: SignalData::Candidate(candidate),
                ..
            } => {
                // Candidates can race the description; losing one is not fatal.
                if let Err(e) = self.peer.add_ice_candidate(candidate).await {
                    warn!("Error adding remote ICE candidate: {}", e);
                }
            }
            ServerMessage::Joined { peers, .. } => {
                info!("Joined pairing room {} ({} peers present)", self.session_id, peers);
            }
            ServerMessage::PeerJoined { .. } => {
                info!("Phone joined pairing room {}", self.session_id);
            }
            ServerMessage::PeerLeft { .. } => {
                info!("Phone left pairing room {}", self.session_id);
            }
            error @ ServerMessage::Error { .. } => {
                if let Some(err) = error.relay_error() {
                    self.warn_user(err.to_string());
                }
            }
        }
    }

    async fn answer(&mut self) -> Result<(), SignalingError> {
        let answer = self.peer.create_answer().await?;
        self.peer.set_local_description(answer.clone()).await?;
        let local = self.peer.local_description().await.unwrap_or(answer);
        self.send_signal(SignalData::Sdp(local));
        Ok(())
    }

    /// Returns whether the driver should keep running
    fn on_peer_event(&mut self, event: Option<PeerEvent>) -> bool {
        match event {
            Some(PeerEvent::LocalCandidate(candidate)) => {
                self.send_signal(SignalData::Candidate(candidate));
                true
            }
            Some(PeerEvent::Track(stream)) => {
                info!("Receiving remote video in pairing {}", self.session_id);
                self.transition(PairingTrigger::RemoteTrack);
                let _ = self.events.send(PairingEvent::RemoteStream(stream));
                true
            }
            Some(PeerEvent::StateChanged(state)) => match state {
                PeerState::Failed | PeerState::Closed => {
                    self.transition(PairingTrigger::Fail(format!(
                        "peer connection {}",
                        if state == PeerState::Failed {
                            "failed"
                        } else {
                            "closed"
                        }
                    )));
                    false
                }
                other => {
                    debug!("Peer connection state {:?}", other);
                    true
                }
            },
            None => {
                self.transition(PairingTrigger::Fail("peer connection ended".to_string()));
                false
            }
        }
    }

    /// Returns whether the driver should keep running
    async fn on_signaling_lost(&mut self, cancel: &mut oneshot::Receiver<()>) -> bool {
        if let Some(client) = self.signaling.take() {
            client.close().await;
        }
        self.transition(PairingTrigger::SignalingLost);

        if *self.machine.state() == PairingState::Connected {
            info!("Signaling lost after media started; continuing without relay");
            return true;
        }

        match self.reconnect(cancel).await {
            Reconnect::Reconnected(client) => {
                if let Err(e) = client.join(&self.session_id) {
                    warn!("Rejoining pairing room failed: {}", e);
                }
                self.signaling = Some(client);
                self.transition(PairingTrigger::Reconnected);
                true
            }
            Reconnect::Exhausted(attempts) => {
                self.transition(PairingTrigger::Fail(format!(
                    "signaling relay unreachable after {} attempts",
                    attempts
                )));
                false
            }
            Reconnect::Cancelled => {
                self.transition(PairingTrigger::Close);
                false
            }
        }
    }

    async fn reconnect(&mut self, cancel: &mut oneshot::Receiver<()>) -> Reconnect {
        let policy = self.config.retry.clone();
        let mut attempt: u32 = 1;
        loop {
            let delay = policy.delay_for(attempt);
            warn!(
                "Signaling lost during pairing {}; reconnect attempt {} in {:?}",
                self.session_id, attempt, delay
            );
            tokio::select! {
                _ = &mut *cancel => return Reconnect::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = &mut *cancel => return Reconnect::Cancelled,
                result = SignalingClient::connect(
                    &self.config.signaling_url,
                    self.config.connect_timeout,
                ) => result,
            };

            match result {
                Ok(client) => return Reconnect::Reconnected(client),
                Err(e) => {
                    debug!("Reconnect attempt {} failed: {}", attempt, e);
                    if !policy.should_retry(attempt) {
                        return Reconnect::Exhausted(attempt);
                    }
                    self.transition(PairingTrigger::SignalingLost);
                    attempt += 1;
                }
            }
        }
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.peer.close().await {
            debug!("Closing peer connection: {}", e);
        }
        if let Some(client) = self.signaling.take() {
            if let Err(e) = client.leave(&self.session_id) {
                debug!("Leaving pairing room: {}", e);
            }
            client.close().await;
        }
        info!(
            "Pairing {} finished: {}",
            self.session_id,
            self.machine.state()
        );
    }
}

async fn next_message(client: &mut Option<SignalingClient>) -> Option<ServerMessage> {
    match client {
        Some(client) => client.recv().await,
        None => std::future::pending().await,
    }
}
