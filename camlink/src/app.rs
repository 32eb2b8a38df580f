//! Application controller
//!
//! [`CaptureApp`] owns the session state shared by every handler: the login
//! gate, the current stream, the active recorder, the status line and the
//! pairing session. Handlers run one at a time behind an async mutex; the
//! pairing handshake and stream watchers feed back into the same state from
//! background tasks.

use crate::config::AppConfig;
use crate::error::AppError;
use crate::event::{AppEvent, EventReceiver, EVENT_CAPACITY};
use async_trait::async_trait;
use camlink_analysis::{AnalysisClient, Analyzer, Verdict};
use camlink_core::{CamlinkError, Credentials, PairingState, SessionGate};
use camlink_media::{
    ActiveRecording, FfmpegBinary, FfmpegRecorder, MediaDevices, MediaStream, RecorderFactory,
    StreamSource,
};
use camlink_signaling::{
    PairingControl, PairingEvent, PairingHandshake, PeerConfig, PeerConnection, PeerConnector,
    PeerEvents, SignalingError,
};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Status shown while waiting for the phone
pub const PAIRING_STATUS: &str = "Point the phone camera at the QR code to connect.";
/// Status shown once the phone's video arrives
pub const REMOTE_VIDEO_STATUS: &str = "Receiving video from phone";
/// Status shown while a recording is active
pub const RECORDING_STATUS: &str = "Recording...";
/// Status shown while the recording is uploaded
pub const UPLOADING_STATUS: &str = "Sending video for analysis...";

/// Backends the controller drives
#[derive(Clone)]
pub struct Services {
    /// Camera and screen capture
    pub devices: MediaDevices,
    /// Recorder for the active stream
    pub recorder: Arc<dyn RecorderFactory>,
    /// Analysis endpoint
    pub analyzer: Arc<dyn Analyzer>,
    /// Peer connections for mobile pairing
    pub peers: Arc<dyn PeerConnector>,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl Services {
    /// ffmpeg capture and recording, HTTP analysis and the compiled-in peer backend
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let ffmpeg = FfmpegBinary::new(config.ffmpeg.clone());
        let analyzer = AnalysisClient::new(&config.analyze_url, config.upload_timeout())
            .map_err(AppError::Analysis)?;

        Ok(Self {
            devices: MediaDevices::new(ffmpeg.clone()),
            recorder: Arc::new(FfmpegRecorder::new(ffmpeg)),
            analyzer: Arc::new(analyzer),
            peers: default_connector(),
        })
    }
}

#[cfg(feature = "webrtc")]
fn default_connector() -> Arc<dyn PeerConnector> {
    Arc::new(camlink_signaling::WebRtcConnector::new())
}

#[cfg(not(feature = "webrtc"))]
fn default_connector() -> Arc<dyn PeerConnector> {
    Arc::new(UnavailableConnector)
}

/// Peer backend for builds without WebRTC; pairing fails with an explanation
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableConnector;

#[async_trait]
impl PeerConnector for UnavailableConnector {
    async fn connect(
        &self,
        _config: &PeerConfig,
    ) -> Result<(Arc<dyn PeerConnection>, PeerEvents), SignalingError> {
        Err(SignalingError::Peer {
            reason: "built without WebRTC support; rebuild with the `webrtc` feature".to_string(),
        })
    }
}

/// Pairing details for display
#[derive(Debug, Clone, PartialEq)]
pub struct PairingInfo {
    /// Session identifier
    pub session_id: String,
    /// URL encoded in the QR code
    pub url: String,
    /// Handshake progress
    pub state: PairingState,
}

/// Point-in-time view of the controller state
#[derive(Debug, Clone, PartialEq)]
pub struct AppSnapshot {
    /// Logged-in user
    pub username: Option<String>,
    /// Last login form error
    pub login_error: Option<String>,
    /// Source of the current stream
    pub stream: Option<StreamSource>,
    /// Whether a recorder is active
    pub recording: bool,
    /// Status line
    pub status: String,
    /// Active pairing session
    pub pairing: Option<PairingInfo>,
}

impl AppSnapshot {
    /// "Record" is offered only with a stream and no active recording
    pub fn can_record(&self) -> bool {
        self.stream.is_some() && !self.recording
    }

    /// "Stop and analyze" is offered only while recording
    pub fn can_stop_recording(&self) -> bool {
        self.recording
    }
}

struct Pairing {
    control: PairingControl,
    generation: u64,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct State {
    gate: SessionGate,
    login_error: Option<String>,
    stream: Option<MediaStream>,
    recorder: Option<Box<dyn ActiveRecording>>,
    status: String,
    pairing: Option<Pairing>,
    pairing_generation: u64,
}

impl State {
    fn credentials(&self) -> Result<Credentials, AppError> {
        Ok(self.gate.credentials()?.clone())
    }
}

struct Inner {
    config: AppConfig,
    services: Services,
    handshake: PairingHandshake,
    state: Mutex<State>,
    events: broadcast::Sender<AppEvent>,
}

/// The capture, pairing, recording and upload controller
#[derive(Clone)]
pub struct CaptureApp {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CaptureApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureApp")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl CaptureApp {
    /// Create a controller; nothing is opened until a handler runs
    pub fn new(config: AppConfig, services: Services) -> Self {
        let handshake = PairingHandshake::new(config.handshake_config(), services.peers.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                services,
                handshake,
                state: Mutex::new(State::default()),
                events,
            }),
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Subscribe to controller events
    pub fn events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Current state
    pub async fn snapshot(&self) -> AppSnapshot {
        let state = self.inner.state.lock().await;
        AppSnapshot {
            username: state
                .gate
                .credentials()
                .ok()
                .map(|c| c.username().to_string()),
            login_error: state.login_error.clone(),
            stream: state.stream.as_ref().map(MediaStream::source),
            recording: state.recorder.is_some(),
            status: state.status.clone(),
            pairing: state.pairing.as_ref().map(|p| PairingInfo {
                session_id: p.control.session_id().to_string(),
                url: p.control.pairing_url().to_string(),
                state: p.control.state(),
            }),
        }
    }

    /// Open the session; blank fields are rejected and the message kept for the form
    pub async fn login(&self, username: &str, password: &str) -> Result<(), AppError> {
        let mut state = self.inner.state.lock().await;
        match state.gate.login(username, password) {
            Ok(credentials) => {
                let username = credentials.username().to_string();
                state.login_error = None;
                self.inner.emit(AppEvent::LoggedIn { username });
                Ok(())
            }
            Err(e) => {
                let message = match &e {
                    CamlinkError::LoginRejected { reason } => reason.clone(),
                    other => other.to_string(),
                };
                state.login_error = Some(message.clone());
                self.inner.emit(AppEvent::LoginFailed { message });
                Err(e.into())
            }
        }
    }

    /// End the session: cancel pairing, drop any recording, release the stream
    pub async fn logout(&self) -> Result<(), AppError> {
        let mut state = self.inner.state.lock().await;
        self.inner.require_login(&state)?;

        self.inner.clear_pairing(&mut state).await;
        if state.recorder.take().is_some() {
            info!("Discarding active recording on logout");
            self.inner.emit(AppEvent::RecordingChanged { recording: false });
        }
        self.inner.release_stream(&mut state);
        state.gate.logout();
        state.login_error = None;
        self.inner.set_status(&mut state, "");
        self.inner.emit(AppEvent::LoggedOut);
        Ok(())
    }

    /// Replace the current stream with the webcam
    pub async fn use_webcam(&self) -> Result<(), AppError> {
        let mut state = self.inner.state.lock().await;
        self.inner.require_login(&state)?;

        self.inner.release_stream(&mut state);
        let constraints = self.inner.config.camera_constraints();
        match self.inner.services.devices.get_user_media(&constraints).await {
            Ok(stream) => {
                self.inner.set_stream(&mut state, stream);
                self.inner.clear_pairing(&mut state).await;
                Ok(())
            }
            Err(e) => Err(self.inner.alert(AppError::Webcam(e))),
        }
    }

    /// Replace the current stream with the screen
    pub async fn share_screen(&self) -> Result<(), AppError> {
        let mut state = self.inner.state.lock().await;
        self.inner.require_login(&state)?;

        self.inner.release_stream(&mut state);
        let constraints = self.inner.config.display_constraints();
        match self
            .inner
            .services
            .devices
            .get_display_media(&constraints)
            .await
        {
            Ok(stream) => {
                self.inner.set_stream(&mut state, stream);
                self.inner.clear_pairing(&mut state).await;
                Ok(())
            }
            Err(e) => Err(self.inner.alert(AppError::ScreenShare(e))),
        }
    }

    /// Start pairing a phone; the returned URL is what the QR code encodes
    pub async fn connect_mobile(&self) -> Result<PairingInfo, AppError> {
        let mut state = self.inner.state.lock().await;
        self.inner.require_login(&state)?;

        self.inner.clear_pairing(&mut state).await;
        let handle = match self.inner.handshake.start().await {
            Ok(handle) => handle,
            Err(e) => return Err(self.inner.alert(AppError::Pairing(e))),
        };

        let info = PairingInfo {
            session_id: handle.session_id().to_string(),
            url: handle.pairing_url().to_string(),
            state: handle.state(),
        };
        let (control, events) = handle.split();

        state.pairing_generation += 1;
        let generation = state.pairing_generation;
        let pump = tokio::spawn(pump_pairing(Arc::downgrade(&self.inner), generation, events));
        state.pairing = Some(Pairing {
            control,
            generation,
            pump,
        });

        self.inner.set_status(&mut state, PAIRING_STATUS);
        self.inner.emit(AppEvent::PairingStarted {
            session_id: info.session_id.clone(),
            url: info.url.clone(),
        });
        Ok(info)
    }

    /// Network cameras are not supported; always alerts
    pub async fn use_ip_camera(&self) -> Result<(), AppError> {
        let mut state = self.inner.state.lock().await;
        self.inner.require_login(&state)?;

        match self.inner.services.devices.ip_camera() {
            Ok(stream) => {
                self.inner.release_stream(&mut state);
                self.inner.set_stream(&mut state, stream);
                Ok(())
            }
            Err(e) => Err(self.inner.alert(AppError::from(e))),
        }
    }

    /// Stop every track of the current stream and forget the pairing
    pub async fn stop_stream(&self) -> Result<(), AppError> {
        let mut state = self.inner.state.lock().await;
        self.inner.require_login(&state)?;

        if state.stream.is_none() {
            debug!("No stream to stop");
            return Ok(());
        }
        self.inner.release_stream(&mut state);
        self.inner.clear_pairing(&mut state).await;
        Ok(())
    }

    /// Record the current stream
    pub async fn start_recording(&self) -> Result<(), AppError> {
        let mut state = self.inner.state.lock().await;
        self.inner.require_login(&state)?;

        if state.recorder.is_some() {
            return Err(self.inner.alert(AppError::Core(CamlinkError::InvalidState {
                expected: "no active recording".to_string(),
                actual: "recording".to_string(),
            })));
        }
        let Some(stream) = state.stream.clone() else {
            return Err(self.inner.alert(AppError::NoVideo));
        };

        match self.inner.services.recorder.start(&stream).await {
            Ok(recorder) => {
                info!(
                    "Recording {} stream as {}",
                    stream.source().label(),
                    recorder.codec().mime_type()
                );
                state.recorder = Some(recorder);
                self.inner.set_status(&mut state, RECORDING_STATUS);
                self.inner.emit(AppEvent::RecordingChanged { recording: true });
                Ok(())
            }
            Err(e) => Err(self.inner.alert(AppError::Recording(e))),
        }
    }

    /// Finish the recording and submit it; `None` when nothing was recording
    pub async fn stop_recording(&self) -> Result<Option<Verdict>, AppError> {
        let (recorder, credentials) = {
            let mut state = self.inner.state.lock().await;
            self.inner.require_login(&state)?;
            let credentials = state.credentials()?;
            let Some(recorder) = state.recorder.take() else {
                return Ok(None);
            };
            self.inner.emit(AppEvent::RecordingChanged { recording: false });
            self.inner.set_status(&mut state, UPLOADING_STATUS);
            (recorder, credentials)
        };

        // The upload runs without the state lock so other handlers stay responsive.
        let outcome = match recorder.finish().await {
            Ok(recording) => {
                info!(
                    "Recorded {} bytes in {} chunks over {:?}",
                    recording.len(),
                    recording.chunks.len(),
                    recording.duration
                );
                self.inner
                    .services
                    .analyzer
                    .analyze(&recording, &credentials)
                    .await
                    .map_err(AppError::Analysis)
            }
            Err(e) => Err(AppError::Recording(e)),
        };

        let mut state = self.inner.state.lock().await;
        if !state.gate.is_logged_in() {
            debug!("Session ended during upload; dropping the analysis outcome");
            return outcome.map(Some);
        }
        match &outcome {
            Ok(verdict) => {
                let status = format!("Analysis result: {}", verdict.summary());
                self.inner.set_status(&mut state, status);
            }
            Err(e) => {
                warn!("{}", e);
                self.inner.set_status(&mut state, e.to_string());
            }
        }
        outcome.map(Some)
    }
}

impl Inner {
    fn emit(&self, event: AppEvent) {
        debug!("Event {}", event.event_type());
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn alert(&self, err: AppError) -> AppError {
        warn!("{}", err);
        self.emit(AppEvent::Alert {
            message: err.to_string(),
        });
        err
    }

    fn require_login(&self, state: &State) -> Result<(), AppError> {
        if state.gate.is_logged_in() {
            Ok(())
        } else {
            Err(self.alert(AppError::Core(CamlinkError::NotAuthenticated)))
        }
    }

    fn set_status(&self, state: &mut State, status: impl Into<String>) {
        let status = status.into();
        if state.status != status {
            state.status = status.clone();
            self.emit(AppEvent::StatusChanged { status });
        }
    }

    fn set_stream(self: &Arc<Self>, state: &mut State, stream: MediaStream) {
        info!("Using {} stream {}", stream.source().label(), stream.id());
        let source = stream.source();
        tokio::spawn(watch_stream(
            Arc::downgrade(self),
            stream.id().to_string(),
            stream.end_signal(),
        ));
        state.stream = Some(stream);
        self.emit(AppEvent::StreamChanged {
            source: Some(source),
        });
    }

    fn release_stream(&self, state: &mut State) {
        if let Some(stream) = state.stream.take() {
            debug!("Stopping stream {}", stream.id());
            stream.stop();
            self.emit(AppEvent::StreamChanged { source: None });
        }
    }

    async fn clear_pairing(&self, state: &mut State) {
        if let Some(pairing) = state.pairing.take() {
            pairing.pump.abort();
            let final_state = pairing.control.cancel().await;
            debug!("Pairing ended in state {}", final_state);
            self.emit(AppEvent::PairingCleared);
        }
    }

    async fn on_pairing_event(self: &Arc<Self>, generation: u64, event: PairingEvent) {
        let mut state = self.state.lock().await;
        let current = state.pairing.as_ref().map(|p| p.generation);
        if current != Some(generation) {
            debug!("Dropping event from a superseded pairing");
            return;
        }

        match event {
            PairingEvent::StateChanged(pairing_state) => {
                if let PairingState::Failed { reason } = &pairing_state {
                    self.set_status(&mut state, format!("Mobile pairing failed: {}", reason));
                }
                self.emit(AppEvent::PairingStateChanged {
                    state: pairing_state,
                });
            }
            PairingEvent::RemoteStream(stream) => {
                let same = state.stream.as_ref().map(MediaStream::id) == Some(stream.id());
                if !same {
                    self.release_stream(&mut state);
                    self.set_stream(&mut state, stream);
                }
                self.set_status(&mut state, REMOTE_VIDEO_STATUS);
            }
            PairingEvent::Warning(message) => self.emit(AppEvent::Alert { message }),
        }
    }

    async fn on_stream_ended(&self, stream_id: &str) {
        let mut state = self.state.lock().await;
        let current = state.stream.as_ref().map(|s| s.id() == stream_id);
        if current == Some(true) {
            info!("Stream {} ended", stream_id);
            state.stream = None;
            self.emit(AppEvent::StreamChanged { source: None });
            self.set_status(&mut state, "Video stream ended");
        }
    }
}

async fn pump_pairing(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<PairingEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_pairing_event(generation, event).await;
    }
}

async fn watch_stream(
    inner: Weak<Inner>,
    stream_id: String,
    ended: impl std::future::Future<Output = ()>,
) {
    ended.await;
    if let Some(inner) = inner.upgrade() {
        inner.on_stream_ended(&stream_id).await;
    }
}
