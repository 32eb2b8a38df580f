//! Controller tests with in-process capture, recorder, analyzer and peer backends

use async_trait::async_trait;
use bytes::Bytes;
use camlink::app::{PAIRING_STATUS, RECORDING_STATUS, REMOTE_VIDEO_STATUS};
use camlink::*;
use camlink_core::LOGIN_REQUIRED_MESSAGE;
use camlink_media::{
    ActiveRecording, CaptureBackend, MediaConstraints, MediaResult, PixelFormat, Recording,
    VideoCodec, VideoInfo,
};
use camlink_signaling::{
    IceCandidate, PeerConfig, PeerConnection, PeerEvent, PeerEvents, SessionDescription,
};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// FAKE BACKENDS
// ============================================================================

/// Opens idle streams and keeps a handle to each for inspection
struct FakeCapture {
    source: StreamSource,
    fail: bool,
    opened: Mutex<Vec<MediaStream>>,
}

impl FakeCapture {
    fn new(source: StreamSource) -> Arc<Self> {
        Arc::new(Self {
            source,
            fail: false,
            opened: Mutex::new(Vec::new()),
        })
    }

    fn failing(source: StreamSource) -> Arc<Self> {
        Arc::new(Self {
            source,
            fail: true,
            opened: Mutex::new(Vec::new()),
        })
    }

    fn last(&self) -> MediaStream {
        self.opened.lock().unwrap().last().cloned().expect("a stream was opened")
    }
}

#[async_trait]
impl CaptureBackend for FakeCapture {
    async fn open(&self, constraints: &MediaConstraints) -> MediaResult<MediaStream> {
        if self.fail {
            return Err(MediaError::DeviceNotFound {
                device_id: "/dev/video0".to_string(),
            });
        }
        let info = VideoInfo {
            width: constraints.resolution.width,
            height: constraints.resolution.height,
            framerate: constraints.framerate,
            format: PixelFormat::Rgba,
        };
        let (stream, mut sink) = MediaStream::new(self.source, info);
        tokio::spawn(async move { sink.stopped().await });
        self.opened.lock().unwrap().push(stream.clone());
        Ok(stream)
    }
}

struct FakeRecorder {
    started: Mutex<Vec<String>>,
}

struct FakeRecording;

#[async_trait]
impl ActiveRecording for FakeRecording {
    fn codec(&self) -> VideoCodec {
        VideoCodec::Vp9
    }

    async fn finish(self: Box<Self>) -> MediaResult<Recording> {
        Ok(Recording::new(
            VideoCodec::Vp9,
            vec![Bytes::from_static(b"webm")],
            Duration::from_secs(1),
        ))
    }
}

#[async_trait]
impl RecorderFactory for FakeRecorder {
    async fn start(&self, stream: &MediaStream) -> MediaResult<Box<dyn ActiveRecording>> {
        self.started.lock().unwrap().push(stream.id().to_string());
        Ok(Box::new(FakeRecording))
    }
}

struct FakeAnalyzer {
    fail_with: Option<u16>,
    seen: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(
        &self,
        recording: &Recording,
        credentials: &Credentials,
    ) -> Result<Verdict, AnalysisError> {
        self.seen
            .lock()
            .unwrap()
            .push((credentials.username().to_string(), recording.len()));
        match self.fail_with {
            Some(status) => Err(AnalysisError::Http {
                status,
                body: String::new(),
            }),
            None => Ok(Verdict {
                result: Some("humano".to_string()),
                details: None,
            }),
        }
    }
}

#[derive(Default)]
struct FakePeer {
    closed: AtomicBool,
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn set_remote_description(&self, _: SessionDescription) -> Result<(), SignalingError> {
        Ok(())
    }
    async fn create_answer(&self) -> Result<SessionDescription, SignalingError> {
        Ok(SessionDescription::answer("v=0"))
    }
    async fn set_local_description(&self, _: SessionDescription) -> Result<(), SignalingError> {
        Ok(())
    }
    async fn local_description(&self) -> Option<SessionDescription> {
        None
    }
    async fn add_ice_candidate(&self, _: IceCandidate) -> Result<(), SignalingError> {
        Ok(())
    }
    async fn close(&self) -> Result<(), SignalingError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeConnector {
    peer: Arc<FakePeer>,
    events: Mutex<Option<mpsc::UnboundedSender<PeerEvent>>>,
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        _config: &PeerConfig,
    ) -> Result<(Arc<dyn PeerConnection>, PeerEvents), SignalingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(tx);
        let peer: Arc<dyn PeerConnection> = self.peer.clone();
        Ok((peer, rx))
    }
}

/// Relay that accepts connections and swallows every message
async fn silent_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            });
        }
    });
    format!("ws://{}", addr)
}

// ============================================================================
// HARNESS
// ============================================================================

struct Harness {
    app: CaptureApp,
    events: broadcast::Receiver<AppEvent>,
    camera: Arc<FakeCapture>,
    display: Arc<FakeCapture>,
    recorder: Arc<FakeRecorder>,
    analyzer: Arc<FakeAnalyzer>,
    connector: Arc<FakeConnector>,
}

struct Options {
    camera_fails: bool,
    analysis_status: Option<u16>,
    signaling_url: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            camera_fails: false,
            analysis_status: None,
            signaling_url: "ws://127.0.0.1:9".to_string(),
        }
    }
}

fn harness(options: Options) -> Harness {
    let mut config = AppConfig {
        signaling_url: options.signaling_url,
        signaling_attempts: 1,
        connect_timeout_secs: 2,
        ..AppConfig::default()
    };
    for settings in [&mut config.camera, &mut config.display] {
        settings.width = 4;
        settings.height = 4;
    }

    let camera = if options.camera_fails {
        FakeCapture::failing(StreamSource::Camera)
    } else {
        FakeCapture::new(StreamSource::Camera)
    };
    let display = FakeCapture::new(StreamSource::Display);
    let recorder = Arc::new(FakeRecorder {
        started: Mutex::new(Vec::new()),
    });
    let analyzer = Arc::new(FakeAnalyzer {
        fail_with: options.analysis_status,
        seen: Mutex::new(Vec::new()),
    });
    let connector = Arc::new(FakeConnector::default());

    let services = Services {
        devices: MediaDevices::with_backends(camera.clone(), display.clone()),
        recorder: recorder.clone(),
        analyzer: analyzer.clone(),
        peers: connector.clone(),
    };
    let app = CaptureApp::new(config, services);
    let events = app.events();
    Harness {
        app,
        events,
        camera,
        display,
        recorder,
        analyzer,
        connector,
    }
}

impl Harness {
    async fn logged_in(options: Options) -> Self {
        let h = harness(options);
        h.app.login("admin", "1234").await.unwrap();
        h
    }

    /// Next alert, skipping other events
    async fn alert(&mut self) -> String {
        tokio::time::timeout(WAIT, async {
            loop {
                if let AppEvent::Alert { message } = self.events.recv().await.unwrap() {
                    return message;
                }
            }
        })
        .await
        .expect("alert within timeout")
    }

    async fn eventually(&self, check: impl Fn(&AppSnapshot) -> bool) -> AppSnapshot {
        tokio::time::timeout(WAIT, async {
            loop {
                let snapshot = self.app.snapshot().await;
                if check(&snapshot) {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("state within timeout")
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_handlers_require_login() {
    let mut h = harness(Options::default());

    let err = h.app.use_webcam().await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_AUTHENTICATED");
    assert_eq!(h.alert().await, "Not logged in");

    assert!(h.app.start_recording().await.is_err());
    assert!(h.app.logout().await.is_err());
    assert!(h.camera.opened.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_login_rejects_blank_fields() {
    let h = harness(Options::default());

    let err = h.app.login("   ", "1234").await.unwrap_err();
    assert_eq!(err.error_code(), "LOGIN_REJECTED");
    let snapshot = h.app.snapshot().await;
    assert_eq!(snapshot.username, None);
    assert_eq!(snapshot.login_error.as_deref(), Some(LOGIN_REQUIRED_MESSAGE));

    h.app.login("admin", "1234").await.unwrap();
    let snapshot = h.app.snapshot().await;
    assert_eq!(snapshot.username.as_deref(), Some("admin"));
    assert_eq!(snapshot.login_error, None);
}

#[tokio::test]
async fn test_recording_needs_a_stream() {
    let mut h = Harness::logged_in(Options::default()).await;

    assert!(!h.app.snapshot().await.can_record());
    let err = h.app.start_recording().await.unwrap_err();
    assert!(matches!(err, AppError::NoVideo));
    assert_eq!(h.alert().await, "No video to record.");
    assert!(h.recorder.started.lock().unwrap().is_empty());

    // Nothing to stop either.
    assert_eq!(h.app.stop_recording().await.unwrap(), None);
}

#[tokio::test]
async fn test_webcam_record_and_analyze() {
    let h = Harness::logged_in(Options::default()).await;

    h.app.use_webcam().await.unwrap();
    let snapshot = h.app.snapshot().await;
    assert_eq!(snapshot.stream, Some(StreamSource::Camera));
    assert!(snapshot.can_record());
    assert!(!snapshot.can_stop_recording());

    h.app.start_recording().await.unwrap();
    let snapshot = h.app.snapshot().await;
    assert_eq!(snapshot.status, RECORDING_STATUS);
    assert!(!snapshot.can_record());
    assert!(snapshot.can_stop_recording());
    assert_eq!(
        h.recorder.started.lock().unwrap().clone(),
        vec![h.camera.last().id().to_string()]
    );

    let verdict = h.app.stop_recording().await.unwrap().unwrap();
    assert_eq!(verdict.summary(), "humano");
    let snapshot = h.app.snapshot().await;
    assert_eq!(snapshot.status, "Analysis result: humano");
    assert!(!snapshot.recording);
    assert_eq!(
        h.analyzer.seen.lock().unwrap().clone(),
        vec![("admin".to_string(), 4)]
    );
}

#[tokio::test]
async fn test_analysis_failure_is_reported_in_status() {
    let h = Harness::logged_in(Options {
        analysis_status: Some(500),
        ..Options::default()
    })
    .await;

    h.app.share_screen().await.unwrap();
    h.app.start_recording().await.unwrap();
    let err = h.app.stop_recording().await.unwrap_err();
    assert_eq!(err.error_code(), "HTTP_ERROR");
    assert_eq!(
        h.app.snapshot().await.status,
        "Analysis error: HTTP error! status: 500"
    );
}

#[tokio::test]
async fn test_webcam_failure_alerts() {
    let mut h = Harness::logged_in(Options {
        camera_fails: true,
        ..Options::default()
    })
    .await;

    assert!(h.app.use_webcam().await.is_err());
    assert!(h.alert().await.starts_with("Error accessing webcam: "));
    assert_eq!(h.app.snapshot().await.stream, None);
}

#[tokio::test]
async fn test_ip_camera_is_not_supported() {
    let mut h = Harness::logged_in(Options::default()).await;

    let err = h.app.use_ip_camera().await.unwrap_err();
    assert_eq!(err.error_code(), "UNSUPPORTED");
    assert_eq!(
        h.alert().await,
        "IP camera support must be implemented for your device and protocol."
    );
}

#[tokio::test]
async fn test_switching_source_stops_previous_stream() {
    let h = Harness::logged_in(Options::default()).await;

    h.app.use_webcam().await.unwrap();
    let camera = h.camera.last();
    h.app.share_screen().await.unwrap();

    assert!(!camera.is_active());
    assert!(h.display.last().is_active());
    assert_eq!(h.app.snapshot().await.stream, Some(StreamSource::Display));
}

#[tokio::test]
async fn test_stop_stream_releases_tracks() {
    let h = Harness::logged_in(Options::default()).await;

    h.app.use_webcam().await.unwrap();
    h.app.stop_stream().await.unwrap();
    assert!(!h.camera.last().is_active());
    let snapshot = h.app.snapshot().await;
    assert_eq!(snapshot.stream, None);
    assert!(!snapshot.can_record());

    // Already released: no-op.
    h.app.stop_stream().await.unwrap();
}

#[tokio::test]
async fn test_stream_ending_on_its_own_is_noticed() {
    let h = Harness::logged_in(Options::default()).await;

    h.app.use_webcam().await.unwrap();
    h.camera.last().stop();
    let snapshot = h.eventually(|s| s.stream.is_none()).await;
    assert_eq!(snapshot.status, "Video stream ended");
}

#[tokio::test]
async fn test_logout_clears_session_and_stops_tracks() {
    let h = Harness::logged_in(Options::default()).await;

    h.app.use_webcam().await.unwrap();
    h.app.start_recording().await.unwrap();
    h.app.logout().await.unwrap();

    assert!(!h.camera.last().is_active());
    let snapshot = h.app.snapshot().await;
    assert_eq!(snapshot.username, None);
    assert_eq!(snapshot.stream, None);
    assert!(!snapshot.recording);
    assert_eq!(snapshot.status, "");
    assert_eq!(snapshot.pairing, None);

    assert!(h.app.use_webcam().await.is_err());
}

#[tokio::test]
async fn test_connect_mobile_without_relay_alerts() {
    let mut h = Harness::logged_in(Options::default()).await;

    let err = h.app.connect_mobile().await.unwrap_err();
    assert_eq!(err.error_code(), "RETRIES_EXHAUSTED");
    assert!(h
        .alert()
        .await
        .starts_with("Error connecting mobile camera: "));
    assert_eq!(h.app.snapshot().await.pairing, None);
}

#[tokio::test]
async fn test_mobile_pairing_delivers_remote_stream() {
    let relay = silent_relay().await;
    let h = Harness::logged_in(Options {
        signaling_url: relay,
        ..Options::default()
    })
    .await;

    h.app.use_webcam().await.unwrap();
    let info = h.app.connect_mobile().await.unwrap();
    assert_eq!(
        info.url,
        format!("http://localhost:3000/?roomId={}", info.session_id)
    );
    let snapshot = h.app.snapshot().await;
    assert_eq!(snapshot.status, PAIRING_STATUS);
    assert_eq!(
        snapshot.pairing.map(|p| p.state),
        Some(PairingState::Offering)
    );

    let (remote, _sink) = MediaStream::new(
        StreamSource::Remote,
        VideoInfo {
            width: 640,
            height: 480,
            framerate: 30,
            format: PixelFormat::Vp8,
        },
    );
    let events = h.connector.events.lock().unwrap().clone().unwrap();
    events.send(PeerEvent::Track(remote.clone())).unwrap();

    let snapshot = h
        .eventually(|s| s.stream == Some(StreamSource::Remote))
        .await;
    assert_eq!(snapshot.status, REMOTE_VIDEO_STATUS);
    assert!(!h.camera.last().is_active());
    let connected = |s: &AppSnapshot| {
        s.pairing.as_ref().map(|p| &p.state) == Some(&PairingState::Connected)
    };
    let snapshot = h.eventually(connected).await;
    assert!(snapshot.can_record());

    h.app.stop_stream().await.unwrap();
    assert!(!remote.is_active());
    assert_eq!(h.app.snapshot().await.pairing, None);
    assert!(h.connector.peer.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_console_session_releases_on_quit() {
    let h = harness(Options::default());
    let input = tokio_test::io::Builder::new()
        .read(b"login admin 1234\nwebcam\nbogus\nstatus\nquit\nwebcam\n")
        .build();

    let output = camlink::console::run_with_output(
        h.app.clone(),
        tokio::io::BufReader::new(input),
        Vec::new(),
    )
    .await
    .unwrap();

    // Lines after quit are not executed.
    assert_eq!(h.camera.opened.lock().unwrap().len(), 1);
    assert!(!h.camera.last().is_active());
    assert_eq!(h.app.snapshot().await.username, None);

    // Output from the logout on quit is not lost.
    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("unknown command 'bogus'"));
    assert!(output.contains("Logged in as admin"));
    let lines: Vec<&str> = output.lines().collect();
    let logged_out = lines.iter().position(|l| l.ends_with("Logged out"));
    let released = lines.iter().position(|l| l.ends_with("Video released"));
    assert!(logged_out.is_some(), "output was:\n{}", output);
    assert!(released.is_some(), "output was:\n{}", output);
}

#[cfg(feature = "webrtc")]
#[tokio::test]
async fn test_default_services_can_open_peer_connections() {
    let services = Services::from_config(&AppConfig::default()).unwrap();
    let (peer, _events) = services
        .peers
        .connect(&PeerConfig::default())
        .await
        .unwrap();
    peer.close().await.unwrap();
}

#[cfg(not(feature = "webrtc"))]
#[tokio::test]
async fn test_pairing_explains_missing_peer_backend() {
    let err = UnavailableConnector
        .connect(&PeerConfig::default())
        .await
        .err()
        .unwrap();
    assert_eq!(err.error_code(), "PEER_CONNECTION_ERROR");
    assert!(err.to_string().contains("webrtc"));
}
