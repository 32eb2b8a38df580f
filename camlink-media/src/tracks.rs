//! Media streams, tracks and frame types
//!
//! A [`MediaStream`] is the consumer-facing handle for a live video source.
//! Whoever produces frames holds the matching [`FrameSink`]. Stopping the
//! stream (from any clone) is observed by the sink, which is how capture
//! processes and remote-track readers learn that they should shut down.

use crate::error::{MediaError, MediaResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch, Notify};
use uuid::Uuid;

/// Frames buffered per subscriber before the slowest one starts lagging
const FRAME_CHANNEL_CAPACITY: usize = 32;

/// Pixel layout of a frame's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 8-bit RGBA, `width * height * 4` bytes
    Rgba,
    /// One encoded VP8 frame
    Vp8,
}

impl PixelFormat {
    /// Bytes per pixel for raw formats
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Rgba => Some(4),
            PixelFormat::Vp8 => None,
        }
    }

    /// Whether the payload is compressed
    pub fn is_encoded(&self) -> bool {
        matches!(self, PixelFormat::Vp8)
    }
}

/// Video frame representation
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame data (encoded or raw)
    pub data: Bytes,
    /// Timestamp in milliseconds since the stream started
    pub timestamp_ms: u64,
    /// Payload layout
    pub format: PixelFormat,
    /// Whether this is a keyframe
    pub is_keyframe: bool,
}

impl VideoFrame {
    /// Build a raw RGBA frame, checking the payload size
    pub fn rgba(
        width: u32,
        height: u32,
        data: impl Into<Bytes>,
        timestamp_ms: u64,
    ) -> MediaResult<Self> {
        let data = data.into();
        let expected = rgba_frame_len(width, height);
        if data.len() != expected {
            return Err(MediaError::InvalidFrameData {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            data,
            timestamp_ms,
            format: PixelFormat::Rgba,
            is_keyframe: true,
        })
    }

    /// Wrap one encoded VP8 frame
    pub fn vp8(
        width: u32,
        height: u32,
        data: impl Into<Bytes>,
        timestamp_ms: u64,
        is_keyframe: bool,
    ) -> Self {
        Self {
            width,
            height,
            data: data.into(),
            timestamp_ms,
            format: PixelFormat::Vp8,
            is_keyframe,
        }
    }
}

/// Size in bytes of one RGBA frame
pub fn rgba_frame_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 4
}

/// Where a stream's frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamSource {
    /// Local webcam
    Camera,
    /// Screen share
    Display,
    /// Phone camera received over a peer connection
    Remote,
    /// Network camera
    IpCamera,
}

impl StreamSource {
    /// Label used for the stream's video track
    pub fn label(&self) -> &'static str {
        match self {
            StreamSource::Camera => "camera",
            StreamSource::Display => "screen",
            StreamSource::Remote => "remote",
            StreamSource::IpCamera => "ip-camera",
        }
    }
}

/// Shape of the frames a stream produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Nominal frames per second
    pub framerate: u32,
    /// Payload layout
    pub format: PixelFormat,
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Video track
    Video,
    /// Audio track
    Audio,
}

/// Track descriptor within a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTrack {
    /// Track ID
    pub id: String,
    /// Media kind
    pub kind: TrackKind,
    /// Human readable label
    pub label: String,
}

struct StreamInner {
    id: String,
    source: StreamSource,
    info: VideoInfo,
    tracks: Vec<MediaTrack>,
    frames: broadcast::Sender<VideoFrame>,
    stopped: watch::Sender<bool>,
    keyframes: Arc<Notify>,
}

/// Handle to a live video stream
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("info", &self.inner.info)
            .field("active", &self.is_active())
            .finish()
    }
}

impl MediaStream {
    /// Create a stream with a single video track and its producer half
    pub fn new(source: StreamSource, info: VideoInfo) -> (Self, FrameSink) {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let (stopped, stopped_rx) = watch::channel(false);
        let keyframes = Arc::new(Notify::new());
        let id = Uuid::new_v4().to_string();
        let track = MediaTrack {
            id: format!("{}-video", id),
            kind: TrackKind::Video,
            label: source.label().to_string(),
        };

        let inner = Arc::new(StreamInner {
            id,
            source,
            info,
            tracks: vec![track],
            frames: frames.clone(),
            stopped,
            keyframes: keyframes.clone(),
        });

        let sink = FrameSink {
            frames,
            stopped: stopped_rx,
            keyframes,
            stream: Arc::downgrade(&inner),
        };
        (Self { inner }, sink)
    }

    /// Stream ID
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Stream source
    pub fn source(&self) -> StreamSource {
        self.inner.source
    }

    /// Frame shape
    pub fn info(&self) -> VideoInfo {
        self.inner.info
    }

    /// Tracks carried by this stream
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.inner.tracks
    }

    /// Receive frames produced from now on
    pub fn subscribe(&self) -> broadcast::Receiver<VideoFrame> {
        self.inner.frames.subscribe()
    }

    /// Ask the producer for a keyframe. Encoded sources answer with one as
    /// soon as they can; raw sources ignore it.
    pub fn request_keyframe(&self) {
        tracing::debug!("Keyframe requested on stream {}", self.inner.id);
        self.inner.keyframes.notify_one();
    }

    /// Whether the tracks are still live
    pub fn is_active(&self) -> bool {
        !*self.inner.stopped.borrow()
    }

    /// Stop every track. Calling this more than once has no further effect.
    pub fn stop(&self) {
        let was_stopped = self.inner.stopped.send_replace(true);
        if !was_stopped {
            for track in &self.inner.tracks {
                tracing::debug!("Stopped {} track {}", track.label, track.id);
            }
            tracing::info!("Media stream {} stopped", self.inner.id);
        }
    }

    /// Resolve once the stream has been stopped
    pub async fn ended(&self) {
        let mut rx = self.inner.stopped.subscribe();
        // The sender lives as long as `self`, so `wait_for` only fails if it is gone.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Detached end signal: resolves once the stream stops or every handle is
    /// dropped, without keeping the stream alive itself
    pub fn end_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.inner.stopped.subscribe();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }
}

/// Producer half of a [`MediaStream`]
pub struct FrameSink {
    frames: broadcast::Sender<VideoFrame>,
    stopped: watch::Receiver<bool>,
    keyframes: Arc<Notify>,
    stream: Weak<StreamInner>,
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl FrameSink {
    /// Publish a frame. Returns `false` once the stream has been stopped.
    pub fn send(&self, frame: VideoFrame) -> bool {
        if self.is_stopped() {
            return false;
        }
        // No subscribers is not an error; the frame is simply dropped.
        let _ = self.frames.send(frame);
        true
    }

    /// Whether the consumer side stopped the stream or dropped every handle
    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow() || self.stopped.has_changed().is_err()
    }

    /// Wait until the stream is stopped or every handle is dropped
    pub async fn stopped(&mut self) {
        let _ = self.stopped.wait_for(|stopped| *stopped).await;
    }

    /// Resolves on the next [`MediaStream::request_keyframe`]. A request made
    /// while nobody is waiting is kept for the next call.
    pub fn keyframe_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        let keyframes = self.keyframes.clone();
        async move { keyframes.notified().await }
    }

    /// The source ran dry; mark the stream as ended for its consumers
    pub fn end(&self) {
        if let Some(inner) = self.stream.upgrade() {
            (MediaStream { inner }).stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> VideoInfo {
        VideoInfo {
            width: 2,
            height: 2,
            framerate: 30,
            format: PixelFormat::Rgba,
        }
    }

    #[test]
    fn test_rgba_frame_size_is_checked() {
        assert!(VideoFrame::rgba(2, 2, vec![0u8; 16], 0).is_ok());
        match VideoFrame::rgba(2, 2, vec![0u8; 15], 0) {
            Err(MediaError::InvalidFrameData { expected, actual }) => {
                assert_eq!(expected, 16);
                assert_eq!(actual, 15);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (stream, sink) = MediaStream::new(StreamSource::Camera, info());
        assert!(stream.is_active());
        assert_eq!(stream.tracks().len(), 1);
        assert_eq!(stream.tracks()[0].label, "camera");

        stream.stop();
        stream.stop();
        assert!(!stream.is_active());
        assert!(sink.is_stopped());
    }

    #[tokio::test]
    async fn test_frames_reach_subscribers() {
        let (stream, sink) = MediaStream::new(StreamSource::Display, info());
        let mut rx = stream.subscribe();

        let frame = VideoFrame::rgba(2, 2, vec![7u8; 16], 33).unwrap();
        assert!(sink.send(frame));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.timestamp_ms, 33);
        assert_eq!(received.data[0], 7);

        stream.stop();
        assert!(!sink.send(VideoFrame::rgba(2, 2, vec![0u8; 16], 66).unwrap()));
    }

    #[test]
    fn test_sink_end_stops_stream() {
        let (stream, sink) = MediaStream::new(StreamSource::Camera, info());
        sink.end();
        assert!(!stream.is_active());

        drop(stream);
        sink.end();
    }

    #[tokio::test]
    async fn test_sink_notices_dropped_stream() {
        let (stream, mut sink) = MediaStream::new(StreamSource::Remote, info());
        drop(stream);
        tokio::time::timeout(std::time::Duration::from_secs(1), sink.stopped())
            .await
            .unwrap();
        assert!(sink.is_stopped());
    }

    #[tokio::test]
    async fn test_keyframe_request_reaches_sink() {
        let (stream, sink) = MediaStream::new(StreamSource::Remote, info());
        let waiting = tokio::spawn(sink.keyframe_requested());
        stream.request_keyframe();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();

        // Asked before anyone listens: kept for the next wait.
        stream.request_keyframe();
        tokio::time::timeout(std::time::Duration::from_secs(1), sink.keyframe_requested())
            .await
            .unwrap();
    }
}
