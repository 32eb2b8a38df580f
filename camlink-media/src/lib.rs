//! # camlink media
//!
//! Video capture, live streams and WebM recording for camlink.
//! Capture and encoding are delegated to an ffmpeg child process; this
//! crate owns the process lifecycles and the frame plumbing between them.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod error;
pub mod ffmpeg;
pub mod ivf;
pub mod recorder;
pub mod tracks;

// Re-export main types
pub use capture::{
    CaptureBackend, CaptureKind, CapturePlatform, FfmpegCapture, MediaConstraints, MediaDevices,
    Resolution, IP_CAMERA_UNSUPPORTED,
};
pub use error::{MediaError, MediaResult};
pub use ffmpeg::{parse_encoder_list, FfmpegBinary};
pub use ivf::{vp8_keyframe_size, IvfWriter};
pub use recorder::{
    negotiate_codec, ActiveRecording, ChunkCollector, FfmpegRecorder, RecorderFactory, Recording,
    VideoCodec, RECORDING_FILE_NAME, WEBM_MIME_TYPE,
};
pub use tracks::{
    FrameSink, MediaStream, MediaTrack, PixelFormat, StreamSource, TrackKind, VideoFrame,
    VideoInfo,
};
