//! WebM recording of a live stream
//!
//! A recorder subscribes to a [`MediaStream`] and feeds its frames to an
//! ffmpeg encoder. Raw RGBA frames are compressed with the negotiated VPx
//! encoder; frames that are already VP8 (remote peers) are framed as IVF and
//! copied into the WebM container unchanged. Encoder output is collected in
//! chunks as it is produced.

use crate::error::{MediaError, MediaResult};
use crate::ffmpeg::{collect_stderr, FfmpegBinary};
use crate::ivf::IvfWriter;
use crate::tracks::{MediaStream, PixelFormat, VideoFrame, VideoInfo};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

/// Container MIME type of every recording
pub const WEBM_MIME_TYPE: &str = "video/webm";

/// File name recordings are uploaded under
pub const RECORDING_FILE_NAME: &str = "video.webm";

/// Size of each read from the encoder's output
const CHUNK_SIZE: usize = 64 * 1024;

/// How often a VP8 recording re-asks for a keyframe until one arrives
const KEYFRAME_RETRY: Duration = Duration::from_secs(1);

/// Video codecs a recording can use, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// VP9
    Vp9,
    /// VP8
    Vp8,
}

impl VideoCodec {
    /// Preference order used when nothing else is configured
    pub const PREFERRED: [VideoCodec; 2] = [VideoCodec::Vp9, VideoCodec::Vp8];

    /// Short codec name
    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::Vp9 => "vp9",
            VideoCodec::Vp8 => "vp8",
        }
    }

    /// MIME type with codec parameter
    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::Vp9 => "video/webm;codecs=vp9",
            VideoCodec::Vp8 => "video/webm;codecs=vp8",
        }
    }

    /// ffmpeg encoder producing this codec
    pub fn encoder(&self) -> &'static str {
        match self {
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Vp8 => "libvpx",
        }
    }
}

/// Pick the first preferred codec whose encoder is available
pub fn negotiate_codec(preferred: &[VideoCodec], available: &[String]) -> MediaResult<VideoCodec> {
    for codec in preferred {
        if available.iter().any(|name| name == codec.encoder()) {
            return Ok(*codec);
        }
        tracing::debug!("{} not supported, trying next codec", codec.mime_type());
    }

    Err(MediaError::NoSupportedCodec {
        requested: preferred
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Accumulates encoder output, skipping empty chunks
#[derive(Debug, Clone, Default)]
pub struct ChunkCollector {
    chunks: Arc<Mutex<Vec<Bytes>>>,
}

impl ChunkCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk; empty chunks are ignored
    pub fn push(&self, chunk: Bytes) -> bool {
        if chunk.is_empty() {
            return false;
        }
        self.chunks.lock().push(chunk);
        true
    }

    /// Number of stored chunks
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Whether nothing was stored
    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    /// Remove and return every stored chunk
    pub fn take(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.chunks.lock())
    }
}

/// A finished recording
#[derive(Debug, Clone)]
pub struct Recording {
    /// Container MIME type
    pub mime_type: String,
    /// Codec inside the container
    pub codec: VideoCodec,
    /// Encoder output in arrival order
    pub chunks: Vec<Bytes>,
    /// Wall-clock length of the recording
    pub duration: Duration,
}

impl Recording {
    /// Assemble a recording from its chunks
    pub fn new(codec: VideoCodec, chunks: Vec<Bytes>, duration: Duration) -> Self {
        Self {
            mime_type: WEBM_MIME_TYPE.to_string(),
            codec,
            chunks,
            duration,
        }
    }

    /// All chunks joined into one buffer
    pub fn data(&self) -> Bytes {
        match self.chunks.as_slice() {
            [single] => single.clone(),
            chunks => {
                let mut buf = BytesMut::with_capacity(self.len());
                for chunk in chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }

    /// Total size in bytes
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name used when uploading
    pub fn file_name(&self) -> &'static str {
        RECORDING_FILE_NAME
    }
}

/// Starts recordings of a stream
#[async_trait]
pub trait RecorderFactory: Send + Sync {
    /// Begin recording `stream`
    async fn start(&self, stream: &MediaStream) -> MediaResult<Box<dyn ActiveRecording>>;
}

/// A recording in progress
#[async_trait]
pub trait ActiveRecording: Send {
    /// Codec being produced
    fn codec(&self) -> VideoCodec;

    /// Stop taking frames, flush the encoder and return the result
    async fn finish(self: Box<Self>) -> MediaResult<Recording>;
}

/// Recorder that encodes through an ffmpeg child process
#[derive(Debug, Clone)]
pub struct FfmpegRecorder {
    ffmpeg: FfmpegBinary,
    preferred: Vec<VideoCodec>,
}

impl FfmpegRecorder {
    /// Recorder preferring VP9 and falling back to VP8
    pub fn new(ffmpeg: FfmpegBinary) -> Self {
        Self {
            ffmpeg,
            preferred: VideoCodec::PREFERRED.to_vec(),
        }
    }

    /// Override the codec preference order
    pub fn with_preferred_codecs(mut self, preferred: Vec<VideoCodec>) -> Self {
        self.preferred = preferred;
        self
    }

    async fn select_codec(&self, info: &VideoInfo) -> MediaResult<VideoCodec> {
        match info.format {
            // Already encoded; it is only remuxed.
            PixelFormat::Vp8 => Ok(VideoCodec::Vp8),
            PixelFormat::Rgba => {
                let available = self.ffmpeg.encoders().await?;
                negotiate_codec(&self.preferred, &available)
            }
        }
    }
}

/// ffmpeg arguments for encoding `info`-shaped input with `codec`
pub fn encoder_args(info: &VideoInfo, codec: VideoCodec) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    match info.format {
        PixelFormat::Rgba => {
            args.extend(["-f", "rawvideo", "-pix_fmt", "rgba", "-s"].map(String::from));
            args.push(format!("{}x{}", info.width, info.height));
            args.push("-r".to_string());
            args.push(info.framerate.to_string());
            args.extend(["-i", "pipe:0", "-c:v", codec.encoder()].map(String::from));
            args.extend(
                ["-b:v", "2M", "-deadline", "realtime", "-cpu-used", "8", "-pix_fmt", "yuv420p"]
                    .map(String::from),
            );
            if codec == VideoCodec::Vp9 {
                args.extend(["-row-mt", "1"].map(String::from));
            }
        }
        PixelFormat::Vp8 => {
            args.extend(["-f", "ivf", "-i", "pipe:0", "-c:v", "copy"].map(String::from));
        }
    }
    args.extend(["-an", "-f", "webm", "pipe:1"].map(String::from));
    args
}

#[async_trait]
impl RecorderFactory for FfmpegRecorder {
    async fn start(&self, stream: &MediaStream) -> MediaResult<Box<dyn ActiveRecording>> {
        if !stream.is_active() {
            return Err(MediaError::CaptureNotActive);
        }

        let info = stream.info();
        let codec = self.select_codec(&info).await?;
        tracing::info!(
            "Recording stream {} as {} ({}x{})",
            stream.id(),
            codec.mime_type(),
            info.width,
            info.height
        );

        let mut command = self.ffmpeg.command();
        command
            .args(encoder_args(&info, codec))
            .stdin(Stdio::piped());
        let mut child = command.spawn().map_err(|e| MediaError::Ffmpeg {
            message: format!("failed to start encoder: {}", e),
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(MediaError::Ffmpeg {
                message: "failed to open encoder pipes".to_string(),
            });
        };
        let stderr = tokio::spawn(collect_stderr(child.stderr.take()));

        let collector = ChunkCollector::new();
        let (stop_tx, stop_rx) = oneshot::channel();
        let frames = stream.subscribe();
        let writer = tokio::spawn(feed_encoder(stream.clone(), frames, stdin, stop_rx));
        let reader = tokio::spawn(drain_encoder(stdout, collector.clone()));

        Ok(Box::new(FfmpegRecording {
            codec,
            started: Instant::now(),
            child,
            stop: Some(stop_tx),
            writer,
            reader,
            stderr,
            collector,
        }))
    }
}

struct FfmpegRecording {
    codec: VideoCodec,
    started: Instant,
    child: tokio::process::Child,
    stop: Option<oneshot::Sender<()>>,
    writer: JoinHandle<u64>,
    reader: JoinHandle<std::io::Result<()>>,
    stderr: JoinHandle<String>,
    collector: ChunkCollector,
}

#[async_trait]
impl ActiveRecording for FfmpegRecording {
    fn codec(&self) -> VideoCodec {
        self.codec
    }

    async fn finish(mut self: Box<Self>) -> MediaResult<Recording> {
        let duration = self.started.elapsed();
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        let codec = self.codec;
        let encode_failed = |reason: String| MediaError::EncodingFailed {
            codec: codec.name().to_string(),
            reason,
        };

        let frames = (&mut self.writer)
            .await
            .map_err(|e| encode_failed(format!("frame writer panicked: {}", e)))?;
        let read_result = (&mut self.reader)
            .await
            .map_err(|e| encode_failed(format!("output reader panicked: {}", e)))?;
        let status = self.child.wait().await?;
        let stderr = (&mut self.stderr).await.unwrap_or_default();

        if let Err(e) = read_result {
            return Err(encode_failed(format!("reading encoder output: {}", e)));
        }
        if !status.success() {
            let reason = if stderr.is_empty() {
                format!("encoder exited with {}", status)
            } else {
                stderr
            };
            return Err(encode_failed(reason));
        }

        let chunks = self.collector.take();
        tracing::info!(
            "Recording finished: {} frames, {} chunks, {:?}",
            frames,
            chunks.len(),
            duration
        );
        Ok(Recording::new(codec, chunks, duration))
    }
}

/// Write stream frames to the encoder until told to stop
async fn feed_encoder(
    stream: MediaStream,
    mut frames: broadcast::Receiver<VideoFrame>,
    mut stdin: ChildStdin,
    mut stop: oneshot::Receiver<()>,
) -> u64 {
    let info = stream.info();
    let mut ivf = IvfWriter::new(info.width, info.height);
    let mut seen_keyframe = false;
    let mut written: u64 = 0;
    // Remote encoders only send keyframes now and then; ask for one so the
    // recording can start right away. The first tick fires immediately.
    let needs_keyframe = info.format == PixelFormat::Vp8;
    let mut keyframe_retry = tokio::time::interval(KEYFRAME_RETRY);

    loop {
        let frame = tokio::select! {
            _ = &mut stop => break,
            _ = keyframe_retry.tick(), if needs_keyframe && !seen_keyframe => {
                stream.request_keyframe();
                continue;
            }
            _ = stream.ended() => {
                tracing::debug!("Stream ended while recording");
                break;
            }
            received = frames.recv() => match received {
                Ok(frame) => frame,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Recorder fell behind, skipped {} frames", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let payload = match frame.format {
            PixelFormat::Rgba => {
                if frame.width != info.width || frame.height != info.height {
                    tracing::warn!(
                        "Skipping {}x{} frame in {}x{} recording",
                        frame.width,
                        frame.height,
                        info.width,
                        info.height
                    );
                    continue;
                }
                frame.data
            }
            PixelFormat::Vp8 => {
                // A VP8 stream must start at a keyframe to be decodable.
                if !seen_keyframe && !frame.is_keyframe {
                    continue;
                }
                seen_keyframe = true;
                ivf.frame(&frame.data, frame.timestamp_ms)
            }
        };

        if let Err(e) = stdin.write_all(&payload).await {
            tracing::warn!("Encoder stopped accepting frames: {}", e);
            break;
        }
        written += 1;
    }

    if let Err(e) = stdin.shutdown().await {
        tracing::debug!("Closing encoder input: {}", e);
    }
    written
}

/// Read encoder output into the collector until EOF
async fn drain_encoder(mut stdout: ChildStdout, collector: ChunkCollector) -> std::io::Result<()> {
    loop {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let read = stdout.read_buf(&mut buf).await?;
        if read == 0 {
            return Ok(());
        }
        collector.push(buf.freeze());
    }
}
