//! ffmpeg-driven camera and screen capture

use super::platform::{input_args, output_args, CapturePlatform};
use super::{CaptureBackend, CaptureKind, MediaConstraints};
use crate::error::{MediaError, MediaResult};
use crate::ffmpeg::{collect_stderr, FfmpegBinary};
use crate::tracks::{rgba_frame_len, FrameSink, MediaStream, PixelFormat, VideoFrame, VideoInfo};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout};

/// Capture backend that reads raw RGBA frames from an ffmpeg input device
#[derive(Debug, Clone)]
pub struct FfmpegCapture {
    ffmpeg: FfmpegBinary,
    kind: CaptureKind,
    platform: Option<CapturePlatform>,
    startup_timeout: Duration,
}

impl FfmpegCapture {
    /// Capture `kind` on the current platform
    pub fn new(ffmpeg: FfmpegBinary, kind: CaptureKind) -> Self {
        Self {
            ffmpeg,
            kind,
            platform: CapturePlatform::current(),
            startup_timeout: Duration::from_secs(10),
        }
    }

    /// How long to wait for the first frame before giving up
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    async fn fail_startup(&self, mut child: Child, device: &str, cause: String) -> MediaError {
        let _ = child.start_kill();
        let stderr = collect_stderr(child.stderr.take()).await;
        let _ = child.wait().await;
        let detail = if stderr.is_empty() { cause } else { stderr };
        classify_failure(self.kind, device, &detail)
    }
}

#[async_trait]
impl CaptureBackend for FfmpegCapture {
    async fn open(&self, constraints: &MediaConstraints) -> MediaResult<MediaStream> {
        let platform = self.platform.ok_or_else(|| MediaError::UnsupportedPlatform {
            platform: std::env::consts::OS.to_string(),
        })?;

        let device = constraints
            .device
            .clone()
            .unwrap_or_else(|| platform.default_device(self.kind).to_string());
        let width = constraints.resolution.width;
        let height = constraints.resolution.height;

        tracing::info!(
            "Opening {:?} capture on {} ({} @ {} fps)",
            self.kind,
            device,
            constraints.resolution,
            constraints.framerate
        );

        let mut command = self.ffmpeg.command();
        command
            .args(input_args(platform, self.kind, constraints))
            .args(output_args(constraints));

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediaError::Ffmpeg {
                    message: format!("{} not found", self.ffmpeg.path().display()),
                }
            } else {
                MediaError::Io { source: e }
            }
        })?;

        let Some(mut stdout) = child.stdout.take() else {
            let cause = "failed to capture ffmpeg stdout".to_string();
            return Err(self.fail_startup(child, &device, cause).await);
        };

        // The device is only known to work once the first frame arrives.
        let frame_len = rgba_frame_len(width, height);
        let mut first = vec![0u8; frame_len];
        let started = Instant::now();
        match tokio::time::timeout(self.startup_timeout, stdout.read_exact(&mut first)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(self.fail_startup(child, &device, e.to_string()).await);
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(MediaError::Timeout {
                    duration: self.startup_timeout,
                });
            }
        }

        let info = VideoInfo {
            width,
            height,
            framerate: constraints.framerate,
            format: PixelFormat::Rgba,
        };
        let (stream, sink) = MediaStream::new(self.kind.source(), info);
        sink.send(VideoFrame::rgba(width, height, first, 0)?);

        tokio::spawn(pump_frames(child, stdout, sink, info, started));
        tracing::info!("{:?} capture started as stream {}", self.kind, stream.id());
        Ok(stream)
    }
}

/// Forward frames until the stream is stopped or ffmpeg exits
async fn pump_frames(
    mut child: Child,
    mut stdout: ChildStdout,
    mut sink: FrameSink,
    info: VideoInfo,
    started: Instant,
) {
    let frame_len = rgba_frame_len(info.width, info.height);
    let mut frames: u64 = 1;

    loop {
        let mut buf = vec![0u8; frame_len];
        tokio::select! {
            _ = sink.stopped() => {
                tracing::debug!("Capture stopped by consumer after {} frames", frames);
                break;
            }
            result = stdout.read_exact(&mut buf) => {
                match result {
                    Ok(_) => {
                        let timestamp_ms = started.elapsed().as_millis() as u64;
                        match VideoFrame::rgba(info.width, info.height, buf, timestamp_ms) {
                            Ok(frame) => {
                                if !sink.send(frame) {
                                    break;
                                }
                                frames += 1;
                            }
                            Err(e) => {
                                tracing::warn!("Dropping malformed frame: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        if e.kind() == std::io::ErrorKind::UnexpectedEof {
                            tracing::info!("Capture source ended after {} frames", frames);
                        } else {
                            tracing::warn!("Capture read failed: {}", e);
                        }
                        sink.end();
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = child.kill().await {
        tracing::debug!("ffmpeg capture already exited: {}", e);
    }
}

/// Map ffmpeg's startup complaint to the closest media error
pub(crate) fn classify_failure(kind: CaptureKind, device: &str, stderr: &str) -> MediaError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("permission denied") || lower.contains("not authorized") {
        MediaError::PermissionDenied {
            operation: format!("{:?} capture on {}", kind, device),
        }
    } else if lower.contains("no such file")
        || lower.contains("no such device")
        || lower.contains("could not find")
        || lower.contains("cannot open display")
    {
        MediaError::DeviceNotFound {
            device_id: device.to_string(),
        }
    } else {
        MediaError::Ffmpeg {
            message: stderr.to_string(),
        }
    }
}
