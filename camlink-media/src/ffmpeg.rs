//! ffmpeg process plumbing
//!
//! Capture and recording both run ffmpeg as a child process and talk to it
//! over pipes. This module owns the binary location, the shared spawn
//! settings and encoder discovery.

use crate::error::{MediaError, MediaResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};

/// Location of the ffmpeg executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegBinary {
    path: PathBuf,
}

impl Default for FfmpegBinary {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegBinary {
    /// Use the given executable path or name
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Executable path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Base command with quiet logging and piped stdio.
    ///
    /// The child is killed if its handle is dropped.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.path);
        command
            .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// List the names of the encoders this ffmpeg build offers
    pub async fn encoders(&self) -> MediaResult<Vec<String>> {
        let output = Command::new(&self.path)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| MediaError::Ffmpeg {
                message: format!("failed to run {}: {}", self.path.display(), e),
            })?;

        if !output.status.success() {
            return Err(MediaError::Ffmpeg {
                message: format!(
                    "listing encoders failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let encoders = parse_encoder_list(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!("ffmpeg offers {} encoders", encoders.len());
        Ok(encoders)
    }
}

/// Parse the table printed by `ffmpeg -encoders`.
///
/// Entries look like ` V....D libvpx-vp9   libvpx VP9`; everything up to the
/// ` ------` separator is a legend and is skipped.
pub fn parse_encoder_list(output: &str) -> Vec<String> {
    let mut in_table = false;
    let mut encoders = Vec::new();

    for line in output.lines() {
        let trimmed = line.trim();
        if !in_table {
            if trimmed.starts_with("------") {
                in_table = true;
            }
            continue;
        }

        let mut fields = trimmed.split_whitespace();
        let (Some(flags), Some(name)) = (fields.next(), fields.next()) else {
            continue;
        };
        let kind = flags.chars().next();
        if flags.len() == 6 && matches!(kind, Some('V' | 'A' | 'S')) {
            encoders.push(name.to_string());
        }
    }

    encoders
}

/// Read whatever ffmpeg wrote to stderr, for error messages
pub(crate) async fn collect_stderr(stderr: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        tracing::debug!("Failed to read ffmpeg stderr: {}", e);
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}
