//! ffmpeg compression of oversized videos.

use super::temp::cleanup_file;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// Why a compression attempt failed
#[derive(Debug, Error)]
pub enum CompressionError {
    /// The transcoder could not be started
    #[error("failed to start transcoder: {0}")]
    Spawn(#[source] std::io::Error),
    /// The transcoder exited unsuccessfully
    #[error("transcoder exited with {status}: {stderr}")]
    Failed {
        /// Exit status as reported by the OS
        status: String,
        /// Tail of the transcoder's stderr
        stderr: String,
    },
    /// The run exceeded its wall-clock budget
    #[error("transcoder timed out after {0:?}")]
    Timeout(Duration),
    /// The run succeeded but produced no file
    #[error("transcoder produced no output at {0}")]
    MissingOutput(PathBuf),
}

/// Shrinks an oversized media file.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Write a compressed copy of `input` and return its path.
    ///
    /// The input is left in place; the caller owns both files afterwards.
    async fn compress(&self, input: &Path) -> Result<PathBuf, CompressionError>;
}

/// Output location for a compressed copy: `<stem>_compressed.mp4` next to the input
#[must_use]
pub fn compressed_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map_or_else(|| "video".into(), |s| s.to_string_lossy().into_owned());
    input.with_file_name(format!("{stem}_compressed.mp4"))
}

/// [`Transcoder`] backed by the `ffmpeg` executable
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    bin: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    /// Create a transcoder with a wall-clock budget per run
    #[must_use]
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    /// Fixed encoding parameters: H.264 CRF 28, AAC 128k, fast-start muxing
    #[must_use]
    pub fn build_args(input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
        args.extend(
            [
                "-vcodec",
                "libx264",
                "-crf",
                "28",
                "-preset",
                "fast",
                "-acodec",
                "aac",
                "-b:a",
                "128k",
                "-movflags",
                "+faststart",
                "-y",
            ]
            .iter()
            .map(OsString::from),
        );
        args.push(output.into());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn compress(&self, input: &Path) -> Result<PathBuf, CompressionError> {
        let output = compressed_path(input);
        let mut cmd = Command::new(&self.bin);
        cmd.args(Self::build_args(input, &output))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        info!(input = %input.display(), "Compressing video");
        let out = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(CompressionError::Spawn(e)),
            Err(_) => {
                warn!(input = %input.display(), timeout = ?self.timeout, "Compression timed out");
                cleanup_file(&output);
                return Err(CompressionError::Timeout(self.timeout));
            }
        };

        if !out.status.success() {
            cleanup_file(&output);
            let stderr = String::from_utf8_lossy(&out.stderr);
            let tail: String = {
                let chars: Vec<char> = stderr.trim().chars().collect();
                chars[chars.len().saturating_sub(300)..].iter().collect()
            };
            return Err(CompressionError::Failed {
                status: out.status.to_string(),
                stderr: tail,
            });
        }

        if tokio::fs::metadata(&output).await.is_err() {
            return Err(CompressionError::MissingOutput(output));
        }
        Ok(output)
    }
}
