//! Video extraction through the yt-dlp engine.
//!
//! The engine runs as a child process. Its stdout is parsed line by line
//! into progress updates and the final file location.

use super::progress::{ProgressSink, ProgressSnapshot, ProgressStatus};
use super::temp::TempMedia;
use super::DownloadRequest;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

const PROGRESS_PREFIX: &str = "vidrelay-progress ";
const POSTPROCESS_PREFIX: &str = "vidrelay-postprocess";
const METADATA_PREFIX: &str = "vidrelay-meta ";

const PROGRESS_TEMPLATE: &str = "download:vidrelay-progress %(progress.status)s %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s %(progress.speed)s %(progress.eta)s";
const POSTPROCESS_TEMPLATE: &str = "postprocess:vidrelay-postprocess %(progress.status)s";
const METADATA_TEMPLATE: &str =
    "after_move:vidrelay-meta %(.{id,title,duration,uploader,filepath})j";

/// Error patterns in engine output, checked in this order
const UNAVAILABLE_PATTERNS: &[&str] = &["Video unavailable", "not available"];
const PRIVATE_PATTERNS: &[&str] = &["Private video"];
const LOGIN_PATTERNS: &[&str] = &["login"];
const GEO_PATTERNS: &[&str] = &["geo", "country"];

/// Why an extraction failed
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Video removed or never existed
    #[error("video unavailable")]
    Unavailable,
    /// Video is private
    #[error("private video")]
    Private,
    /// The platform requires authentication
    #[error("login required")]
    LoginRequired,
    /// Blocked in the region the engine runs from
    #[error("geo-restricted")]
    GeoRestricted,
    /// Anything else, with the raw cause
    #[error("extraction failed: {0}")]
    Unknown(String),
}

impl ExtractionError {
    /// Map raw engine output to a failure category.
    #[must_use]
    pub fn classify(output: &str) -> Self {
        let lower = output.to_lowercase();
        let matches = |patterns: &[&str]| {
            patterns
                .iter()
                .any(|p| output.contains(p) || lower.contains(&p.to_lowercase()))
        };

        if matches(UNAVAILABLE_PATTERNS) {
            Self::Unavailable
        } else if matches(PRIVATE_PATTERNS) {
            Self::Private
        } else if matches(LOGIN_PATTERNS) {
            Self::LoginRequired
        } else if matches(GEO_PATTERNS) {
            Self::GeoRestricted
        } else {
            Self::Unknown(crate::utils::truncate_str(output.trim(), 300))
        }
    }
}

/// Descriptive fields reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MediaMetadata {
    /// Platform-side video id
    pub id: Option<String>,
    /// Title
    pub title: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Channel / author
    pub uploader: Option<String>,
    /// Final location of the file on disk
    pub filepath: Option<PathBuf>,
}

/// A successfully extracted file plus its metadata
#[derive(Debug)]
pub struct ExtractedMedia {
    /// Owned temporary file
    pub file: TempMedia,
    /// Engine metadata
    pub metadata: MediaMetadata,
}

/// Resolves a link to a local media file.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Download the media for `request`, publishing progress into `progress`.
    ///
    /// The sink is consumed so the progress channel closes when the call
    /// returns, whatever the outcome.
    async fn extract(
        &self,
        request: &DownloadRequest,
        progress: ProgressSink,
    ) -> Result<ExtractedMedia, ExtractionError>;
}

/// [`Extractor`] backed by the `yt-dlp` executable
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    bin: String,
    downloads_dir: PathBuf,
}

impl YtDlpExtractor {
    /// Create an extractor writing into `downloads_dir`
    #[must_use]
    pub fn new(bin: impl Into<String>, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            downloads_dir: downloads_dir.into(),
        }
    }

    /// Per-request scratch directory
    #[must_use]
    pub fn scratch_dir(&self, request: &DownloadRequest) -> PathBuf {
        self.downloads_dir.join(request.id.to_string())
    }

    /// Command line for one download
    #[must_use]
    pub fn build_args(request: &DownloadRequest, out_dir: &Path) -> Vec<String> {
        let template = out_dir.join("%(id)s.%(ext)s");
        let mut args: Vec<String> = [
            "--no-playlist",
            "--newline",
            "--progress",
            "--no-warnings",
            "--socket-timeout",
            "30",
            "--retries",
            "5",
            "--fragment-retries",
            "5",
            "--extractor-retries",
            "3",
            "--file-access-retries",
            "3",
            "--proxy",
            "",
            "--no-check-certificates",
            "--geo-bypass-country",
            "US",
            "-f",
            request.platform.format_selector(),
            "--merge-output-format",
            "mp4",
            "--progress-template",
            PROGRESS_TEMPLATE,
            "--progress-template",
            POSTPROCESS_TEMPLATE,
            "--print",
            METADATA_TEMPLATE,
            "-o",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        args.push(template.to_string_lossy().into_owned());

        for (name, value) in request.platform.http_headers() {
            args.push("--add-header".to_string());
            args.push(format!("{name}:{value}"));
        }

        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }

    async fn run(
        &self,
        request: &DownloadRequest,
        out_dir: &Path,
        progress: &ProgressSink,
    ) -> Result<ExtractedMedia, ExtractionError> {
        let mut child = Command::new(&self.bin)
            .args(Self::build_args(request, out_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractionError::Unknown(format!("failed to start {}: {e}", self.bin)))?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut metadata = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines
                .next_line()
                .await
                .map_err(|e| ExtractionError::Unknown(e.to_string()))?
            {
                match parse_line(&line) {
                    Some(EngineLine::Progress(snapshot)) => progress.publish(snapshot),
                    Some(EngineLine::Finished) => progress.finished(),
                    Some(EngineLine::Metadata(meta)) => metadata = Some(meta),
                    None => {}
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExtractionError::Unknown(e.to_string()))?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            warn!(request_id = %request.id, status = %status, "yt-dlp failed");
            return Err(ExtractionError::classify(&stderr));
        }

        let metadata = metadata.unwrap_or_default();
        let path = resolve_output(out_dir, &metadata).await.ok_or_else(|| {
            ExtractionError::Unknown("engine reported success but no file was found".to_string())
        })?;

        info!(request_id = %request.id, path = %path.display(), "Extraction finished");
        Ok(ExtractedMedia {
            file: TempMedia::new(path).with_scratch_dir(out_dir),
            metadata,
        })
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(
        &self,
        request: &DownloadRequest,
        progress: ProgressSink,
    ) -> Result<ExtractedMedia, ExtractionError> {
        let out_dir = self.scratch_dir(request);
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| ExtractionError::Unknown(format!("cannot create {}: {e}", out_dir.display())))?;

        debug!(request_id = %request.id, url = %request.url, platform = %request.platform, "Starting extraction");
        let result = self.run(request, &out_dir, &progress).await;

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_dir_all(&out_dir).await {
                debug!(dir = %out_dir.display(), error = %e, "Scratch directory already gone");
            }
        }
        result
    }
}

/// Locate the produced file: the reported path, its mp4 twin, or the first
/// mp4 in the scratch directory.
async fn resolve_output(out_dir: &Path, metadata: &MediaMetadata) -> Option<PathBuf> {
    if let Some(reported) = &metadata.filepath {
        if tokio::fs::metadata(reported).await.is_ok() {
            return Some(reported.clone());
        }
        let mp4 = reported.with_extension("mp4");
        if tokio::fs::metadata(&mp4).await.is_ok() {
            return Some(mp4);
        }
    }

    let mut entries = tokio::fs::read_dir(out_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "mp4") {
            return Some(path);
        }
    }
    None
}

#[derive(Debug, PartialEq)]
enum EngineLine {
    Progress(ProgressSnapshot),
    /// Transfer done, post-processing started
    Finished,
    Metadata(MediaMetadata),
}

fn parse_line(line: &str) -> Option<EngineLine> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        return parse_progress(rest).map(|snap| match snap.status {
            ProgressStatus::Processing => EngineLine::Finished,
            ProgressStatus::Downloading => EngineLine::Progress(snap),
        });
    }
    if line.starts_with(POSTPROCESS_PREFIX) {
        return Some(EngineLine::Finished);
    }
    if let Some(rest) = line.strip_prefix(METADATA_PREFIX) {
        return match serde_json::from_str(rest) {
            Ok(meta) => Some(EngineLine::Metadata(meta)),
            Err(e) => {
                debug!(error = %e, "Unparseable metadata line");
                None
            }
        };
    }
    None
}

/// `status downloaded total total_estimate speed eta`, unknowns as `NA`
fn parse_progress(rest: &str) -> Option<ProgressSnapshot> {
    let mut fields = rest.split_whitespace();
    let status = fields.next()?;
    if status == "finished" {
        return Some(ProgressSnapshot::processing());
    }
    if status != "downloading" {
        return None;
    }

    let mut next = || fields.next().and_then(number);
    let downloaded = next().unwrap_or(0.0);
    let total = next();
    let estimate = next();
    let speed = next();
    let eta = next();

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(ProgressSnapshot::downloading(
        downloaded as u64,
        total.or(estimate).map(|t| t as u64),
        speed,
        eta.map(|e| e as u64),
    ))
}

fn number(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Platform;

    #[test]
    fn classify_follows_category_order() {
        assert!(matches!(
            ExtractionError::classify("ERROR: [youtube] abc: Video unavailable"),
            ExtractionError::Unavailable
        ));
        assert!(matches!(
            ExtractionError::classify("ERROR: Private video. Sign in if you've been granted access"),
            ExtractionError::Private
        ));
        assert!(matches!(
            ExtractionError::classify("ERROR: This content requires Login"),
            ExtractionError::LoginRequired
        ));
        assert!(matches!(
            ExtractionError::classify("ERROR: blocked in your COUNTRY"),
            ExtractionError::GeoRestricted
        ));
        assert!(matches!(
            ExtractionError::classify("ERROR: something odd"),
            ExtractionError::Unknown(_)
        ));
        // "not available" wins over the geo keywords
        assert!(matches!(
            ExtractionError::classify("The uploader has not made this video available in your country: not available"),
            ExtractionError::Unavailable
        ));
    }

    #[test]
    fn parses_progress_lines() {
        let line = "vidrelay-progress downloading 1048576 4194304 NA 524288.5 6";
        let Some(EngineLine::Progress(snap)) = parse_line(line) else {
            panic!("expected progress line");
        };
        assert_eq!(snap.status, ProgressStatus::Downloading);
        assert_eq!(snap.downloaded, 1_048_576);
        assert_eq!(snap.total, 4_194_304);
        assert_eq!(snap.eta, 6);
        assert!((snap.percent - 25.0).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_estimated_total() {
        let line = "vidrelay-progress downloading 10 NA 40.0 NA NA";
        let Some(EngineLine::Progress(snap)) = parse_line(line) else {
            panic!("expected progress line");
        };
        assert_eq!(snap.total, 40);
        assert!(snap.speed.abs() < f64::EPSILON);
    }

    #[test]
    fn finished_and_postprocess_mean_processing() {
        for line in [
            "vidrelay-progress finished 10 10 NA NA NA",
            "vidrelay-postprocess started",
        ] {
            assert_eq!(parse_line(line), Some(EngineLine::Finished), "{line}");
        }
    }

    #[test]
    fn parses_metadata_line() {
        let line = r#"vidrelay-meta {"id": "abc", "title": "Clip", "duration": 12.5, "uploader": null, "filepath": "/tmp/x/abc.mp4"}"#;
        let Some(EngineLine::Metadata(meta)) = parse_line(line) else {
            panic!("expected metadata line");
        };
        assert_eq!(meta.id.as_deref(), Some("abc"));
        assert_eq!(meta.filepath, Some(PathBuf::from("/tmp/x/abc.mp4")));
        assert!(meta.uploader.is_none());
    }

    #[test]
    fn ignores_unrelated_output() {
        assert_eq!(parse_line("[youtube] abc: Downloading webpage"), None);
        assert_eq!(parse_line("vidrelay-meta not json"), None);
    }

    #[test]
    fn args_carry_platform_policy() {
        let request = DownloadRequest::new(1, 1, "https://vm.tiktok.com/x", Platform::TikTok);
        let args = YtDlpExtractor::build_args(&request, Path::new("/tmp/req"));

        let format_at = args.iter().position(|a| a == "-f");
        assert_eq!(
            format_at.and_then(|i| args.get(i + 1)).map(String::as_str),
            Some("best[ext=mp4]/best")
        );
        assert!(args.iter().any(|a| a == "Referer:https://www.tiktok.com/"));
        assert_eq!(args.last().map(String::as_str), Some("https://vm.tiktok.com/x"));
        assert!(args.iter().any(|a| a.starts_with("/tmp/req")));
    }

    #[tokio::test]
    async fn resolve_output_prefers_reported_path() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("abc.mp4");
        std::fs::write(&file, b"x")?;

        let meta = MediaMetadata {
            filepath: Some(dir.path().join("abc.webm")),
            ..MediaMetadata::default()
        };
        assert_eq!(resolve_output(dir.path(), &meta).await, Some(file.clone()));
        assert_eq!(
            resolve_output(dir.path(), &MediaMetadata::default()).await,
            Some(file)
        );
        Ok(())
    }

    #[tokio::test]
    async fn missing_binary_is_unknown_failure_and_cleans_scratch() -> std::io::Result<()> {
        let root = tempfile::tempdir()?;
        let extractor = YtDlpExtractor::new("vidrelay-no-such-binary", root.path());
        let request = DownloadRequest::new(1, 1, "https://youtu.be/abc", Platform::YouTube);
        let (sink, _feed) = crate::media::progress_channel();

        let result = extractor.extract(&request, sink).await;
        assert!(matches!(result, Err(ExtractionError::Unknown(_))));
        assert!(!extractor.scratch_dir(&request).exists());
        Ok(())
    }
}
