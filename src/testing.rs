//! Testing helpers, fakes and mock constructors.

use crate::bot::messaging::{Markup, MessageRef, Messenger};
use crate::bot::transport::{PathId, TransportError};
use crate::media::{
    transcoder::compressed_path, CompressionError, DownloadRequest, ExtractedMedia,
    ExtractionError, Extractor, MediaMetadata, ProgressSink, ProgressSnapshot, TempMedia,
    Transcoder,
};
use crate::storage::{MockStatsStore, UserStats};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One recorded outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `send_text`
    Send {
        /// Target chat
        chat_id: i64,
        /// Text
        text: String,
        /// Keyboard
        markup: Markup,
    },
    /// `edit_text`
    Edit {
        /// Edited message
        target: MessageRef,
        /// New text
        text: String,
        /// Keyboard
        markup: Markup,
    },
    /// `send_video`
    Video {
        /// Target chat
        chat_id: i64,
        /// Uploaded file
        path: PathBuf,
        /// Whether the file existed at upload time
        existed: bool,
    },
}

/// [`Messenger`] fake that records every call.
#[derive(Clone, Default)]
pub struct RecordingMessenger {
    calls: Arc<Mutex<Vec<Call>>>,
    next_id: Arc<AtomicI32>,
    edit_attempts: Arc<AtomicUsize>,
    fail_edits: Arc<AtomicBool>,
    fail_video: Arc<AtomicBool>,
}

impl RecordingMessenger {
    /// Messenger whose edits always fail
    #[must_use]
    pub fn failing_edits() -> Self {
        let messenger = Self::default();
        messenger.fail_edits.store(true, Ordering::SeqCst);
        messenger
    }

    /// Messenger whose video uploads always fail
    #[must_use]
    pub fn failing_video() -> Self {
        let messenger = Self::default();
        messenger.fail_video.store(true, Ordering::SeqCst);
        messenger
    }

    /// Snapshot of the recorded calls
    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    /// Texts of all sends and edits, in order
    pub async fn texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                Call::Send { text, .. } | Call::Edit { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Last text shown to the user
    pub async fn last_text(&self) -> Option<String> {
        self.texts().await.pop()
    }

    /// Edit calls attempted, including failed ones
    #[must_use]
    pub fn edit_attempts(&self) -> usize {
        self.edit_attempts.load(Ordering::SeqCst)
    }

    fn failure() -> TransportError {
        TransportError::Exhausted {
            attempts: 1,
            path: PathId::Direct,
            message: "simulated failure".to_string(),
        }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        markup: Markup,
    ) -> Result<MessageRef, TransportError> {
        self.calls.lock().await.push(Call::Send {
            chat_id,
            text: text.to_string(),
            markup,
        });
        let message_id = 100 + self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MessageRef {
            chat_id,
            message_id,
        })
    }

    async fn edit_text(
        &self,
        target: MessageRef,
        text: &str,
        markup: Markup,
    ) -> Result<(), TransportError> {
        self.edit_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_edits.load(Ordering::SeqCst) {
            return Err(Self::failure());
        }
        self.calls.lock().await.push(Call::Edit {
            target,
            text: text.to_string(),
            markup,
        });
        Ok(())
    }

    async fn send_video(&self, chat_id: i64, path: &Path) -> Result<(), TransportError> {
        self.calls.lock().await.push(Call::Video {
            chat_id,
            path: path.to_path_buf(),
            existed: path.exists(),
        });
        if self.fail_video.load(Ordering::SeqCst) {
            return Err(Self::failure());
        }
        Ok(())
    }
}

/// What [`FakeExtractor`] produces
#[derive(Debug, Clone, Copy)]
pub enum FakeExtraction {
    /// A (sparse) file of this many bytes
    Sized(u64),
    /// The video is unavailable
    Unavailable,
    /// The video is private
    Private,
}

/// [`Extractor`] fake writing sparse files into a directory.
#[derive(Clone)]
pub struct FakeExtractor {
    root: PathBuf,
    outcome: FakeExtraction,
    steps: u64,
    pause: Duration,
    created: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeExtractor {
    /// Extractor writing under `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, outcome: FakeExtraction) -> Self {
        Self {
            root: root.into(),
            outcome,
            steps: 1,
            pause: Duration::ZERO,
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Publish `steps` distinct snapshots, sleeping `pause` after each
    #[must_use]
    pub const fn with_progress(mut self, steps: u64, pause: Duration) -> Self {
        self.steps = steps;
        self.pause = pause;
        self
    }

    /// Files this extractor created
    pub async fn created(&self) -> Vec<PathBuf> {
        self.created.lock().await.clone()
    }
}

/// Create a sparse file of `size` bytes
///
/// # Errors
///
/// Returns an I/O error if the file cannot be created.
pub fn sparse_file(path: &Path, size: u64) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path)?.set_len(size)
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        request: &DownloadRequest,
        progress: ProgressSink,
    ) -> Result<ExtractedMedia, ExtractionError> {
        for step in 1..=self.steps {
            progress.publish(ProgressSnapshot::downloading(
                step,
                Some(self.steps + 1),
                Some(1024.0),
                Some(self.steps + 1 - step),
            ));
            if !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }
        }
        progress.finished();

        let size = match self.outcome {
            FakeExtraction::Sized(size) => size,
            FakeExtraction::Unavailable => return Err(ExtractionError::Unavailable),
            FakeExtraction::Private => return Err(ExtractionError::Private),
        };

        let dir = self.root.join(request.id.to_string());
        let path = dir.join("video.mp4");
        sparse_file(&path, size).map_err(|e| ExtractionError::Unknown(e.to_string()))?;
        self.created.lock().await.push(path.clone());

        Ok(ExtractedMedia {
            file: TempMedia::new(path).with_scratch_dir(dir),
            metadata: MediaMetadata::default(),
        })
    }
}

/// [`Transcoder`] fake producing a sparse output of a fixed size, or failing.
#[derive(Clone, Default)]
pub struct FakeTranscoder {
    output_size: Option<u64>,
    created: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakeTranscoder {
    /// Transcoder writing `size` bytes
    #[must_use]
    pub fn producing(size: u64) -> Self {
        Self {
            output_size: Some(size),
            created: Arc::default(),
        }
    }

    /// Transcoder that always fails
    #[must_use]
    pub fn failing() -> Self {
        Self::default()
    }

    /// Files this transcoder created
    pub async fn created(&self) -> Vec<PathBuf> {
        self.created.lock().await.clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn compress(&self, input: &Path) -> Result<PathBuf, CompressionError> {
        let Some(size) = self.output_size else {
            return Err(CompressionError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "simulated failure".to_string(),
            });
        };
        let output = compressed_path(input);
        sparse_file(&output, size).map_err(CompressionError::Spawn)?;
        self.created.lock().await.push(output.clone());
        Ok(output)
    }
}

/// Create a mock statistics store that accepts every call.
///
/// `user_stats` returns empty statistics.
#[must_use]
pub fn mock_stats_noop() -> MockStatsStore {
    let mut mock = MockStatsStore::new();
    mock.expect_register_user().returning(|_| Ok(()));
    mock.expect_log_request().returning(|_| Ok(()));
    mock.expect_update_request_status()
        .returning(|_, _, _, _| Ok(()));
    mock.expect_user_stats()
        .returning(|_| Ok(UserStats::default()));
    mock
}
