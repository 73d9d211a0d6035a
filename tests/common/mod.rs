//! Shared helpers for integration tests: a scripted mock source
//! adapter, WAV payload fixtures, and library builders.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

use cratedig::config::{DownloadSettings, RetrySettings};
use cratedig::domain::{CancelFlag, TagPatch};
use cratedig::{
    Item, ItemId, LibraryIndex, SourceAdapter, SourceAttributes, SourceError, StorageLayout,
};

/// Minimal canonical PCM WAV: 44-byte header plus a patterned data chunk
pub fn wav_bytes_filled(data_len: u32, fill: u8) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes()); // PCM fmt chunk size
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&44100u32.to_le_bytes());
    bytes.extend_from_slice(&88200u32.to_le_bytes()); // byte rate
    bytes.extend_from_slice(&2u16.to_le_bytes()); // block align
    bytes.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.extend(std::iter::repeat(fill).take(data_len as usize));
    bytes
}

pub fn wav_bytes(data_len: u32) -> Vec<u8> {
    wav_bytes_filled(data_len, 0)
}

/// One scripted behavior for a mock fetch
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Write a WAV payload and report the given attributes
    Succeed {
        title: String,
        artist: Option<String>,
        duration: Option<u64>,
    },

    /// Write bytes that are not an audio container
    SucceedGarbage,

    Unreachable,
    Rejected,
    Exhausted,

    /// Park until the shared gate is released, then succeed
    BlockThenSucceed { title: String },

    /// Park until the job is cancelled
    BlockUntilCancelled,
}

impl MockStep {
    pub fn succeed(title: &str) -> Self {
        Self::Succeed {
            title: title.to_string(),
            artist: None,
            duration: None,
        }
    }
}

/// Observable fetch lifecycle, for sequencing assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Started(String),
    Finished(String),
}

/// Scripted source adapter. Each locator consumes its steps in order;
/// the last step repeats. Unscripted locators succeed with a stock
/// title.
pub struct MockSource {
    scripts: Mutex<HashMap<String, VecDeque<MockStep>>>,
    pub calls: AtomicUsize,
    pub gate: Notify,
    events_tx: mpsc::UnboundedSender<MockEvent>,
}

impl MockSource {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mock = Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
            events_tx,
        });
        (mock, events_rx)
    }

    pub fn script(&self, locator: &str, steps: Vec<MockStep>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(locator.to_string(), steps.into());
    }

    pub fn fetch_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self, locator: &str) -> MockStep {
        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(locator) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| MockStep::succeed("Mock Title")),
            None => MockStep::succeed("Mock Title"),
        }
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(
        &self,
        locator: &str,
        dest: &Path,
        cancel: &CancelFlag,
    ) -> Result<SourceAttributes, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.next_step(locator);
        let _ = self.events_tx.send(MockEvent::Started(locator.to_string()));

        let result = match step {
            MockStep::Succeed {
                title,
                artist,
                duration,
            } => {
                tokio::fs::write(dest, wav_bytes(4410)).await?;
                Ok(SourceAttributes {
                    title: Some(title),
                    artist,
                    duration_secs: duration,
                })
            }
            MockStep::SucceedGarbage => {
                tokio::fs::write(dest, b"<html>definitely not audio</html>").await?;
                Ok(SourceAttributes::default())
            }
            MockStep::Unreachable => Err(SourceError::Unreachable("mock: network down".into())),
            MockStep::Rejected => Err(SourceError::Rejected("mock: bad locator".into())),
            MockStep::Exhausted => Err(SourceError::Exhausted("mock: 429".into())),
            MockStep::BlockThenSucceed { title } => {
                tokio::select! {
                    _ = self.gate.notified() => {
                        tokio::fs::write(dest, wav_bytes(4410)).await?;
                        Ok(SourceAttributes {
                            title: Some(title),
                            ..SourceAttributes::default()
                        })
                    }
                    _ = cancel.cancelled() => Err(SourceError::Cancelled),
                }
            }
            MockStep::BlockUntilCancelled => {
                cancel.cancelled().await;
                Err(SourceError::Cancelled)
            }
        };

        let _ = self
            .events_tx
            .send(MockEvent::Finished(locator.to_string()));
        result
    }

    async fn health_check(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Wait until the mock reports a fetch started for `locator`
pub async fn expect_started(rx: &mut mpsc::UnboundedReceiver<MockEvent>, locator: &str) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for fetch to start")
            .expect("mock event channel closed");

        if event == MockEvent::Started(locator.to_string()) {
            return;
        }
    }
}

/// Orchestrator settings tuned for fast tests: WAV payloads (what the
/// mock writes) and millisecond backoff
pub fn test_settings(max_concurrent: usize) -> DownloadSettings {
    DownloadSettings {
        max_concurrent,
        fetch_timeout: Duration::from_secs(5),
        audio_format: "wav".to_string(),
        ytdlp_path: "yt-dlp".to_string(),
        retry: RetrySettings {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 4,
        },
    }
}

/// Fresh empty library over a temp directory
pub async fn test_library() -> (TempDir, Arc<LibraryIndex>) {
    let temp = TempDir::new().unwrap();
    let layout = Arc::new(StorageLayout::new(temp.path()));
    layout.ensure().await.unwrap();
    (temp, Arc::new(LibraryIndex::new(layout)))
}

/// Stage, tag and commit a WAV payload directly, bypassing the
/// orchestrator
pub async fn commit_wav(
    index: &LibraryIndex,
    locator: &str,
    title: &str,
    data_len: u32,
    fill: u8,
) -> Item {
    let staged = index.layout().staging_path("wav");
    tokio::fs::write(&staged, wav_bytes_filled(data_len, fill))
        .await
        .unwrap();

    let patch = TagPatch {
        title: Some(title.to_string()),
        artist: Some("Common Artist".to_string()),
        album: None,
    };
    let tags = cratedig::tagger::normalize(&staged, &patch).await.unwrap();

    index
        .commit(ItemId::from_locator(locator), &staged, &tags)
        .await
        .unwrap()
}

/// Count files in the library's staging area
pub async fn staging_file_count(index: &LibraryIndex) -> usize {
    let mut count = 0;
    let mut entries = tokio::fs::read_dir(index.layout().tmp_dir()).await.unwrap();
    while let Some(_entry) = entries.next_entry().await.unwrap() {
        count += 1;
    }
    count
}
