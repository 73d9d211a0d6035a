//! The library index: identity → committed item.
//!
//! The index is the single writer of visible state. All mutation goes
//! through `commit` and `reconcile`; `lookup`, `list` and `search` may
//! run concurrently with commits for other identities. Commits for the
//! same identity are serialized by a per-identity lock, not a global
//! one, so distinct identities commit in parallel.
//!
//! There is no database file: the index is rebuilt from the committed
//! files' embedded tags plus their filenames.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use crate::domain::{Item, ItemId, ItemStatus, MediaFormat, TrackTags};
use crate::tagger;

use super::layout::StorageLayout;

/// Errors from index operations
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Staged payload has no recognized audio extension: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Staged payload is empty: {0}")]
    EmptyPayload(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Orphaned committed files registered into the index
    pub recovered: usize,

    /// Index entries dropped because their backing file is gone
    pub pruned: usize,

    /// Files in the media directory that were not recognized
    pub skipped: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Authoritative mapping from item identity to committed state
pub struct LibraryIndex {
    layout: Arc<StorageLayout>,

    /// Committed items; every entry is `Ready` with an existing file
    items: RwLock<HashMap<ItemId, Item>>,

    /// Per-identity commit serialization
    commit_locks: Mutex<HashMap<ItemId, Arc<Mutex<()>>>>,

    /// Monotonic commit sequence; the `list()` ordering key
    next_seq: AtomicU64,
}

impl LibraryIndex {
    /// Create an empty index over the given layout
    pub fn new(layout: Arc<StorageLayout>) -> Self {
        Self {
            layout,
            items: RwLock::new(HashMap::new()),
            commit_locks: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Open a library for use: create directories, drop stale staging
    /// files, and rebuild the index from the committed files on disk.
    pub async fn open(layout: Arc<StorageLayout>) -> anyhow::Result<Self> {
        layout.ensure().await?;
        layout.sweep_staging().await?;

        let index = Self::new(layout);
        let report = index.reconcile().await?;
        if !report.is_noop() {
            tracing::info!(
                recovered = report.recovered,
                pruned = report.pruned,
                skipped = report.skipped,
                "Library reconciled at startup"
            );
        }

        Ok(index)
    }

    /// Storage layout backing this index
    pub fn layout(&self) -> &Arc<StorageLayout> {
        &self.layout
    }

    /// Get the committed item for an identity, if any
    pub async fn lookup(&self, id: &ItemId) -> Option<Item> {
        self.items.read().await.get(id).cloned()
    }

    /// All ready items, ordered by commit sequence ascending
    pub async fn list(&self) -> Vec<Item> {
        let items = self.items.read().await;
        let mut listed: Vec<Item> = items
            .values()
            .filter(|item| item.status.is_ready())
            .cloned()
            .collect();

        listed.sort_by_key(|item| item.seq);
        listed
    }

    /// Ready items whose title or artist contains the query
    /// (case-insensitive), in `list()` order
    pub async fn search(&self, query: &str) -> Vec<Item> {
        let query_lower = query.to_lowercase();

        let mut matched: Vec<Item> = self
            .list()
            .await
            .into_iter()
            .filter(|item| {
                item.title.to_lowercase().contains(&query_lower)
                    || item
                        .artist
                        .as_ref()
                        .map(|a| a.to_lowercase().contains(&query_lower))
                        .unwrap_or(false)
            })
            .collect();

        matched.sort_by_key(|item| item.seq);
        matched
    }

    /// Number of committed items
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Get (or create) the commit lock for an identity
    async fn commit_lock(&self, id: &ItemId) -> Arc<Mutex<()>> {
        let mut locks = self.commit_locks.lock().await;
        locks.entry(id.clone()).or_default().clone()
    }

    /// Atomically make an item visible.
    ///
    /// The staged file is renamed into the media directory (staging and
    /// media share a filesystem, so the rename is atomic), then the
    /// in-memory entry is swapped. Either the item becomes fully
    /// visible or nothing changes. A re-commit of an existing identity
    /// replaces the entry only once the new payload is in place; a
    /// reader that already opened the old payload keeps its handle to
    /// the old inode.
    pub async fn commit(
        &self,
        id: ItemId,
        staged: &Path,
        tags: &TrackTags,
    ) -> Result<Item, LibraryError> {
        let lock = self.commit_lock(&id).await;
        let _guard = lock.lock().await;

        let format = MediaFormat::from_path(staged)
            .ok_or_else(|| LibraryError::UnsupportedFormat(staged.to_path_buf()))?;

        let meta = fs::metadata(staged).await?;
        if meta.len() == 0 {
            return Err(LibraryError::EmptyPayload(staged.to_path_buf()));
        }

        let final_path = self.layout.media_path(&id, format.extension());
        fs::rename(staged, &final_path).await?;

        let item = Item {
            id: id.clone(),
            title: tags.title.clone(),
            artist: tags.artist.clone(),
            duration_secs: tags.duration_secs,
            storage_path: final_path.clone(),
            size_bytes: meta.len(),
            format,
            status: ItemStatus::Ready,
            committed_at: Utc::now(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
        };

        let prior = {
            let mut items = self.items.write().await;
            items.insert(id.clone(), item.clone())
        };

        // A re-commit under a different extension leaves the superseded
        // payload behind; it is no longer addressable, so remove it
        if let Some(prev) = prior {
            if prev.storage_path != final_path {
                if let Err(e) = fs::remove_file(&prev.storage_path).await {
                    tracing::warn!(
                        "Failed to remove superseded payload {}: {}",
                        prev.storage_path.display(),
                        e
                    );
                }
            }
        }

        tracing::info!(id = %item.id, title = %item.title, "Committed item");
        Ok(item)
    }

    /// Rescan the media directory, registering orphaned committed files
    /// and pruning entries whose backing file no longer exists. Never
    /// removes a file. Safe to run at any time; idempotent when the
    /// directory is unchanged.
    pub async fn reconcile(&self) -> Result<ReconcileReport, LibraryError> {
        let mut report = ReconcileReport::default();
        let on_disk = self.scan_media_dir(&mut report).await?;

        // Read tags for files the index does not know about yet
        let mut recovered: Vec<Item> = Vec::new();
        for (id, found) in &on_disk {
            {
                let items = self.items.read().await;
                if let Some(existing) = items.get(id) {
                    if existing.storage_path == found.path {
                        continue;
                    }
                }
            }

            match tagger::read_tags(&found.path).await {
                Ok(probed) => {
                    recovered.push(Item {
                        id: id.clone(),
                        title: probed.title.unwrap_or_else(|| id.to_string()),
                        artist: probed.artist,
                        duration_secs: probed.duration_secs,
                        storage_path: found.path.clone(),
                        size_bytes: found.size_bytes,
                        format: found.format,
                        status: ItemStatus::Ready,
                        committed_at: found.modified_at,
                        seq: 0, // assigned below, in commit-time order
                    });
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable payload {}: {}", found.path.display(), e);
                    report.skipped += 1;
                }
            }
        }

        // Oldest first, so recovered items keep their historical order
        recovered.sort_by(|a, b| {
            a.committed_at
                .cmp(&b.committed_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });

        let mut items = self.items.write().await;

        let before = items.len();
        items.retain(|_, item| item.storage_path.exists());
        report.pruned = before - items.len();

        for mut item in recovered {
            item.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            items.insert(item.id.clone(), item);
            report.recovered += 1;
        }

        Ok(report)
    }

    async fn scan_media_dir(
        &self,
        report: &mut ReconcileReport,
    ) -> Result<HashMap<ItemId, FoundFile>, LibraryError> {
        let media = self.layout.media_dir();
        let mut on_disk: HashMap<ItemId, FoundFile> = HashMap::new();

        if !media.exists() {
            return Ok(on_disk);
        }

        let mut entries = fs::read_dir(&media).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            let meta = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if StorageLayout::is_staging_name(name) {
                continue;
            }

            let Some(format) = MediaFormat::from_path(&path) else {
                report.skipped += 1;
                continue;
            };

            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(ItemId::from_file_stem)
            else {
                report.skipped += 1;
                continue;
            };

            let modified_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let found = FoundFile {
                path,
                format,
                size_bytes: meta.len(),
                modified_at,
            };

            // Same identity under two extensions: keep the newer file
            let keep = match on_disk.get(&id) {
                Some(existing) if existing.modified_at >= found.modified_at => {
                    report.skipped += 1;
                    false
                }
                Some(_) => {
                    report.skipped += 1;
                    true
                }
                None => true,
            };
            if keep {
                on_disk.insert(id, found);
            }
        }

        Ok(on_disk)
    }
}

/// A committed payload discovered during reconcile
struct FoundFile {
    path: PathBuf,
    format: MediaFormat,
    size_bytes: u64,
    modified_at: DateTime<Utc>,
}
