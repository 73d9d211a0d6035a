//! cratedig - media acquisition and library pipeline daemon
//!
//! Acquires media items from external sources, normalizes their tags,
//! maintains a disk-reconciled library index, and serves byte ranges of
//! committed items.
//!
//! # Architecture
//!
//! The pipeline is built around one invariant: an item becomes visible
//! only through an atomic commit.
//! - Downloads land in a staging area, never in the library
//! - Tags are written into the payload itself before commit
//! - Commit renames the staged file into place and swaps the index entry
//! - The index can always be rebuilt from the committed files alone
//!
//! # Modules
//!
//! - `adapters`: External source integrations (yt-dlp, direct HTTP)
//! - `core`: Download orchestration (dedup, worker pool, retry)
//! - `domain`: Data structures (Item, Job, tags)
//! - `library`: Storage layout, index, reconcile, watcher
//! - `stream`: Byte-range delivery of committed items
//! - `tagger`: Tag normalization into the media container
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Acquire a track
//! cratedig fetch "https://youtube.com/watch?v=abc123"
//!
//! # List the library
//! cratedig list
//!
//! # Stream a byte range
//! cratedig stream <identity> --range 0-65535 --output clip.mp3
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod library;
pub mod stream;
pub mod tagger;

// Re-export main types at crate root for convenience
pub use crate::core::{Orchestrator, StatusReport, SubmitError};
pub use crate::domain::{
    Item, ItemId, ItemStatus, JobErrorKind, JobHandle, JobState, TagPatch, TrackTags,
};
pub use crate::library::{LibraryIndex, LibraryWatcher, ReconcileReport, StorageLayout};
pub use crate::stream::{ByteRange, MediaStream, StreamError, StreamService};

// Source adapter seam
pub use crate::adapters::{SourceAdapter, SourceAttributes, SourceError};
