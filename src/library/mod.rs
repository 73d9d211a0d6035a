//! The media library: on-disk layout, index, and watcher.
//!
//! The library is a directory of committed payload files plus an
//! in-memory index rebuilt from them on demand.
//!
//! # Storage Layout
//!
//! ```text
//! ~/.cratedig/library/
//! ├── cratedig.lock             # Exclusive process lock
//! ├── media/
//! │   └── <identity>.<ext>      # Committed payloads, SHA256(locator)[0:16]
//! └── tmp/
//!     └── .incoming-<uuid>.<ext> # Staging files, never addressable
//! ```

pub mod index;
pub mod layout;
pub mod watcher;

pub use index::{LibraryError, LibraryIndex, ReconcileReport};
pub use layout::{ProcessLock, StorageLayout};
pub use watcher::{LibraryWatcher, WatchHandle, WatcherConfig};
