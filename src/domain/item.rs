//! Library items and their identity.
//!
//! An Item is a single committed media entry. Its identity is derived
//! from the locator that produced it, so resubmitting the same locator
//! always targets the same library slot.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Item identifier (SHA256(locator)[0:16])
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    /// Derive an item ID from a locator
    pub fn from_locator(locator: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(locator.trim().as_bytes());
        let result = hasher.finalize();

        // First 8 bytes = 16 hex chars; short enough for filenames,
        // long enough to never collide in a personal library
        Self(hex::encode(&result[..8]))
    }

    /// Parse an ID from a committed file's stem
    ///
    /// Returns `None` for stems that are not 16 lowercase hex chars,
    /// so reconcile can skip foreign files in the media directory.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        if stem.len() == 16 && stem.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            Some(Self(stem.to_string()))
        } else {
            None
        }
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Audio container format of a committed payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    Mp3,
    M4a,
    Flac,
    Ogg,
    Opus,
    Wav,
}

impl MediaFormat {
    /// All file extensions recognized as committed payloads
    pub const EXTENSIONS: [&'static str; 6] = ["mp3", "m4a", "flac", "ogg", "opus", "wav"];

    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        match ext.to_lowercase().as_str() {
            "mp3" => Some(Self::Mp3),
            "m4a" => Some(Self::M4a),
            "flac" => Some(Self::Flac),
            "ogg" => Some(Self::Ogg),
            "opus" => Some(Self::Opus),
            "wav" => Some(Self::Wav),
            _ => None,
        }
    }

    /// Canonical file extension
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
            Self::Opus => "opus",
            Self::Wav => "wav",
        }
    }

    /// MIME type for streaming responses
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::M4a => "audio/mp4",
            Self::Flac => "audio/flac",
            Self::Ogg => "audio/ogg",
            Self::Opus => "audio/opus",
            Self::Wav => "audio/wav",
        }
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Visibility status of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Downloading,
    Tagging,
    Ready,
    Failed,
}

impl ItemStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// A committed library entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Stable identity derived from the locator
    pub id: ItemId,

    /// Display title (always present after tagging)
    pub title: String,

    /// Artist, if known
    pub artist: Option<String>,

    /// Duration in whole seconds, if known
    pub duration_secs: Option<u64>,

    /// Location of the committed payload; valid only when `status` is ready
    pub storage_path: PathBuf,

    /// Size of the committed payload in bytes
    pub size_bytes: u64,

    /// Container format of the committed payload
    pub format: MediaFormat,

    /// Visibility status
    pub status: ItemStatus,

    /// When the item was committed (or recovered)
    pub committed_at: DateTime<Utc>,

    /// Monotonic commit sequence; the stable `list()` ordering key
    pub seq: u64,
}

/// Normalized attributes as written into the container by the tagger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTags {
    /// Title as written
    pub title: String,

    /// Artist as written (or already present and preserved)
    pub artist: Option<String>,

    /// Album as written (or already present and preserved)
    pub album: Option<String>,

    /// Duration probed from the container, in whole seconds
    pub duration_secs: Option<u64>,
}

/// Attributes requested for an item; caller overrides win over
/// provider-reported values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPatch {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl TagPatch {
    /// Check whether any field is set
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }

    /// Fill unset fields from a lower-priority source
    pub fn or(mut self, fallback: TagPatch) -> TagPatch {
        if self.title.is_none() {
            self.title = fallback.title;
        }
        if self.artist.is_none() {
            self.artist = fallback.artist;
        }
        if self.album.is_none() {
            self.album = fallback.album;
        }
        self
    }
}
