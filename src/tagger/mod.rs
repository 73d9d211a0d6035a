//! Tag normalization for fetched payloads.
//!
//! Writes normalized attributes into the media container's own tag
//! envelope via lofty, so the library index can always be rebuilt from
//! the files themselves. Stateless per call; lofty does blocking I/O,
//! so the async entry points run it on the blocking pool.

use std::path::{Path, PathBuf};

use lofty::{Accessor, AudioFile, Tag, TagExt, TaggedFileExt};
use thiserror::Error;

use crate::domain::{TagPatch, TrackTags};

/// Errors from tag normalization
#[derive(Debug, Error)]
pub enum TagError {
    /// Payload is not a recognized audio container; fatal for the job
    #[error("Unrecognized audio container: {0}")]
    UnsupportedContainer(PathBuf),

    /// I/O failure or malformed envelope; retryable once
    #[error("Tag write failed for {path}: {message}")]
    WriteFailed { path: PathBuf, message: String },
}

/// Attributes probed from a container without modifying it
#[derive(Debug, Clone, Default)]
pub struct ProbedTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_secs: Option<u64>,
}

/// Write the requested attributes into the container at `path`.
///
/// Requested fields are written; fields not in the request keep
/// whatever the envelope already carries. A missing envelope is
/// created with the container's primary tag type. The returned tags
/// reflect exactly what the file now carries, so the caller never has
/// to re-read it.
///
/// A title must be available from either the request or the existing
/// envelope; items without any title are not committable.
pub async fn normalize(path: &Path, requested: &TagPatch) -> Result<TrackTags, TagError> {
    let path = path.to_path_buf();
    let requested = requested.clone();

    tokio::task::spawn_blocking(move || normalize_blocking(&path, &requested))
        .await
        .map_err(|e| TagError::WriteFailed {
            path: PathBuf::new(),
            message: format!("tagger task panicked: {}", e),
        })?
}

/// Read attributes and duration from a container without writing
pub async fn read_tags(path: &Path) -> Result<ProbedTags, TagError> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || read_tags_blocking(&path))
        .await
        .map_err(|e| TagError::WriteFailed {
            path: PathBuf::new(),
            message: format!("tagger task panicked: {}", e),
        })?
}

fn open_container(path: &Path) -> Result<lofty::TaggedFile, TagError> {
    lofty::read_from_path(path).map_err(|e| match e.kind() {
        // Unrecognized extension, or bytes that don't parse as the
        // container the extension claims
        lofty::error::ErrorKind::UnknownFormat | lofty::error::ErrorKind::FileDecoding(_) => {
            TagError::UnsupportedContainer(path.to_path_buf())
        }
        _ => TagError::WriteFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        },
    })
}

fn normalize_blocking(path: &Path, requested: &TagPatch) -> Result<TrackTags, TagError> {
    let mut tagged = open_container(path)?;
    let duration_secs = Some(tagged.properties().duration().as_secs());

    if tagged.primary_tag().is_none() {
        let tag_type = tagged.file_type().primary_tag_type();
        tagged.insert_tag(Tag::new(tag_type));
    }

    let tag = tagged
        .primary_tag_mut()
        .ok_or_else(|| TagError::WriteFailed {
            path: path.to_path_buf(),
            message: "no writable tag envelope".to_string(),
        })?;

    if let Some(ref title) = requested.title {
        tag.set_title(title.clone());
    }
    if let Some(ref artist) = requested.artist {
        tag.set_artist(artist.clone());
    }
    if let Some(ref album) = requested.album {
        tag.set_album(album.clone());
    }

    let title = tag
        .title()
        .map(|t| t.to_string())
        .ok_or_else(|| TagError::WriteFailed {
            path: path.to_path_buf(),
            message: "no title provided and none present in the container".to_string(),
        })?;
    let artist = tag.artist().map(|a| a.to_string());
    let album = tag.album().map(|a| a.to_string());

    tag.save_to_path(path).map_err(|e| TagError::WriteFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(TrackTags {
        title,
        artist,
        album,
        duration_secs,
    })
}

fn read_tags_blocking(path: &Path) -> Result<ProbedTags, TagError> {
    let tagged = open_container(path)?;
    let duration_secs = Some(tagged.properties().duration().as_secs());

    let tag = tagged.primary_tag().or_else(|| tagged.first_tag());

    let probed = if let Some(tag) = tag {
        ProbedTags {
            title: tag.title().map(|t| t.to_string()),
            artist: tag.artist().map(|a| a.to_string()),
            album: tag.album().map(|a| a.to_string()),
            duration_secs,
        }
    } else {
        ProbedTags {
            duration_secs,
            ..ProbedTags::default()
        }
    };

    Ok(probed)
}
