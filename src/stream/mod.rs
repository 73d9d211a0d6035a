//! Streaming delivery of committed items.
//!
//! Serves a library item's bytes, honoring an optional inclusive byte
//! range. Reads go only to the committed storage path; because commit
//! swaps files with an atomic rename and never edits payload bytes in
//! place, a reader holding an open handle keeps the inode it opened and
//! is never corrupted by a concurrent re-commit of the same identity.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeekExt, ReadBuf, SeekFrom};

use crate::domain::{Item, ItemId};
use crate::library::LibraryIndex;

/// Errors from opening a stream
#[derive(Debug, Error)]
pub enum StreamError {
    /// Identity absent from the library (or its file vanished)
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    /// Requested range starts beyond the payload or is inverted
    #[error("Requested range is not satisfiable for payload length {len}")]
    RangeNotSatisfiable { len: u64 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// An inclusive byte range request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `start..=end`
    Bounded { start: u64, end: u64 },

    /// `start..` to the end of the payload
    From { start: u64 },

    /// The final `len` bytes
    Suffix { len: u64 },
}

impl ByteRange {
    pub fn bounded(start: u64, end: u64) -> Self {
        Self::Bounded { start, end }
    }

    pub fn from_start(start: u64) -> Self {
        Self::From { start }
    }

    pub fn suffix(len: u64) -> Self {
        Self::Suffix { len }
    }

    /// Parse an HTTP `Range` header value.
    ///
    /// Supports the single-range forms `bytes=a-b`, `bytes=a-` and
    /// `bytes=-n`. Returns `None` for anything else (including
    /// multi-range requests), which per HTTP semantics means the header
    /// is ignored and the full payload is served.
    pub fn parse_header(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes=")?.trim();
        if spec.contains(',') {
            return None;
        }

        let (start, end) = spec.split_once('-')?;
        let start = start.trim();
        let end = end.trim();

        match (start.is_empty(), end.is_empty()) {
            (true, false) => end.parse().ok().map(|len| Self::Suffix { len }),
            (false, true) => start.parse().ok().map(|start| Self::From { start }),
            (false, false) => {
                let start = start.parse().ok()?;
                let end = end.parse().ok()?;
                Some(Self::Bounded { start, end })
            }
            (true, true) => None,
        }
    }

    /// Resolve against a payload length into concrete inclusive bounds.
    ///
    /// The end is clamped to the last byte; a range starting at or past
    /// the end of the payload (or inverted) is not satisfiable.
    pub fn resolve(&self, len: u64) -> Result<(u64, u64), StreamError> {
        let unsatisfiable = StreamError::RangeNotSatisfiable { len };

        match *self {
            Self::Bounded { start, end } => {
                if start > end || start >= len {
                    return Err(unsatisfiable);
                }
                Ok((start, end.min(len - 1)))
            }
            Self::From { start } => {
                if start >= len {
                    return Err(unsatisfiable);
                }
                Ok((start, len - 1))
            }
            Self::Suffix { len: suffix } => {
                if suffix == 0 || len == 0 {
                    return Err(unsatisfiable);
                }
                Ok((len.saturating_sub(suffix), len - 1))
            }
        }
    }
}

/// An open byte stream over a committed payload
#[derive(Debug)]
pub struct MediaStream {
    reader: tokio::io::Take<File>,

    /// The item served, as committed at open time
    pub item: Item,

    /// Bytes this stream will yield
    pub content_length: u64,

    /// Total payload size
    pub total_size: u64,

    /// MIME type of the payload
    pub content_type: &'static str,

    /// Satisfied range, when the request carried one
    pub range: Option<(u64, u64)>,
}

impl MediaStream {
    /// `Content-Range` header value for a ranged response
    pub fn content_range_header(&self) -> Option<String> {
        self.range
            .map(|(start, end)| format!("bytes {}-{}/{}", start, end, self.total_size))
    }
}

impl AsyncRead for MediaStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

/// Serves committed items; holds no state beyond the index handle
pub struct StreamService {
    index: Arc<LibraryIndex>,
}

impl StreamService {
    pub fn new(index: Arc<LibraryIndex>) -> Self {
        Self { index }
    }

    /// Open a stream over a committed item.
    ///
    /// Fails with `NotFound` for identities that are absent or not yet
    /// ready, and `RangeNotSatisfiable` for ranges outside the payload.
    pub async fn open(
        &self,
        id: &ItemId,
        range: Option<ByteRange>,
    ) -> Result<MediaStream, StreamError> {
        let item = self
            .index
            .lookup(id)
            .await
            .filter(|item| item.status.is_ready())
            .ok_or_else(|| StreamError::NotFound(id.clone()))?;

        let mut file = File::open(&item.storage_path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StreamError::NotFound(id.clone())
            } else {
                StreamError::Io(e)
            }
        })?;

        // Size of the inode we actually opened, not the index's cache
        let total_size = file.metadata().await?.len();

        let (start, end, range) = match range {
            Some(requested) => {
                let (start, end) = requested.resolve(total_size)?;
                (start, end, Some((start, end)))
            }
            None => (0, total_size.saturating_sub(1), None),
        };

        let content_length = if total_size == 0 { 0 } else { end - start + 1 };

        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }

        Ok(MediaStream {
            reader: tokio::io::AsyncReadExt::take(file, content_length),
            content_length,
            total_size,
            content_type: item.format.mime_type(),
            range,
            item,
        })
    }
}
