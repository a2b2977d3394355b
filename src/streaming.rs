//! # Streaming Pipeline
//!
//! Wraps lazy producers into single-consumption chunk streams for the transport to pull.
//!
//! ## Profiles
//!
//! - **Event stream** ([`StreamingResponse::event_stream`]): pre-formatted SSE frames, passed
//!   through unchanged. Defaults `Content-Type: text/event-stream`, `Cache-Control: no-cache`
//!   and `X-Accel-Buffering: no`; caller headers override by name.
//! - **NDJSON** ([`StreamingResponse::ndjson`]): one JSON document plus `\n` per value.
//! - **File** ([`StreamingResponse::file`]): fixed-size reads until EOF, with `Content-Length`
//!   taken from file metadata. Argument and open errors surface at call time, not on first pull.
//!
//! ## Consumption
//!
//! A [`ChunkStream`] can be iterated once. After it yields `None` or an error it is exhausted:
//! the producer has been dropped (closing any file or channel it held) and every further
//! `next()` returns `None`. Dropping a stream early releases the producer the same way.
//!
//! [`ChunkStream::into_chunked`] re-frames the chunks with HTTP/1.1 chunked transfer encoding.

use crate::request::HeaderVec;
use crate::response::ResponseError;
use crate::value::{BoundaryValue, ProjectionError};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub const CONTENT_TYPE_EVENT_STREAM: &str = "text/event-stream";
pub const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";

/// Default read size for file streams.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Chunk size must be at least one byte
    InvalidChunkSize(usize),
    Io {
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },
    Serialization(ProjectionError),
    /// Producer-reported failure
    Producer(String),
}

impl StreamError {
    fn io(path: &Path, err: &io::Error) -> Self {
        StreamError::Io {
            path: path.to_path_buf(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::InvalidChunkSize(size) => {
                write!(f, "Chunk size must be at least 1 byte, got {size}")
            }
            StreamError::Io { path, kind, .. } if *kind == io::ErrorKind::NotFound => {
                write!(f, "File not found: {}", path.display())
            }
            StreamError::Io { path, message, .. } => {
                write!(f, "I/O error streaming {}: {message}", path.display())
            }
            StreamError::Serialization(e) => write!(f, "Failed to serialize stream item: {e}"),
            StreamError::Producer(msg) => write!(f, "Stream producer failed: {msg}"),
        }
    }
}

impl std::error::Error for StreamError {}

pub type ChunkResult = Result<Bytes, StreamError>;

type Producer = Box<dyn Iterator<Item = ChunkResult> + Send>;

/// Pull-based, single-consumption chunk sequence.
pub struct ChunkStream {
    producer: Option<Producer>,
}

impl ChunkStream {
    pub fn new<I>(producer: I) -> Self
    where
        I: IntoIterator<Item = ChunkResult>,
        I::IntoIter: Send + 'static,
    {
        Self {
            producer: Some(Box::new(producer.into_iter())),
        }
    }

    /// Stream over infallible chunks.
    pub fn from_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        I::IntoIter: Send + 'static,
        C: Into<Bytes>,
    {
        Self::new(chunks.into_iter().map(|c| Ok(c.into())))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self { producer: None }
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.producer.is_none()
    }

    /// Drain the remaining chunks into one buffer.
    pub fn collect_bytes(&mut self) -> Result<Bytes, StreamError> {
        let mut out = BytesMut::new();
        for chunk in self.by_ref() {
            out.put_slice(&chunk?);
        }
        Ok(out.freeze())
    }

    /// Re-frame with HTTP/1.1 chunked transfer encoding.
    #[must_use]
    pub fn into_chunked(self) -> ChunkedFrames {
        ChunkedFrames {
            inner: self,
            finished: false,
        }
    }
}

impl Iterator for ChunkStream {
    type Item = ChunkResult;

    fn next(&mut self) -> Option<Self::Item> {
        let producer = self.producer.as_mut()?;
        match producer.next() {
            Some(Ok(chunk)) => Some(Ok(chunk)),
            Some(Err(e)) => {
                self.producer = None;
                Some(Err(e))
            }
            None => {
                self.producer = None;
                None
            }
        }
    }
}

impl FusedIterator for ChunkStream {}

/// Chunked transfer-encoding frames over a [`ChunkStream`].
///
/// Empty chunks are skipped since a zero-length frame terminates the body. A producer error
/// is forwarded and no terminator is written, so the peer sees a truncated body.
pub struct ChunkedFrames {
    inner: ChunkStream,
    finished: bool,
}

impl Iterator for ChunkedFrames {
    type Item = ChunkResult;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.inner.next() {
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    let prefix = format!("{:x}\r\n", chunk.len());
                    let mut frame = BytesMut::with_capacity(prefix.len() + chunk.len() + 2);
                    frame.put_slice(prefix.as_bytes());
                    frame.put_slice(&chunk);
                    frame.put_slice(b"\r\n");
                    return Some(Ok(frame.freeze()));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                None => {
                    self.finished = true;
                    return Some(Ok(Bytes::from_static(b"0\r\n\r\n")));
                }
            }
        }
    }
}

impl FusedIterator for ChunkedFrames {}

/// Options for [`StreamingResponse::file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStreamOptions {
    pub chunk_size: usize,
    /// Overrides the extension-based content type
    pub content_type: Option<String>,
}

impl Default for FileStreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            content_type: None,
        }
    }
}

impl FileStreamOptions {
    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Streaming reply: status, headers and a chunk stream.
pub struct StreamingResponse {
    status: u16,
    headers: HeaderVec,
    stream: ChunkStream,
}

impl StreamingResponse {
    /// 200 with no headers.
    #[must_use]
    pub fn new(stream: ChunkStream) -> Self {
        Self {
            status: 200,
            headers: HeaderVec::new(),
            stream,
        }
    }

    /// Server-sent events. Caller headers override the event-stream defaults.
    pub fn event_stream<I, C, H, K, V>(producer: I, headers: H) -> Self
    where
        I: IntoIterator<Item = C>,
        I::IntoIter: Send + 'static,
        C: Into<Bytes>,
        H: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut response = Self::new(ChunkStream::from_chunks(producer))
            .with_header("Content-Type", CONTENT_TYPE_EVENT_STREAM)
            .with_header("Cache-Control", "no-cache")
            .with_header("X-Accel-Buffering", "no");
        for (name, value) in headers {
            response = response.with_header(name.as_ref(), value);
        }
        response
    }

    /// Newline-delimited JSON, one document per produced value.
    pub fn ndjson<I>(producer: I) -> Self
    where
        I: IntoIterator<Item = BoundaryValue>,
        I::IntoIter: Send + 'static,
    {
        let lines = producer.into_iter().map(|value| {
            let json = value.to_json().map_err(StreamError::Serialization)?;
            let mut line = serde_json::to_vec(&json).map_err(|e| {
                StreamError::Serialization(ProjectionError::Serde {
                    message: e.to_string(),
                })
            })?;
            line.push(b'\n');
            Ok(Bytes::from(line))
        });
        Self::new(ChunkStream::new(lines)).with_header("Content-Type", CONTENT_TYPE_NDJSON)
    }

    /// Stream a file from disk.
    ///
    /// Fails immediately if `chunk_size` is zero or the file cannot be opened.
    pub fn file(path: impl AsRef<Path>, options: FileStreamOptions) -> Result<Self, StreamError> {
        let path = path.as_ref();
        if options.chunk_size == 0 {
            return Err(StreamError::InvalidChunkSize(options.chunk_size));
        }
        let file = File::open(path).map_err(|e| StreamError::io(path, &e))?;
        let metadata = file.metadata().map_err(|e| StreamError::io(path, &e))?;
        if !metadata.is_file() {
            return Err(StreamError::Io {
                path: path.to_path_buf(),
                kind: io::ErrorKind::NotFound,
                message: "not a regular file".to_string(),
            });
        }
        let content_type = options
            .content_type
            .clone()
            .unwrap_or_else(|| mime_for_path(path).to_string());

        debug!(
            path = %path.display(),
            size = metadata.len(),
            chunk_size = options.chunk_size,
            "File stream opened"
        );

        let chunks = FileChunks {
            file,
            path: path.to_path_buf(),
            chunk_size: options.chunk_size,
        };
        Ok(Self::new(ChunkStream::new(chunks))
            .with_header("Content-Type", content_type)
            .with_header("Content-Length", metadata.len().to_string()))
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn headers(&self) -> &[(Arc<str>, String)] {
        &self.headers
    }

    /// Set a header, replacing any existing header with the same name.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((Arc::from(name), value.into()));
        self
    }

    pub fn with_status(mut self, status: u16) -> Result<Self, ResponseError> {
        if !(100..=599).contains(&status) {
            return Err(ResponseError::InvalidStatus(status));
        }
        self.status = status;
        Ok(self)
    }

    pub fn stream_mut(&mut self) -> &mut ChunkStream {
        &mut self.stream
    }

    #[must_use]
    pub fn into_stream(self) -> ChunkStream {
        self.stream
    }

    #[must_use]
    pub fn into_parts(self) -> (u16, HeaderVec, ChunkStream) {
        (self.status, self.headers, self.stream)
    }
}

struct FileChunks {
    file: File,
    path: PathBuf,
    chunk_size: usize,
}

impl Iterator for FileChunks {
    type Item = ChunkResult;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "File stream read failed");
                    return Some(Err(StreamError::io(&self.path, &e)));
                }
            }
        }
        if filled == 0 {
            return None;
        }
        buf.truncate(filled);
        Some(Ok(Bytes::from(buf)))
    }
}

impl Drop for FileChunks {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "File stream released");
    }
}

/// Content type by file extension.
#[must_use]
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "wasm" => "application/wasm",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}
