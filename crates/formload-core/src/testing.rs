//! Test helpers for code that drives uploads.
//!
//! [`MultipartBuilder`] assembles request bodies and [`RecordingStorage`]
//! wraps any engine to observe the sink lifecycle.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StorageError;
use crate::file::{FileRequest, StoredFile};
use crate::storage::{FileSink, StorageEngine};

/// Boundary used by [`MultipartBuilder::new`].
pub const TEST_BOUNDARY: &str = "formload-test-7MA4YWxkTrZu0gW";

/// Builds multipart/form-data request bodies.
#[derive(Debug, Clone)]
pub struct MultipartBuilder {
    boundary: String,
    parts: Vec<(String, Vec<u8>)>,
}

impl Default for MultipartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBuilder {
    /// Empty body with [`TEST_BOUNDARY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(TEST_BOUNDARY)
    }

    /// Empty body with a custom boundary.
    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    /// Append a text field.
    #[must_use]
    pub fn field(self, name: &str, value: impl Into<String>) -> Self {
        let headers = format!("Content-Disposition: form-data; name=\"{name}\"");
        self.raw_part(&headers, value.into().as_bytes())
    }

    /// Append a file part.
    #[must_use]
    pub fn file(self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        let headers = format!(
            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{}\"\r\nContent-Type: {content_type}",
            filename.replace('\\', "\\\\").replace('"', "\\\"")
        );
        self.raw_part(&headers, data)
    }

    /// Append a part with a hand-written header block (no trailing CRLF).
    #[must_use]
    pub fn raw_part(mut self, headers: &str, body: &[u8]) -> Self {
        self.parts.push((headers.to_string(), body.to_vec()));
        self
    }

    /// The Content-Type header value for this body.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Content-Type and encoded body.
    #[must_use]
    pub fn build(&self) -> (String, Vec<u8>) {
        let mut body = Vec::new();
        for (headers, data) in &self.parts {
            body.extend_from_slice(b"--");
            body.extend_from_slice(self.boundary.as_bytes());
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(headers.as_bytes());
            body.extend_from_slice(b"\r\n\r\n");
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(b"--");
        body.extend_from_slice(self.boundary.as_bytes());
        body.extend_from_slice(b"--\r\n");
        (self.content_type(), body)
    }
}

/// A sink lifecycle call observed by [`RecordingStorage`], tagged with the
/// field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// `begin_file` succeeded.
    Begin(String),
    /// `finish` succeeded.
    Finish(String),
    /// `abort` was called.
    Abort(String),
}

#[derive(Debug, Default)]
struct Journal {
    events: Vec<StorageEvent>,
    bytes_written: u64,
}

/// Storage engine wrapper that records every sink lifecycle call.
pub struct RecordingStorage<E> {
    inner: E,
    journal: Arc<Mutex<Journal>>,
}

impl<E: StorageEngine> RecordingStorage<E> {
    /// Wrap `inner`.
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            journal: Arc::new(Mutex::new(Journal::default())),
        }
    }

    /// Every event so far, in call order.
    #[must_use]
    pub fn events(&self) -> Vec<StorageEvent> {
        self.journal.lock().events.clone()
    }

    /// Total bytes passed to `write` across all sinks.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.journal.lock().bytes_written
    }

    /// Sinks begun and never aborted.
    #[must_use]
    pub fn live_sinks(&self) -> usize {
        let journal = self.journal.lock();
        let begun = journal
            .events
            .iter()
            .filter(|e| matches!(e, StorageEvent::Begin(_)))
            .count();
        let aborted = journal
            .events
            .iter()
            .filter(|e| matches!(e, StorageEvent::Abort(_)))
            .count();
        begun.saturating_sub(aborted)
    }
}

impl<E: fmt::Debug> fmt::Debug for RecordingStorage<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingStorage")
            .field("inner", &self.inner)
            .field("events", &self.journal.lock().events.len())
            .finish()
    }
}

impl<E: StorageEngine> StorageEngine for RecordingStorage<E> {
    fn begin_file(&self, request: &FileRequest<'_>) -> Result<Box<dyn FileSink>, StorageError> {
        let inner = self.inner.begin_file(request)?;
        let field = request.file.field_name.clone();
        self.journal
            .lock()
            .events
            .push(StorageEvent::Begin(field.clone()));
        Ok(Box::new(RecordingSink {
            inner,
            field,
            journal: Arc::clone(&self.journal),
        }))
    }
}

struct RecordingSink {
    inner: Box<dyn FileSink>,
    field: String,
    journal: Arc<Mutex<Journal>>,
}

impl FileSink for RecordingSink {
    fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.inner.write(chunk)?;
        self.journal.lock().bytes_written += u64::try_from(chunk.len()).unwrap_or(u64::MAX);
        Ok(())
    }

    fn finish(&mut self) -> Result<StoredFile, StorageError> {
        let stored = self.inner.finish()?;
        self.journal
            .lock()
            .events
            .push(StorageEvent::Finish(self.field.clone()));
        Ok(stored)
    }

    fn abort(&mut self) -> Result<(), StorageError> {
        self.journal
            .lock()
            .events
            .push(StorageEvent::Abort(self.field.clone()));
        self.inner.abort()
    }
}
