//! Pluggable file storage.
//!
//! A [`StorageEngine`] opens one [`FileSink`] per accepted file part. The
//! sink receives the body chunk by chunk and is then either finished or
//! aborted. Aborting a finished sink rolls the stored file back; aborting
//! twice is a no-op.

mod disk;
mod memory;

use std::fmt;
use std::sync::Arc;

pub use disk::{DiskStorage, DiskStorageBuilder};
pub use memory::MemoryStorage;

use crate::error::StorageError;
use crate::file::{FileRequest, StoredFile};

/// Factory for per-file sinks.
pub trait StorageEngine: Send + Sync + fmt::Debug {
    /// Open a sink for the file described by `request`.
    fn begin_file(&self, request: &FileRequest<'_>) -> Result<Box<dyn FileSink>, StorageError>;
}

/// Destination for one file's bytes.
pub trait FileSink: Send {
    /// Append a chunk.
    fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError>;

    /// Finalize the file and describe where it is.
    fn finish(&mut self) -> Result<StoredFile, StorageError>;

    /// Discard everything written, including after a successful `finish`.
    ///
    /// Must be idempotent.
    fn abort(&mut self) -> Result<(), StorageError>;
}

impl<T: StorageEngine + ?Sized> StorageEngine for Arc<T> {
    fn begin_file(&self, request: &FileRequest<'_>) -> Result<Box<dyn FileSink>, StorageError> {
        (**self).begin_file(request)
    }
}

impl<T: StorageEngine + ?Sized> StorageEngine for Box<T> {
    fn begin_file(&self, request: &FileRequest<'_>) -> Result<Box<dyn FileSink>, StorageError> {
        (**self).begin_file(request)
    }
}

/// Lifecycle of a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SinkState {
    Open,
    Finished,
    Aborted,
}
