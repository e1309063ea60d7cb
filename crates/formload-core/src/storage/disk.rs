use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use super::{FileSink, SinkState, StorageEngine};
use crate::error::StorageError;
use crate::file::{FileInfo, FileLocator, FileRequest, StoredFile};

type DestinationFn = dyn Fn(&FileRequest<'_>) -> Result<PathBuf, StorageError> + Send + Sync;
type FilenameFn = dyn Fn(&FileRequest<'_>) -> Result<String, StorageError> + Send + Sync;

#[derive(Clone)]
enum Destination {
    /// Fixed directory, created on first use.
    Fixed(PathBuf),
    /// Resolved per file; the directory must already exist.
    Resolve(Arc<DestinationFn>),
}

/// Streams files to a directory on disk.
///
/// Files are written under a generated name (32 hex characters unless a
/// filename resolver is configured) and removed again if the request fails.
#[derive(Clone)]
pub struct DiskStorage {
    destination: Destination,
    filename: Option<Arc<FilenameFn>>,
}

impl DiskStorage {
    /// Store files in `dir`, creating it (and its parents) when needed.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            destination: Destination::Fixed(dir.into()),
            filename: None,
        }
    }

    /// Store files in the system temporary directory.
    #[must_use]
    pub fn temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Start a builder with resolvers.
    #[must_use]
    pub fn builder() -> DiskStorageBuilder {
        DiskStorageBuilder::default()
    }

    fn resolve_destination(&self, request: &FileRequest<'_>) -> Result<PathBuf, StorageError> {
        match &self.destination {
            Destination::Fixed(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;
                Ok(dir.clone())
            }
            Destination::Resolve(resolve) => resolve(request),
        }
    }

    fn resolve_filename(&self, request: &FileRequest<'_>) -> Result<String, StorageError> {
        let name = match &self.filename {
            Some(resolve) => resolve(request)?,
            None => Uuid::new_v4().simple().to_string(),
        };
        validate_filename(&name)?;
        Ok(name)
    }
}

impl Default for DiskStorage {
    fn default() -> Self {
        Self::temp()
    }
}

impl fmt::Debug for DiskStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("DiskStorage");
        match &self.destination {
            Destination::Fixed(dir) => s.field("destination", dir),
            Destination::Resolve(_) => s.field("destination", &"<resolver>"),
        };
        s.field("custom_filename", &self.filename.is_some()).finish()
    }
}

impl StorageEngine for DiskStorage {
    fn begin_file(&self, request: &FileRequest<'_>) -> Result<Box<dyn FileSink>, StorageError> {
        let destination = self.resolve_destination(request)?;
        let filename = self.resolve_filename(request)?;
        let path = destination.join(&filename);

        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| StorageError::io(&path, e))?;

        Ok(Box::new(DiskSink {
            info: request.file.clone(),
            destination,
            filename,
            path,
            writer: Some(BufWriter::new(file)),
            written: 0,
            state: SinkState::Open,
        }))
    }
}

/// Builder for [`DiskStorage`] with per-file resolvers.
#[derive(Default)]
pub struct DiskStorageBuilder {
    destination: Option<Destination>,
    filename: Option<Arc<FilenameFn>>,
}

impl DiskStorageBuilder {
    /// Fixed destination directory.
    #[must_use]
    pub fn destination(mut self, dir: impl Into<PathBuf>) -> Self {
        self.destination = Some(Destination::Fixed(dir.into()));
        self
    }

    /// Resolve the destination directory per file. It must already exist.
    #[must_use]
    pub fn destination_fn<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&FileRequest<'_>) -> Result<PathBuf, StorageError> + Send + Sync + 'static,
    {
        self.destination = Some(Destination::Resolve(Arc::new(resolve)));
        self
    }

    /// Resolve the stored file name per file.
    ///
    /// The name must be a single path component.
    #[must_use]
    pub fn filename_fn<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&FileRequest<'_>) -> Result<String, StorageError> + Send + Sync + 'static,
    {
        self.filename = Some(Arc::new(resolve));
        self
    }

    /// Build the engine. Without a destination the temp directory is used.
    #[must_use]
    pub fn build(self) -> DiskStorage {
        DiskStorage {
            destination: self
                .destination
                .unwrap_or_else(|| Destination::Fixed(std::env::temp_dir())),
            filename: self.filename,
        }
    }
}

impl fmt::Debug for DiskStorageBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskStorageBuilder").finish_non_exhaustive()
    }
}

fn validate_filename(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(StorageError::Destination {
            detail: format!("invalid stored file name `{name}`"),
        });
    }
    Ok(())
}

struct DiskSink {
    info: FileInfo,
    destination: PathBuf,
    filename: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
    state: SinkState,
}

impl DiskSink {
    fn remove(&mut self) -> Result<(), StorageError> {
        drop(self.writer.take());
        remove_if_exists(&self.path)
    }
}

impl FileSink for DiskSink {
    fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        let Some(writer) = self.writer.as_mut().filter(|_| self.state == SinkState::Open) else {
            return Err(StorageError::SinkClosed);
        };
        writer
            .write_all(chunk)
            .map_err(|e| StorageError::io(&self.path, e))?;
        self.written += u64::try_from(chunk.len()).unwrap_or(u64::MAX);
        Ok(())
    }

    fn finish(&mut self) -> Result<StoredFile, StorageError> {
        if self.state != SinkState::Open {
            return Err(StorageError::SinkClosed);
        }
        let Some(writer) = self.writer.take() else {
            return Err(StorageError::SinkClosed);
        };
        let file = writer
            .into_inner()
            .map_err(|e| StorageError::io(&self.path, e.into_error()))?;
        file.sync_all().map_err(|e| StorageError::io(&self.path, e))?;
        self.state = SinkState::Finished;

        Ok(StoredFile::new(
            &self.info,
            self.written,
            FileLocator::Disk {
                destination: self.destination.clone(),
                filename: self.filename.clone(),
                path: self.path.clone(),
            },
        ))
    }

    fn abort(&mut self) -> Result<(), StorageError> {
        if self.state == SinkState::Aborted {
            return Ok(());
        }
        self.state = SinkState::Aborted;
        self.remove()
    }
}

impl Drop for DiskSink {
    fn drop(&mut self) {
        if self.state != SinkState::Open {
            return;
        }
        if let Err(err) = self.remove() {
            warn!(path = %self.path.display(), error = %err, "failed to remove partial upload");
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StorageError::io(path, err)),
    }
}
