//! File metadata handed to filters and storage, and the stored result.

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::context::UploadContext;
use crate::fields::Fields;

/// What is known about a file part before its body is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Form field name.
    pub field_name: String,
    /// Client-supplied filename (basename unless path preservation is on).
    pub original_name: String,
    /// Content-Transfer-Encoding, defaulting to `7bit`.
    pub encoding: String,
    /// Content-Type, defaulting to `text/plain`.
    pub mime_type: String,
}

/// Everything a filter or storage engine may consult about a file part.
///
/// `fields` holds only the text fields that arrived before this file.
#[derive(Debug, Clone, Copy)]
pub struct FileRequest<'a> {
    /// Opaque caller context.
    pub context: &'a UploadContext,
    /// Text fields seen so far.
    pub fields: &'a Fields,
    /// The file part being started.
    pub file: &'a FileInfo,
}

/// Where a stored file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLocator {
    /// Written to disk.
    Disk {
        /// Directory the file was written to.
        destination: PathBuf,
        /// Generated file name inside `destination`.
        filename: String,
        /// Full path.
        path: PathBuf,
    },
    /// Held in memory.
    Memory(Bytes),
    /// Engine-specific location (object key, URL, ...).
    Custom(String),
}

/// A file that was fully written and finalized by a storage engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Form field name.
    pub field_name: String,
    /// Client-supplied filename.
    pub original_name: String,
    /// Content-Transfer-Encoding.
    pub encoding: String,
    /// Content-Type.
    pub mime_type: String,
    /// Bytes written.
    pub size: u64,
    /// Engine-specific location.
    pub locator: FileLocator,
}

impl StoredFile {
    /// Build from the part's metadata.
    #[must_use]
    pub fn new(info: &FileInfo, size: u64, locator: FileLocator) -> Self {
        Self {
            field_name: info.field_name.clone(),
            original_name: info.original_name.clone(),
            encoding: info.encoding.clone(),
            mime_type: info.mime_type.clone(),
            size,
            locator,
        }
    }

    /// On-disk path, for disk-stored files.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.locator {
            FileLocator::Disk { path, .. } => Some(path),
            _ => None,
        }
    }

    /// In-memory contents, for memory-stored files.
    #[must_use]
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.locator {
            FileLocator::Memory(bytes) => Some(bytes),
            _ => None,
        }
    }
}
