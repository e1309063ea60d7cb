//! Upload point configuration.
//!
//! An [`UploadSpec`] bundles the storage engine, limits, file rule and
//! filter for one upload point. It is immutable once built and can be shared
//! across threads and reused for any number of requests.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::assembler::DEFAULT_READ_CHUNK_SIZE;
use crate::file::FileRequest;
use crate::filter::{AcceptAll, FileFilter, FilterDecision};
use crate::limits::Limits;
use crate::rules::FileRule;
use crate::storage::StorageEngine;

/// Serde-loadable part of an upload point's configuration.
///
/// ```
/// use formload_core::{FileRule, UploadConfig};
///
/// let config: UploadConfig = serde_json::from_str(
///     r#"{"limits":{"fileSize":1048576},"files":{"mode":"single","name":"avatar"}}"#,
/// ).unwrap();
/// assert_eq!(config.files, FileRule::single("avatar"));
/// assert!(!config.preserve_path);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    /// Resource limits.
    pub limits: Limits,
    /// Accepted file fields.
    pub files: FileRule,
    /// Keep the full client-supplied filename instead of its basename.
    pub preserve_path: bool,
}

/// Immutable configuration of one upload point.
#[derive(Clone)]
pub struct UploadSpec {
    pub(crate) storage: Arc<dyn StorageEngine>,
    pub(crate) limits: Limits,
    pub(crate) files: FileRule,
    pub(crate) filter: Arc<dyn FileFilter>,
    pub(crate) preserve_path: bool,
    pub(crate) read_chunk_size: usize,
}

impl UploadSpec {
    /// Start building a spec around `storage`.
    pub fn builder(storage: impl StorageEngine + 'static) -> UploadSpecBuilder {
        UploadSpecBuilder::new(Arc::new(storage))
    }

    /// Build a spec from a loaded configuration document.
    pub fn from_config(config: UploadConfig, storage: impl StorageEngine + 'static) -> Self {
        Self::builder(storage)
            .limits(config.limits)
            .files(config.files)
            .preserve_path(config.preserve_path)
            .build()
    }

    /// The configured limits.
    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// The configured file rule.
    #[must_use]
    pub fn files(&self) -> &FileRule {
        &self.files
    }

    /// The storage engine.
    #[must_use]
    pub fn storage(&self) -> &dyn StorageEngine {
        self.storage.as_ref()
    }

    /// Whether client paths are kept in original filenames.
    #[must_use]
    pub fn preserve_path(&self) -> bool {
        self.preserve_path
    }

    /// Bytes requested per body read.
    #[must_use]
    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }
}

impl fmt::Debug for UploadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSpec")
            .field("storage", &self.storage)
            .field("limits", &self.limits)
            .field("files", &self.files)
            .field("preserve_path", &self.preserve_path)
            .field("read_chunk_size", &self.read_chunk_size)
            .finish_non_exhaustive()
    }
}

/// Builder for [`UploadSpec`].
pub struct UploadSpecBuilder {
    storage: Arc<dyn StorageEngine>,
    limits: Limits,
    files: FileRule,
    filter: Arc<dyn FileFilter>,
    preserve_path: bool,
    read_chunk_size: usize,
}

impl UploadSpecBuilder {
    /// Start from a shared storage engine.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self {
            storage,
            limits: Limits::default(),
            files: FileRule::default(),
            filter: Arc::new(AcceptAll),
            preserve_path: false,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }

    /// Set the limits.
    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the file rule.
    #[must_use]
    pub fn files(mut self, files: FileRule) -> Self {
        self.files = files;
        self
    }

    /// Set the file filter.
    #[must_use]
    pub fn filter(mut self, filter: impl FileFilter + 'static) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    /// Set the file filter from a closure.
    #[must_use]
    pub fn filter_fn<F>(mut self, filter: F) -> Self
    where
        F: Fn(&FileRequest<'_>) -> FilterDecision + Send + Sync + 'static,
    {
        self.filter = Arc::new(filter);
        self
    }

    /// Keep the full client-supplied filename.
    #[must_use]
    pub fn preserve_path(mut self, preserve: bool) -> Self {
        self.preserve_path = preserve;
        self
    }

    /// Bytes requested per body read (at least 1).
    #[must_use]
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> UploadSpec {
        UploadSpec {
            storage: self.storage,
            limits: self.limits,
            files: self.files,
            filter: self.filter,
            preserve_path: self.preserve_path,
            read_chunk_size: self.read_chunk_size,
        }
    }
}

impl fmt::Debug for UploadSpecBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSpecBuilder")
            .field("storage", &self.storage)
            .field("limits", &self.limits)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_builder_defaults() {
        let spec = UploadSpec::builder(MemoryStorage::new()).build();
        assert_eq!(spec.limits(), &Limits::default());
        assert_eq!(spec.files(), &FileRule::Any);
        assert!(!spec.preserve_path());
        assert_eq!(spec.read_chunk_size(), DEFAULT_READ_CHUNK_SIZE);
    }

    #[test]
    fn test_read_chunk_size_is_at_least_one() {
        let spec = UploadSpec::builder(MemoryStorage::new())
            .read_chunk_size(0)
            .build();
        assert_eq!(spec.read_chunk_size(), 1);
    }

    #[test]
    fn test_from_config_carries_every_setting() {
        let config: UploadConfig = serde_json::from_str(
            r#"{
                "limits": {"fileSize": 200, "parts": 4},
                "files": {"mode": "array", "name": "photos", "max": 3},
                "preservePath": true
            }"#,
        )
        .expect("config");
        let spec = UploadSpec::from_config(config, MemoryStorage::new());
        assert_eq!(spec.limits().get_file_size(), Some(200));
        assert_eq!(spec.limits().get_parts(), Some(4));
        assert_eq!(spec.files(), &FileRule::array("photos", 3));
        assert!(spec.preserve_path());
        assert!(format!("{spec:?}").contains("MemoryStorage"));
    }
}
