//! Streaming multipart/form-data uploads.
//!
//! formload parses `multipart/form-data` request bodies as they stream in,
//! enforces per-request limits, runs an optional per-file filter and hands
//! file bytes to a pluggable storage engine:
//!
//! - **Bounded memory**: only a delimiter-sized window of file data is ever buffered
//! - **One terminal outcome**: a result, or exactly one error with a stable code
//! - **No orphans**: every file of a failed request is removed before the call returns
//! - **Pluggable storage**: disk and memory engines ship, others implement [`StorageEngine`]
//!
//! # Quick Start
//!
//! ```no_run
//! use formload::prelude::*;
//!
//! let spec = UploadSpec::builder(DiskStorage::new("/var/uploads"))
//!     .limits(Limits::new().file_size(5 * 1024 * 1024).parts(20))
//!     .files(FileRule::single("avatar"))
//!     .filter_fn(|req| FilterDecision::from(req.file.mime_type.starts_with("image/")))
//!     .build();
//!
//! # let content_type = "multipart/form-data; boundary=x";
//! # let body = std::io::empty();
//! match spec.process(content_type, body, &UploadContext::new()) {
//!     Ok(result) => {
//!         for file in result.files.iter() {
//!             println!("{} -> {:?}", file.original_name, file.path());
//!         }
//!     }
//!     Err(err) => eprintln!("{}: {err}", err.code()),
//! }
//! ```
//!
//! # Crate Structure
//!
//! - [`formload_core`]: the upload engine
//! - [`formload_multipart`]: wire parsing (boundary tokenizer and part headers)

#![forbid(unsafe_code)]

// Re-export crates
pub use formload_core as core;
pub use formload_multipart as multipart;

// Re-export commonly used types
pub use formload_core::{
    AcceptAll, BoxError, DiskStorage, DiskStorageBuilder, Field, Fields, FileField, FileFilter,
    FileInfo, FileLocator, FileRequest, FileRule, FileSink, Files, FilterDecision, LimitKind,
    Limits, MemoryStorage, StorageEngine, StorageError, StoredFile, UploadConfig, UploadContext,
    UploadError, UploadResult, UploadSpec, UploadSpecBuilder,
};
pub use formload_multipart::MultipartError;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        DiskStorage, FileField, FileFilter, FileRequest, FileRule, Files, FilterDecision,
        LimitKind, Limits, MemoryStorage, StorageEngine, StoredFile, UploadConfig, UploadContext,
        UploadError, UploadResult, UploadSpec,
    };
    pub use serde::{Deserialize, Serialize};
}

/// Testing utilities module.
pub mod testing {
    pub use formload_core::testing::{
        MultipartBuilder, RecordingStorage, StorageEvent, TEST_BOUNDARY,
    };
}
