//! Streaming multipart/form-data upload engine.
//!
//! An [`UploadSpec`] describes one upload point: where files go
//! ([`StorageEngine`]), how much is allowed ([`Limits`]), which file fields
//! are accepted ([`FileRule`]) and an optional per-file [`FileFilter`].
//! [`UploadSpec::process`] then turns a Content-Type and a body reader into
//! either an [`UploadResult`] or exactly one [`UploadError`], with every file
//! of a failed request already cleaned up.
//!
//! # Example
//!
//! ```
//! use std::io::Cursor;
//!
//! use formload_core::{FileRule, Limits, MemoryStorage, UploadContext, UploadSpec};
//!
//! let spec = UploadSpec::builder(MemoryStorage::new())
//!     .limits(Limits::new().file_size(1024))
//!     .files(FileRule::single("avatar"))
//!     .build();
//!
//! let body = concat!(
//!     "--XyZ\r\n",
//!     "Content-Disposition: form-data; name=\"name\"\r\n",
//!     "\r\n",
//!     "Alice\r\n",
//!     "--XyZ\r\n",
//!     "Content-Disposition: form-data; name=\"avatar\"; filename=\"pic.png\"\r\n",
//!     "Content-Type: image/png\r\n",
//!     "\r\n",
//!     "PNGDATA\r\n",
//!     "--XyZ--\r\n",
//! );
//!
//! let result = spec
//!     .process(
//!         "multipart/form-data; boundary=XyZ",
//!         Cursor::new(body),
//!         &UploadContext::new(),
//!     )
//!     .unwrap();
//!
//! assert_eq!(result.fields.get("name"), Some("Alice"));
//! let avatar = result.files.single().unwrap();
//! assert_eq!(avatar.original_name, "pic.png");
//! assert_eq!(avatar.size, 7);
//! ```

#![forbid(unsafe_code)]

mod assembler;
mod context;
mod error;
mod fields;
mod file;
mod filter;
mod limits;
mod result;
mod rules;
pub mod storage;
pub mod testing;
mod upload;

pub use assembler::DEFAULT_READ_CHUNK_SIZE;
pub use context::UploadContext;
pub use error::{BoxError, LimitExceeded, LimitKind, StorageError, UploadError};
pub use fields::{Field, Fields};
pub use file::{FileInfo, FileLocator, FileRequest, StoredFile};
pub use filter::{AcceptAll, FileFilter, FilterDecision};
pub use limits::{LimitEnforcer, Limits, PartKind};
pub use result::{Files, UploadResult};
pub use rules::{FileField, FileRule};
pub use storage::{DiskStorage, DiskStorageBuilder, FileSink, MemoryStorage, StorageEngine};
pub use upload::{UploadConfig, UploadSpec, UploadSpecBuilder};

pub use formload_multipart::{
    DEFAULT_HEADER_PAIRS, DEFAULT_MAX_HEADER_SIZE, MAX_BOUNDARY_LEN, MultipartError,
};
