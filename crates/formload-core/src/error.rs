//! Error types for upload processing.
//!
//! [`UploadError`] is the single terminal failure value of a request. Every
//! variant maps to a stable machine-readable code via [`UploadError::code`]
//! so host integrations can translate it into a transport response without
//! matching on messages.

use std::fmt;
use std::path::PathBuf;

use formload_multipart::MultipartError;
use thiserror::Error;

/// Boxed caller-supplied error, used for filter rejections and custom storage.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The resource limit that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// Too many parts in total.
    PartCount,
    /// A file part exceeded `fileSize`.
    FileSize,
    /// Too many file parts.
    FileCount,
    /// A field name exceeded `fieldNameSize`.
    FieldKey,
    /// A field value exceeded `fieldValueSize`.
    FieldValue,
    /// Too many non-file fields.
    FieldCount,
    /// A file arrived under a field name the file rule does not accept.
    UnexpectedFile,
}

impl LimitKind {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::PartCount => "LIMIT_PART_COUNT",
            Self::FileSize => "LIMIT_FILE_SIZE",
            Self::FileCount => "LIMIT_FILE_COUNT",
            Self::FieldKey => "LIMIT_FIELD_KEY",
            Self::FieldValue => "LIMIT_FIELD_VALUE",
            Self::FieldCount => "LIMIT_FIELD_COUNT",
            Self::UnexpectedFile => "LIMIT_UNEXPECTED_FILE",
        }
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::PartCount => "Too many parts",
            Self::FileSize => "File too large",
            Self::FileCount => "Too many files",
            Self::FieldKey => "Field name too long",
            Self::FieldValue => "Field value too long",
            Self::FieldCount => "Too many fields",
            Self::UnexpectedFile => "Unexpected field",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// A limit check failed.
///
/// `admitted` is how many bytes of the offending chunk still fit under the
/// ceiling; it is zero for count-based limits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (field `{field}`)")]
pub struct LimitExceeded {
    /// Which limit fired.
    pub kind: LimitKind,
    /// The offending field name.
    pub field: String,
    /// Bytes of the current chunk that fit under the ceiling.
    pub admitted: usize,
}

/// Storage engine failures.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem error on a concrete path.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// Path being written or removed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The destination could not be resolved or is unusable.
    #[error("cannot resolve upload destination: {detail}")]
    Destination { detail: String },
    /// Write or finish on a sink that was already finished or aborted.
    #[error("file sink is already closed")]
    SinkClosed,
    /// Error from a custom engine.
    #[error("{0}")]
    Custom(#[source] BoxError),
}

impl StorageError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap an arbitrary error from a custom engine.
    pub fn custom(error: impl Into<BoxError>) -> Self {
        Self::Custom(error.into())
    }
}

/// Terminal failure of one upload request.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Content-Type or body framing is not valid multipart/form-data.
    #[error("malformed multipart body: {0}")]
    Malformed(#[from] MultipartError),
    /// A configured limit was exceeded.
    #[error("{kind}")]
    Limit {
        /// Which limit fired.
        kind: LimitKind,
        /// The offending field name.
        field: Option<String>,
    },
    /// The file filter rejected a part; the caller's error is kept verbatim.
    #[error("{0}")]
    FilterRejected(#[source] BoxError),
    /// The storage engine failed to open, write, or finalize a file.
    #[error("storage failure on field `{field}`: {source}")]
    Storage {
        /// Field whose file failed.
        field: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },
    /// Reading the request body failed.
    #[error("request body stream failed: {0}")]
    Stream(#[source] std::io::Error),
}

impl UploadError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "MALFORMED_MULTIPART",
            Self::Limit { kind, .. } => kind.code(),
            Self::FilterRejected(_) => "FILTER_REJECTED",
            Self::Storage { .. } => "STORAGE_FAILURE",
            Self::Stream(_) => "STREAM_FAILURE",
        }
    }

    /// The field name the failure concerns, where there is one.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Limit { field, .. } => field.as_deref(),
            Self::Storage { field, .. } => Some(field),
            _ => None,
        }
    }

    /// The limit that fired, if this is a limit violation.
    #[must_use]
    pub fn limit_kind(&self) -> Option<LimitKind> {
        match self {
            Self::Limit { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Borrow the caller's error from a filter rejection.
    #[must_use]
    pub fn rejection(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::FilterRejected(err) => Some(&**err),
            _ => None,
        }
    }

    /// Take back the caller's error from a filter rejection.
    pub fn into_rejection(self) -> Result<BoxError, Self> {
        match self {
            Self::FilterRejected(err) => Ok(err),
            other => Err(other),
        }
    }
}

impl From<LimitExceeded> for UploadError {
    fn from(exceeded: LimitExceeded) -> Self {
        Self::Limit {
            kind: exceeded.kind,
            field: Some(exceeded.field),
        }
    }
}
