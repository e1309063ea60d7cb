//! Wire-level multipart errors.

use thiserror::Error;

/// Errors that can occur while tokenizing or parsing a multipart body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MultipartError {
    /// Missing boundary in Content-Type header.
    #[error("missing boundary in multipart Content-Type")]
    MissingBoundary,
    /// Content-Type is not `multipart/form-data`, or the boundary is unusable.
    #[error("invalid multipart boundary")]
    InvalidBoundary,
    /// The body violates the multipart framing rules.
    #[error("invalid multipart format: {detail}")]
    InvalidFormat { detail: &'static str },
    /// The body ended before the closing delimiter.
    #[error("unexpected end of multipart data")]
    UnexpectedEof,
    /// A part's header block grew past the configured ceiling.
    #[error("part header block exceeds {max} bytes")]
    HeaderTooLarge { max: usize },
    /// Missing Content-Disposition header.
    #[error("missing Content-Disposition header in part")]
    MissingContentDisposition,
    /// Invalid Content-Disposition header.
    #[error("invalid Content-Disposition: {detail}")]
    InvalidContentDisposition { detail: String },
}
