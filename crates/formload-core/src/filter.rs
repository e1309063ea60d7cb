//! Per-file accept/skip/reject hook.
//!
//! The filter runs after a file part's headers are parsed and before any of
//! its body reaches storage.

use std::fmt;

use crate::error::BoxError;
use crate::file::FileRequest;

/// Outcome of filtering one file part.
pub enum FilterDecision {
    /// Stream the file to storage.
    Accept,
    /// Drain the file's body and leave it out of the result.
    Skip,
    /// Abort the whole request with this error.
    Reject(BoxError),
}

impl FilterDecision {
    /// Reject with any error type.
    pub fn reject(error: impl Into<BoxError>) -> Self {
        Self::Reject(error.into())
    }
}

impl fmt::Debug for FilterDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => f.write_str("Accept"),
            Self::Skip => f.write_str("Skip"),
            Self::Reject(err) => f.debug_tuple("Reject").field(&err.to_string()).finish(),
        }
    }
}

impl From<bool> for FilterDecision {
    fn from(accept: bool) -> Self {
        if accept { Self::Accept } else { Self::Skip }
    }
}

/// Decides whether a file part is stored.
pub trait FileFilter: Send + Sync {
    /// Inspect the file part and decide.
    fn filter(&self, request: &FileRequest<'_>) -> FilterDecision;
}

impl<F> FileFilter for F
where
    F: Fn(&FileRequest<'_>) -> FilterDecision + Send + Sync,
{
    fn filter(&self, request: &FileRequest<'_>) -> FilterDecision {
        self(request)
    }
}

/// Filter that accepts every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl FileFilter for AcceptAll {
    fn filter(&self, _request: &FileRequest<'_>) -> FilterDecision {
        FilterDecision::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UploadContext;
    use crate::fields::Fields;
    use crate::file::FileInfo;

    fn info(mime: &str) -> FileInfo {
        FileInfo {
            field_name: "doc".to_string(),
            original_name: "a.bin".to_string(),
            encoding: "7bit".to_string(),
            mime_type: mime.to_string(),
        }
    }

    fn only_png(req: &FileRequest<'_>) -> FilterDecision {
        FilterDecision::from(req.file.mime_type == "image/png")
    }

    #[test]
    fn test_functions_are_filters() {
        let ctx = UploadContext::new();
        let fields = Fields::new();

        let png = info("image/png");
        let txt = info("text/plain");
        let accepted = only_png.filter(&FileRequest {
            context: &ctx,
            fields: &fields,
            file: &png,
        });
        let skipped = only_png.filter(&FileRequest {
            context: &ctx,
            fields: &fields,
            file: &txt,
        });
        assert!(matches!(accepted, FilterDecision::Accept));
        assert!(matches!(skipped, FilterDecision::Skip));
    }

    #[test]
    fn test_reject_keeps_error_text() {
        let decision = FilterDecision::reject("nope");
        assert_eq!(format!("{decision:?}"), "Reject(\"nope\")");
    }
}
