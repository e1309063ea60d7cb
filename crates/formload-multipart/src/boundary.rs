//! Boundary extraction from the request Content-Type.

use crate::MultipartError;

/// RFC 2046 recommends multipart boundary length <= 70 characters.
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Parse boundary from Content-Type header.
///
/// Content-Type format: `multipart/form-data; boundary=----WebKitFormBoundary...`
///
/// # Example
///
/// ```
/// use formload_multipart::parse_boundary;
///
/// let boundary = parse_boundary("multipart/form-data; boundary=\"abc\"").unwrap();
/// assert_eq!(boundary, "abc");
/// ```
pub fn parse_boundary(content_type: &str) -> Result<String, MultipartError> {
    let content_type = content_type.trim();
    let main = content_type.split(';').next().unwrap_or("").trim();
    if !main.eq_ignore_ascii_case("multipart/form-data") {
        return Err(MultipartError::InvalidBoundary);
    }

    for param in content_type.split(';').skip(1) {
        let Some((key, value)) = param.trim().split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("boundary") {
            let boundary = value.trim().trim_matches('"').trim_matches('\'');
            if boundary.is_empty()
                || boundary.len() > MAX_BOUNDARY_LEN
                || boundary.bytes().any(|b| b == b'\r' || b == b'\n')
            {
                return Err(MultipartError::InvalidBoundary);
            }
            return Ok(boundary.to_string());
        }
    }

    Err(MultipartError::MissingBoundary)
}
