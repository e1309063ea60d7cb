//! Part header parsing.
//!
//! A part's header block is turned into a [`PartHeaders`] value: field name,
//! optional filename, content type and transfer encoding. A part is a file
//! part iff a `filename` (or `filename*`) parameter is present, even when it
//! is empty.

use crate::MultipartError;
use crate::decode::{decode_ext_value, decode_header_bytes};

/// Default number of header lines parsed per part.
pub const DEFAULT_HEADER_PAIRS: usize = 2000;

/// Default MIME type when a part carries no Content-Type.
pub const DEFAULT_MIME_TYPE: &str = "text/plain";

/// Default transfer encoding when a part carries no Content-Transfer-Encoding.
pub const DEFAULT_TRANSFER_ENCODING: &str = "7bit";

/// Parsed headers of a single multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartHeaders {
    /// Field name from Content-Disposition.
    pub name: String,
    /// Filename from Content-Disposition (if present).
    pub filename: Option<String>,
    /// Content-Type of the part (if present).
    pub content_type: Option<String>,
    /// Content-Transfer-Encoding of the part (if present).
    pub transfer_encoding: Option<String>,
    /// All parsed headers in arrival order, names lowercased.
    pub headers: Vec<(String, String)>,
}

impl PartHeaders {
    /// Returns true if this part is a file upload.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    /// Returns true if this part is a regular form field.
    #[must_use]
    pub fn is_field(&self) -> bool {
        self.filename.is_none()
    }

    /// Content type, defaulting to `text/plain`.
    #[must_use]
    pub fn mime_type(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE)
    }

    /// Transfer encoding, defaulting to `7bit`.
    #[must_use]
    pub fn encoding(&self) -> &str {
        self.transfer_encoding
            .as_deref()
            .unwrap_or(DEFAULT_TRANSFER_ENCODING)
    }

    /// Look up a header by (case-insensitive) name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse a part's header block (the bytes before the blank line).
///
/// At most `max_pairs` header lines are parsed; the rest are ignored.
pub fn parse_part_headers(block: &[u8], max_pairs: usize) -> Result<PartHeaders, MultipartError> {
    let text = decode_header_bytes(block);
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        // obs-fold continuation
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
                continue;
            }
            return Err(MultipartError::InvalidFormat {
                detail: "malformed part header",
            });
        }
        if headers.len() >= max_pairs {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(MultipartError::InvalidFormat {
                detail: "malformed part header",
            });
        };
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    let lookup = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let disposition =
        lookup("content-disposition").ok_or(MultipartError::MissingContentDisposition)?;
    let ContentDisposition { name, filename } = parse_content_disposition(&disposition)?;
    let content_type = lookup("content-type").filter(|v| !v.is_empty());
    let transfer_encoding = lookup("content-transfer-encoding")
        .filter(|v| !v.is_empty())
        .map(|v| v.to_ascii_lowercase());

    Ok(PartHeaders {
        name,
        filename,
        content_type,
        transfer_encoding,
        headers,
    })
}

/// Parameters extracted from a `form-data` Content-Disposition value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDisposition {
    /// The `name` parameter.
    pub name: String,
    /// The `filename*` (preferred) or `filename` parameter.
    pub filename: Option<String>,
}

/// Parse Content-Disposition header value.
///
/// Format: `form-data; name="field"; filename="file.txt"`
pub fn parse_content_disposition(value: &str) -> Result<ContentDisposition, MultipartError> {
    let (kind, params) = split_params(value)?;
    if !kind.eq_ignore_ascii_case("form-data") {
        return Err(MultipartError::InvalidContentDisposition {
            detail: format!("unsupported disposition type `{kind}`"),
        });
    }

    let mut name = None;
    let mut filename = None;
    let mut filename_ext = None;

    for (key, value) in params {
        if key.eq_ignore_ascii_case("name") {
            name = Some(value);
        } else if key.eq_ignore_ascii_case("filename") {
            filename = Some(value);
        } else if key.eq_ignore_ascii_case("filename*") {
            // An undecodable extended value still marks the part as a file.
            filename_ext = Some(decode_ext_value(&value).unwrap_or(value));
        }
    }

    let name = name.ok_or_else(|| MultipartError::InvalidContentDisposition {
        detail: "missing name parameter".to_string(),
    })?;

    Ok(ContentDisposition {
        name,
        filename: filename_ext.or(filename),
    })
}

/// Final path component of a client-supplied filename.
///
/// Both `/` and `\` count as separators since browsers on different
/// platforms send either.
#[must_use]
pub fn file_basename(filename: &str) -> &str {
    filename.rsplit(['/', '\\']).next().unwrap_or(filename)
}

/// Split `type; k=v; k="quoted; value"` into the type and its parameters.
fn split_params(value: &str) -> Result<(&str, Vec<(String, String)>), MultipartError> {
    let (kind, mut rest) = match value.find(';') {
        Some(idx) => (value[..idx].trim(), &value[idx + 1..]),
        None => (value.trim(), ""),
    };

    let mut params = Vec::new();
    loop {
        rest = rest.trim_start_matches([' ', '\t', ';']);
        if rest.is_empty() {
            break;
        }

        let key_end = rest.find(['=', ';']).unwrap_or(rest.len());
        let key = rest[..key_end].trim();
        if !rest[key_end..].starts_with('=') {
            // Parameter without a value.
            rest = &rest[key_end..];
            continue;
        }
        rest = rest[key_end + 1..].trim_start_matches([' ', '\t']);

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let (unquoted, consumed) = read_quoted(quoted)?;
            rest = &quoted[consumed..];
            unquoted
        } else {
            let end = rest.find(';').unwrap_or(rest.len());
            let token = rest[..end].trim().to_string();
            rest = &rest[end..];
            token
        };

        if !key.is_empty() {
            params.push((key.to_string(), value));
        }
    }

    Ok((kind, params))
}

/// Read a quoted-string body (opening quote already stripped). Returns the
/// unescaped value and the number of bytes consumed including the closing
/// quote.
fn read_quoted(input: &str) -> Result<(String, usize), MultipartError> {
    let mut out = String::new();
    let mut chars = input.char_indices();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '"' => return Ok((out, idx + 1)),
            '\\' => match chars.next() {
                Some((_, escaped)) => out.push(escaped),
                None => break,
            },
            _ => out.push(ch),
        }
    }
    Err(MultipartError::InvalidContentDisposition {
        detail: "unterminated quoted string".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_disposition_case_insensitive_params() {
        let cd = parse_content_disposition("form-data; Name=\"field\"; FileName=\"upload.txt\"")
            .expect("content disposition should parse");
        assert_eq!(cd.name, "field");
        assert_eq!(cd.filename.as_deref(), Some("upload.txt"));
    }

    #[test]
    fn test_quoted_values_may_contain_semicolons_and_escapes() {
        let cd = parse_content_disposition(
            r#"form-data; name="a;b"; filename="say \"hi\"; ok.txt""#,
        )
        .expect("parse");
        assert_eq!(cd.name, "a;b");
        assert_eq!(cd.filename.as_deref(), Some("say \"hi\"; ok.txt"));
    }

    #[test]
    fn test_extended_filename_wins() {
        let cd = parse_content_disposition(
            "form-data; name=\"doc\"; filename=\"fallback.txt\"; filename*=UTF-8''%E2%82%AC%20rates.txt",
        )
        .expect("parse");
        assert_eq!(cd.filename.as_deref(), Some("\u{20ac} rates.txt"));
    }

    #[test]
    fn test_empty_filename_is_still_a_file() {
        let headers = parse_part_headers(
            b"Content-Disposition: form-data; name=\"upload\"; filename=\"\"",
            DEFAULT_HEADER_PAIRS,
        )
        .expect("parse");
        assert!(headers.is_file());
        assert_eq!(headers.filename.as_deref(), Some(""));
        assert_eq!(headers.mime_type(), "text/plain");
        assert_eq!(headers.encoding(), "7bit");
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let result = parse_content_disposition("form-data; filename=\"a.txt\"");
        assert!(matches!(
            result,
            Err(MultipartError::InvalidContentDisposition { .. })
        ));
    }

    #[test]
    fn test_missing_disposition_is_rejected() {
        let result = parse_part_headers(b"Content-Type: text/plain", DEFAULT_HEADER_PAIRS);
        assert_eq!(result, Err(MultipartError::MissingContentDisposition));
    }

    #[test]
    fn test_unterminated_quote_is_rejected() {
        let result = parse_content_disposition("form-data; name=\"oops");
        assert!(matches!(
            result,
            Err(MultipartError::InvalidContentDisposition { .. })
        ));
    }

    #[test]
    fn test_header_pairs_cap_ignores_extra_lines() {
        let block = concat!(
            "Content-Disposition: form-data; name=\"f\"\r\n",
            "Content-Type: application/json\r\n",
            "X-Extra: ignored"
        );
        let headers = parse_part_headers(block.as_bytes(), 2).expect("parse");
        assert_eq!(headers.headers.len(), 2);
        assert_eq!(headers.mime_type(), "application/json");
        assert_eq!(headers.get("x-extra"), None);
    }

    #[test]
    fn test_header_pairs_cap_can_hide_disposition() {
        let block = concat!(
            "Content-Type: text/plain\r\n",
            "Content-Disposition: form-data; name=\"f\""
        );
        let result = parse_part_headers(block.as_bytes(), 1);
        assert_eq!(result, Err(MultipartError::MissingContentDisposition));
    }

    #[test]
    fn test_folded_header_and_latin1_filename() {
        let mut block = b"Content-Disposition: form-data; name=\"f\";\r\n filename=\"caf".to_vec();
        block.extend_from_slice(b"\xe9.txt\"\r\nContent-Transfer-Encoding: BINARY");
        let headers = parse_part_headers(&block, DEFAULT_HEADER_PAIRS).expect("parse");
        assert_eq!(headers.filename.as_deref(), Some("caf\u{e9}.txt"));
        assert_eq!(headers.encoding(), "binary");
    }

    #[test]
    fn test_line_without_colon_is_malformed() {
        let result = parse_part_headers(
            b"Content-Disposition: form-data; name=\"f\"\r\ngarbage",
            DEFAULT_HEADER_PAIRS,
        );
        assert!(matches!(result, Err(MultipartError::InvalidFormat { .. })));
    }

    #[test]
    fn test_file_basename() {
        assert_eq!(file_basename("C:\\Users\\me\\pic.png"), "pic.png");
        assert_eq!(file_basename("dir/sub/pic.png"), "pic.png");
        assert_eq!(file_basename("pic.png"), "pic.png");
        assert_eq!(file_basename(""), "");
    }
}
