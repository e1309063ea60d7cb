//! Byte and parameter decoding helpers for part headers.

use std::borrow::Cow;

/// Decode header bytes as UTF-8, falling back to ISO-8859-1 for legacy clients.
#[must_use]
pub fn decode_header_bytes(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => Cow::Owned(latin1_to_string(bytes)),
    }
}

/// Interpret every byte as one ISO-8859-1 code point.
#[must_use]
pub fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Percent-decode a header parameter value.
///
/// Unlike form-urlencoded decoding, `+` is left alone. Invalid sequences are
/// kept as-is.
///
/// # Example
///
/// ```
/// use formload_multipart::percent_decode;
///
/// assert_eq!(percent_decode("a%20b+c"), b"a b+c".to_vec());
/// assert_eq!(percent_decode("100%"), b"100%".to_vec());
/// ```
#[must_use]
pub fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                result.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        result.push(bytes[i]);
        i += 1;
    }

    result
}

/// Decode an RFC 5987 extended parameter value such as
/// `UTF-8''na%C3%AFve%20file.txt`.
///
/// Returns `None` for a malformed value or an unsupported charset.
#[must_use]
pub fn decode_ext_value(value: &str) -> Option<String> {
    let mut pieces = value.splitn(3, '\'');
    let charset = pieces.next()?.trim();
    let _language = pieces.next()?;
    let encoded = pieces.next()?;

    let raw = percent_decode(encoded);
    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        String::from_utf8(raw).ok()
    } else if charset.eq_ignore_ascii_case("iso-8859-1")
        || charset.eq_ignore_ascii_case("latin1")
        || charset.eq_ignore_ascii_case("us-ascii")
    {
        Some(latin1_to_string(&raw))
    } else {
        None
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
