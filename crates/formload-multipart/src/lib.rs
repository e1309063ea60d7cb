//! Streaming multipart/form-data wire parsing.
//!
//! This crate knows nothing about limits or storage. It provides:
//!
//! - [`parse_boundary`] to pull the boundary out of a request Content-Type
//! - [`BoundaryTokenizer`], a push/pull state machine that turns arbitrary
//!   read chunks into header blocks and body slices
//! - [`parse_part_headers`] to classify a header block as a field or file part
//!
//! # Example
//!
//! ```
//! use formload_multipart::{BoundaryTokenizer, Token, parse_boundary, parse_part_headers};
//!
//! let boundary = parse_boundary("multipart/form-data; boundary=XX").unwrap();
//! let mut tokenizer = BoundaryTokenizer::new(&boundary);
//! tokenizer.feed(b"--XX\r\nContent-Disposition: form-data; name=\"a\"; filename=\"\"\r\n\r\n");
//! tokenizer.feed(b"\r\n--XX--\r\n");
//! tokenizer.finish();
//!
//! let Some(Token::PartHeaders(block)) = tokenizer.next_token().unwrap() else {
//!     panic!("expected headers");
//! };
//! let headers = parse_part_headers(block, 16).unwrap();
//! assert!(headers.is_file());
//! ```

#![forbid(unsafe_code)]

mod boundary;
mod decode;
mod error;
mod headers;
mod tokenizer;

pub use boundary::{MAX_BOUNDARY_LEN, parse_boundary};
pub use decode::{decode_ext_value, decode_header_bytes, latin1_to_string, percent_decode};
pub use error::MultipartError;
pub use headers::{
    ContentDisposition, DEFAULT_HEADER_PAIRS, DEFAULT_MIME_TYPE, DEFAULT_TRANSFER_ENCODING,
    PartHeaders, file_basename, parse_content_disposition, parse_part_headers,
};
pub use tokenizer::{BoundaryTokenizer, DEFAULT_MAX_HEADER_SIZE, Token};
