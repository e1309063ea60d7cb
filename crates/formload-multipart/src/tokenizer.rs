//! Streaming boundary tokenizer.
//!
//! [`BoundaryTokenizer`] splits a multipart body into header blocks and body
//! chunks without ever requiring a delimiter to arrive in a single read. Input
//! is pushed with [`BoundaryTokenizer::feed`] and tokens are pulled with
//! [`BoundaryTokenizer::next_token`] until it returns `Ok(None)`, which means
//! more input is needed.
//!
//! The internal buffer only ever retains the bytes that could still belong to
//! a split delimiter (at most `boundary.len() + 5` bytes of body data), plus an
//! unfinished header block bounded by the configured header ceiling.
//!
//! # Example
//!
//! ```
//! use formload_multipart::{BoundaryTokenizer, Token};
//!
//! let mut tokenizer = BoundaryTokenizer::new("X");
//! tokenizer.feed(b"--X\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nhi\r\n--X--");
//! tokenizer.finish();
//!
//! let mut body = Vec::new();
//! while let Some(token) = tokenizer.next_token().unwrap() {
//!     if let Token::Body(chunk) = token {
//!         body.extend_from_slice(chunk);
//!     }
//! }
//! assert_eq!(body, b"hi");
//! assert!(tokenizer.is_done());
//! ```

use memchr::memmem::{self, Finder};

use crate::MultipartError;

/// Default ceiling for one part's header block (80KB).
pub const DEFAULT_MAX_HEADER_SIZE: usize = 80 * 1024;

/// A unit of multipart structure produced by the tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Raw header block of a new part, without the terminating blank line.
    PartHeaders(&'a [u8]),
    /// A slice of the current part's body.
    Body(&'a [u8]),
    /// The current part's body is complete.
    PartEnd,
    /// The closing delimiter was seen; nothing further will be produced.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Preamble,
    AfterDelimiter,
    Headers,
    Body,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Located {
    /// A delimiter starts here and is followed by a valid suffix.
    At(usize),
    /// A delimiter starts here but its suffix has not arrived yet.
    Pending(usize),
    /// No complete delimiter in the buffer.
    Missing,
}

/// Incremental multipart tokenizer (searching / partial-match / matched).
#[derive(Debug)]
pub struct BoundaryTokenizer {
    delimiter: Vec<u8>,
    finder: Finder<'static>,
    buffer: Vec<u8>,
    consumed: usize,
    stage: Stage,
    eof: bool,
    max_header_size: usize,
}

impl BoundaryTokenizer {
    /// Create a tokenizer for the given boundary (without the leading `--`).
    #[must_use]
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());
        let finder = Finder::new(&delimiter).into_owned();

        Self {
            delimiter,
            finder,
            // A virtual CRLF lets the first delimiter sit at offset zero.
            buffer: b"\r\n".to_vec(),
            consumed: 0,
            stage: Stage::Preamble,
            eof: false,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
        }
    }

    /// Set the ceiling for a single part's header block.
    #[must_use]
    pub fn with_max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }

    /// Returns the configured header block ceiling.
    #[must_use]
    pub fn max_header_size(&self) -> usize {
        self.max_header_size
    }

    /// Returns true once the closing delimiter has been tokenized.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Number of bytes currently retained.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.consumed
    }

    /// Push more body bytes. Input after the closing delimiter is discarded.
    pub fn feed(&mut self, data: &[u8]) {
        self.compact();
        if self.stage != Stage::Done {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Signal that the underlying stream has ended.
    pub fn finish(&mut self) {
        self.eof = true;
    }

    /// Pull the next token.
    ///
    /// Returns `Ok(None)` when more input is required (or, after
    /// [`Token::End`], forever). Once [`finish`](Self::finish) has been
    /// called, running out of input before the closing delimiter is an error.
    pub fn next_token(&mut self) -> Result<Option<Token<'_>>, MultipartError> {
        self.compact();

        loop {
            match self.stage {
                Stage::Done => return Ok(None),
                Stage::Preamble => match self.locate_delimiter() {
                    Located::At(pos) => {
                        self.buffer.drain(..pos + self.delimiter.len());
                        self.stage = Stage::AfterDelimiter;
                    }
                    Located::Pending(_) => return Ok(None),
                    Located::Missing => {
                        if self.eof {
                            return Err(MultipartError::UnexpectedEof);
                        }
                        // Preamble is discarded except for a possible split delimiter.
                        let keep = self.partial_delimiter_len();
                        let drop_to = self.buffer.len() - keep;
                        self.buffer.drain(..drop_to);
                        return Ok(None);
                    }
                },
                Stage::AfterDelimiter => {
                    if self.buffer.len() < 2 {
                        return self.need_more();
                    }
                    if self.buffer.starts_with(b"--") {
                        self.stage = Stage::Done;
                        self.buffer.clear();
                        return Ok(Some(Token::End));
                    }

                    let padding = self
                        .buffer
                        .iter()
                        .take_while(|b| **b == b' ' || **b == b'\t')
                        .count();
                    if self.buffer.len() < padding + 2 {
                        if padding > self.max_header_size {
                            return Err(MultipartError::InvalidFormat {
                                detail: "boundary line too long",
                            });
                        }
                        return self.need_more();
                    }
                    if self.buffer[padding..padding + 2] != *b"\r\n" {
                        return Err(MultipartError::InvalidFormat {
                            detail: "expected CRLF after boundary",
                        });
                    }
                    self.buffer.drain(..padding + 2);
                    self.stage = Stage::Headers;
                }
                Stage::Headers => {
                    if self.buffer.starts_with(b"\r\n") {
                        self.consumed = 2;
                        self.stage = Stage::Body;
                        return Ok(Some(Token::PartHeaders(&[])));
                    }
                    match memmem::find(&self.buffer, b"\r\n\r\n") {
                        Some(pos) => {
                            if pos > self.max_header_size {
                                return Err(MultipartError::HeaderTooLarge {
                                    max: self.max_header_size,
                                });
                            }
                            self.consumed = pos + 4;
                            self.stage = Stage::Body;
                            return Ok(Some(Token::PartHeaders(&self.buffer[..pos])));
                        }
                        None => {
                            if self.buffer.len() > self.max_header_size.saturating_add(4) {
                                return Err(MultipartError::HeaderTooLarge {
                                    max: self.max_header_size,
                                });
                            }
                            return self.need_more();
                        }
                    }
                }
                Stage::Body => match self.locate_delimiter() {
                    Located::At(0) => {
                        self.buffer.drain(..self.delimiter.len());
                        self.stage = Stage::AfterDelimiter;
                        return Ok(Some(Token::PartEnd));
                    }
                    Located::Pending(0) => return Ok(None),
                    Located::At(pos) | Located::Pending(pos) => {
                        self.consumed = pos;
                        return Ok(Some(Token::Body(&self.buffer[..pos])));
                    }
                    Located::Missing => {
                        if self.eof {
                            return Err(MultipartError::UnexpectedEof);
                        }
                        let safe = self.buffer.len() - self.partial_delimiter_len();
                        if safe == 0 {
                            return Ok(None);
                        }
                        self.consumed = safe;
                        return Ok(Some(Token::Body(&self.buffer[..safe])));
                    }
                },
            }
        }
    }

    fn need_more(&self) -> Result<Option<Token<'_>>, MultipartError> {
        if self.eof {
            Err(MultipartError::UnexpectedEof)
        } else {
            Ok(None)
        }
    }

    fn compact(&mut self) {
        if self.consumed > 0 {
            self.buffer.drain(..self.consumed);
            self.consumed = 0;
        }
    }

    /// Find the first real delimiter: `\r\n--boundary` followed by `--`,
    /// CRLF, or transport padding. Anything else is body data that merely
    /// starts like a delimiter.
    fn locate_delimiter(&self) -> Located {
        let mut from = 0;
        while let Some(rel) = self.finder.find(&self.buffer[from..]) {
            let pos = from + rel;
            let after = pos + self.delimiter.len();
            match self.buffer.get(after..after + 2) {
                Some(suffix)
                    if suffix == b"--"
                        || suffix == b"\r\n"
                        || suffix[0] == b' '
                        || suffix[0] == b'\t' =>
                {
                    return Located::At(pos);
                }
                Some(_) => from = pos + 1,
                None if self.eof => return Located::At(pos),
                None => return Located::Pending(pos),
            }
        }
        Located::Missing
    }

    /// Length of the longest buffer suffix that is a proper prefix of the
    /// delimiter.
    fn partial_delimiter_len(&self) -> usize {
        let max = (self.delimiter.len() - 1).min(self.buffer.len());
        let tail_start = self.buffer.len() - max;
        for offset in memchr::memchr_iter(b'\r', &self.buffer[tail_start..]) {
            let candidate = &self.buffer[tail_start + offset..];
            if self.delimiter.starts_with(candidate) {
                return candidate.len();
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Owned {
        Headers(Vec<u8>),
        Body(Vec<u8>),
        PartEnd,
        End,
    }

    /// Run the tokenizer over `body` split into `chunk`-sized reads, merging
    /// adjacent body chunks so results are comparable across chunk sizes.
    fn tokenize(boundary: &str, body: &[u8], chunk: usize) -> Result<Vec<Owned>, MultipartError> {
        let mut tokenizer = BoundaryTokenizer::new(boundary);
        let mut out: Vec<Owned> = Vec::new();

        let mut drain = |tokenizer: &mut BoundaryTokenizer| -> Result<(), MultipartError> {
            while let Some(token) = tokenizer.next_token()? {
                match token {
                    Token::PartHeaders(h) => out.push(Owned::Headers(h.to_vec())),
                    Token::Body(b) => {
                        if let Some(Owned::Body(prev)) = out.last_mut() {
                            prev.extend_from_slice(b);
                        } else {
                            out.push(Owned::Body(b.to_vec()));
                        }
                    }
                    Token::PartEnd => out.push(Owned::PartEnd),
                    Token::End => out.push(Owned::End),
                }
            }
            Ok(())
        };

        for piece in body.chunks(chunk.max(1)) {
            tokenizer.feed(piece);
            drain(&mut tokenizer)?;
        }
        tokenizer.finish();
        drain(&mut tokenizer)?;
        Ok(out)
    }

    fn simple_body() -> &'static [u8] {
        concat!(
            "------boundary\r\n",
            "Content-Disposition: form-data; name=\"field1\"\r\n",
            "\r\n",
            "value1\r\n",
            "------boundary\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"test.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "Hello, World!\r\n",
            "------boundary--\r\n"
        )
        .as_bytes()
    }

    #[test]
    fn test_tokenize_simple_form() {
        let tokens = tokenize("----boundary", simple_body(), 4096).unwrap();
        assert_eq!(
            tokens,
            vec![
                Owned::Headers(b"Content-Disposition: form-data; name=\"field1\"".to_vec()),
                Owned::Body(b"value1".to_vec()),
                Owned::PartEnd,
                Owned::Headers(
                    b"Content-Disposition: form-data; name=\"file\"; filename=\"test.txt\"\r\nContent-Type: text/plain"
                        .to_vec()
                ),
                Owned::Body(b"Hello, World!".to_vec()),
                Owned::PartEnd,
                Owned::End,
            ]
        );
    }

    #[test]
    fn test_every_split_position_yields_same_tokens() {
        let expected = tokenize("----boundary", simple_body(), 4096).unwrap();
        for chunk in 1..simple_body().len() {
            let tokens = tokenize("----boundary", simple_body(), chunk).unwrap();
            assert_eq!(tokens, expected, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_boundary_like_sequence_in_part_body_does_not_terminate_part() {
        let body = concat!(
            "------boundary\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"data.bin\"\r\n",
            "\r\n",
            "line1\r\n",
            "------boundaryX\r\n",
            "line2\r\n",
            "------boundary--\r\n"
        );
        for chunk in [1, 3, 7, 4096] {
            let tokens = tokenize("----boundary", body.as_bytes(), chunk).unwrap();
            assert_eq!(
                tokens[1],
                Owned::Body(b"line1\r\n------boundaryX\r\nline2".to_vec())
            );
            assert_eq!(tokens.len(), 4);
        }
    }

    #[test]
    fn test_preamble_and_epilogue_are_ignored() {
        let body = concat!(
            "this is a preamble\r\n",
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"a\"\r\n",
            "\r\n",
            "1\r\n",
            "--XyZ--\r\n",
            "trailing epilogue"
        );
        let tokens = tokenize("XyZ", body.as_bytes(), 5).unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[1], Owned::Body(b"1".to_vec()));
        assert_eq!(tokens[3], Owned::End);
    }

    #[test]
    fn test_empty_body_and_empty_headers() {
        let body = "--b\r\n\r\n\r\n--b\r\nX: y\r\n\r\n\r\n--b--";
        let tokens = tokenize("b", body.as_bytes(), 2).unwrap();
        assert_eq!(
            tokens,
            vec![
                Owned::Headers(Vec::new()),
                Owned::PartEnd,
                Owned::Headers(b"X: y".to_vec()),
                Owned::PartEnd,
                Owned::End,
            ]
        );
    }

    #[test]
    fn test_truncated_body_is_unexpected_eof() {
        let body = "--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\npartial data";
        let result = tokenize("b", body.as_bytes(), 8);
        assert_eq!(result, Err(MultipartError::UnexpectedEof));
    }

    #[test]
    fn test_missing_opening_delimiter_is_unexpected_eof() {
        let result = tokenize("b", b"no multipart here", 4);
        assert_eq!(result, Err(MultipartError::UnexpectedEof));
    }

    #[test]
    fn test_delimiter_at_eof_without_close_marker() {
        let body = "--b\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nx\r\n--b";
        let result = tokenize("b", body.as_bytes(), 3);
        assert_eq!(result, Err(MultipartError::UnexpectedEof));
    }

    #[test]
    fn test_garbage_after_boundary_is_invalid() {
        let body = "--b\r\n\r\nx\r\n--b ;junk\r\n";
        let result = tokenize("b", body.as_bytes(), 64);
        assert!(matches!(result, Err(MultipartError::InvalidFormat { .. })));
    }

    #[test]
    fn test_header_block_ceiling() {
        let mut body = b"--b\r\nX-Long: ".to_vec();
        body.extend(std::iter::repeat_n(b'a', 512));
        body.extend_from_slice(b"\r\n\r\nbody\r\n--b--");

        let mut tokenizer = BoundaryTokenizer::new("b").with_max_header_size(128);
        tokenizer.feed(&body);
        tokenizer.finish();
        assert_eq!(
            tokenizer.next_token(),
            Err(MultipartError::HeaderTooLarge { max: 128 })
        );
    }

    #[test]
    fn test_buffer_stays_bounded_for_large_body() {
        let payload = vec![b'x'; 256 * 1024];
        let mut body = Vec::new();
        body.extend_from_slice(b"--bnd\r\nContent-Disposition: form-data; name=\"f\"; filename=\"f\"\r\n\r\n");
        body.extend_from_slice(&payload);
        body.extend_from_slice(b"\r\n--bnd--\r\n");

        let mut tokenizer = BoundaryTokenizer::new("bnd");
        let mut received = 0usize;
        let mut max_buffered = 0usize;
        for piece in body.chunks(513) {
            tokenizer.feed(piece);
            max_buffered = max_buffered.max(tokenizer.buffered());
            while let Some(token) = tokenizer.next_token().unwrap() {
                if let Token::Body(chunk) = token {
                    received += chunk.len();
                }
            }
        }
        tokenizer.finish();
        while tokenizer.next_token().unwrap().is_some() {}

        assert!(tokenizer.is_done());
        assert_eq!(received, payload.len());
        assert!(max_buffered < 2048, "tokenizer buffer grew to {max_buffered}");
    }

    proptest! {
        #[test]
        fn test_prop_chunking_does_not_change_tokens(
            payload in proptest::collection::vec(any::<u8>(), 0..600),
            chunk in 1usize..97,
        ) {
            let mut body = b"--q1\r\nContent-Disposition: form-data; name=\"p\"\r\n\r\n".to_vec();
            body.extend_from_slice(&payload);
            body.extend_from_slice(b"\r\n--q1--");

            let whole = tokenize("q1", &body, body.len());
            let split = tokenize("q1", &body, chunk);
            prop_assert_eq!(whole, split);
        }
    }
}
