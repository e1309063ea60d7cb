//! Request assembler: drives one request from raw body bytes to a result.
//!
//! The assembler pulls tokens from the [`BoundaryTokenizer`] and routes
//! them: header blocks open a part (limits, filter, storage), body slices
//! are checked and forwarded, part ends finalize fields and files. The first
//! error moves it to `Failed`, which aborts every sink opened so far in
//! reverse order before the error is returned.

use std::io::{ErrorKind, Read};

use formload_multipart::{
    BoundaryTokenizer, MultipartError, PartHeaders, Token, file_basename, parse_boundary,
    parse_part_headers,
};
use tracing::{debug, debug_span, trace, warn};

use crate::context::UploadContext;
use crate::error::{LimitExceeded, StorageError, UploadError};
use crate::fields::Fields;
use crate::file::{FileInfo, FileRequest, StoredFile};
use crate::filter::FilterDecision;
use crate::limits::{LimitEnforcer, PartKind};
use crate::result::{Files, UploadResult};
use crate::storage::FileSink;
use crate::upload::UploadSpec;

/// Default number of bytes requested per body read (16KB).
pub const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;

impl UploadSpec {
    /// Process one multipart request body.
    ///
    /// `content_type` is the request's Content-Type header value. The body is
    /// read until the closing delimiter; bytes after it are never read. On
    /// error every file stored or partially written during this call has
    /// already been aborted when this returns.
    pub fn process<R: Read>(
        &self,
        content_type: &str,
        mut body: R,
        context: &UploadContext,
    ) -> Result<UploadResult, UploadError> {
        let boundary = parse_boundary(content_type)?;
        let span = debug_span!("multipart_upload", boundary_len = boundary.len());
        let _enter = span.enter();

        let mut assembler = Assembler::new(self, &boundary, context);
        let mut buf = vec![0u8; self.read_chunk_size.max(1)];
        let mut eof = false;

        loop {
            if assembler.drain()? {
                break;
            }
            if eof {
                return Err(assembler.fail(MultipartError::UnexpectedEof.into()));
            }
            let n = match body.read(&mut buf) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(assembler.fail(UploadError::Stream(err))),
            };
            if n == 0 {
                eof = true;
                assembler.tokenizer.finish();
            } else {
                assembler.tokenizer.feed(&buf[..n]);
            }
        }

        Ok(assembler.complete())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ParsingParts,
    Done,
    Failed,
}

struct Assembler<'a> {
    tokenizer: BoundaryTokenizer,
    parts: PartRouter<'a>,
}

impl<'a> Assembler<'a> {
    fn new(spec: &'a UploadSpec, boundary: &str, context: &'a UploadContext) -> Self {
        Self {
            tokenizer: BoundaryTokenizer::new(boundary)
                .with_max_header_size(spec.limits.effective_header_size()),
            parts: PartRouter::new(spec, context),
        }
    }

    /// Route every token currently available. Returns true once the closing
    /// delimiter has been seen.
    fn drain(&mut self) -> Result<bool, UploadError> {
        loop {
            let next = self.tokenizer.next_token();
            let step = match next {
                Ok(None) => return Ok(false),
                Ok(Some(token)) => self.parts.route(token),
                Err(err) => Err(UploadError::from(err)),
            };
            match step {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    fn fail(&mut self, err: UploadError) -> UploadError {
        self.parts.fail(err)
    }

    fn complete(mut self) -> UploadResult {
        self.parts.complete()
    }
}

/// What the part currently being read turned out to be.
enum Current {
    Between,
    Field { name: String, value: Vec<u8> },
    File { field: String },
    Skipped,
}

/// A sink opened during this request, kept until the request succeeds so it
/// can be rolled back.
struct OpenSink {
    field: String,
    sink: Box<dyn FileSink>,
}

struct PartRouter<'a> {
    spec: &'a UploadSpec,
    context: &'a UploadContext,
    limits: LimitEnforcer<'a>,
    state: State,
    current: Current,
    fields: Fields,
    sinks: Vec<OpenSink>,
    stored: Vec<StoredFile>,
}

impl<'a> PartRouter<'a> {
    fn new(spec: &'a UploadSpec, context: &'a UploadContext) -> Self {
        Self {
            spec,
            context,
            limits: LimitEnforcer::new(&spec.limits, &spec.files),
            state: State::ParsingParts,
            current: Current::Between,
            fields: Fields::new(),
            sinks: Vec::new(),
            stored: Vec::new(),
        }
    }

    fn route(&mut self, token: Token<'_>) -> Result<bool, UploadError> {
        match token {
            Token::PartHeaders(block) => self.begin_part(block)?,
            Token::Body(chunk) => self.write(chunk)?,
            Token::PartEnd => self.end_part()?,
            Token::End => return Ok(true),
        }
        Ok(false)
    }

    fn begin_part(&mut self, block: &[u8]) -> Result<(), UploadError> {
        let headers = parse_part_headers(block, self.spec.limits.effective_header_pairs())?;
        let kind = if headers.is_file() {
            PartKind::File
        } else {
            PartKind::Field
        };
        trace!(field = %headers.name, file = headers.is_file(), "multipart part");

        self.limits.check_part(kind, &headers.name)?;

        match kind {
            PartKind::Field => {
                self.current = Current::Field {
                    name: headers.name,
                    value: Vec::new(),
                };
                Ok(())
            }
            PartKind::File => self.begin_file(headers),
        }
    }

    fn begin_file(&mut self, headers: PartHeaders) -> Result<(), UploadError> {
        let filename = headers.filename.as_deref().unwrap_or_default();
        let original_name = if self.spec.preserve_path {
            filename.to_string()
        } else {
            file_basename(filename).to_string()
        };
        let info = FileInfo {
            original_name,
            encoding: headers.encoding().to_string(),
            mime_type: headers.mime_type().to_string(),
            field_name: headers.name,
        };
        let request = FileRequest {
            context: self.context,
            fields: &self.fields,
            file: &info,
        };

        match self.spec.filter.filter(&request) {
            FilterDecision::Accept => {}
            FilterDecision::Skip => {
                debug!(field = %info.field_name, filename = %info.original_name, "skipped file");
                self.current = Current::Skipped;
                return Ok(());
            }
            FilterDecision::Reject(err) => return Err(UploadError::FilterRejected(err)),
        }

        let sink = self
            .spec
            .storage
            .begin_file(&request)
            .map_err(|source| UploadError::Storage {
                field: info.field_name.clone(),
                source,
            })?;
        self.sinks.push(OpenSink {
            field: info.field_name.clone(),
            sink,
        });
        self.current = Current::File {
            field: info.field_name,
        };
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        match &mut self.current {
            Current::Field { name, value } => {
                let checked = self.limits.check_bytes(PartKind::Field, name, chunk.len());
                value.extend_from_slice(&chunk[..admitted(&checked, chunk.len())]);
                checked?;
            }
            Current::File { field } => {
                let checked = self.limits.check_bytes(PartKind::File, field, chunk.len());
                let fits = admitted(&checked, chunk.len());
                let open = open_sink(&mut self.sinks, field)?;
                if fits > 0 {
                    open.sink
                        .write(&chunk[..fits])
                        .map_err(|source| UploadError::Storage {
                            field: field.clone(),
                            source,
                        })?;
                }
                checked?;
            }
            Current::Skipped | Current::Between => {}
        }
        Ok(())
    }

    fn end_part(&mut self) -> Result<(), UploadError> {
        match std::mem::replace(&mut self.current, Current::Between) {
            Current::Field { name, value } => {
                let value = String::from_utf8(value)
                    .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned());
                self.fields.push(name, value);
            }
            Current::File { field } => {
                let open = open_sink(&mut self.sinks, &field)?;
                let stored = open
                    .sink
                    .finish()
                    .map_err(|source| UploadError::Storage {
                        field: field.clone(),
                        source,
                    })?;
                debug!(
                    field = %stored.field_name,
                    filename = %stored.original_name,
                    size = stored.size,
                    "stored file"
                );
                self.stored.push(stored);
            }
            Current::Skipped | Current::Between => {}
        }
        Ok(())
    }

    fn fail(&mut self, err: UploadError) -> UploadError {
        self.state = State::Failed;
        debug!(code = err.code(), field = err.field(), "upload failed");
        self.rollback();
        err
    }

    /// Abort every sink opened during this request, newest first.
    fn rollback(&mut self) {
        self.current = Current::Between;
        self.stored.clear();
        while let Some(mut open) = self.sinks.pop() {
            if let Err(err) = open.sink.abort() {
                warn!(field = %open.field, error = %err, "failed to abort file sink");
            }
        }
    }

    fn complete(&mut self) -> UploadResult {
        self.state = State::Done;
        self.sinks.clear();
        UploadResult {
            fields: std::mem::take(&mut self.fields),
            files: Files::from_rule(&self.spec.files, std::mem::take(&mut self.stored)),
        }
    }
}

impl Drop for PartRouter<'_> {
    fn drop(&mut self) {
        if self.state == State::ParsingParts && !self.sinks.is_empty() {
            debug!(sinks = self.sinks.len(), "upload abandoned");
            self.rollback();
        }
    }
}

/// How many bytes of a `len`-byte chunk may be kept after a byte check.
fn admitted(checked: &Result<(), LimitExceeded>, len: usize) -> usize {
    match checked {
        Ok(()) => len,
        Err(err) => err.admitted.min(len),
    }
}

/// The sink of the file part currently being written.
fn open_sink<'s>(sinks: &'s mut [OpenSink], field: &str) -> Result<&'s mut OpenSink, UploadError> {
    sinks.last_mut().ok_or_else(|| UploadError::Storage {
        field: field.to_string(),
        source: StorageError::SinkClosed,
    })
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};
    use std::sync::Arc;

    use super::*;
    use crate::error::LimitKind;
    use crate::limits::Limits;
    use crate::rules::{FileField, FileRule};
    use crate::storage::MemoryStorage;
    use crate::testing::{MultipartBuilder, RecordingStorage, StorageEvent};

    fn spec(limits: Limits, files: FileRule) -> UploadSpec {
        UploadSpec::builder(MemoryStorage::new())
            .limits(limits)
            .files(files)
            .build()
    }

    fn run(spec: &UploadSpec, body: &MultipartBuilder) -> Result<UploadResult, UploadError> {
        let (content_type, bytes) = body.build();
        spec.process(&content_type, Cursor::new(bytes), &UploadContext::new())
    }

    #[test]
    fn test_field_and_file_within_limits() {
        let body = MultipartBuilder::new()
            .field("name", "Alice")
            .file("avatar", "pic.png", "image/png", &[7u8; 50]);
        let result = run(&spec(Limits::new().file_size(200), FileRule::Any), &body)
            .expect("upload should succeed");

        assert_eq!(result.fields.get("name"), Some("Alice"));
        assert_eq!(result.files.len(), 1);
        let file = result.files.iter().next().expect("file");
        assert_eq!(file.size, 50);
        assert_eq!(file.original_name, "pic.png");
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.bytes().map(|b| b.len()), Some(50));
    }

    #[test]
    fn test_file_too_large_aborts_sink() {
        let recording = Arc::new(RecordingStorage::new(MemoryStorage::new()));
        let spec = UploadSpec::builder(Arc::clone(&recording))
            .limits(Limits::new().file_size(200))
            .build();
        let body = MultipartBuilder::new().file("avatar", "big.bin", "application/octet-stream", &[1u8; 5000]);

        let err = run(&spec, &body).expect_err("file is too large");
        assert_eq!(err.code(), "LIMIT_FILE_SIZE");
        assert_eq!(err.field(), Some("avatar"));
        assert_eq!(
            recording.events(),
            vec![
                StorageEvent::Begin("avatar".to_string()),
                StorageEvent::Abort("avatar".to_string()),
            ]
        );
        assert_eq!(recording.bytes_written(), 200);
    }

    #[test]
    fn test_oversized_chunk_writes_only_the_part_that_fits() {
        let recording = Arc::new(RecordingStorage::new(MemoryStorage::new()));
        let spec = UploadSpec::builder(Arc::clone(&recording))
            .limits(Limits::new().file_size(200))
            .read_chunk_size(64)
            .build();
        let body = MultipartBuilder::new().file("avatar", "big.bin", "application/octet-stream", &[1u8; 5000]);

        let err = run(&spec, &body).expect_err("file is too large");
        assert_eq!(err.limit_kind(), Some(LimitKind::FileSize));
        assert_eq!(recording.bytes_written(), 200);
        assert_eq!(recording.live_sinks(), 0);
    }

    #[test]
    fn test_second_single_file_is_unexpected_and_rolls_back_first() {
        let recording = Arc::new(RecordingStorage::new(MemoryStorage::new()));
        let spec = UploadSpec::builder(Arc::clone(&recording))
            .files(FileRule::single("avatar"))
            .build();
        let body = MultipartBuilder::new()
            .file("avatar", "a.png", "image/png", b"first")
            .file("avatar", "b.png", "image/png", b"second");

        let err = run(&spec, &body).expect_err("second avatar");
        assert_eq!(err.limit_kind(), Some(LimitKind::UnexpectedFile));
        assert_eq!(err.field(), Some("avatar"));
        assert_eq!(
            recording.events(),
            vec![
                StorageEvent::Begin("avatar".to_string()),
                StorageEvent::Finish("avatar".to_string()),
                StorageEvent::Abort("avatar".to_string()),
            ]
        );
    }

    #[test]
    fn test_rollback_runs_newest_first() {
        let recording = Arc::new(RecordingStorage::new(MemoryStorage::new()));
        let spec = UploadSpec::builder(Arc::clone(&recording))
            .limits(Limits::new().file_count(2))
            .build();
        let body = MultipartBuilder::new()
            .file("a", "a.txt", "text/plain", b"a")
            .file("b", "b.txt", "text/plain", b"b")
            .file("c", "c.txt", "text/plain", b"c");

        let err = run(&spec, &body).expect_err("third file");
        assert_eq!(err.code(), "LIMIT_FILE_COUNT");
        assert_eq!(err.field(), Some("c"));
        let aborts: Vec<_> = recording
            .events()
            .into_iter()
            .filter_map(|event| match event {
                StorageEvent::Abort(field) => Some(field),
                _ => None,
            })
            .collect();
        assert_eq!(aborts, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_filter_skip_drains_file_and_keeps_others() {
        let spec = UploadSpec::builder(MemoryStorage::new())
            .filter_fn(|req| FilterDecision::from(req.file.mime_type.starts_with("image/")))
            .build();
        let body = MultipartBuilder::new()
            .file("doc", "notes.txt", "text/plain", b"ignored")
            .file("photo", "p.jpg", "image/jpeg", b"jpeg")
            .field("caption", "hi");

        let result = run(&spec, &body).expect("upload");
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files.single().map(|f| f.field_name.as_str()), Some("photo"));
        assert_eq!(result.fields.get("caption"), Some("hi"));
    }

    #[test]
    fn test_filter_sees_only_earlier_fields() {
        let spec = UploadSpec::builder(MemoryStorage::new())
            .filter_fn(|req| match req.fields.get("allow") {
                Some("yes") => FilterDecision::Accept,
                _ => FilterDecision::reject("not allowed yet"),
            })
            .build();

        let ok = MultipartBuilder::new()
            .field("allow", "yes")
            .file("f", "a.txt", "text/plain", b"x");
        run(&spec, &ok).expect("field arrives first");

        let late = MultipartBuilder::new()
            .file("f", "a.txt", "text/plain", b"x")
            .field("allow", "yes");
        let err = run(&spec, &late).expect_err("field arrives after file");
        assert_eq!(err.code(), "FILTER_REJECTED");
        assert_eq!(err.to_string(), "not allowed yet");
    }

    #[test]
    fn test_field_value_limit_and_field_key_limit() {
        let body = MultipartBuilder::new().field("comment", "x".repeat(11));
        let err = run(&spec(Limits::new().field_value_size(10), FileRule::Any), &body)
            .expect_err("value too long");
        assert_eq!(err.code(), "LIMIT_FIELD_VALUE");
        assert_eq!(err.field(), Some("comment"));

        let err = run(&spec(Limits::new().field_name_size(3), FileRule::Any), &body)
            .expect_err("name too long");
        assert_eq!(err.code(), "LIMIT_FIELD_KEY");
    }

    #[test]
    fn test_text_only_form_rejects_files() {
        let body = MultipartBuilder::new()
            .field("a", "1")
            .file("upload", "", "application/octet-stream", b"");
        let err = run(&spec(Limits::new(), FileRule::None), &body).expect_err("no files allowed");
        assert_eq!(err.code(), "LIMIT_UNEXPECTED_FILE");
        assert_eq!(err.field(), Some("upload"));
    }

    #[test]
    fn test_fields_rule_groups_files() {
        let rule = FileRule::fields([FileField::new("avatar").max(1), FileField::new("gallery").max(3)]);
        let body = MultipartBuilder::new()
            .file("gallery", "1.png", "image/png", b"1")
            .file("avatar", "me.png", "image/png", b"me")
            .file("gallery", "2.png", "image/png", b"2");
        let result = run(&spec(Limits::new(), rule), &body).expect("upload");
        let map = result.files.grouped().expect("grouped files");
        assert_eq!(map["avatar"].len(), 1);
        assert_eq!(
            map["gallery"].iter().map(|f| f.original_name.as_str()).collect::<Vec<_>>(),
            vec!["1.png", "2.png"]
        );
    }

    #[test]
    fn test_basename_unless_preserve_path() {
        let body = MultipartBuilder::new().file("f", "C:\\photos\\me.png", "image/png", b"x");
        let result = run(&spec(Limits::new(), FileRule::Any), &body).expect("upload");
        assert_eq!(result.files.single().map(|f| f.original_name.as_str()), Some("me.png"));

        let preserving = UploadSpec::builder(MemoryStorage::new())
            .preserve_path(true)
            .build();
        let result = run(&preserving, &body).expect("upload");
        assert_eq!(
            result.files.single().map(|f| f.original_name.as_str()),
            Some("C:\\photos\\me.png")
        );
    }

    #[test]
    fn test_truncated_body_is_malformed_and_cleans_up() {
        let recording = Arc::new(RecordingStorage::new(MemoryStorage::new()));
        let spec = UploadSpec::builder(Arc::clone(&recording)).build();
        let (content_type, mut bytes) = MultipartBuilder::new()
            .file("avatar", "a.png", "image/png", &[0u8; 300])
            .build();
        bytes.truncate(200);

        let err = spec
            .process(&content_type, Cursor::new(bytes), &UploadContext::new())
            .expect_err("truncated");
        assert_eq!(err.code(), "MALFORMED_MULTIPART");
        assert_eq!(recording.live_sinks(), 0);
        assert!(recording.events().contains(&StorageEvent::Abort("avatar".to_string())));
    }

    struct FailingReader {
        data: Cursor<Vec<u8>>,
        fail_after: usize,
        read: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.read >= self.fail_after {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));
            }
            let limit = buf.len().min(self.fail_after - self.read);
            let n = self.data.read(&mut buf[..limit])?;
            self.read += n;
            Ok(n)
        }
    }

    #[test]
    fn test_stream_error_is_stream_failure() {
        let recording = Arc::new(RecordingStorage::new(MemoryStorage::new()));
        let spec = UploadSpec::builder(Arc::clone(&recording)).build();
        let (content_type, bytes) = MultipartBuilder::new()
            .file("avatar", "a.png", "image/png", &[0u8; 300])
            .build();
        let reader = FailingReader {
            data: Cursor::new(bytes),
            fail_after: 200,
            read: 0,
        };

        let err = spec
            .process(&content_type, reader, &UploadContext::new())
            .expect_err("reset");
        assert_eq!(err.code(), "STREAM_FAILURE");
        assert_eq!(recording.live_sinks(), 0);
    }

    #[test]
    fn test_missing_boundary_fails_before_reading() {
        let spec = spec(Limits::new(), FileRule::Any);
        let err = spec
            .process("application/json", io::empty(), &UploadContext::new())
            .expect_err("not multipart");
        assert_eq!(err.code(), "MALFORMED_MULTIPART");
    }

    #[test]
    fn test_bytes_after_closing_delimiter_are_not_read() {
        let (content_type, mut bytes) = MultipartBuilder::new().field("a", "1").build();
        let body_len = bytes.len();
        bytes.extend_from_slice(&[b'z'; 64]);
        let spec = UploadSpec::builder(MemoryStorage::new())
            .read_chunk_size(body_len)
            .build();

        let mut cursor = Cursor::new(bytes);
        let result = spec
            .process(&content_type, &mut cursor, &UploadContext::new())
            .expect("upload");
        assert_eq!(result.fields.get("a"), Some("1"));
        assert_eq!(usize::try_from(cursor.position()).expect("position"), body_len);
    }

    #[test]
    fn test_storage_failure_names_field() {
        #[derive(Debug)]
        struct Unavailable;

        impl crate::storage::StorageEngine for Unavailable {
            fn begin_file(&self, _request: &FileRequest<'_>) -> Result<Box<dyn FileSink>, StorageError> {
                Err(StorageError::Destination {
                    detail: "offline".to_string(),
                })
            }
        }

        let spec = UploadSpec::builder(Unavailable).build();
        let body = MultipartBuilder::new().file("doc", "a.txt", "text/plain", b"x");
        let err = run(&spec, &body).expect_err("storage offline");
        assert_eq!(err.code(), "STORAGE_FAILURE");
        assert_eq!(err.field(), Some("doc"));
    }

    #[test]
    fn test_invalid_utf8_field_value_is_lossy() {
        let (content_type, bytes) = MultipartBuilder::new()
            .raw_part("Content-Disposition: form-data; name=\"v\"", b"ok\xff")
            .build();
        let spec = spec(Limits::new(), FileRule::Any);
        let result = spec
            .process(&content_type, Cursor::new(bytes), &UploadContext::new())
            .expect("upload");
        assert_eq!(result.fields.get("v"), Some("ok\u{fffd}"));
    }
}
