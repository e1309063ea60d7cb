use bytes::{BufMut, BytesMut};

use super::{FileSink, SinkState, StorageEngine};
use crate::error::StorageError;
use crate::file::{FileInfo, FileLocator, FileRequest, StoredFile};

/// Keeps every file in memory as [`bytes::Bytes`].
///
/// Pair it with a `fileSize` limit; nothing else bounds memory use.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStorage;

impl MemoryStorage {
    /// New memory engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StorageEngine for MemoryStorage {
    fn begin_file(&self, request: &FileRequest<'_>) -> Result<Box<dyn FileSink>, StorageError> {
        Ok(Box::new(MemorySink {
            info: request.file.clone(),
            buffer: BytesMut::new(),
            state: SinkState::Open,
        }))
    }
}

struct MemorySink {
    info: FileInfo,
    buffer: BytesMut,
    state: SinkState,
}

impl FileSink for MemorySink {
    fn write(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        if self.state != SinkState::Open {
            return Err(StorageError::SinkClosed);
        }
        self.buffer.put_slice(chunk);
        Ok(())
    }

    fn finish(&mut self) -> Result<StoredFile, StorageError> {
        if self.state != SinkState::Open {
            return Err(StorageError::SinkClosed);
        }
        self.state = SinkState::Finished;
        let data = std::mem::take(&mut self.buffer).freeze();
        let size = u64::try_from(data.len()).unwrap_or(u64::MAX);
        Ok(StoredFile::new(&self.info, size, FileLocator::Memory(data)))
    }

    fn abort(&mut self) -> Result<(), StorageError> {
        self.state = SinkState::Aborted;
        self.buffer = BytesMut::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UploadContext;
    use crate::fields::Fields;

    fn info() -> FileInfo {
        FileInfo {
            field_name: "avatar".to_string(),
            original_name: "a.png".to_string(),
            encoding: "7bit".to_string(),
            mime_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_collects_chunks_into_bytes() {
        let ctx = UploadContext::new();
        let fields = Fields::new();
        let file = info();
        let mut sink = MemoryStorage::new()
            .begin_file(&FileRequest {
                context: &ctx,
                fields: &fields,
                file: &file,
            })
            .expect("begin");
        sink.write(b"hello ").expect("write");
        sink.write(b"world").expect("write");
        let stored = sink.finish().expect("finish");
        assert_eq!(stored.size, 11);
        assert_eq!(stored.bytes().map(|b| &b[..]), Some(&b"hello world"[..]));
        assert_eq!(stored.mime_type, "image/png");
        assert!(stored.path().is_none());

        assert!(matches!(sink.write(b"x"), Err(StorageError::SinkClosed)));
        sink.abort().expect("abort");
        sink.abort().expect("abort again");
    }
}
