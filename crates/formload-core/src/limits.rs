//! Resource limits and the per-request limit enforcer.
//!
//! [`Limits`] is read-only configuration; every key is optional and a
//! missing key means unbounded (header limits fall back to built-in
//! defaults). [`LimitEnforcer`] holds the running counters of one request.
//!
//! # Check order
//!
//! When a part would break several limits at once, the first failing check
//! in this order wins:
//!
//! 1. `parts`
//! 2. `fieldNameSize`
//! 3. `fieldCount` (fields) or `fileCount` (files)
//! 4. the file rule (`LIMIT_UNEXPECTED_FILE`, files only)
//!
//! Byte limits (`fieldValueSize`, `fileSize`) are checked per chunk while
//! the part streams.

use formload_multipart::{DEFAULT_HEADER_PAIRS, DEFAULT_MAX_HEADER_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{LimitExceeded, LimitKind};
use crate::rules::{FileAllowance, FileRule};

/// Configured ceilings for one upload point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Limits {
    /// Maximum field name length in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    field_name_size: Option<u64>,
    /// Maximum field value size in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    field_value_size: Option<u64>,
    /// Maximum number of non-file fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    field_count: Option<u64>,
    /// Maximum size per file in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    file_size: Option<u64>,
    /// Maximum number of file parts.
    #[serde(skip_serializing_if = "Option::is_none")]
    file_count: Option<u64>,
    /// Maximum number of parts (fields + files).
    #[serde(skip_serializing_if = "Option::is_none")]
    parts: Option<u64>,
    /// Maximum header lines parsed per part.
    #[serde(skip_serializing_if = "Option::is_none")]
    header_pairs: Option<u64>,
    /// Maximum header block size per part in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    header_size: Option<u64>,
}

impl Limits {
    /// No ceilings at all.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum field name length.
    #[must_use]
    pub fn field_name_size(mut self, size: u64) -> Self {
        self.field_name_size = Some(size);
        self
    }

    /// Set the maximum field value size.
    #[must_use]
    pub fn field_value_size(mut self, size: u64) -> Self {
        self.field_value_size = Some(size);
        self
    }

    /// Set the maximum number of non-file fields.
    #[must_use]
    pub fn field_count(mut self, count: u64) -> Self {
        self.field_count = Some(count);
        self
    }

    /// Set the maximum size per file.
    #[must_use]
    pub fn file_size(mut self, size: u64) -> Self {
        self.file_size = Some(size);
        self
    }

    /// Set the maximum number of file parts.
    #[must_use]
    pub fn file_count(mut self, count: u64) -> Self {
        self.file_count = Some(count);
        self
    }

    /// Set the maximum number of parts.
    #[must_use]
    pub fn parts(mut self, count: u64) -> Self {
        self.parts = Some(count);
        self
    }

    /// Set how many header lines are parsed per part.
    #[must_use]
    pub fn header_pairs(mut self, count: u64) -> Self {
        self.header_pairs = Some(count);
        self
    }

    /// Set the maximum header block size per part.
    #[must_use]
    pub fn header_size(mut self, size: u64) -> Self {
        self.header_size = Some(size);
        self
    }

    /// Get the maximum field name length.
    #[must_use]
    pub fn get_field_name_size(&self) -> Option<u64> {
        self.field_name_size
    }

    /// Get the maximum field value size.
    #[must_use]
    pub fn get_field_value_size(&self) -> Option<u64> {
        self.field_value_size
    }

    /// Get the maximum number of non-file fields.
    #[must_use]
    pub fn get_field_count(&self) -> Option<u64> {
        self.field_count
    }

    /// Get the maximum size per file.
    #[must_use]
    pub fn get_file_size(&self) -> Option<u64> {
        self.file_size
    }

    /// Get the maximum number of file parts.
    #[must_use]
    pub fn get_file_count(&self) -> Option<u64> {
        self.file_count
    }

    /// Get the maximum number of parts.
    #[must_use]
    pub fn get_parts(&self) -> Option<u64> {
        self.parts
    }

    /// Header lines parsed per part (defaults to 2000).
    #[must_use]
    pub fn effective_header_pairs(&self) -> usize {
        self.header_pairs
            .map_or(DEFAULT_HEADER_PAIRS, |n| usize::try_from(n).unwrap_or(usize::MAX))
    }

    /// Header block ceiling per part (defaults to 80KB).
    #[must_use]
    pub fn effective_header_size(&self) -> usize {
        self.header_size
            .map_or(DEFAULT_MAX_HEADER_SIZE, |n| usize::try_from(n).unwrap_or(usize::MAX))
    }
}

/// Whether a part is a plain field or a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    /// Text field, accumulated in memory.
    Field,
    /// File, streamed to storage.
    File,
}

/// Running counters for one request.
#[derive(Debug)]
pub struct LimitEnforcer<'a> {
    limits: &'a Limits,
    allowance: FileAllowance,
    parts: u64,
    fields: u64,
    files: u64,
    current_bytes: u64,
}

impl<'a> LimitEnforcer<'a> {
    /// Fresh counters for one request.
    #[must_use]
    pub fn new(limits: &'a Limits, rule: &FileRule) -> Self {
        Self {
            limits,
            allowance: rule.allowance(),
            parts: 0,
            fields: 0,
            files: 0,
            current_bytes: 0,
        }
    }

    /// Account for a new part before any of its bytes are processed.
    ///
    /// Runs every per-part check in the documented order and resets the
    /// byte counter.
    pub fn check_part(&mut self, kind: PartKind, name: &str) -> Result<(), LimitExceeded> {
        self.current_bytes = 0;
        self.parts += 1;
        if exceeds(self.limits.parts, self.parts) {
            return Err(exceeded(LimitKind::PartCount, name));
        }

        self.check_field_name(name)?;

        match kind {
            PartKind::Field => {
                self.fields += 1;
                if exceeds(self.limits.field_count, self.fields) {
                    return Err(exceeded(LimitKind::FieldCount, name));
                }
            }
            PartKind::File => {
                self.files += 1;
                if exceeds(self.limits.file_count, self.files) {
                    return Err(exceeded(LimitKind::FileCount, name));
                }
                self.check_file_field(name)?;
            }
        }
        Ok(())
    }

    /// Check a field name against `fieldNameSize`.
    pub fn check_field_name(&self, name: &str) -> Result<(), LimitExceeded> {
        if exceeds(self.limits.field_name_size, len_u64(name.len())) {
            return Err(exceeded(LimitKind::FieldKey, name));
        }
        Ok(())
    }

    /// Claim a file slot for `name` under the configured file rule.
    pub fn check_file_field(&mut self, name: &str) -> Result<(), LimitExceeded> {
        if self.allowance.take(name) {
            Ok(())
        } else {
            Err(exceeded(LimitKind::UnexpectedFile, name))
        }
    }

    /// Account for `n` more bytes of the current part.
    ///
    /// On violation the counter is pinned at the ceiling and
    /// [`LimitExceeded::admitted`] says how many of the `n` bytes fit.
    pub fn check_bytes(&mut self, kind: PartKind, name: &str, n: usize) -> Result<(), LimitExceeded> {
        let (ceiling, limit) = match kind {
            PartKind::Field => (self.limits.field_value_size, LimitKind::FieldValue),
            PartKind::File => (self.limits.file_size, LimitKind::FileSize),
        };

        let next = self.current_bytes.saturating_add(len_u64(n));
        if let Some(max) = ceiling {
            if next > max {
                let admitted = max.saturating_sub(self.current_bytes);
                self.current_bytes = max;
                return Err(LimitExceeded {
                    kind: limit,
                    field: name.to_string(),
                    admitted: usize::try_from(admitted).unwrap_or(n).min(n),
                });
            }
        }
        self.current_bytes = next;
        Ok(())
    }

    /// Parts seen so far.
    #[must_use]
    pub fn part_count(&self) -> u64 {
        self.parts
    }

    /// Bytes accounted to the current part.
    #[must_use]
    pub fn current_bytes(&self) -> u64 {
        self.current_bytes
    }
}

fn exceeds(ceiling: Option<u64>, value: u64) -> bool {
    ceiling.is_some_and(|max| value > max)
}

fn exceeded(kind: LimitKind, name: &str) -> LimitExceeded {
    LimitExceeded {
        kind,
        field: name.to_string(),
        admitted: 0,
    }
}

fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}
