//! File multiplicity rules.
//!
//! A [`FileRule`] decides which field names may carry files and how many.
//! It is consulted once per file part; a refusal surfaces as
//! `LIMIT_UNEXPECTED_FILE`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One accepted file field for [`FileRule::Fields`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileField {
    /// Field name.
    pub name: String,
    /// Maximum number of files under this name; `None` is unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

impl FileField {
    /// Accept any number of files under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max: None,
        }
    }

    /// Cap the number of files under this name.
    #[must_use]
    pub fn max(mut self, max: u32) -> Self {
        self.max = Some(max);
        self
    }
}

/// Which file fields a request may carry, and how the result is shaped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum FileRule {
    /// Text-only form: every file part is unexpected.
    None,
    /// Exactly one optional file under `name`.
    Single { name: String },
    /// Up to `max` files under `name`.
    Array {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<u32>,
    },
    /// Several named file fields, each with its own cap. A name declared
    /// more than once gets the tightest of its caps.
    Fields { fields: Vec<FileField> },
    /// Files under any name.
    #[default]
    Any,
}

impl FileRule {
    /// One file under `name`.
    pub fn single(name: impl Into<String>) -> Self {
        Self::Single { name: name.into() }
    }

    /// Up to `max` files under `name`.
    pub fn array(name: impl Into<String>, max: u32) -> Self {
        Self::Array {
            name: name.into(),
            max: Some(max),
        }
    }

    /// Several named file fields.
    pub fn fields(fields: impl IntoIterator<Item = FileField>) -> Self {
        Self::Fields {
            fields: fields.into_iter().collect(),
        }
    }

    /// Per-request counter state for this rule.
    pub(crate) fn allowance(&self) -> FileAllowance {
        match self {
            Self::None => FileAllowance::Nothing,
            Self::Any => FileAllowance::Anything,
            Self::Single { name } => FileAllowance::Named(HashMap::from([(name.clone(), Some(1))])),
            Self::Array { name, max } => FileAllowance::Named(HashMap::from([(name.clone(), *max)])),
            Self::Fields { fields } => {
                let mut slots: HashMap<String, Option<u32>> = HashMap::with_capacity(fields.len());
                for field in fields {
                    slots
                        .entry(field.name.clone())
                        .and_modify(|max| *max = tighter(*max, field.max))
                        .or_insert(field.max);
                }
                FileAllowance::Named(slots)
            }
        }
    }
}

fn tighter(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(max), None) | (None, Some(max)) => Some(max),
        (None, None) => None,
    }
}

/// Remaining file slots per field name for one request.
#[derive(Debug, Clone)]
pub(crate) enum FileAllowance {
    Nothing,
    Anything,
    Named(HashMap<String, Option<u32>>),
}

impl FileAllowance {
    /// Claim one slot for `name`. Returns false if the file is unexpected.
    pub(crate) fn take(&mut self, name: &str) -> bool {
        match self {
            Self::Nothing => false,
            Self::Anything => true,
            Self::Named(slots) => match slots.get_mut(name) {
                None => false,
                Some(None) => true,
                Some(Some(0)) => false,
                Some(Some(left)) => {
                    *left -= 1;
                    true
                }
            },
        }
    }
}
