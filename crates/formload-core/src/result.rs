//! Successful upload results.

use indexmap::IndexMap;

use crate::fields::Fields;
use crate::file::StoredFile;
use crate::rules::FileRule;

/// Everything a successful request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// Text fields in arrival order.
    pub fields: Fields,
    /// Stored files, shaped by the file rule.
    pub files: Files,
}

/// Stored files, shaped after the [`FileRule`] that admitted them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Files {
    /// Text-only form.
    None,
    /// At most one file.
    Single(Option<StoredFile>),
    /// Files of one field, in arrival order.
    Array(Vec<StoredFile>),
    /// Files grouped by field. Every declared field is present, possibly empty.
    Fields {
        /// Files per field name, declared fields first.
        grouped: IndexMap<String, Vec<StoredFile>>,
        /// Arrival order as `(group index, position in group)`.
        order: Vec<(usize, usize)>,
    },
    /// Files of any field, in arrival order.
    Any(Vec<StoredFile>),
}

impl Files {
    /// Shape `stored` (arrival order) according to `rule`.
    #[must_use]
    pub fn from_rule(rule: &FileRule, stored: Vec<StoredFile>) -> Self {
        match rule {
            FileRule::None => Self::None,
            FileRule::Single { .. } => Self::Single(stored.into_iter().next()),
            FileRule::Array { .. } => Self::Array(stored),
            FileRule::Fields { fields } => {
                let mut grouped: IndexMap<String, Vec<StoredFile>> = fields
                    .iter()
                    .map(|field| (field.name.clone(), Vec::new()))
                    .collect();
                let mut order = Vec::with_capacity(stored.len());
                for file in stored {
                    let entry = grouped.entry(file.field_name.clone());
                    let group = entry.index();
                    let files = entry.or_default();
                    order.push((group, files.len()));
                    files.push(file);
                }
                Self::Fields { grouped, order }
            }
            FileRule::Any => Self::Any(stored),
        }
    }

    /// Number of stored files.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::None | Self::Single(None) => 0,
            Self::Single(Some(_)) => 1,
            Self::Array(files) | Self::Any(files) => files.len(),
            Self::Fields { order, .. } => order.len(),
        }
    }

    /// Returns true if no file was stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over every stored file in arrival order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = &StoredFile> + '_> {
        match self {
            Self::None => Box::new(std::iter::empty()),
            Self::Single(file) => Box::new(file.iter()),
            Self::Array(files) | Self::Any(files) => Box::new(files.iter()),
            Self::Fields { grouped, order } => Box::new(order.iter().filter_map(move |&(group, pos)| {
                grouped
                    .get_index(group)
                    .and_then(|(_, files)| files.get(pos))
            })),
        }
    }

    /// Files grouped by field name, for [`Files::Fields`].
    #[must_use]
    pub fn grouped(&self) -> Option<&IndexMap<String, Vec<StoredFile>>> {
        match self {
            Self::Fields { grouped, .. } => Some(grouped),
            _ => None,
        }
    }

    /// Files stored under `field`.
    pub fn by_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a StoredFile> + 'a {
        self.iter().filter(move |file| file.field_name == field)
    }

    /// The single file, for [`Files::Single`] and one-element shapes.
    #[must_use]
    pub fn single(&self) -> Option<&StoredFile> {
        match self {
            Self::Single(file) => file.as_ref(),
            _ if self.len() == 1 => self.iter().next(),
            _ => None,
        }
    }

    /// Flatten into a list in arrival order.
    #[must_use]
    pub fn into_vec(self) -> Vec<StoredFile> {
        match self {
            Self::None | Self::Single(None) => Vec::new(),
            Self::Single(Some(file)) => vec![file],
            Self::Array(files) | Self::Any(files) => files,
            Self::Fields { grouped, order } => {
                // Each group is consumed front to back, so the position is implied.
                let mut groups: Vec<_> = grouped.into_values().map(Vec::into_iter).collect();
                order
                    .into_iter()
                    .filter_map(|(group, _)| groups.get_mut(group).and_then(Iterator::next))
                    .collect()
            }
        }
    }
}
