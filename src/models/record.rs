//! Question records and their identifiers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Field holding the coarse subject grouping.
pub const AREA_FIELD: &str = "area";

/// Field holding the fine-grained label.
///
/// First-pass records stored the area here; see [`Record::area_hint`].
pub const LABEL_FIELD: &str = "discipline";

/// Identifying metadata that always precedes area and label on disk.
pub const LEADING_FIELDS: [&str; 4] = ["title", "index", "year", "language"];

/// Stable identifier of a record: its path relative to the corpus root,
/// always with forward slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record ID from its string form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the ID from a storage path.
    ///
    /// Paths outside `base` keep their full form so they still round-trip
    /// through [`RecordId::to_path`].
    #[must_use]
    pub fn from_path(base: &Path, path: &Path) -> Self {
        let relative = path.strip_prefix(base).unwrap_or(path);
        let parts: Vec<String> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                Component::RootDir => Some(String::new()),
                _ => None,
            })
            .collect();
        Self(parts.join("/"))
    }

    /// Resolves the ID back to a path under `base`.
    #[must_use]
    pub fn to_path(&self, base: &Path) -> PathBuf {
        if self.0.starts_with('/') {
            return PathBuf::from(&self.0);
        }
        self.0
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(base.to_path_buf(), |acc, part| acc.join(part))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One answer choice of a question.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Alternative {
    /// Choice letter (`A`..`E`).
    #[serde(default)]
    pub letter: String,
    /// Choice text.
    #[serde(default)]
    pub text: String,
}

/// A single classifiable question, as persisted on disk.
///
/// The JSON object is kept verbatim in `fields` so that rewriting a record
/// never loses data the classifier does not understand.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Stable identifier.
    pub id: RecordId,
    /// Location of the persisted file.
    pub path: PathBuf,
    /// All fields in file order.
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record from its parsed fields.
    #[must_use]
    pub fn new(id: RecordId, path: impl Into<PathBuf>, fields: Map<String, Value>) -> Self {
        Self {
            id,
            path: path.into(),
            fields,
        }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// The explicit `area` field, if present.
    #[must_use]
    pub fn area(&self) -> Option<&str> {
        self.str_field(AREA_FIELD)
    }

    /// The label. Only meaningful once `area` is present.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.area().and(self.str_field(LABEL_FIELD))
    }

    /// Best guess at the area: `area`, falling back to the legacy
    /// `discipline` field used before the first classification pass.
    #[must_use]
    pub fn area_hint(&self) -> Option<&str> {
        self.area().or_else(|| self.str_field(LABEL_FIELD))
    }

    /// Question statement.
    #[must_use]
    pub fn context(&self) -> &str {
        self.str_field("context").unwrap_or_default()
    }

    /// Lead-in text shown before the alternatives.
    #[must_use]
    pub fn alternatives_introduction(&self) -> &str {
        self.str_field("alternativesIntroduction")
            .unwrap_or_default()
    }

    /// Answer choices; malformed entries are skipped.
    #[must_use]
    pub fn alternatives(&self) -> Vec<Alternative> {
        self.fields
            .get("alternatives")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Attached asset names.
    #[must_use]
    pub fn files(&self) -> Vec<&str> {
        self.fields
            .get("files")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns the fields reordered for persistence with area and label set:
    /// identifying metadata, then area, then label, then every other original
    /// field in its original relative order.
    #[must_use]
    pub fn ordered_with_label(&self, area: &str, label: &str) -> Map<String, Value> {
        let mut ordered = Map::with_capacity(self.fields.len() + 2);
        for key in LEADING_FIELDS {
            if let Some(value) = self.fields.get(key) {
                ordered.insert(key.to_string(), value.clone());
            }
        }
        ordered.insert(AREA_FIELD.to_string(), Value::String(area.to_string()));
        ordered.insert(LABEL_FIELD.to_string(), Value::String(label.to_string()));
        for (key, value) in &self.fields {
            if !ordered.contains_key(key) {
                ordered.insert(key.clone(), value.clone());
            }
        }
        ordered
    }
}
