//! Record files.

use super::{io_error, to_pretty_json, write_atomic};
use crate::config::AreaCatalog;
use crate::models::{Record, RecordId};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Reads and rewrites record files under a corpus root.
#[derive(Debug, Clone)]
pub struct RecordStore {
    base_path: PathBuf,
    catalog: AreaCatalog,
}

impl RecordStore {
    /// Creates a store rooted at `base_path`.
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>, catalog: AreaCatalog) -> Self {
        Self {
            base_path: base_path.into(),
            catalog,
        }
    }

    /// Corpus root.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Loads the record stored at `path`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the file is missing, [`Error::Corrupt`] if it
    /// is not a JSON object, [`Error::OperationFailed`] for other I/O errors.
    pub fn load(&self, path: &Path) -> Result<Record> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                Error::NotFound(path.to_path_buf())
            } else {
                io_error("read_record", path, &e)
            }
        })?;

        let fields: Map<String, Value> =
            serde_json::from_str(&contents).map_err(|e| Error::Corrupt {
                path: path.to_path_buf(),
                cause: e.to_string(),
            })?;

        Ok(Record::new(
            RecordId::from_path(&self.base_path, path),
            path,
            fields,
        ))
    }

    /// Whether the record already carries an area and a label valid for it.
    #[must_use]
    pub fn is_settled(&self, record: &Record) -> bool {
        match (record.area(), record.label()) {
            (Some(area), Some(label)) => self.catalog.is_valid(area, label),
            _ => false,
        }
    }

    /// Writes `record` back with `area` and `label` set, in canonical field
    /// order, and returns the persisted form.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be replaced.
    pub fn save(&self, record: &Record, area: &str, label: &str) -> Result<Record> {
        let fields = record.ordered_with_label(area, label);
        let bytes = to_pretty_json(&fields)?;
        write_atomic(&record.path, &bytes)?;
        tracing::debug!("Saved {} as {area}/{label}", record.id);
        Ok(Record::new(record.id.clone(), record.path.clone(), fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(dir: &Path) -> RecordStore {
        RecordStore::new(dir, AreaCatalog::enem())
    }

    fn write(dir: &Path, rel: &str, value: &Value) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_string(value).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_load_assigns_relative_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "year/2019/questions/7-ingles/details.json",
            &json!({"title": "Q7", "discipline": "linguagens"}),
        );
        let record = store(dir.path()).load(&path).unwrap();
        assert_eq!(record.id.as_str(), "year/2019/questions/7-ingles/details.json");
        assert_eq!(record.area_hint(), Some("linguagens"));
        assert_eq!(record.area(), None);
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let missing = dir.path().join("nope/details.json");
        assert!(matches!(store.load(&missing), Err(Error::NotFound(p)) if p == missing));

        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(store.load(&path), Err(Error::Corrupt { .. })));

        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(store.load(&path), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn test_is_settled() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let settled = write(
            dir.path(),
            "a.json",
            &json!({"area": "ciencias-natureza", "discipline": "fisica"}),
        );
        let wrong = write(
            dir.path(),
            "b.json",
            &json!({"area": "ciencias-natureza", "discipline": "historia"}),
        );
        let legacy = write(dir.path(), "c.json", &json!({"discipline": "matematica"}));

        assert!(store.is_settled(&store.load(&settled).unwrap()));
        assert!(!store.is_settled(&store.load(&wrong).unwrap()));
        assert!(!store.is_settled(&store.load(&legacy).unwrap()));
    }

    #[test]
    fn test_save_reorders_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = write(
            dir.path(),
            "q.json",
            &json!({
                "context": "texto",
                "discipline": "ciencias-humanas",
                "year": 2019,
                "files": [],
                "title": "Questão 3",
                "index": 3
            }),
        );

        let record = store.load(&path).unwrap();
        let saved = store.save(&record, "ciencias-humanas", "historia").unwrap();
        assert!(store.is_settled(&saved));

        let text = fs::read_to_string(&path).unwrap();
        let keys: Vec<String> = serde_json::from_str::<Map<String, Value>>(&text)
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(
            keys,
            ["title", "index", "year", "area", "discipline", "context", "files"]
        );
        assert!(text.starts_with("{\n    \"title\""));
    }

    #[test]
    fn test_resaving_settled_record_keeps_label() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = write(
            dir.path(),
            "q.json",
            &json!({"title": "t", "area": "linguagens", "discipline": "artes"}),
        );
        let record = store.load(&path).unwrap();
        store
            .save(&record, record.area().unwrap(), record.label().unwrap())
            .unwrap();

        let reloaded = store.load(&path).unwrap();
        assert_eq!(reloaded.area(), Some("linguagens"));
        assert_eq!(reloaded.label(), Some("artes"));
        assert_eq!(reloaded.fields, record.fields);
    }
}
