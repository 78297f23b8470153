//! Corpus layout.
//!
//! ```text
//! <base>/year/<year>/details.json                       question index
//! <base>/year/<year>/questions/<index>[-<language>]/details.json
//! ```
//!
//! A batch is one exam year. The year index lists each question's number,
//! optional language and area (stored under `discipline` there).

use crate::models::RecordId;
use crate::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const RECORD_FILE: &str = "details.json";

/// One record scheduled in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Record identifier.
    pub id: RecordId,
    /// Record file.
    pub path: PathBuf,
    /// Area declared by the year index.
    pub area: String,
    /// Question number.
    pub index: u64,
}

#[derive(Debug, Deserialize)]
struct YearIndex {
    #[serde(default)]
    questions: Vec<QuestionEntry>,
}

#[derive(Debug, Deserialize)]
struct QuestionEntry {
    #[serde(default)]
    index: Option<u64>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default, rename = "discipline")]
    area: Option<String>,
}

/// Read-only view of a corpus directory.
#[derive(Debug, Clone)]
pub struct Corpus {
    base_path: PathBuf,
}

impl Corpus {
    /// Opens the corpus rooted at `base_path`.
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Corpus root.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn year_dir(&self, year: u32) -> PathBuf {
        self.base_path.join("year").join(year.to_string())
    }

    /// Numeric year directories, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if `<base>/year` cannot be listed.
    pub fn years(&self) -> Result<Vec<u32>> {
        let root = self.base_path.join("year");
        let entries = fs::read_dir(&root).map_err(|e| Error::InvalidInput(format!(
            "cannot list {}: {e}",
            root.display()
        )))?;
        let mut years: Vec<u32> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        years.sort_unstable();
        Ok(years)
    }

    /// Records of `year` in declared order, optionally from `start_index` on.
    ///
    /// Index entries without an area or a question number are skipped with
    /// a warning.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] if the year or its index is missing or
    /// unparseable.
    pub fn batch(&self, year: u32, start_index: Option<u64>) -> Result<Vec<BatchItem>> {
        let year_dir = self.year_dir(year);
        let index_path = year_dir.join(RECORD_FILE);
        let contents = fs::read_to_string(&index_path).map_err(|e| {
            Error::InvalidInput(format!("no index for year {year} at {}: {e}", index_path.display()))
        })?;
        let index: YearIndex = serde_json::from_str(&contents).map_err(|e| {
            Error::InvalidInput(format!("unparseable index {}: {e}", index_path.display()))
        })?;

        let mut items = Vec::with_capacity(index.questions.len());
        for (position, entry) in index.questions.into_iter().enumerate() {
            let (Some(number), Some(area)) = (entry.index, entry.area.filter(|a| !a.is_empty()))
            else {
                tracing::warn!("Year {year}: entry {} has no area or index", position + 1);
                continue;
            };
            if start_index.is_some_and(|start| number < start) {
                continue;
            }
            let folder = match entry.language.as_deref().filter(|l| !l.is_empty()) {
                Some(language) => format!("{number}-{language}"),
                None => number.to_string(),
            };
            let path = year_dir.join("questions").join(folder).join(RECORD_FILE);
            items.push(BatchItem {
                id: RecordId::from_path(&self.base_path, &path),
                path,
                area,
                index: number,
            });
        }
        Ok(items)
    }

    /// Batches for a run: `year` alone, or every year in ascending order.
    ///
    /// Over all years, a year whose index is missing or unparseable is
    /// skipped with a warning and the remaining years still run.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested year has no usable index, or if
    /// the year directories cannot be listed.
    pub fn batches(
        &self,
        year: Option<u32>,
        start_index: Option<u64>,
    ) -> Result<Vec<(u32, Vec<BatchItem>)>> {
        if let Some(year) = year {
            return Ok(vec![(year, self.batch(year, start_index)?)]);
        }
        let mut batches = Vec::new();
        for year in self.years()? {
            match self.batch(year, start_index) {
                Ok(items) => batches.push((year, items)),
                Err(e) => tracing::warn!("Skipping year {year}: {e}"),
            }
        }
        Ok(batches)
    }

    /// Every record file present under `year`, sorted by directory name.
    ///
    /// # Errors
    ///
    /// Returns an error if the questions directory cannot be listed.
    pub fn record_paths(&self, year: u32) -> Result<Vec<PathBuf>> {
        let questions = self.year_dir(year).join("questions");
        let entries = match fs::read_dir(&questions) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::OperationFailed {
                    operation: "list_questions".to_string(),
                    cause: format!("{}: {e}", questions.display()),
                });
            },
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path().join(RECORD_FILE))
            .filter(|path| path.is_file())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Batch identifier of a record id (`year/<year>/...`).
    #[must_use]
    pub fn batch_of(id: &RecordId) -> Option<u32> {
        let mut parts = id.as_str().trim_start_matches('/').split('/');
        while let Some(part) = parts.next() {
            if part == "year" {
                return parts.next()?.parse().ok();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn corpus() -> (tempfile::TempDir, Corpus) {
        let dir = tempfile::tempdir().unwrap();
        let year = dir.path().join("year/2019");
        fs::create_dir_all(year.join("questions/1")).unwrap();
        fs::create_dir_all(year.join("questions/2-ingles")).unwrap();
        fs::create_dir_all(dir.path().join("year/2010")).unwrap();
        fs::create_dir_all(dir.path().join("year/notes")).unwrap();
        fs::write(
            year.join("details.json"),
            json!({
                "title": "ENEM 2019",
                "questions": [
                    {"index": 1, "discipline": "ciencias-humanas"},
                    {"index": 2, "language": "ingles", "discipline": "linguagens"},
                    {"index": 3},
                    {"index": 4, "discipline": "matematica"}
                ]
            })
            .to_string(),
        )
        .unwrap();
        fs::write(year.join("questions/1/details.json"), "{}").unwrap();
        fs::write(year.join("questions/2-ingles/details.json"), "{}").unwrap();
        let corpus = Corpus::new(dir.path());
        (dir, corpus)
    }

    #[test]
    fn test_years_sorted_numeric_only() {
        let (_dir, corpus) = corpus();
        assert_eq!(corpus.years().unwrap(), vec![2010, 2019]);
    }

    #[test]
    fn test_batch_in_declared_order() {
        let (_dir, corpus) = corpus();
        let batch = corpus.batch(2019, None).unwrap();
        let ids: Vec<&str> = batch.iter().map(|item| item.id.as_str()).collect();
        assert_eq!(
            ids,
            [
                "year/2019/questions/1/details.json",
                "year/2019/questions/2-ingles/details.json",
                "year/2019/questions/4/details.json",
            ]
        );
        assert_eq!(batch[1].area, "linguagens");
    }

    #[test]
    fn test_batch_start_index() {
        let (_dir, corpus) = corpus();
        let batch = corpus.batch(2019, Some(2)).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].index, 2);
    }

    #[test]
    fn test_missing_year_is_invalid_input() {
        let (_dir, corpus) = corpus();
        assert!(matches!(corpus.batch(1999, None), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_all_years_skip_year_without_index() {
        let (_dir, corpus) = corpus();
        let batches = corpus.batches(None, None).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].0, 2019);
        assert_eq!(batches[0].1.len(), 3);
    }

    #[test]
    fn test_requested_year_without_index_is_an_error() {
        let (_dir, corpus) = corpus();
        assert!(matches!(corpus.batches(Some(2010), None), Err(Error::InvalidInput(_))));
        assert_eq!(corpus.batches(Some(2019), Some(4)).unwrap()[0].1.len(), 1);
    }

    #[test]
    fn test_record_paths() {
        let (_dir, corpus) = corpus();
        let paths = corpus.record_paths(2019).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(corpus.record_paths(2010).unwrap().is_empty());
    }

    #[test]
    fn test_batch_of() {
        assert_eq!(
            Corpus::batch_of(&RecordId::new("year/2018/questions/115/details.json")),
            Some(2018)
        );
        assert_eq!(Corpus::batch_of(&RecordId::new("/srv/year/2011/q/1")), Some(2011));
        assert_eq!(Corpus::batch_of(&RecordId::new("misc/1.json")), None);
    }
}
