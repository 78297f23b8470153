//! Durable state: record files, per-batch checkpoints and the failure log.
//!
//! Each store owns disjoint files. Whole-file rewrites go through
//! [`write_atomic`] (temp file in the same directory, then rename) so a
//! reader sees either the old or the new content, never a partial write.

mod checkpoint;
mod failure_log;
mod records;

pub use checkpoint::CheckpointStore;
pub use failure_log::FailureLog;
pub use records::RecordStore;

use crate::{Error, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

fn io_error(operation: &str, path: &Path, err: &std::io::Error) -> Error {
    Error::OperationFailed {
        operation: operation.to_string(),
        cause: format!("{}: {err}", path.display()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replaces `path` with `bytes` atomically.
///
/// # Errors
///
/// Returns an error if the temp file cannot be written or renamed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_error("create_dir", parent, &e))?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).map_err(|e| io_error("write_tmp", &tmp, &e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        io_error("rename", path, &e)
    })
}

/// Serializes `value` as JSON indented by four spaces.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| Error::OperationFailed {
            operation: "serialize_json".to_string(),
            cause: e.to_string(),
        })?;
    out.push(b'\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_atomic_replaces_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_atomic(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn test_tmp_path_keeps_directory() {
        let tmp = tmp_path(Path::new("/a/b/details.json"));
        assert_eq!(tmp, PathBuf::from("/a/b/details.json.tmp"));
    }

    #[test]
    fn test_pretty_json_uses_four_spaces() {
        let bytes = to_pretty_json(&json!({"title": "Questão 1"})).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "{\n    \"title\": \"Questão 1\"\n}\n");
    }
}
