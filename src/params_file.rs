//! Parameter persistence (C10): JSON-file storage for the committed
//! parameter range, loaded at startup and saved atomically after every
//! commit.
//!
//! Grounded on the teacher's project-file save pattern of writing to a
//! sibling temp file and renaming over the target (`src-tauri/src/project`
//! uses the same write-then-rename shape for crash safety); serialized with
//! `serde_json`, matching the rest of the crate's error-handling style in
//! [`crate::error::AppError`].

use crate::error::AppError;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

/// Contract for loading and saving the persistent parameter range. Kept
/// narrow so tests can swap in an in-memory fake.
pub trait ParameterPersistence {
    fn load(&self) -> Result<HashMap<u32, f64>, AppError>;
    fn save(&self, values: &[(u32, f64)]) -> Result<(), AppError>;
}

/// Stores parameters as a flat `{"100": 1.5, "171": 2.0}` JSON object at a
/// fixed path. A missing file loads as an empty store rather than an error,
/// matching a first-run machine with no saved offsets yet.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ParameterPersistence for JsonFileStore {
    fn load(&self) -> Result<HashMap<u32, f64>, AppError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let raw: HashMap<String, f64> = serde_json::from_str(&text)
            .map_err(|e| AppError::ParamFileFormat(e.to_string()))?;
        let mut values = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let n: u32 = key
                .parse()
                .map_err(|_| AppError::ParamFileFormat(format!("non-numeric key '{key}'")))?;
            values.insert(n, value);
        }
        Ok(values)
    }

    fn save(&self, values: &[(u32, f64)]) -> Result<(), AppError> {
        let as_map: HashMap<String, f64> = values.iter().map(|(n, v)| (n.to_string(), *v)).collect();
        let text = serde_json::to_string_pretty(&as_map)
            .map_err(|e| AppError::ParamFileFormat(e.to_string()))?;
        atomic_write(&self.path, text.as_bytes())?;
        Ok(())
    }
}

/// Write `bytes` to a `.tmp` sibling of `path`, then rename over `path`, so
/// a crash mid-write never leaves a half-written parameter file behind.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = std::fs::File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_an_empty_store() {
        let store = JsonFileStore::new("/tmp/gcode-canon-rs-test-does-not-exist.json");
        let loaded = store.load().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn save_then_load_round_trips_values() {
        let dir = std::env::temp_dir().join(format!(
            "gcode-canon-rs-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("params.json");
        let store = JsonFileStore::new(&path);
        store.save(&[(100, 1.5), (171, 2.0)]).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.get(&100), Some(&1.5));
        assert_eq!(loaded.get(&171), Some(&2.0));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn malformed_json_is_reported_as_a_format_error() {
        let dir = std::env::temp_dir().join(format!(
            "gcode-canon-rs-test-bad-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("params.json");
        std::fs::write(&path, b"not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(AppError::ParamFileFormat(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn save_does_not_leave_a_temp_file_behind() {
        let dir = std::env::temp_dir().join(format!(
            "gcode-canon-rs-test-tmp-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("params.json");
        let store = JsonFileStore::new(&path);
        store.save(&[(100, 1.0)]).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
