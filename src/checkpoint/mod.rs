//! Durable record of the most recently selected instruction.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SortieError};
use crate::storage::atomic_write;

/// On-disk checkpoint shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    #[serde(default)]
    pub last_identifier: Option<String>,
}

/// Storage abstraction for the single checkpoint value.
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, identifier: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON-file backed checkpoint, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<String>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SortieError::Io(err)),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&raw).map_err(|err| {
            SortieError::DataFormat(format!(
                "checkpoint file {} is corrupted: {err}",
                self.path.display()
            ))
        })?;
        Ok(checkpoint.last_identifier)
    }

    fn save(&self, identifier: &str) -> Result<()> {
        let checkpoint = Checkpoint {
            last_identifier: Some(identifier.to_string()),
        };
        atomic_write(&self.path, &to_json_indented(&checkpoint)?)
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SortieError::Io(err)),
        }
    }
}

/// In-memory checkpoint for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    value: Mutex<Option<String>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(identifier.into())),
        }
    }

    /// Current value without going through the trait.
    pub fn get(&self) -> Option<String> {
        self.value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.get())
    }

    fn save(&self, identifier: &str) -> Result<()> {
        *self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(identifier.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .value
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

/// Serialize with 4-space indentation, the layout used for files users may
/// open by hand.
pub(crate) fn to_json_indented<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut serializer)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_absent_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("last_task.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn save_overwrites_previous_identifier() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("state").join("last_task.json"));
        store.save("T1").unwrap();
        store.save("T2").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("T2"));

        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, "{\n    \"last_identifier\": \"T2\"\n}");
    }

    #[test]
    fn corrupted_file_is_a_data_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last_task.json");
        fs::write(&path, "{ not json").unwrap();
        let store = FileCheckpointStore::new(&path);
        assert!(matches!(store.load(), Err(SortieError::DataFormat(_))));
    }

    #[test]
    fn non_ascii_identifiers_are_kept_verbatim() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("last_task.json"));
        store.save("작업-7").unwrap();
        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("작업-7"));
        assert_eq!(store.load().unwrap().as_deref(), Some("작업-7"));
    }

    #[test]
    fn memory_store_round_trips_and_clears() {
        let store = MemoryCheckpointStore::with_identifier("b");
        assert_eq!(store.load().unwrap().as_deref(), Some("b"));
        store.save("c").unwrap();
        assert_eq!(store.get().as_deref(), Some("c"));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
