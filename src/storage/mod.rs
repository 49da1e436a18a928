//! Small named text values kept on local disk (API key, system prompt,
//! error reports).

use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, SortieError};

/// Storage abstraction for small named secrets.
pub trait SecretStore: Send + Sync {
    /// Load a value. Missing or blank values are `None`.
    fn load(&self, name: &str) -> Result<Option<String>>;
    /// Replace a value; the written file is readable by the owner only.
    fn save(&self, name: &str, data: &str) -> Result<()>;
    /// Remove a value. Removing a missing value is not an error.
    fn clear(&self, name: &str) -> Result<()>;
}

/// Directory-backed secret store, one file per name.
///
/// # Example
/// ```no_run
/// use sortie::storage::{FileSecretStore, SecretStore};
///
/// let store = FileSecretStore::new_default();
/// store.save("api_key", "sk-ant-...")?;
/// assert!(store.load("api_key")?.is_some());
/// # Ok::<(), sortie::error::SortieError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    base_dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn new_default() -> Self {
        Self::new(default_storage_dir())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(SortieError::Configuration(format!(
                "Invalid storage name: {name:?}"
            )));
        }
        Ok(self.base_dir.join(name))
    }
}

impl SecretStore for FileSecretStore {
    fn load(&self, name: &str) -> Result<Option<String>> {
        let path = self.path_for(name)?;
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(SortieError::Io(err)),
        };
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }

    fn save(&self, name: &str, data: &str) -> Result<()> {
        let path = self.path_for(name)?;
        atomic_write(&path, data.as_bytes())
    }

    fn clear(&self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(SortieError::Io(err)),
        }
    }
}

/// Default storage directory (`~/.sortie`).
pub fn default_storage_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".sortie"))
        .unwrap_or_else(|| PathBuf::from(".sortie"))
}

/// Write `data` to a sibling temp file and rename it over `path`.
///
/// Readers never observe a half-written file. On unix the result is 0600.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        SortieError::Configuration(format!("Path {} has no file name", path.display()))
    })?;

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_name = format!(
        ".{}.tmp-{}-{nonce}",
        file_name.to_string_lossy(),
        std::process::id()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(SortieError::Io(err));
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(SortieError::Io(err));
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}
