//! Key/value persistence backends
//!
//! The session layer treats storage the way a browser page treats local
//! storage: synchronous, string-valued, one flat namespace. `FileStore`
//! keeps that namespace in a JSON file; every write replaces the file
//! atomically (temp file + rename) so a crash never leaves a half-written
//! session behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use common::{Error, MutexExt, Result};
use tracing::{debug, info};

/// Flat string key/value storage.
///
/// Every operation completes before returning; a value written by `set` is
/// visible in full to the next `get` or not at all.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Every key currently stored.
    fn keys(&self) -> Result<Vec<String>>;

    /// Remove several keys in one step.
    fn remove_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

/// Ephemeral in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock_or_recover().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.state
            .lock_or_recover()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.state.lock_or_recover().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.state.lock_or_recover().keys().cloned().collect())
    }
}

/// JSON-file backed store.
///
/// The whole namespace is held in memory and rewritten on every mutation.
/// The Mutex serializes writers so concurrent `set` calls cannot interleave
/// their file replacements.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// A missing file is created as `{}` so later opens skip the cold-start
    /// path.
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let entries: BTreeMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing {}: {e}", path.display())))?;
            info!(path = %path.display(), keys = entries.len(), "opened store");
            entries
        } else {
            info!(path = %path.display(), "store file not found, starting empty");
            let entries = BTreeMap::new();
            write_atomic(&path, &entries)?;
            entries
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock_or_recover().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock_or_recover();
        state.insert(key.to_owned(), value.to_owned());
        write_atomic(&self.path, &state)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock_or_recover();
        if state.remove(key).is_some() {
            write_atomic(&self.path, &state)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.state.lock_or_recover().keys().cloned().collect())
    }

    fn remove_many(&self, keys: &[String]) -> Result<()> {
        let mut state = self.state.lock_or_recover();
        let before = state.len();
        for key in keys {
            state.remove(key);
        }
        if state.len() != before {
            write_atomic(&self.path, &state)?;
        }
        Ok(())
    }
}

/// Replace the store file atomically.
///
/// Writes a sibling temp file, restricts it to 0600 on unix (it holds
/// tokens and the client secret), then renames it over the target.
fn write_atomic(path: &Path, data: &BTreeMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Storage(format!("invalid store path {}", path.display())))?;
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;

    debug!(path = %path.display(), keys = data.len(), "persisted store");
    Ok(())
}
