//! Durable storage: a key-value map for the backoff ledger and the
//! persisted account state.
//!
//! Values are strings; each `set`/`remove` is persisted before it returns so
//! a crash never leaves the file half-written for a single key.

use crate::account::AccountState;
use crate::error::{CloudError, CloudResult};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Minimal persistent map used for backoff deadlines and the last storage host.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> CloudResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> CloudResult<()>;
    fn remove(&self, key: &str) -> CloudResult<()>;
}

/// In-process store. Survives nothing, which is what tests want.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> CloudResult<Option<String>> {
        let entries = self.entries.lock().map_err(|e| CloudError::Storage(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CloudResult<()> {
        let mut entries = self.entries.lock().map_err(|e| CloudError::Storage(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> CloudResult<()> {
        let mut entries = self.entries.lock().map_err(|e| CloudError::Storage(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// JSON file store. The whole map is rewritten on every mutation.
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens (or lazily creates) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> CloudResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let data = std::fs::read_to_string(&path)
                .map_err(|e| CloudError::Storage(format!("read {}: {e}", path.display())))?;
            if data.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&data)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> CloudResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CloudError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| CloudError::Storage(format!("write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| CloudError::Storage(format!("rename {}: {e}", self.path.display())))?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> CloudResult<Option<String>> {
        let entries = self.entries.lock().map_err(|e| CloudError::Storage(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> CloudResult<()> {
        let mut entries = self.entries.lock().map_err(|e| CloudError::Storage(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> CloudResult<()> {
        let mut entries = self.entries.lock().map_err(|e| CloudError::Storage(e.to_string()))?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

// ── Account state ──

/// Where the account's login state lives between sync attempts.
pub trait AccountStore: Send + Sync {
    /// The stored state, or `None` when no account is configured.
    fn load_state(&self) -> CloudResult<Option<AccountState>>;
    fn save_state(&self, state: &AccountState) -> CloudResult<()>;
}

/// In-memory account store that counts writes.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    state: Mutex<Option<AccountState>>,
    saves: AtomicUsize,
}

impl MemoryAccountStore {
    pub fn new(state: Option<AccountState>) -> Self {
        Self {
            state: Mutex::new(state),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl AccountStore for MemoryAccountStore {
    fn load_state(&self) -> CloudResult<Option<AccountState>> {
        let state = self.state.lock().map_err(|e| CloudError::Storage(e.to_string()))?;
        Ok(state.clone())
    }

    fn save_state(&self, state: &AccountState) -> CloudResult<()> {
        let mut slot = self.state.lock().map_err(|e| CloudError::Storage(e.to_string()))?;
        *slot = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Account state persisted as a JSON file.
pub struct FileAccountStore {
    path: PathBuf,
}

impl FileAccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the stored account, e.g. on sign-out.
    pub fn clear(&self) -> CloudResult<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)
                .map_err(|e| CloudError::Storage(format!("remove {}: {e}", self.path.display())))?;
        }
        Ok(())
    }
}

impl AccountStore for FileAccountStore {
    fn load_state(&self) -> CloudResult<Option<AccountState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(&self.path)
            .map_err(|e| CloudError::Storage(format!("read {}: {e}", self.path.display())))?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    fn save_state(&self, state: &AccountState) -> CloudResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CloudError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, json)
            .map_err(|e| CloudError::Storage(format!("write {}: {e}", self.path.display())))?;
        Ok(())
    }
}
