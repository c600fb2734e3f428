//! Persistent state store.
//!
//! Two independent values are kept: `state`, an opaque JSON blob owned by
//! the application layer, and `keys`, the exported device identity.
//! Backends only know about string keys and JSON values.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use nokey_proto::ExportedIdentity;

use crate::errors::StoreError;

pub const STATE_KEY: &str = "state";
pub const KEYS_KEY: &str = "keys";

/// Key/value storage for JSON values.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove every stored value.
    async fn clear(&self) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Backend kept in process memory. Used in tests and when durable storage
/// is unavailable for the session.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.values.write().await.clear();
        Ok(())
    }
}

// ============================================================================
// Directory backend
// ============================================================================

/// One `<key>.json` file per key inside a directory.
///
/// Writes go to a temporary file that is renamed over the target; on Unix
/// the files are readable by the owner only.
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    dir: PathBuf,
}

impl DirectoryBackend {
    /// Use `dir`, creating it when missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::Unavailable(format!("invalid storage key {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }

    fn read(dir: &Path, path: &Path, key: &str) -> Result<Option<Value>, StoreError> {
        if !dir.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Unavailable(format!("{}: {e}", path.display())));
            }
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    fn write(path: &Path, value: &Value) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(value)?;

        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn remove_all(dir: &Path) -> Result<(), StoreError> {
        let entries = fs::read_dir(dir)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", dir.display())))?;
        for entry in entries {
            let path = entry?.path();
            let is_value = path.extension().map_or(false, |ext| ext == "json" || ext == "tmp");
            if path.is_file() && is_value {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for DirectoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;
        let dir = self.dir.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::read(&dir, &path, &key))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::task::spawn_blocking(move || Self::write(&path, &value))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || Self::remove_all(&dir))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

// ============================================================================
// State store
// ============================================================================

/// What was found in storage at start-up. Either member may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Persisted {
    pub state: Option<Value>,
    pub keys: Option<ExportedIdentity>,
}

/// Load/save of application state and the exported identity.
#[derive(Clone)]
pub struct StateStore {
    backend: Arc<dyn StorageBackend>,
}

impl StateStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub async fn load(&self) -> Result<Persisted, StoreError> {
        let state = self
            .backend
            .get(STATE_KEY)
            .await?
            .filter(|state| !state.is_null());
        let keys = match self.backend.get(KEYS_KEY).await? {
            Some(Value::Null) | None => None,
            Some(value) => Some(serde_json::from_value(value).map_err(|source| {
                StoreError::Corrupt {
                    key: KEYS_KEY.to_string(),
                    source,
                }
            })?),
        };
        debug!(
            has_state = state.is_some(),
            has_keys = keys.is_some(),
            "loaded persisted data"
        );
        Ok(Persisted { state, keys })
    }

    /// Write both the state and the identity.
    pub async fn save(&self, state: &Value, keys: &ExportedIdentity) -> Result<(), StoreError> {
        self.backend.set(STATE_KEY, state.clone()).await?;
        self.backend
            .set(KEYS_KEY, serde_json::to_value(keys)?)
            .await?;
        Ok(())
    }

    /// Wipe storage, then write `new_state` together with the *same* identity.
    pub async fn reset(
        &self,
        new_state: &Value,
        keys: &ExportedIdentity,
    ) -> Result<(), StoreError> {
        self.backend.clear().await?;
        self.save(new_state, keys).await?;
        info!("storage reset, device identity kept");
        Ok(())
    }
}
