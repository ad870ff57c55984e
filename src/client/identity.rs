//! Per-session identity: generated once, reused for as long as the session storage lives.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Storage key holding the raw identity string.
pub const IDENTITY_KEY: &str = "presence-gate:myUuid";

/// Stable correlation key for this client session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uuid: String,
}

impl Identity {
    fn generate() -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
        }
    }
}

/// Session-scoped key/value storage.
pub trait SessionStorage: Send + Sync {
    fn get_item(&self, key: &str) -> AppResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> AppResult<()>;
}

/// Storage that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> AppResult<Option<String>> {
        let items = self
            .items
            .lock()
            .map_err(|_| AppError::Storage("memory storage lock poisoned".to_string()))?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> AppResult<()> {
        let mut items = self
            .items
            .lock()
            .map_err(|_| AppError::Storage("memory storage lock poisoned".to_string()))?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Storage persisted as a JSON object in a single file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub const FILE_NAME: &'static str = "presence-gate-session.json";

    /// Storage file inside `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> AppResult<HashMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| AppError::Storage(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(AppError::Storage(format!("{}: {}", self.path.display(), e))),
        }
    }
}

impl SessionStorage for FileStorage {
    fn get_item(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> AppResult<()> {
        let mut items = self.load()?;
        items.insert(key.to_string(), value.to_string());
        let text = serde_json::to_string(&items)?;
        std::fs::write(&self.path, text)
            .map_err(|e| AppError::Storage(format!("{}: {}", self.path.display(), e)))
    }
}

/// Hands out the session identity, creating it on first use.
pub struct IdentityStore<S> {
    storage: S,
}

impl<S: SessionStorage> IdentityStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Stored identity, or a freshly generated one written back to storage.
    /// If storage fails the new identity is used for this run only.
    pub fn get_or_create(&self) -> Identity {
        match self.load_or_store() {
            Ok(identity) => identity,
            Err(e) => {
                warn!(error = %e, "session storage unavailable; using ephemeral identity");
                Identity::generate()
            }
        }
    }

    fn load_or_store(&self) -> AppResult<Identity> {
        if let Some(uuid) = self.storage.get_item(IDENTITY_KEY)?.filter(|v| !v.is_empty()) {
            return Ok(Identity { uuid });
        }
        let identity = Identity::generate();
        self.storage.set_item(IDENTITY_KEY, &identity.uuid)?;
        debug!(uuid = %identity.uuid, "new session identity stored");
        Ok(identity)
    }
}
