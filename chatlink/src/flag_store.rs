//! Persistence of the "live channel disabled" flag across restarts.
//!
//! The file store keeps a small JSON object next to other client state, so
//! unrelated keys written by other tools survive a save.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value};

/// Key of the flag inside the state file.
pub const DISABLED_FLAG_KEY: &str = "live_channel_disabled";

/// Errors from reading or writing the persisted flag.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File I/O failed.
    #[error("state file {path}: {source}")]
    Io {
        /// The state file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The state file is not a JSON object.
    #[error("state file {path} is not valid JSON: {source}")]
    Parse {
        /// The state file.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Durable storage for the disabled flag.
pub trait FlagStore: Send + Sync {
    /// Read the flag. An absent flag is `false`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage cannot be read.
    fn load(&self) -> Result<bool, StoreError>;

    /// Write the flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage cannot be written.
    fn save(&self, disabled: bool) -> Result<(), StoreError>;
}

/// Flag stored in a JSON state file.
#[derive(Debug, Clone)]
pub struct FileFlagStore {
    path: PathBuf,
}

impl FileFlagStore {
    /// Store backed by the file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/chatlink/state.json`, if the platform has a data dir.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("chatlink").join("state.json"))
    }

    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<Map<String, Value>, StoreError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

impl FlagStore for FileFlagStore {
    fn load(&self) -> Result<bool, StoreError> {
        let map = self.read_map()?;
        Ok(map
            .get(DISABLED_FLAG_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    fn save(&self, disabled: bool) -> Result<(), StoreError> {
        // A corrupt file is replaced rather than blocking the save.
        let mut map = self.read_map().unwrap_or_default();
        if disabled {
            map.insert(DISABLED_FLAG_KEY.to_string(), Value::Bool(true));
        } else {
            map.remove(DISABLED_FLAG_KEY);
        }

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let body = serde_json::to_string_pretty(&Value::Object(map)).map_err(|source| {
            StoreError::Parse {
                path: self.path.clone(),
                source,
            }
        })?;
        std::fs::write(&self.path, body).map_err(io_err)
    }
}

/// Flag held in memory. Clones share the same flag, which lets tests
/// simulate a restart by building a second policy from a clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryFlagStore {
    disabled: Arc<AtomicBool>,
}

impl MemoryFlagStore {
    /// A store whose flag starts at `disabled`.
    #[must_use]
    pub fn with_value(disabled: bool) -> Self {
        Self {
            disabled: Arc::new(AtomicBool::new(disabled)),
        }
    }

    /// Current value without going through [`FlagStore::load`].
    #[must_use]
    pub fn get(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}

impl FlagStore for MemoryFlagStore {
    fn load(&self) -> Result<bool, StoreError> {
        Ok(self.get())
    }

    fn save(&self, disabled: bool) -> Result<(), StoreError> {
        self.disabled.store(disabled, Ordering::SeqCst);
        Ok(())
    }
}
