use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RelayError;
use crate::masking::Visibility;

const STATUS_FILE: &str = "status";

/// Persistence for the single selected visibility
pub trait StatusStore: Send + Sync {
    fn load(&self) -> Visibility;

    fn save(&self, visibility: Visibility) -> Result<(), RelayError>;
}

/// Stores the status as a bare string in `<data_dir>/status`
pub struct FileStatusStore {
    path: PathBuf,
}

impl FileStatusStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STATUS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatusStore for FileStatusStore {
    fn load(&self) -> Visibility {
        tracing::debug!("Loading status from {}", self.path.display());

        if !self.path.exists() {
            return Visibility::default();
        }

        match fs::read_to_string(&self.path) {
            Ok(contents) => Visibility::from_persisted(&contents),
            Err(e) => {
                tracing::warn!("Failed to read status file, using offline: {}", e);
                Visibility::default()
            }
        }
    }

    fn save(&self, visibility: Visibility) -> Result<(), RelayError> {
        tracing::debug!("Saving status: {}", visibility);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RelayError::StatusStore(format!("Failed to create data directory: {}", e))
            })?;
        }

        fs::write(&self.path, visibility.as_str())
            .map_err(|e| RelayError::StatusStore(format!("Failed to write status file: {}", e)))
    }
}

/// Keeps the persisted string in memory, with the same reload rules as the file store
#[derive(Default)]
pub struct MemoryStatusStore {
    value: Mutex<Option<String>>,
    saves: Mutex<Vec<Visibility>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: &str) -> Self {
        Self {
            value: Mutex::new(Some(value.to_string())),
            saves: Mutex::new(Vec::new()),
        }
    }

    /// Every value passed to `save`, oldest first
    pub fn saved(&self) -> Vec<Visibility> {
        self.saves.lock().clone()
    }
}

impl StatusStore for MemoryStatusStore {
    fn load(&self) -> Visibility {
        self.value
            .lock()
            .as_deref()
            .map(Visibility::from_persisted)
            .unwrap_or_default()
    }

    fn save(&self, visibility: Visibility) -> Result<(), RelayError> {
        *self.value.lock() = Some(visibility.as_str().to_string());
        self.saves.lock().push(visibility);
        Ok(())
    }
}
