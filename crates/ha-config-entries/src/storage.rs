//! JSON persistence under `<config_dir>/.storage/`
//!
//! Each key is one file wrapping its payload with version information:
//!
//! ```json
//! {
//!   "version": 1,
//!   "minor_version": 1,
//!   "key": "core.config_entries",
//!   "data": { ... }
//! }
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage file wrapper with version tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    pub version: u32,
    pub minor_version: u32,
    pub key: String,
    pub data: T,
}

/// Types persisted under a fixed storage key
pub trait Storable: Serialize + DeserializeOwned {
    const KEY: &'static str;
    const VERSION: u32;
    const MINOR_VERSION: u32;

    fn into_storage_file(self) -> StorageFile<Self> {
        StorageFile {
            version: Self::VERSION,
            minor_version: Self::MINOR_VERSION,
            key: Self::KEY.to_string(),
            data: self,
        }
    }
}

/// Handle on the `.storage/` directory
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    /// Create a storage handle for a config directory
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Load the stored value for `T`, or `None` if it was never saved.
    pub async fn load<T: Storable>(&self) -> StorageResult<Option<StorageFile<T>>> {
        let path = self.file_path(T::KEY);

        if !fs::try_exists(&path).await? {
            debug!(key = T::KEY, "Storage file not found");
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let storage_file: StorageFile<T> = serde_json::from_str(&content)?;

        debug!(
            key = T::KEY,
            version = storage_file.version,
            minor_version = storage_file.minor_version,
            "Loaded storage file"
        );

        Ok(Some(storage_file))
    }

    /// Save a value, writing to a temp file first and renaming it into place.
    pub async fn save<T: Storable>(&self, value: T) -> StorageResult<()> {
        fs::create_dir_all(&self.storage_dir).await?;

        let storage_file = value.into_storage_file();
        let path = self.file_path(T::KEY);
        let temp_path = self.file_path(&format!("{}.tmp", T::KEY));

        let content = serde_json::to_string_pretty(&storage_file)?;
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(key = T::KEY, "Saved storage file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        hosts: Vec<String>,
    }

    impl Storable for Sample {
        const KEY: &'static str = "test.sample";
        const VERSION: u32 = 2;
        const MINOR_VERSION: u32 = 1;
    }

    #[tokio::test]
    async fn test_missing_key_loads_none() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());

        assert!(storage.load::<Sample>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_writes_versioned_envelope() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());

        let sample = Sample {
            hosts: vec!["ups.lan".into()],
        };
        storage.save(sample.clone()).await.unwrap();

        let raw = std::fs::read_to_string(storage.storage_dir().join("test.sample")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["version"], 2);
        assert_eq!(json["key"], "test.sample");

        let loaded = storage.load::<Sample>().await.unwrap().unwrap();
        assert_eq!(loaded.data, sample);
        assert!(!storage.storage_dir().join("test.sample.tmp").exists());
    }
}
