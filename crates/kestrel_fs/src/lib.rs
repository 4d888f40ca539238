//! # Kestrel FileSystem Store
//!
//! A local filesystem [`ObjectStore`] for Kestrel.
//!
//! Each container is a directory under the root and each key a file inside it.
//! Useful for running the executor off-cloud (`--local-store`) and in tests.
//!
//! ## Features
//!
//! * **Atomic Writes**: Uses temporary files and rename operations so a concurrent reader
//!   never sees a half-written object.
//!
//! ## Usage
//!
//! ```no_run
//! use kestrel_fs::FileSystemStore;
//!
//! let store = FileSystemStore::new("./kestrel_data");
//! ```

use bytes::Bytes;
use kestrel_core::prelude::*;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

async fn atomic_write(path: &Path, data: Bytes) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(StorageError::Io)?;
    }

    let tmp_path = path.with_extension("tmp");

    fs::write(&tmp_path, data).await.map_err(StorageError::Io)?;
    fs::rename(&tmp_path, path)
        .await
        .map_err(StorageError::Io)?;

    Ok(())
}

/// Rejects names that would escape the root (`..`, absolute paths, empty).
fn checked(name: &str) -> Result<&str, StorageError> {
    let path = Path::new(name);
    let plain = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

    if plain {
        Ok(name)
    } else {
        Err(StorageError::InvalidRequest(format!("invalid name '{name}'")))
    }
}

#[derive(Clone)]
pub struct FileSystemStore {
    root: PathBuf,
}

impl FileSystemStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { root: path.into() }
    }

    fn container_path(&self, container: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(checked(container)?))
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.container_path(container)?.join(checked(key)?))
    }
}

impl ObjectStore for FileSystemStore {
    async fn ensure_container(&self, container: &str) -> Result<(), StorageError> {
        let path = self.container_path(container)?;
        fs::create_dir_all(&path).await.map_err(StorageError::Io)
    }

    async fn get(&self, container: &str, key: &str) -> Result<Bytes, StorageError> {
        let path = self.object_path(container, key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string_lossy().to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let dir = self.container_path(container)?;
        if !fs::try_exists(&dir).await.map_err(StorageError::Io)? {
            return Err(StorageError::NotFound(dir.to_string_lossy().to_string()));
        }
        atomic_write(&self.object_path(container, key)?, data).await
    }
}
