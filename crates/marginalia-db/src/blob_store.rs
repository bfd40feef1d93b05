//! Filesystem blob store.
//!
//! Blobs live flat under the base directory as `{base_path}/{blob_key}`.
//! Writes go to a dot-prefixed temp file that is renamed into place, so a
//! reader never sees a partial blob. Valid keys never start with a dot.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use marginalia_core::{is_valid_blob_key, BlobStore, Error, Result};

const HEALTH_CHECK_KEY: &str = "storage-health-check.bin";

/// Filesystem implementation of [`BlobStore`].
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_path: PathBuf,
    max_blob_size: u64,
}

impl FsBlobStore {
    /// Create a store rooted at `base_path` with a size ceiling in bytes.
    pub fn new(base_path: impl Into<PathBuf>, max_blob_size: u64) -> Self {
        Self {
            base_path: base_path.into(),
            max_blob_size,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        if !is_valid_blob_key(key) {
            return Err(Error::InvalidInput(format!("Invalid blob key: {}", key)));
        }
        Ok(self.base_path.join(key))
    }

    /// Validate that the store can create its directory, write, read and delete.
    ///
    /// Run at startup so permission problems surface before the first upload.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", self.base_path, e))?;

        let data = b"storage-health-check";
        self.put(HEALTH_CHECK_KEY, data)
            .await
            .map_err(|e| format!("write {}: {}", HEALTH_CHECK_KEY, e))?;

        let read_back = self
            .get(HEALTH_CHECK_KEY)
            .await
            .map_err(|e| format!("read {}: {}", HEALTH_CHECK_KEY, e))?;
        if read_back != data {
            return Err("read-back mismatch".to_string());
        }

        self.delete(HEALTH_CHECK_KEY)
            .await
            .map_err(|e| format!("delete {}: {}", HEALTH_CHECK_KEY, e))?;
        Ok(())
    }
}

/// Write `data` to `temp_path`, flush it to disk, then move it to `full_path`.
/// The caller removes the temp file on error.
async fn write_then_rename(
    temp_path: &Path,
    full_path: &Path,
    data: &[u8],
) -> std::io::Result<()> {
    let mut file = fs::File::create(temp_path).await.map_err(|e| {
        warn!(temp_path = %temp_path.display(), error = %e, "File::create failed");
        e
    })?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(temp_path, full_path).await.map_err(|e| {
        warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "rename failed");
        e
    })
}

#[async_trait]
impl BlobStore for FsBlobStore {
    #[instrument(
        skip(self, data),
        fields(subsystem = "blob", component = "fs_blob_store", op = "put", blob_key = %key, size_bytes = data.len())
    )]
    async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let size = data.len() as u64;
        if size > self.max_blob_size {
            return Err(Error::PayloadTooLarge {
                size,
                limit: self.max_blob_size,
            });
        }
        let full_path = self.full_path(key)?;

        fs::create_dir_all(&self.base_path).await.map_err(|e| {
            warn!(base_path = %self.base_path.display(), error = %e, "create_dir_all failed");
            e
        })?;

        let temp_path = self.base_path.join(format!(".{}.tmp", key));
        if let Err(e) = write_then_rename(&temp_path, &full_path, data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        // rw-r--r--, never executable
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        debug!("Blob written");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(key)?;
        match fs::read(full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Blob {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.full_path(key)?;
        match fs::remove_file(full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.full_path(key)?;
        Ok(fs::try_exists(full_path).await?)
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || name == HEALTH_CHECK_KEY {
                continue;
            }
            keys.push(name);
        }
        keys.sort();
        Ok(keys)
    }

    fn max_blob_size(&self) -> u64 {
        self.max_blob_size
    }
}
