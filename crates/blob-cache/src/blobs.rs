//! On-disk blob files, one directory per namespace
//!
//! File names are random UUIDs and never derived from cache keys. Every
//! delete is idempotent: a missing file or directory is not an error.

use crate::error::Result;
use crate::namespace::Namespace;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub fn namespace_dir(&self, namespace: &Namespace) -> PathBuf {
        self.root.join(namespace.as_str())
    }

    pub fn path(&self, namespace: &Namespace, blob_id: &str) -> PathBuf {
        self.namespace_dir(namespace).join(blob_id)
    }

    /// Durably write `data` to a new blob and return its id.
    ///
    /// The data goes to `<id>.tmp` first and is renamed into place after
    /// fsync, so a blob path never names a partially written file.
    pub async fn write(&self, namespace: &Namespace, data: &[u8]) -> Result<String> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir).await?;

        let blob_id = Uuid::new_v4().to_string();
        let final_path = dir.join(&blob_id);
        let tmp_path = dir.join(format!("{}.tmp", blob_id));

        if let Err(e) = write_synced(&tmp_path, data).await {
            remove_file_quietly(&tmp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            remove_file_quietly(&tmp_path).await;
            return Err(e.into());
        }

        debug!(namespace = %namespace, blob_id = %blob_id, size = data.len(), "Wrote blob");
        Ok(blob_id)
    }

    /// Open a blob for reading. `None` if the file does not exist.
    pub async fn open(
        &self,
        namespace: &Namespace,
        blob_id: &str,
    ) -> Result<Option<(fs::File, u64)>> {
        let path = self.path(namespace, blob_id);
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        Ok(Some((file, len)))
    }

    pub async fn delete(&self, namespace: &Namespace, blob_id: &str) -> Result<()> {
        match fs::remove_file(self.path(namespace, blob_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_namespace(&self, namespace: &Namespace) -> Result<()> {
        remove_dir_all_idempotent(&self.namespace_dir(namespace)).await
    }

    /// Remove every blob in every namespace, then recreate the empty root.
    pub async fn delete_all(&self) -> Result<()> {
        if let Err(e) = remove_dir_all_idempotent(&self.root).await {
            warn!(root = ?self.root, error = %e, "Failed to remove blob root");
        }
        self.ensure_root().await
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = ?path, error = %e, "Failed to remove temporary blob file");
        }
    }
}

async fn remove_dir_all_idempotent(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
