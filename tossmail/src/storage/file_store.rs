use crate::error::{Result, TossmailError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Storage backend for attachment content.
///
/// `save` returns an opaque handle that is persisted on the attachment
/// row and later passed back to `get`/`delete`.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn save(&self, filename: &str, data: &[u8]) -> Result<String>;
    async fn get(&self, stored: &str) -> Result<Vec<u8>>;
    async fn delete(&self, stored: &str) -> Result<()>;
}

/// File store backed by a single local directory.
///
/// Handles are flat filenames under the root; any input that could
/// resolve outside the root is rejected.
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn check_component(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(TossmailError::Storage("Empty filename".to_string()));
        }

        if name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.contains('\0')
            || name.starts_with('.')
        {
            return Err(TossmailError::Storage(format!(
                "Unsafe filename: {}",
                name
            )));
        }

        Ok(())
    }

    fn resolve(&self, stored: &str) -> Result<PathBuf> {
        Self::check_component(stored)?;
        Ok(self.root.join(stored))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(&self, filename: &str, data: &[u8]) -> Result<String> {
        Self::check_component(filename)?;

        fs::create_dir_all(&self.root).await.map_err(|e| {
            TossmailError::Storage(format!(
                "Failed to create directory {:?}: {}",
                self.root, e
            ))
        })?;

        // Unique prefix keeps identically-named attachments apart
        let stored = format!("{}_{}", Uuid::new_v4(), filename);
        let tmp_path = self.root.join(format!("tmp.{}", Uuid::new_v4()));
        let final_path = self.root.join(&stored);

        // Write to a temp name first, rename is atomic
        fs::write(&tmp_path, data).await?;
        if let Err(e) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!("Stored attachment {} ({} bytes)", stored, data.len());

        Ok(stored)
    }

    async fn get(&self, stored: &str) -> Result<Vec<u8>> {
        let path = self.resolve(stored)?;

        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TossmailError::NotFound(
                format!("attachment file {}", stored),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, stored: &str) -> Result<()> {
        let path = self.resolve(stored)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Already gone, nothing to do
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
