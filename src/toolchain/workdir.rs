//! Process-private scratch directories, one per unit of work.

use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// Create a fresh directory under `root`.
    pub async fn create(root: &Path) -> std::io::Result<Self> {
        let path = root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Remove the directory. Directories left behind by a crash are harmless.
    pub async fn remove(self) -> std::io::Result<()> {
        tokio::fs::remove_dir_all(&self.path).await
    }
}
