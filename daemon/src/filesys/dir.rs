//! Directory operations

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::errors::AppError;

/// A directory wrapper with path
#[derive(Debug, Clone)]
pub struct Dir {
    path: PathBuf,
}

impl Dir {
    /// Create a new directory reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the directory path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the directory exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Create the directory (and parents)
    pub async fn create(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.path).await?;
        Ok(())
    }

    /// Ensure the path names an existing directory.
    ///
    /// Returns a `DirectoryError` describing why it does not.
    pub async fn require(&self) -> Result<(), AppError> {
        match fs::metadata(&self.path).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(AppError::DirectoryError(format!(
                "{} is not a directory",
                self.path.display()
            ))),
            Err(e) => Err(AppError::DirectoryError(format!(
                "cannot access {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}
