//! Per-working-directory mutual exclusion

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// One async lock per working directory.
///
/// Deployments sharing a directory run one after another; different
/// directories proceed in parallel.
#[derive(Debug, Default)]
pub struct WorkDirLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkDirLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `dir`
    pub async fn acquire(&self, dir: &Path) -> OwnedMutexGuard<()> {
        let key = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };

        if let Ok(guard) = lock.clone().try_lock_owned() {
            return guard;
        }
        debug!("Waiting for another deployment in {}", key.display());
        lock.lock_owned().await
    }
}
