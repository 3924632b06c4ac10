//! Deploy record persistence

pub mod sqlite;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::deploy::{DeployRecord, DeployUpdate, NewDeploy};

pub use sqlite::SqliteDeployStore;

/// Storage for deploy records.
///
/// Implementations serialise writes themselves, so an insert from the
/// request path and status updates from execution tasks may run concurrently.
#[async_trait]
pub trait DeployStore: Send + Sync {
    /// Persist a new pending record and return its id
    async fn insert(&self, deploy: NewDeploy) -> Result<i64, AppError>;

    /// Overwrite the mutable fields of a record.
    ///
    /// Fails with `NotFound` for an unknown id and `InvalidTransition` when
    /// the status change would move a record backwards.
    async fn update_status(&self, id: i64, update: DeployUpdate) -> Result<(), AppError>;

    /// Most recent records first, at most `limit`
    async fn list(&self, limit: usize) -> Result<Vec<DeployRecord>, AppError>;

    /// Look up one record
    async fn get(&self, id: i64) -> Result<Option<DeployRecord>, AppError>;
}
