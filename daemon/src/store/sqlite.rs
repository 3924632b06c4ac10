//! SQLite-backed deploy store

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::deploy::fsm::can_transition;
use crate::errors::AppError;
use crate::filesys::file::File;
use crate::models::deploy::{DeployRecord, DeployStatus, DeployUpdate, NewDeploy};
use crate::store::DeployStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS deploys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository TEXT NOT NULL,
    branch TEXT NOT NULL,
    "commit" TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    start_time TEXT NOT NULL,
    end_time TEXT,
    output TEXT NOT NULL DEFAULT '',
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_deploys_repository ON deploys(repository);
CREATE INDEX IF NOT EXISTS idx_deploys_status ON deploys(status);
CREATE INDEX IF NOT EXISTS idx_deploys_start_time ON deploys(start_time);
"#;

const SELECT_COLUMNS: &str =
    r#"SELECT id, repository, branch, "commit", status, start_time, end_time, output, error FROM deploys"#;

/// SQLite deploy store.
///
/// A single connection behind a mutex is the write queue; every statement
/// runs on the blocking pool.
#[derive(Clone)]
pub struct SqliteDeployStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDeployStore {
    /// Open (or create) the database file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = File::new(&path).parent() {
            parent.create().await?;
        }

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, AppError> {
            let conn = Connection::open(&path).map_err(|e| {
                AppError::StorageError(format!("open {}: {}", path.display(), e))
            })?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            Ok(conn)
        })
        .await??;

        Self::init(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| AppError::StorageError("deploy store lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl DeployStore for SqliteDeployStore {
    async fn insert(&self, deploy: NewDeploy) -> Result<i64, AppError> {
        self.with_conn(move |conn| {
            conn.execute(
                r#"INSERT INTO deploys (repository, branch, "commit", status, start_time, output)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                params![
                    deploy.repository,
                    deploy.branch,
                    deploy.commit,
                    DeployStatus::Pending.as_str(),
                    format_time(&deploy.start_time),
                    deploy.message,
                ],
            )?;
            let id = conn.last_insert_rowid();
            debug!("Inserted deploy record {}", id);
            Ok(id)
        })
        .await
    }

    async fn update_status(&self, id: i64, update: DeployUpdate) -> Result<(), AppError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let current: Option<String> = tx
                .query_row(
                    "SELECT status FROM deploys WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let current = current.ok_or_else(|| AppError::NotFound(format!("deploy {}", id)))?;
            let current: DeployStatus = current.parse().map_err(AppError::StorageError)?;

            if !can_transition(current, update.status) {
                return Err(AppError::InvalidTransition {
                    id,
                    from: current,
                    to: update.status,
                });
            }

            tx.execute(
                "UPDATE deploys SET status = ?1, end_time = ?2, output = ?3, error = ?4 WHERE id = ?5",
                params![
                    update.status.as_str(),
                    update.end_time.as_ref().map(format_time),
                    update.output,
                    update.error,
                    id,
                ],
            )?;
            tx.commit()?;
            debug!("Deploy record {} moved {} -> {}", id, current, update.status);
            Ok(())
        })
        .await
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeployRecord>, AppError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "{} ORDER BY start_time DESC, id DESC LIMIT ?1",
                SELECT_COLUMNS
            ))?;
            let records = stmt
                .query_map(params![limit], row_to_record)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<Option<DeployRecord>, AppError> {
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                    params![id],
                    row_to_record,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }
}

/// Fixed-width RFC 3339 so that text ordering is chronological
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DeployRecord> {
    let status: String = row.get(4)?;
    let status = status.parse::<DeployStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;
    let start_time: String = row.get(5)?;
    let end_time: Option<String> = row.get(6)?;

    Ok(DeployRecord {
        id: row.get(0)?,
        repository: row.get(1)?,
        branch: row.get(2)?,
        commit: row.get(3)?,
        status,
        start_time: parse_time(5, &start_time)?,
        end_time: end_time.as_deref().map(|t| parse_time(6, t)).transpose()?,
        output: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        error: row.get(8)?,
    })
}
