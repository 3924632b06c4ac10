//! Command executor integration tests (real subprocesses)
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use pushdeploy::config::DeploymentSpec;
use pushdeploy::deploy::{CommandExecutor, CommandFailure, DeployError, DeployRunner, ExecutorOptions};
use pushdeploy::errors::AppError;
use pushdeploy::models::deploy::{DeployRecord, DeployStatus, DeployUpdate, NewDeploy};
use pushdeploy::store::{DeployStore, SqliteDeployStore};

/// Store wrapper that remembers every status it was asked to write
struct RecordingStore {
    inner: SqliteDeployStore,
    statuses: Mutex<Vec<DeployStatus>>,
}

impl RecordingStore {
    fn new() -> Self {
        Self {
            inner: SqliteDeployStore::open_in_memory().unwrap(),
            statuses: Mutex::new(Vec::new()),
        }
    }

    fn statuses(&self) -> Vec<DeployStatus> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeployStore for RecordingStore {
    async fn insert(&self, deploy: NewDeploy) -> Result<i64, AppError> {
        self.statuses.lock().unwrap().push(DeployStatus::Pending);
        self.inner.insert(deploy).await
    }

    async fn update_status(&self, id: i64, update: DeployUpdate) -> Result<(), AppError> {
        self.statuses.lock().unwrap().push(update.status);
        self.inner.update_status(id, update).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeployRecord>, AppError> {
        self.inner.list(limit).await
    }

    async fn get(&self, id: i64) -> Result<Option<DeployRecord>, AppError> {
        self.inner.get(id).await
    }
}

/// Store that rejects the first `failures` writes of the `running` status
struct LossyStore {
    inner: SqliteDeployStore,
    failures: Mutex<usize>,
}

impl LossyStore {
    fn failing(failures: usize) -> Self {
        Self {
            inner: SqliteDeployStore::open_in_memory().unwrap(),
            failures: Mutex::new(failures),
        }
    }
}

#[async_trait]
impl DeployStore for LossyStore {
    async fn insert(&self, deploy: NewDeploy) -> Result<i64, AppError> {
        self.inner.insert(deploy).await
    }

    async fn update_status(&self, id: i64, update: DeployUpdate) -> Result<(), AppError> {
        if update.status == DeployStatus::Running {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::StorageError("database is locked".to_string()));
            }
        }
        self.inner.update_status(id, update).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeployRecord>, AppError> {
        self.inner.list(limit).await
    }

    async fn get(&self, id: i64) -> Result<Option<DeployRecord>, AppError> {
        self.inner.get(id).await
    }
}

async fn lossy_setup(failures: usize) -> (Arc<LossyStore>, CommandExecutor, i64) {
    let store = Arc::new(LossyStore::failing(failures));
    let id = store
        .insert(NewDeploy::triggered_by("acme/site", "main", "abc123", "dev"))
        .await
        .unwrap();
    let executor = CommandExecutor::new(
        store.clone(),
        ExecutorOptions {
            command_timeout: Duration::from_secs(10),
        },
    );
    (store, executor, id)
}

fn spec(work_dir: &Path, commands: &[&str]) -> DeploymentSpec {
    DeploymentSpec {
        name: "site".to_string(),
        repository: "acme/site".to_string(),
        branch: "main".to_string(),
        work_dir: work_dir.to_path_buf(),
        commands: commands.iter().map(|c| c.to_string()).collect(),
    }
}

async fn setup(timeout: Duration) -> (Arc<RecordingStore>, CommandExecutor, i64) {
    let store = Arc::new(RecordingStore::new());
    let id = store
        .insert(NewDeploy::triggered_by("acme/site", "main", "abc123", "dev"))
        .await
        .unwrap();
    let executor = CommandExecutor::new(
        store.clone(),
        ExecutorOptions {
            command_timeout: timeout,
        },
    );
    (store, executor, id)
}

async fn record(store: &RecordingStore, id: i64) -> DeployRecord {
    store.get(id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_failing_step_stops_the_sequence() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = setup(Duration::from_secs(10)).await;

    let result = executor
        .execute(id, &spec(tmp.path(), &["echo a", "false", "echo b"]))
        .await;

    match result {
        Err(DeployError::Command { command, cause, .. }) => {
            assert_eq!(command, "false");
            assert!(matches!(cause, CommandFailure::Exit(_)));
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let record = record(&store, id).await;
    assert_eq!(record.status, DeployStatus::Failed);
    assert!(record.end_time.is_some());
    assert!(record.error.unwrap().starts_with("command failed: false\n"));

    assert!(record.output.contains(">>> Step 1: echo a\n"));
    assert!(record.output.contains("OK: echo a\n"));
    assert!(record.output.contains(">>> Step 2: false\n"));
    assert!(record.output.contains("FAILED: false\n"));
    assert!(!record.output.contains("Step 3"));
    assert!(!record.output.contains("echo b"));
    assert!(!record.output.contains("=== Deployment complete ==="));

    assert_eq!(
        store.statuses(),
        vec![DeployStatus::Pending, DeployStatus::Running, DeployStatus::Failed]
    );
}

#[tokio::test]
async fn test_empty_command_list_succeeds() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = setup(Duration::from_secs(10)).await;

    executor.execute(id, &spec(tmp.path(), &[])).await.unwrap();

    let record = record(&store, id).await;
    assert_eq!(record.status, DeployStatus::Success);
    assert!(record.end_time.is_some());
    assert_eq!(
        record.output,
        format!(
            "=== Starting deployment site ===\nWorking directory: {}\n=== Deployment complete ===\n",
            tmp.path().display()
        )
    );
    assert_eq!(
        store.statuses(),
        vec![DeployStatus::Pending, DeployStatus::Running, DeployStatus::Success]
    );
}

#[tokio::test]
async fn test_output_is_captured_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = setup(Duration::from_secs(10)).await;

    executor
        .execute(id, &spec(tmp.path(), &["echo first", "echo second"]))
        .await
        .unwrap();

    let output = record(&store, id).await.output;
    let first = output.find("first\n").unwrap();
    let second = output.find("second\n").unwrap();
    assert!(first < second);
    assert!(output.ends_with("OK: echo second\n\n=== Deployment complete ===\n"));
}

#[tokio::test]
async fn test_commands_run_in_work_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = setup(Duration::from_secs(10)).await;

    executor
        .execute(id, &spec(tmp.path(), &["touch marker", "pwd"]))
        .await
        .unwrap();

    assert!(tmp.path().join("marker").exists());
    let canonical = tmp.path().canonicalize().unwrap();
    let output = record(&store, id).await.output;
    assert!(
        output.contains(&format!("{}\n", canonical.display()))
            || output.contains(&format!("{}\n", tmp.path().display()))
    );
}

#[tokio::test]
async fn test_invalid_work_dir_fails_without_running() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("does-not-exist");
    let (store, executor, id) = setup(Duration::from_secs(10)).await;

    let result = executor.execute(id, &spec(&missing, &["touch x"])).await;
    assert!(matches!(result, Err(DeployError::Directory(_))));

    let record = record(&store, id).await;
    assert_eq!(record.status, DeployStatus::Failed);
    assert!(record.error.unwrap().contains("cannot use working directory"));
    assert!(!record.output.contains(">>> Step"));
    assert!(!missing.exists());
}

#[tokio::test]
async fn test_file_as_work_dir_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("plain.txt");
    std::fs::write(&file, "x").unwrap();
    let (_store, executor, id) = setup(Duration::from_secs(10)).await;

    let result = executor.execute(id, &spec(&file, &["true"])).await;
    assert!(matches!(result, Err(DeployError::Directory(_))));
}

#[tokio::test]
async fn test_process_cwd_is_unchanged() {
    let before = std::env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let missing: PathBuf = tmp.path().join("missing");

    for (dir, commands) in [
        (tmp.path().to_path_buf(), vec!["true"]),
        (tmp.path().to_path_buf(), vec!["true", "false", "true"]),
        (missing, vec!["true"]),
    ] {
        let (_store, executor, id) = setup(Duration::from_secs(10)).await;
        let _ = executor.execute(id, &spec(&dir, &commands)).await;
        assert_eq!(std::env::current_dir().unwrap(), before);
    }
}

#[tokio::test]
async fn test_empty_command_string_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = setup(Duration::from_secs(10)).await;

    let result = executor
        .execute(id, &spec(tmp.path(), &["true", "   "]))
        .await;
    assert!(matches!(
        result,
        Err(DeployError::Command {
            cause: CommandFailure::Empty,
            ..
        })
    ));
    assert_eq!(record(&store, id).await.status, DeployStatus::Failed);
}

#[tokio::test]
async fn test_unknown_program_fails_to_launch() {
    let tmp = tempfile::tempdir().unwrap();
    let (_store, executor, id) = setup(Duration::from_secs(10)).await;

    let result = executor
        .execute(id, &spec(tmp.path(), &["definitely-not-a-real-binary-xyz"]))
        .await;
    assert!(matches!(
        result,
        Err(DeployError::Command {
            cause: CommandFailure::Launch(_),
            ..
        })
    ));
}

#[tokio::test]
async fn test_no_shell_interpretation() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = setup(Duration::from_secs(10)).await;

    executor
        .execute(id, &spec(tmp.path(), &["echo $HOME > out.txt"]))
        .await
        .unwrap();

    assert!(!tmp.path().join("out.txt").exists());
    assert!(record(&store, id)
        .await
        .output
        .contains("$HOME > out.txt\n"));
}

#[tokio::test]
async fn test_stderr_is_part_of_the_error() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = setup(Duration::from_secs(10)).await;

    let result = executor
        .execute(id, &spec(tmp.path(), &["ls no-such-entry"]))
        .await;
    let err = result.unwrap_err().to_string();
    assert!(err.starts_with("command failed: ls no-such-entry\nerror: "));
    assert!(err.contains("no-such-entry"));

    let record = record(&store, id).await;
    assert_eq!(record.error.as_deref(), Some(err.as_str()));
}

#[tokio::test]
async fn test_command_timeout_kills_and_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = setup(Duration::from_millis(200)).await;

    let started = Instant::now();
    let result = executor
        .execute(id, &spec(tmp.path(), &["sleep 5", "touch after"]))
        .await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(matches!(
        result,
        Err(DeployError::Command {
            cause: CommandFailure::Timeout(_),
            ..
        })
    ));
    assert!(!tmp.path().join("after").exists());
    assert_eq!(record(&store, id).await.status, DeployStatus::Failed);
}

#[tokio::test]
async fn test_deploy_environment_is_set() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = setup(Duration::from_secs(10)).await;

    executor
        .execute(id, &spec(tmp.path(), &["printenv DEPLOY_TIME", "printenv DEPLOY_ID"]))
        .await
        .unwrap();

    let output = record(&store, id).await.output;
    let time_line = output
        .lines()
        .skip_while(|l| !l.starts_with(">>> Step 1"))
        .nth(1)
        .unwrap();
    assert_eq!(time_line.len(), "2026-01-01T00:00:00Z".len());
    assert!(time_line.ends_with('Z'));
    assert!(output.contains(&format!("\n{}\n", id)));
}

#[tokio::test]
async fn test_same_work_dir_runs_one_at_a_time() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(RecordingStore::new());
    let executor = Arc::new(CommandExecutor::new(store.clone(), ExecutorOptions::default()));

    let mut ids = Vec::new();
    for _ in 0..2 {
        ids.push(
            store
                .insert(NewDeploy::triggered_by("acme/site", "main", "abc", "dev"))
                .await
                .unwrap(),
        );
    }

    // Each run fails if it finds the other's lock file.
    let commands = ["test ! -e busy", "touch busy", "sleep 0.3", "rm busy"];
    let mut handles = Vec::new();
    for id in ids.clone() {
        let executor = executor.clone();
        let spec = spec(tmp.path(), &commands);
        handles.push(tokio::spawn(async move { executor.execute(id, &spec).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for id in ids {
        assert_eq!(record(&store, id).await.status, DeployStatus::Success);
    }
}

#[tokio::test]
async fn test_running_write_is_retried_before_completion() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = lossy_setup(1).await;

    executor
        .execute(id, &spec(tmp.path(), &["echo hello"]))
        .await
        .unwrap();

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, DeployStatus::Success);
    assert!(record.end_time.is_some());
    assert!(record.output.contains("hello"));
    assert_eq!(*store.failures.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_lost_running_write_never_leaves_record_pending() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = lossy_setup(usize::MAX).await;

    let result = executor
        .execute(id, &spec(tmp.path(), &["echo hello"]))
        .await;
    assert!(matches!(result, Err(DeployError::Persist(_))));

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, DeployStatus::Failed);
    assert!(record.end_time.is_some());
    assert!(record
        .error
        .unwrap()
        .starts_with("status update lost: Storage error: database is locked"));
    assert!(record.output.contains("hello"));
}

#[tokio::test]
async fn test_lost_running_write_keeps_command_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, executor, id) = lossy_setup(usize::MAX).await;

    let result = executor.execute(id, &spec(tmp.path(), &["false"])).await;
    assert!(matches!(result, Err(DeployError::Command { .. })));

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, DeployStatus::Failed);
    let error = record.error.unwrap();
    assert!(error.starts_with("status update lost"));
    assert!(error.contains("command failed: false"));
}
