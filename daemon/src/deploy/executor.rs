//! Deployment command executor
//!
//! Commands are split on whitespace and spawned directly. No shell is
//! involved, so pipes, redirects, globbing and quoting are passed through as
//! literal arguments. Keep it that way: commit metadata must never reach a
//! shell parser.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::DeploymentSpec;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::deploy::locks::WorkDirLocks;
use crate::errors::AppError;
use crate::filesys::dir::Dir;
use crate::models::deploy::{DeployStatus, DeployUpdate};
use crate::store::DeployStore;

/// Why a single command failed
#[derive(Error, Debug)]
pub enum CommandFailure {
    #[error("empty command")]
    Empty,

    #[error("failed to launch: {0}")]
    Launch(#[source] std::io::Error),

    #[error("{0}")]
    Exit(ExitStatus),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Deployment failure, as persisted and reported to notifiers
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("cannot use working directory: {0}")]
    Directory(String),

    #[error("command failed: {command}\nerror: {cause}\n{stderr}")]
    Command {
        command: String,
        cause: CommandFailure,
        /// All stderr captured up to and including the failing step
        stderr: String,
    },

    /// Commands ran, but the outcome could not be written
    #[error("deployment status could not be saved: {0}")]
    Persist(String),
}

impl From<DeployError> for AppError {
    fn from(err: DeployError) -> Self {
        match err {
            DeployError::Directory(msg) => AppError::DirectoryError(msg),
            err @ DeployError::Command { .. } => AppError::CommandError(err.to_string()),
            DeployError::Persist(msg) => AppError::StorageError(msg),
        }
    }
}

/// Something that can run a deployment to a terminal state
#[async_trait]
pub trait DeployRunner: Send + Sync {
    async fn execute(&self, deploy_id: i64, spec: &DeploymentSpec) -> Result<(), DeployError>;
}

/// Executor options
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Wall clock limit per command
    pub command_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(600),
        }
    }
}

/// Runs a deployment spec's commands and records the outcome
pub struct CommandExecutor {
    store: Arc<dyn DeployStore>,
    options: ExecutorOptions,
    locks: WorkDirLocks,
}

impl CommandExecutor {
    /// Create a new executor
    pub fn new(store: Arc<dyn DeployStore>, options: ExecutorOptions) -> Self {
        Self {
            store,
            options,
            locks: WorkDirLocks::new(),
        }
    }

    async fn run(&self, deploy_id: i64, spec: &DeploymentSpec) -> Result<(), DeployError> {
        // Held until the record is terminal.
        let _work_dir_guard = self.locks.acquire(&spec.work_dir).await;

        let mut fsm = DeploymentFsm::new();
        let running_saved = self.start(deploy_id, &mut fsm).await;

        let mut transcript = Transcript::default();

        if let Err(e) = Dir::new(&spec.work_dir).require().await {
            let err = DeployError::Directory(match e {
                AppError::DirectoryError(msg) => msg,
                other => other.to_string(),
            });
            error!("Deploy {} cannot start: {}", deploy_id, err);
            self.fail(deploy_id, &mut fsm, running_saved, transcript, &err)
                .await;
            return Err(err);
        }

        transcript.start(&spec.name, &spec.work_dir);

        let deploy_time = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let deploy_id_env = deploy_id.to_string();
        let env = [
            ("DEPLOY_TIME", deploy_time.as_str()),
            ("DEPLOY_ID", deploy_id_env.as_str()),
        ];
        let mut stderr_log = String::new();

        for (idx, command) in spec.commands.iter().enumerate() {
            let step = idx + 1;
            transcript.step(step, command);
            debug!("Deploy {} step {}: {}", deploy_id, step, command);

            let result = self
                .run_command(command, &spec.work_dir, &env, &mut transcript, &mut stderr_log)
                .await;

            if let Err(cause) = result {
                transcript.failed(command);
                let err = DeployError::Command {
                    command: command.clone(),
                    cause,
                    stderr: stderr_log,
                };
                warn!("Deploy {} failed at step {}: {}", deploy_id, step, command);
                self.fail(deploy_id, &mut fsm, running_saved, transcript, &err)
                    .await;
                return Err(err);
            }

            transcript.succeeded(command);
        }

        transcript.complete();
        self.conclude(
            deploy_id,
            &mut fsm,
            running_saved,
            DeploymentEvent::Complete,
            DeployUpdate::success(transcript.into_string()),
        )
        .await
        .map_err(|e| {
            warn!("Consistency warning: deploy {} finished but: {}", deploy_id, e);
            DeployError::Persist(e.to_string())
        })
    }

    async fn run_command(
        &self,
        command: &str,
        work_dir: &Path,
        env: &[(&str, &str)],
        transcript: &mut Transcript,
        stderr_log: &mut String,
    ) -> Result<(), CommandFailure> {
        let parts: Vec<&str> = command.split_whitespace().collect();
        let (program, args) = parts.split_first().ok_or(CommandFailure::Empty)?;

        let child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(CommandFailure::Launch)?;

        // On timeout the child is dropped, which kills it.
        let output = tokio::time::timeout(self.options.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| CommandFailure::Timeout(self.options.command_timeout))?
            .map_err(CommandFailure::Launch)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        transcript.push_output(&stdout);
        transcript.push_output(&stderr);
        stderr_log.push_str(&stderr);

        if output.status.success() {
            Ok(())
        } else {
            Err(CommandFailure::Exit(output.status))
        }
    }

    async fn fail(
        &self,
        deploy_id: i64,
        fsm: &mut DeploymentFsm,
        running_saved: bool,
        transcript: Transcript,
        err: &DeployError,
    ) {
        let message = err.to_string();
        let update = DeployUpdate::failed(transcript.into_string(), message.clone());
        if let Err(e) = self
            .conclude(deploy_id, fsm, running_saved, DeploymentEvent::Fail(message), update)
            .await
        {
            warn!(
                "Consistency warning: deploy {} could not be marked failed: {}",
                deploy_id, e
            );
        }
    }

    /// Mark the record running. Returns whether the store took the write;
    /// a lost write is logged and repaired in `conclude`.
    async fn start(&self, deploy_id: i64, fsm: &mut DeploymentFsm) -> bool {
        if let Err(e) = fsm.process(DeploymentEvent::Start) {
            error!("Deploy {}: {}", deploy_id, e);
            return false;
        }
        match self.store.update_status(deploy_id, DeployUpdate::running()).await {
            Ok(()) => {
                info!("Deploy {} running", deploy_id);
                true
            }
            Err(e) => {
                warn!(
                    "Consistency warning: deploy {} could not be marked running: {}",
                    deploy_id, e
                );
                false
            }
        }
    }

    /// Persist the terminal state.
    ///
    /// If the running write was lost the record is still pending, which the
    /// store will not move straight to success. The running write is retried
    /// first; if that fails too the record is failed from pending with a
    /// "status update lost" error and the caller gets an error back.
    async fn conclude(
        &self,
        deploy_id: i64,
        fsm: &mut DeploymentFsm,
        running_saved: bool,
        event: DeploymentEvent,
        update: DeployUpdate,
    ) -> Result<(), AppError> {
        fsm.process(event).map_err(AppError::Internal)?;

        if !running_saved {
            match self.store.update_status(deploy_id, DeployUpdate::running()).await {
                Ok(()) => debug!("Deploy {} marked running on retry", deploy_id),
                // The first write did land after all.
                Err(AppError::InvalidTransition {
                    from: DeployStatus::Running,
                    ..
                }) => {}
                Err(e) => {
                    let lost = format!("status update lost: {}", e);
                    let error = match &update.error {
                        Some(cause) => format!("{}\n{}", lost, cause),
                        None => lost.clone(),
                    };
                    self.store
                        .update_status(deploy_id, DeployUpdate::failed(update.output, error))
                        .await?;
                    return Err(AppError::StorageError(lost));
                }
            }
        }

        self.store.update_status(deploy_id, update).await
    }
}

#[async_trait]
impl DeployRunner for CommandExecutor {
    async fn execute(&self, deploy_id: i64, spec: &DeploymentSpec) -> Result<(), DeployError> {
        self.run(deploy_id, spec).await
    }
}

/// Growing, step-annotated output of one deployment
#[derive(Debug, Default)]
struct Transcript {
    text: String,
}

impl Transcript {
    fn start(&mut self, name: &str, work_dir: &Path) {
        self.text
            .push_str(&format!("=== Starting deployment {} ===\n", name));
        self.text
            .push_str(&format!("Working directory: {}\n", work_dir.display()));
    }

    fn step(&mut self, step: usize, command: &str) {
        self.text.push_str(&format!(">>> Step {}: {}\n", step, command));
    }

    fn push_output(&mut self, output: &str) {
        if output.is_empty() {
            return;
        }
        self.text.push_str(output);
        if !output.ends_with('\n') {
            self.text.push('\n');
        }
    }

    fn succeeded(&mut self, command: &str) {
        self.text.push_str(&format!("OK: {}\n\n", command));
    }

    fn failed(&mut self, command: &str) {
        self.text.push_str(&format!("FAILED: {}\n", command));
    }

    fn complete(&mut self) {
        self.text.push_str("=== Deployment complete ===\n");
    }

    fn into_string(self) -> String {
        self.text
    }
}
