//! Supervised background execution of accepted deployments

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{error, info, warn, Instrument};

use crate::config::DeploymentSpec;
use crate::deploy::executor::DeployRunner;
use crate::errors::AppError;
use crate::models::deploy::DeployUpdate;
use crate::notify::DeployNotifier;
use crate::store::DeployStore;

/// Error recorded for deployments cut off by shutdown
pub const SHUTDOWN_ABORT_MESSAGE: &str = "deployment aborted at shutdown";

/// How long an aborted deployment's supervisor gets to record and notify
const ABORT_GRACE: Duration = Duration::from_secs(10);

/// One dispatched deployment
struct InFlight {
    deploy_id: i64,
    execution: AbortHandle,
    supervisor: JoinHandle<()>,
}

/// Hands accepted deployments to the runner without blocking the caller.
///
/// Each deployment runs in its own task, watched by a supervisor task. If the
/// execution task dies the supervisor moves the record to `failed` so no
/// record stays `pending` or `running` forever, then notifies.
pub struct Dispatcher {
    runner: Arc<dyn DeployRunner>,
    store: Arc<dyn DeployStore>,
    notifier: Arc<dyn DeployNotifier>,
    in_flight: Mutex<Vec<InFlight>>,
}

impl Dispatcher {
    pub fn new(
        runner: Arc<dyn DeployRunner>,
        store: Arc<dyn DeployStore>,
        notifier: Arc<dyn DeployNotifier>,
    ) -> Self {
        Self {
            runner,
            store,
            notifier,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Start executing `deploy_id` in the background and return immediately
    pub fn dispatch(&self, deploy_id: i64, spec: DeploymentSpec, commit: String) {
        let runner = self.runner.clone();
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let span = tracing::info_span!("deploy", id = deploy_id, project = %spec.name);

        let execution = {
            let spec = spec.clone();
            tokio::spawn(
                async move { runner.execute(deploy_id, &spec).await }.instrument(span.clone()),
            )
        };
        let abort_handle = execution.abort_handle();

        let supervisor = tokio::spawn(
            async move {
                match execution.await {
                    Ok(Ok(())) => {
                        info!("Deployment {} succeeded", spec.name);
                        notifier.notify_success(&spec, &commit).await;
                    }
                    Ok(Err(e)) => {
                        let message = e.to_string();
                        warn!("Deployment {} failed: {}", spec.name, message);
                        // Normally already terminal; covers a lost status write.
                        mark_failed(store.as_ref(), deploy_id, &message).await;
                        notifier.notify_failure(&spec, &commit, &message).await;
                    }
                    Err(join_err) => {
                        let message = abort_message(join_err);
                        error!("Deploy {}: {}", deploy_id, message);
                        mark_failed(store.as_ref(), deploy_id, &message).await;
                        notifier.notify_failure(&spec, &commit, &message).await;
                    }
                }
            }
            .instrument(span),
        );

        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|d| !d.supervisor.is_finished());
        in_flight.push(InFlight {
            deploy_id,
            execution: abort_handle,
            supervisor,
        });
    }

    /// Number of deployments still running
    pub fn in_flight(&self) -> usize {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.iter().filter(|d| !d.supervisor.is_finished()).count()
    }

    /// Wait up to `timeout` for every dispatched deployment to finish.
    ///
    /// Returns how many were awaited. Deployments still running at the
    /// deadline are aborted (their child processes are killed) and recorded
    /// as failed, and the call returns a `ShutdownError` naming how many.
    pub async fn drain(&self, timeout: Duration) -> Result<usize, AppError> {
        let deployments: Vec<InFlight> = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.drain(..).collect()
        };
        let count = deployments.len();
        if count == 0 {
            return Ok(0);
        }

        info!("Waiting for {} deployment(s) to finish...", count);
        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = 0;

        for InFlight {
            deploy_id,
            execution,
            mut supervisor,
        } in deployments
        {
            if tokio::time::timeout_at(deadline, &mut supervisor).await.is_ok() {
                continue;
            }
            if !execution.is_finished() {
                warn!("Deploy {} still running at shutdown, aborting", deploy_id);
                execution.abort();
                aborted += 1;
            }
            if tokio::time::timeout(ABORT_GRACE, supervisor).await.is_err() {
                warn!("Deploy {} did not record its abort in time", deploy_id);
            }
        }

        if aborted > 0 {
            return Err(AppError::ShutdownError(format!(
                "{} deployment(s) still running after {:?} were aborted",
                aborted, timeout
            )));
        }
        Ok(count)
    }
}

/// Move a record that is not yet terminal to `failed`, keeping whatever
/// transcript it had
async fn mark_failed(store: &dyn DeployStore, deploy_id: i64, message: &str) {
    let record = match store.get(deploy_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!("Consistency warning: deploy {} has no record", deploy_id);
            return;
        }
        Err(e) => {
            warn!("Consistency warning: cannot read deploy {}: {}", deploy_id, e);
            return;
        }
    };
    if record.status.is_terminal() {
        return;
    }

    let update = DeployUpdate::failed(record.output, message.to_string());
    if let Err(e) = store.update_status(deploy_id, update).await {
        warn!(
            "Consistency warning: deploy {} could not be marked failed: {}",
            deploy_id, e
        );
    }
}

fn abort_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return SHUTDOWN_ABORT_MESSAGE.to_string();
    }
    if !err.is_panic() {
        return format!("deployment task aborted: {}", err);
    }
    let payload = err.into_panic();
    let reason = if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    };
    format!("deployment task aborted: {}", reason)
}
