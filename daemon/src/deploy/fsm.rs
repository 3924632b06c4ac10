//! Finite State Machine for deploy record status

use crate::models::deploy::DeployStatus;

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Executor picked the deployment up
    Start,

    /// All commands succeeded
    Complete,

    /// A command or the work dir failed
    Fail(String),

    /// The execution task died before it could report
    Abort(String),
}

/// Whether a record may move from `from` to `to`.
///
/// Pending -> Running -> {Success | Failed}. Pending -> Failed is only
/// reachable through `Abort`, when the task never got to mark itself running.
pub fn can_transition(from: DeployStatus, to: DeployStatus) -> bool {
    matches!(
        (from, to),
        (DeployStatus::Pending, DeployStatus::Running)
            | (DeployStatus::Running, DeployStatus::Success)
            | (DeployStatus::Running, DeployStatus::Failed)
            | (DeployStatus::Pending, DeployStatus::Failed)
    )
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeployStatus,
    error: Option<String>,
    history: Vec<DeployStatus>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeployStatus::Pending,
            error: None,
            history: vec![DeployStatus::Pending],
        }
    }

    /// Get current state
    pub fn state(&self) -> DeployStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Every state visited so far, in order
    pub fn history(&self) -> &[DeployStatus] {
        &self.history
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeployStatus, String> {
        let new_state = match (&self.state, &event) {
            (DeployStatus::Pending, DeploymentEvent::Start) => DeployStatus::Running,

            (DeployStatus::Running, DeploymentEvent::Complete) => DeployStatus::Success,
            (DeployStatus::Running, DeploymentEvent::Fail(err))
            | (DeployStatus::Running, DeploymentEvent::Abort(err))
            | (DeployStatus::Pending, DeploymentEvent::Abort(err)) => {
                self.error = Some(err.clone());
                DeployStatus::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        self.history.push(new_state);
        Ok(new_state)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
