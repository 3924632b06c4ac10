//! Deployment record models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a deploy record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    /// Recorded, waiting for the executor
    Pending,

    /// Commands are executing
    Running,

    /// Every command succeeded
    Success,

    /// A command failed or the deployment was aborted
    Failed,
}

impl DeployStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Pending => "pending",
            DeployStatus::Running => "running",
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
        }
    }

    /// Success and failed are terminal; no further transitions occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployStatus::Success | DeployStatus::Failed)
    }
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeployStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeployStatus::Pending),
            "running" => Ok(DeployStatus::Running),
            "success" => Ok(DeployStatus::Success),
            "failed" => Ok(DeployStatus::Failed),
            other => Err(format!("Unknown deploy status: {}", other)),
        }
    }
}

/// A persisted deployment attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRecord {
    pub id: i64,
    pub repository: String,
    pub branch: String,
    /// Full commit hash
    pub commit: String,
    pub status: DeployStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Captured transcript
    pub output: String,
    pub error: Option<String>,
}

/// Values for a freshly triggered deployment
#[derive(Debug, Clone)]
pub struct NewDeploy {
    pub repository: String,
    pub branch: String,
    pub commit: String,
    pub start_time: DateTime<Utc>,
    /// Initial output line, e.g. who triggered the push
    pub message: String,
}

impl NewDeploy {
    pub fn triggered_by(
        repository: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
        pusher: &str,
    ) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            commit: commit.into(),
            start_time: Utc::now(),
            message: format!("Triggered by push from {}", pusher),
        }
    }
}

/// Mutable fields written on each status transition
#[derive(Debug, Clone)]
pub struct DeployUpdate {
    pub status: DeployStatus,
    pub end_time: Option<DateTime<Utc>>,
    pub output: String,
    pub error: Option<String>,
}

impl DeployUpdate {
    pub fn running() -> Self {
        Self {
            status: DeployStatus::Running,
            end_time: None,
            output: String::new(),
            error: None,
        }
    }

    pub fn success(output: String) -> Self {
        Self {
            status: DeployStatus::Success,
            end_time: Some(Utc::now()),
            output,
            error: None,
        }
    }

    pub fn failed(output: String, error: String) -> Self {
        Self {
            status: DeployStatus::Failed,
            end_time: Some(Utc::now()),
            output,
            error: Some(error),
        }
    }
}

impl From<DeployRecord> for api_models::Deploy {
    fn from(record: DeployRecord) -> Self {
        api_models::Deploy {
            id: record.id,
            repository: record.repository,
            branch: record.branch,
            commit: record.commit,
            status: record.status.to_string(),
            start_time: record.start_time,
            end_time: record.end_time,
            output: record.output,
            error: record.error,
        }
    }
}
