//! Webhook payload and HTTP response models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Push event delivered by the source-code host.
///
/// Only the fields the daemon acts on are modelled; everything else in the
/// payload is ignored. All fields default so that a partial payload still
/// decodes and can be rejected with a precise message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref", default)]
    pub git_ref: String,

    #[serde(default)]
    pub repository: Repository,

    /// Absent when the push deletes a branch
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,

    #[serde(default)]
    pub pusher: Pusher,
}

impl PushEvent {
    /// Commit id of the pushed head, if any
    pub fn commit_id(&self) -> Option<&str> {
        self.head_commit
            .as_ref()
            .map(|c| c.id.as_str())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repository {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeadCommit {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitAuthor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pusher {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

/// Response returned once a deployment has been dispatched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployStartedResponse {
    pub message: String,
    pub deploy_id: i64,
    pub repository: String,
    /// Short commit prefix
    pub commit: String,
}

/// Informational response (nothing deployed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// One deployment as exposed by the history endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deploy {
    pub id: i64,
    pub repository: String,
    pub branch: String,
    pub commit: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_time: Option<DateTime<Utc>>,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Deployment history response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploysResponse {
    pub deploys: Vec<Deploy>,
    pub count: usize,
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}
