//! Push event to deployment spec matching

use api_models::PushEvent;

use crate::config::{Config, DeploymentSpec};
use crate::errors::AppError;

pub const REPOSITORY_NOT_CONFIGURED: &str = "repository not configured for deployment";
pub const BRANCH_NOT_CONFIGURED: &str = "branch not configured for deployment";

/// Find the deployment a push should trigger.
///
/// The repository must be configured and the push ref must be exactly
/// `refs/heads/<branch>`. Both misses are `NotConfigured`, which the HTTP
/// layer reports as an informational 200.
pub fn match_deployment<'a>(
    config: &'a Config,
    event: &PushEvent,
) -> Result<&'a DeploymentSpec, AppError> {
    let spec = config
        .find_deployment(&event.repository.full_name)
        .ok_or_else(|| AppError::NotConfigured(REPOSITORY_NOT_CONFIGURED.to_string()))?;

    if !spec.matches_ref(&event.git_ref) {
        return Err(AppError::NotConfigured(BRANCH_NOT_CONFIGURED.to_string()));
    }
    Ok(spec)
}
