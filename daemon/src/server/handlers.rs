//! HTTP request handlers

use std::sync::Arc;

use api_models::{
    DeployStartedResponse, DeploysResponse, ErrorResponse, HealthResponse, MessageResponse,
    PushEvent, VersionResponse,
};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use secrecy::ExposeSecret;
use tracing::{error, info, warn, Instrument};

use crate::errors::AppError;
use crate::models::deploy::NewDeploy;
use crate::server::state::ServerState;
use crate::utils::{generate_uuid, short_commit, version_info};
use crate::webhook::{match_deployment, verify_signature, DELIVERY_HEADER, SIGNATURE_HEADER};

/// Most records returned by the history endpoint
pub const DEPLOYS_LIMIT: usize = 50;

/// Error rendered as `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match &err {
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

fn informational(message: impl Into<String>) -> Response {
    (
        StatusCode::OK,
        Json(MessageResponse {
            message: message.into(),
        }),
    )
        .into_response()
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "pushdeploy".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Push webhook handler.
///
/// received -> verified -> matched -> recorded -> dispatched. Every step
/// before "recorded" can short-circuit without side effects; once a record
/// exists the deployment runs in the background and this returns at once.
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let delivery = headers
        .get(DELIVERY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(generate_uuid);
    let span = tracing::info_span!("webhook", delivery = %delivery);

    match handle_push(&state, &headers, body).instrument(span).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle_push(
    state: &ServerState,
    headers: &HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = body.map_err(|e| {
        warn!("Failed to read webhook body: {}", e);
        ApiError::new(StatusCode::BAD_REQUEST, "failed to read body")
    })?;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let secret = state.config.webhook.secret.expose_secret().as_bytes();
    if !verify_signature(secret, &body, signature) {
        warn!("Rejected webhook with invalid signature");
        return Err(AppError::AuthError("invalid signature".into()).into());
    }

    let event: PushEvent = serde_json::from_slice(&body).map_err(|e| {
        warn!("Invalid webhook payload: {}", e);
        ApiError::new(StatusCode::BAD_REQUEST, "invalid JSON")
    })?;
    if event.repository.full_name.is_empty() || event.git_ref.is_empty() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "payload is missing repository.full_name or ref",
        ));
    }

    let spec = match match_deployment(&state.config, &event) {
        Ok(spec) => spec,
        Err(AppError::NotConfigured(message)) => {
            info!(
                "Ignoring push to {} {}: {}",
                event.repository.full_name, event.git_ref, message
            );
            return Ok(informational(message));
        }
        Err(e) => return Err(e.into()),
    };

    let Some(commit) = event.commit_id() else {
        info!("Push to {} has no head commit", event.git_ref);
        return Ok(informational("no head commit; nothing to deploy"));
    };

    let new_deploy = NewDeploy::triggered_by(
        &spec.repository,
        &spec.branch,
        commit,
        &event.pusher.name,
    );
    let deploy_id = state.store.insert(new_deploy).await.map_err(|e| {
        error!("Failed to create deploy record: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to create deploy record")
    })?;

    info!(
        "Deploy {} created for {} at {}",
        deploy_id,
        spec.name,
        short_commit(commit)
    );
    state
        .dispatcher
        .dispatch(deploy_id, spec.clone(), commit.to_string());

    Ok(Json(DeployStartedResponse {
        message: "deployment started".to_string(),
        deploy_id,
        repository: spec.repository.clone(),
        commit: short_commit(commit).to_string(),
    })
    .into_response())
}

/// Deployment history handler
pub async fn deploys_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<DeploysResponse>, ApiError> {
    let records = state.store.list(DEPLOYS_LIMIT).await.map_err(|e| {
        error!("Failed to list deploys: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to get deploys")
    })?;

    let deploys: Vec<api_models::Deploy> = records.into_iter().map(Into::into).collect();
    let count = deploys.len();
    Ok(Json(DeploysResponse { deploys, count }))
}
