//! GitHub webhook: queues a task for every requested check suite.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::error::ApiError;
use gradebox_core::check::{CheckStatus, NewCheckRun};
use gradebox_core::task::{EnqueueOutcome, EnqueueRequest};

pub fn router() -> Router<AppState> {
    Router::new().route("/github", post(github_webhook))
}

#[derive(Debug, Deserialize)]
struct CheckSuiteEvent {
    action: String,
    check_suite: CheckSuite,
    repository: Repository,
    sender: Account,
    installation: Installation,
}

#[derive(Debug, Deserialize)]
struct CheckSuite {
    head_sha: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    id: i64,
    name: String,
    owner: Account,
}

#[derive(Debug, Deserialize)]
struct Account {
    id: i64,
    login: String,
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: i64,
}

async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    if let Some(secret) = state.settings.webhook_secret.as_deref() {
        let signature = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_github_signature(secret, &body, signature) {
            warn!("Invalid webhook signature");
            return Err(ApiError::Unauthorized(
                "webhook signature is invalid".to_string(),
            ));
        }
    }

    let event = headers
        .get("X-GitHub-Event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    if event != "check_suite" {
        info!(event = %event, "Ignoring webhook event");
        return Ok(StatusCode::NO_CONTENT);
    }

    let payload: CheckSuiteEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid input: {}", e)))?;
    if payload.action != "requested" && payload.action != "rerequested" {
        return Ok(StatusCode::NO_CONTENT);
    }

    let user = state
        .users
        .find_by_github(payload.sender.id, payload.repository.id)
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest(format!(
                "user not found: {} (id={})",
                payload.sender.login, payload.sender.id
            ))
        })?;

    let owner = &payload.repository.owner.login;
    let head_sha = payload.check_suite.head_sha;
    let check_run = NewCheckRun {
        name: state.settings.check_name.clone(),
        head_sha: head_sha.clone(),
        status: CheckStatus::Queued,
        details_url: state
            .settings
            .details_url
            .as_ref()
            .map(|base| format!("{}/commit/{}:{}", base.trim_end_matches('/'), owner, head_sha)),
    };
    let check_run_id = state
        .code_host
        .create_check_run(
            payload.installation.id,
            owner,
            &payload.repository.name,
            &check_run,
        )
        .await?;

    let outcome = state
        .queue
        .enqueue(&EnqueueRequest {
            user_id: user.id,
            commit: head_sha.clone(),
            check_run_id,
        })
        .await?;

    match outcome {
        EnqueueOutcome::Enqueued { task_id, .. } => {
            info!(login = %user.login, commit = %head_sha, task = %task_id, "Task enqueued");
        }
        EnqueueOutcome::Duplicate => {
            info!(login = %user.login, commit = %head_sha, "Commit already queued");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Verify GitHub webhook signature.
fn verify_github_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    // Signature format: "sha256=<hex>"
    let Some(sig_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);

    mac.verify_slice(&sig_bytes).is_ok()
}
