//! Task endpoints for remote runners.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use gradebox_core::task::FinishOutcome;
use gradebox_core::{Stage, TaskId};
use gradebox_scheduler::dispatch;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dequeue", post(dequeue_task))
        .route("/{id}", post(finish_task))
}

/// A claimed task as handed to a runner.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: TaskId,
    /// Echoed back as `?claim=` when reporting results.
    pub claim: Uuid,
    #[serde(rename = "ref")]
    pub reference: String,
    /// Presigned URL of the source archive.
    pub archive: String,
}

/// Claim the oldest task and publish its source archive.
///
/// If the archive cannot be published the task is finished with a system
/// error so it does not stay claimed.
async fn dequeue_task(State(state): State<AppState>) -> Result<Response, ApiError> {
    let Some(task) = state.queue.dequeue().await? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let reference = task.reference();
    info!(task = %reference, id = %task.id, "Task claimed");

    if let Err(e) = dispatch::start_check_run(state.code_host.as_ref(), &task).await {
        warn!(task = %reference, error = %e, "Failed to mark check run in progress");
    }

    let archive = match dispatch::publish_archive(
        state.code_host.as_ref(),
        state.objects.as_ref(),
        &task,
        state.settings.presign_ttl,
    )
    .await
    {
        Ok(url) => url,
        Err(e) => {
            error!(task = %reference, error = %e, "Failed to publish archive");
            let stages = [Stage::system_error(None)];
            let outcome = state.queue.finish(task.id, task.claim_id, &stages).await?;
            if outcome == FinishOutcome::Finished {
                if let Err(e) =
                    dispatch::complete_check_run(state.code_host.as_ref(), &task, &stages).await
                {
                    warn!(task = %reference, error = %e, "Failed to complete check run");
                }
            }
            return Err(e.into());
        }
    };

    Ok(Json(TaskResponse {
        id: task.id,
        claim: task.claim_id,
        reference,
        archive,
    })
    .into_response())
}

#[derive(Debug, Deserialize)]
struct FinishParams {
    claim: Uuid,
}

/// Record the stages of a task and complete its check run.
///
/// Reports from a claim that was since superseded are accepted and dropped.
async fn finish_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<FinishParams>,
    Json(stages): Json<Vec<Stage>>,
) -> Result<StatusCode, ApiError> {
    if stages.is_empty() {
        return Err(ApiError::BadRequest(
            "stage list cannot be empty".to_string(),
        ));
    }

    let task_id = TaskId::from(id);
    let task = state
        .queue
        .get(task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown task: {}", task_id)))?;

    match state.queue.finish(task_id, params.claim, &stages).await? {
        FinishOutcome::Finished => {
            let conclusion =
                dispatch::complete_check_run(state.code_host.as_ref(), &task, &stages).await?;
            info!(task = %task.reference(), ?conclusion, "Task finished");
        }
        outcome => {
            info!(task = %task.reference(), ?outcome, "Results discarded");
        }
    }
    Ok(StatusCode::NO_CONTENT)
}
