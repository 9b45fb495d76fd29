//! Steps shared by the in-process runner and the HTTP task endpoints.

use crate::report;
use gradebox_core::check::{CheckRunOutput, CheckRunUpdate, CodeHost, Conclusion};
use gradebox_core::storage::ObjectStore;
use gradebox_core::task::ClaimedTask;
use gradebox_core::{Result, Stage};
use std::time::Duration;
use tracing::{error, info};

/// Copy the commit's source archive to object storage and return a
/// presigned download URL for the builder.
pub async fn publish_archive(
    code_host: &dyn CodeHost,
    objects: &dyn ObjectStore,
    task: &ClaimedTask,
    ttl: Duration,
) -> Result<String> {
    let archive = code_host
        .archive(task.installation_id, &task.login, &task.repository, &task.commit)
        .await?;

    let key = task.archive_key();
    info!(task = %task.reference(), key = %key, bytes = archive.len(), "Uploading archive");
    objects.upload(&key, archive).await?;
    objects.presigned_url(&key, ttl).await
}

pub async fn start_check_run(code_host: &dyn CodeHost, task: &ClaimedTask) -> Result<()> {
    let update = CheckRunUpdate::in_progress(task.check_run_id);
    code_host
        .update_check_run(task.installation_id, &task.login, &task.repository, &update)
        .await
}

/// Publish the final conclusion and rendered summary for `stages`.
pub async fn complete_check_run(
    code_host: &dyn CodeHost,
    task: &ClaimedTask,
    stages: &[Stage],
) -> Result<Conclusion> {
    let conclusion = Conclusion::from_stages(stages);
    let output = report::check_run_output(stages).unwrap_or_else(|e| {
        error!(task = %task.reference(), error = %e, "Failed to render summary");
        CheckRunOutput {
            title: report::title(stages),
            summary: String::new(),
        }
    });
    let update = CheckRunUpdate::completed(task.check_run_id, conclusion, output);
    code_host
        .update_check_run(task.installation_id, &task.login, &task.repository, &update)
        .await?;
    Ok(conclusion)
}
