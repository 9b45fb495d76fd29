//! Task queue contract.
//!
//! A task is one queued grading job for a commit. Tasks move through
//! `enqueued -> executing -> finished`; claiming is atomic and exclusive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stage::Stage;
use crate::{Result, TaskId};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Enqueued,
    Executing,
    Finished,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Enqueued => "enqueued",
            TaskStatus::Executing => "executing",
            TaskStatus::Finished => "finished",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "enqueued" => Ok(TaskStatus::Enqueued),
            "executing" => Ok(TaskStatus::Executing),
            "finished" => Ok(TaskStatus::Finished),
            _ => Err(format!("unknown task status: {}", s)),
        }
    }
}

/// A commit that needs testing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub user_id: i64,
    pub commit: String,
    pub check_run_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A task is waiting for this commit.
    Enqueued { task_id: TaskId, commit_id: i64 },
    /// The commit is already queued with the same check run.
    Duplicate,
}

/// A task claimed by a runner, joined with its commit metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedTask {
    pub id: TaskId,
    /// Fresh on every claim; a finish must present the current one.
    pub claim_id: Uuid,
    pub commit_id: i64,
    pub login: String,
    pub repository: String,
    pub commit: String,
    pub installation_id: i64,
    pub check_run_id: i64,
}

impl ClaimedTask {
    /// Short human-readable reference, e.g. `alice:abc12345`.
    pub fn reference(&self) -> String {
        let short = self.commit.get(..8).unwrap_or(&self.commit);
        format!("{}:{}", self.login, short)
    }

    /// Object storage key for the source archive.
    pub fn archive_key(&self) -> String {
        format!("{}/{}/{}.zip", self.login, self.repository, self.commit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// Results stored, commit marked checked, task finished.
    Finished,
    /// The commit was already checked; nothing was written.
    AlreadyChecked,
    /// The task was re-enqueued or claimed again since this claim; results
    /// discarded.
    Superseded,
}

/// Durable, concurrency-safe queue of grading tasks.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Queue a commit for testing, invalidating earlier results for it.
    async fn enqueue(&self, request: &EnqueueRequest) -> Result<EnqueueOutcome>;

    /// Claim the oldest eligible task. `None` means there is nothing to do.
    async fn dequeue(&self) -> Result<Option<ClaimedTask>>;

    /// Task metadata regardless of status.
    async fn get(&self, task_id: TaskId) -> Result<Option<ClaimedTask>>;

    /// Record the stages of a claimed task and mark it finished.
    ///
    /// A `claim_id` other than the task's latest claim is `Superseded`.
    async fn finish(
        &self,
        task_id: TaskId,
        claim_id: Uuid,
        stages: &[Stage],
    ) -> Result<FinishOutcome>;
}
