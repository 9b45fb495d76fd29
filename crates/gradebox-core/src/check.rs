//! Check runs on the code host and the code host contract.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    Success,
    Failure,
}

impl Conclusion {
    /// Failure as soon as any stage did not succeed.
    pub fn from_stages(stages: &[Stage]) -> Self {
        if stages.iter().all(Stage::is_success) {
            Conclusion::Success
        } else {
            Conclusion::Failure
        }
    }
}

/// A check run to create for a pushed commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCheckRun {
    pub name: String,
    pub head_sha: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRunOutput {
    pub title: String,
    pub summary: String,
}

/// Partial update of an existing check run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRunUpdate {
    #[serde(skip)]
    pub id: i64,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<Conclusion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<CheckRunOutput>,
}

impl CheckRunUpdate {
    pub fn in_progress(id: i64) -> Self {
        Self {
            id,
            status: CheckStatus::InProgress,
            conclusion: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            output: None,
        }
    }

    pub fn completed(id: i64, conclusion: Conclusion, output: CheckRunOutput) -> Self {
        Self {
            id,
            status: CheckStatus::Completed,
            conclusion: Some(conclusion),
            started_at: None,
            completed_at: Some(Utc::now()),
            output: Some(output),
        }
    }
}

/// Code hosting service: source archives and check runs.
///
/// Every call is authenticated as the given app installation.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn archive(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        commit: &str,
    ) -> Result<Bytes>;

    /// Create a check run and return its id.
    async fn create_check_run(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        check_run: &NewCheckRun,
    ) -> Result<i64>;

    async fn update_check_run(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
        update: &CheckRunUpdate,
    ) -> Result<()>;
}
