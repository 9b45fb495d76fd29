//! Runs: the outcome of executing one test artifact.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;

/// Classification of a run or stage outcome.
///
/// `Failure` means the submitted code failed; `SystemError` means the
/// pipeline itself failed and the student is not at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "failure")]
    Failure,
    #[serde(rename = "exception")]
    SystemError,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::SystemError => "exception",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(RunStatus::Success),
            "failure" => Ok(RunStatus::Failure),
            "exception" => Ok(RunStatus::SystemError),
            _ => Err(format!("unknown run status: {}", s)),
        }
    }
}

/// Result of executing one test artifact, keyed by the artifact's content hash.
///
/// Runs are immutable once stored. A run with `baseline = true` is the
/// reference performance for its test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub hash: String,
    pub test: String,
    pub status: RunStatus,
    #[serde(default)]
    pub output: String,
    /// CPU cycles measured by the perf run; 0 when no measurement was taken.
    #[serde(default)]
    pub score: u64,
    #[serde(default)]
    pub baseline: bool,
}

impl Run {
    pub fn new(hash: impl Into<String>, test: impl Into<String>, status: RunStatus) -> Self {
        Self {
            hash: hash.into(),
            test: test.into(),
            status,
            output: String::new(),
            score: 0,
            baseline: false,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_score(mut self, score: u64) -> Self {
        self.score = score;
        self
    }
}

/// Lookup and storage of previously recorded runs.
#[async_trait]
pub trait ResultLookup: Send + Sync {
    /// Cached runs keyed by artifact hash.
    async fn get_runs(&self, hashes: &[String]) -> Result<HashMap<String, Run>>;

    /// Baseline runs keyed by test name.
    async fn get_baselines(&self, tests: &[String]) -> Result<HashMap<String, Run>>;

    /// Store runs. Existing hashes are left untouched.
    async fn submit_runs(&self, runs: &[Run]) -> Result<()>;
}
