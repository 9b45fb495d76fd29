//! Sandbox contract: isolated build, unit-test and perf invocations.
//!
//! Every invocation separates three failure kinds. A launch failure is a
//! system fault, a non-zero exit is a grading outcome, and malformed output
//! is a tooling bug.

use async_trait::async_trait;

use crate::catalog::Test;
use crate::run::RunStatus;
use crate::scratch::ScratchDir;
use crate::stage::Stage;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("sandbox could not be launched: {0}")]
    Launch(String),

    #[error("sandbox exited with code {code:?}: {output}")]
    Exit { code: Option<i64>, output: String },

    #[error("malformed sandbox output: {0}")]
    Malformed(String),

    #[error("perf data not found")]
    NoPerfData,

    #[error("scratch directory error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    /// Whether the failure lies with the pipeline rather than the submission.
    pub fn is_system(&self) -> bool {
        !matches!(self, SandboxError::Exit { .. })
    }
}

impl From<SandboxError> for crate::Error {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Io(e) => crate::Error::Io(e),
            other => crate::Error::ExecutionFailed(other.to_string()),
        }
    }
}

/// Normalized outcome of a test build. Always carries at least one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub exit_code: Option<i64>,
    pub stages: Vec<Stage>,
}

impl BuildReport {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && self.stages.iter().all(Stage::is_success)
    }
}

/// Outcome of a unit-test invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitResult {
    pub status: RunStatus,
    pub output: String,
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Refresh the builder and runner images.
    async fn pull_images(&self) -> Result<(), SandboxError>;

    /// Fetch and compile the archive at `archive_url` into `scratch`.
    ///
    /// Never fails: every failure kind is folded into the report's stages.
    async fn build_tests(&self, archive_url: &str, scratch: &mut ScratchDir) -> BuildReport;

    /// Run the unit tests of the artifact isolated in `scratch`.
    async fn run_unit_test(
        &self,
        test: &str,
        scratch: &ScratchDir,
    ) -> Result<UnitResult, SandboxError>;

    /// Measure CPU cycles of the artifact isolated in `scratch`.
    async fn run_perf(&self, test: &str, scratch: &ScratchDir) -> Result<u64, SandboxError>;

    /// Build the reference solutions into `scratch`.
    async fn build_baseline(&self, scratch: &mut ScratchDir) -> Result<(), SandboxError>;

    /// Describe the course's tests.
    async fn build_meta(&self) -> Result<Vec<Test>, SandboxError>;

    /// Render course documentation.
    async fn build_docs(&self, web_url: &str, docs_url: &str) -> Result<(), SandboxError>;
}
