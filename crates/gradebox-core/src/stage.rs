//! Reportable step outcomes assembled into the check-run summary.

use serde::{Deserialize, Serialize};

use crate::run::{Run, RunStatus};

/// Output shown to students when the pipeline itself failed.
pub const SYSTEM_ERROR_MESSAGE: &str = "System error. Reported to administrators.";

/// One reportable step: a build, a unit test, or a synthetic system error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(default)]
    pub cached: bool,
}

impl Stage {
    pub fn new(name: impl Into<String>, status: RunStatus) -> Self {
        Self {
            name: name.into(),
            status,
            test: None,
            output: String::new(),
            cached: false,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Stage named `<kind>::<test>` mirroring a run.
    pub fn from_run(kind: &str, run: &Run, cached: bool) -> Self {
        Self {
            name: format!("{}::{}", kind, run.test),
            status: run.status,
            test: Some(run.test.clone()),
            output: run.output.clone(),
            cached,
        }
    }

    /// Synthetic system error, either task-wide (`system`) or for one test.
    pub fn system_error(test: Option<&str>) -> Self {
        let name = match test {
            Some(test) => format!("test::{}", test),
            None => "system".to_string(),
        };
        Self {
            name,
            status: RunStatus::SystemError,
            test: test.map(str::to_string),
            output: SYSTEM_ERROR_MESSAGE.to_string(),
            cached: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Test name of a `build::<test>` stage.
    pub fn built_test(&self) -> Option<&str> {
        self.name.strip_prefix("build::").filter(|t| !t.is_empty())
    }
}
