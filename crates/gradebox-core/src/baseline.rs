//! Scoring live runs against the stored performance baseline.

use serde::{Deserialize, Serialize};

use crate::run::{Run, RunStatus};

/// What to do when a passing unit test yields no performance data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PerfFailurePolicy {
    /// Leave the run unset so it is reported as a system error.
    #[default]
    SystemError,
    /// Keep the passing unit test and skip the baseline comparison.
    Ignore,
}

/// Thresholds applied when comparing a run to its baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselinePolicy {
    /// Largest accepted `score / baseline_score` ratio.
    pub regression_threshold: f64,
    pub perf_failure: PerfFailurePolicy,
}

impl Default for BaselinePolicy {
    fn default() -> Self {
        Self {
            regression_threshold: 1.2,
            perf_failure: PerfFailurePolicy::SystemError,
        }
    }
}

/// Outcome of comparing one run against its baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Assessment {
    /// Run failed its unit test or carries no measurement.
    NotScored,
    Within { ratio: f64 },
    Regressed { ratio: f64 },
    MissingBaseline,
    /// Passing run without perf data while measurements are required.
    Unmeasured,
}

impl BaselinePolicy {
    /// Compare `run` with `baseline` without modifying either.
    pub fn assess(&self, run: &Run, baseline: Option<&Run>) -> Assessment {
        if !run.status.is_success() {
            return Assessment::NotScored;
        }
        if run.score == 0 {
            return match self.perf_failure {
                PerfFailurePolicy::Ignore => Assessment::NotScored,
                PerfFailurePolicy::SystemError => Assessment::Unmeasured,
            };
        }

        let Some(baseline) = baseline.filter(|b| b.score > 0) else {
            return Assessment::MissingBaseline;
        };

        let ratio = run.score as f64 / baseline.score as f64;
        if ratio > self.regression_threshold {
            Assessment::Regressed { ratio }
        } else {
            Assessment::Within { ratio }
        }
    }

    /// Score `run` in place: writes the percentage into the output and
    /// downgrades the status on regression or missing baseline.
    pub fn apply(&self, run: &mut Run, baseline: Option<&Run>) -> Assessment {
        let assessment = self.assess(run, baseline);
        match assessment {
            Assessment::NotScored => {}
            Assessment::Within { ratio } => {
                append_line(&mut run.output, &performance_line(ratio));
            }
            Assessment::Regressed { ratio } => {
                append_line(&mut run.output, &performance_line(ratio));
                append_line(
                    &mut run.output,
                    &format!(
                        "Performance regression: limit is {:.1}% of baseline",
                        self.regression_threshold * 100.0
                    ),
                );
                run.status = RunStatus::Failure;
            }
            Assessment::MissingBaseline => {
                append_line(
                    &mut run.output,
                    &format!("No performance baseline is available for `{}`", run.test),
                );
                run.status = RunStatus::SystemError;
            }
            Assessment::Unmeasured => {
                append_line(
                    &mut run.output,
                    &format!("No performance data was recorded for `{}`", run.test),
                );
                run.status = RunStatus::SystemError;
            }
        }
        assessment
    }
}

fn performance_line(ratio: f64) -> String {
    format!("Performance: {:.1}% of baseline", ratio * 100.0)
}

fn append_line(output: &mut String, line: &str) {
    if !output.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(line);
}
