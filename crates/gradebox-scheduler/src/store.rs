//! Artifact store: resolves built test artifacts to runs.
//!
//! Artifacts whose hash is already in the run cache are never executed.
//! The rest are isolated one at a time into the scratch directory, unit
//! tested and, when they pass, measured with perf. Grading runs are scored
//! against the test's baseline when stages are assembled.

use gradebox_core::baseline::{Assessment, BaselinePolicy, PerfFailurePolicy};
use gradebox_core::run::{ResultLookup, Run, RunStatus};
use gradebox_core::sandbox::Sandbox;
use gradebox_core::scratch::{BuiltArtifact, ScratchDir};
use gradebox_core::{Result, Stage};
use std::collections::HashMap;
use tracing::{error, info, warn};

/// What the store is executing for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Student submission, scored against baselines.
    Grading,
    /// Reference solutions that become the new baselines.
    Baseline,
}

/// How an artifact got its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSource {
    /// Found in the run cache.
    Cache,
    /// Same hash as an artifact executed earlier in this batch.
    Batch,
    /// Executed in the sandbox.
    Fresh,
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub test: String,
    pub hash: String,
    built: BuiltArtifact,
    cached: Option<Run>,
    baseline: Option<Run>,
    run: Option<(Run, RunSource)>,
}

impl Artifact {
    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    pub fn run(&self) -> Option<&Run> {
        self.run.as_ref().map(|(run, _)| run)
    }

    pub fn source(&self) -> Option<RunSource> {
        self.run.as_ref().map(|(_, source)| *source)
    }

    fn short_hash(&self) -> &str {
        self.hash.get(..16).unwrap_or(&self.hash)
    }
}

pub struct ArtifactStore {
    reference: String,
    mode: StoreMode,
    artifacts: Vec<Artifact>,
}

impl ArtifactStore {
    /// Look up cached runs for every artifact and, when grading, the
    /// baselines of their tests.
    pub async fn prepare(
        reference: impl Into<String>,
        built: Vec<BuiltArtifact>,
        lookup: &dyn ResultLookup,
        mode: StoreMode,
    ) -> Result<Self> {
        let reference = reference.into();
        let hashes: Vec<String> = built.iter().map(|a| a.hash.clone()).collect();
        let cached = if hashes.is_empty() {
            HashMap::new()
        } else {
            lookup.get_runs(&hashes).await?
        };

        let baselines = match mode {
            StoreMode::Grading if !built.is_empty() => {
                let tests: Vec<String> = built.iter().map(|a| a.test.clone()).collect();
                lookup.get_baselines(&tests).await?
            }
            _ => HashMap::new(),
        };

        let artifacts = built
            .into_iter()
            .map(|built| {
                // A cache entry may have been stored under another test name.
                let cached = cached.get(&built.hash).cloned().map(|mut run| {
                    run.test = built.test.clone();
                    run.baseline = false;
                    run
                });
                let baseline = baselines.get(&built.test).cloned();
                Artifact {
                    test: built.test.clone(),
                    hash: built.hash.clone(),
                    built,
                    cached,
                    baseline,
                    run: None,
                }
            })
            .collect();

        Ok(Self {
            reference,
            mode,
            artifacts,
        })
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Whether the artifact built for `test` was served from the cache.
    pub fn is_cached(&self, test: &str) -> bool {
        self.artifacts
            .iter()
            .any(|a| a.test == test && a.is_cached())
    }

    /// Produce a run for every artifact.
    ///
    /// Sandbox failures are logged and leave the artifact without a run.
    pub async fn execute(
        &mut self,
        sandbox: &dyn Sandbox,
        scratch: &mut ScratchDir,
        policy: &BaselinePolicy,
    ) {
        let ignore_perf = self.mode == StoreMode::Grading
            && policy.perf_failure == PerfFailurePolicy::Ignore;
        let mut executed: HashMap<String, Run> = HashMap::new();

        for artifact in &mut self.artifacts {
            if let Some(cached) = &artifact.cached {
                info!(
                    task = %self.reference,
                    test = %artifact.test,
                    hash = %artifact.short_hash(),
                    "Using cached run"
                );
                artifact.run = Some((cached.clone(), RunSource::Cache));
                continue;
            }

            if let Some(run) = executed.get(&artifact.hash) {
                let mut run = run.clone();
                run.test = artifact.test.clone();
                artifact.run = Some((run, RunSource::Batch));
                continue;
            }

            let Some(run) =
                Self::run_live(&self.reference, artifact, sandbox, scratch, ignore_perf).await
            else {
                continue;
            };
            executed.insert(artifact.hash.clone(), run.clone());
            artifact.run = Some((run, RunSource::Fresh));
        }

        if let Err(e) = scratch.clear() {
            warn!(task = %self.reference, error = %e, "Failed to clear scratch directory");
        }
    }

    async fn run_live(
        reference: &str,
        artifact: &Artifact,
        sandbox: &dyn Sandbox,
        scratch: &mut ScratchDir,
        ignore_perf: bool,
    ) -> Option<Run> {
        if let Err(e) = scratch.isolate(&artifact.built.path) {
            error!(task = %reference, test = %artifact.test, error = %e, "Failed to isolate artifact");
            return None;
        }

        let unit = match sandbox.run_unit_test(&artifact.test, scratch).await {
            Ok(unit) => unit,
            Err(e) => {
                error!(task = %reference, test = %artifact.test, error = %e, "Unit test could not run");
                return None;
            }
        };
        info!(task = %reference, test = %artifact.test, status = %unit.status, "Unit tests finished");

        let mut run =
            Run::new(&artifact.hash, &artifact.test, unit.status).with_output(unit.output);
        if run.status != RunStatus::Success {
            return Some(run);
        }

        match sandbox.run_perf(&artifact.test, scratch).await {
            Ok(cycles) => {
                info!(task = %reference, test = %artifact.test, cycles, "Perf measured");
                run.score = cycles;
                Some(run)
            }
            Err(e) if ignore_perf => {
                warn!(task = %reference, test = %artifact.test, error = %e, "Perf failed, keeping unscored run");
                Some(run)
            }
            Err(e) => {
                error!(task = %reference, test = %artifact.test, error = %e, "Perf failed");
                None
            }
        }
    }

    /// Reportable `test::<name>` stages, scored against baselines when grading.
    pub fn stages(&self, policy: &BaselinePolicy) -> Vec<Stage> {
        self.artifacts
            .iter()
            .map(|artifact| {
                let Some((run, source)) = &artifact.run else {
                    return Stage::system_error(Some(&artifact.test));
                };
                let mut run = run.clone();
                if self.mode == StoreMode::Grading {
                    match policy.apply(&mut run, artifact.baseline.as_ref()) {
                        Assessment::MissingBaseline => {
                            error!(task = %self.reference, test = %artifact.test, "No baseline for test");
                        }
                        Assessment::Unmeasured => {
                            error!(task = %self.reference, test = %artifact.test, "Run has no perf data");
                        }
                        _ => {}
                    }
                }
                Stage::from_run("test", &run, *source != RunSource::Fresh)
            })
            .collect()
    }

    /// Runs produced by the sandbox in this batch, unscored.
    ///
    /// Passing runs without perf data are left out so a later batch measures
    /// them again.
    pub fn fresh_runs(&self) -> Vec<Run> {
        self.artifacts
            .iter()
            .filter_map(|a| match &a.run {
                Some((run, RunSource::Fresh)) if !(run.status.is_success() && run.score == 0) => {
                    Some(run.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Every artifact's run flagged as a baseline.
    ///
    /// Fails unless each artifact passed its unit tests with perf data.
    pub fn baseline_runs(&self) -> Result<Vec<Run>> {
        self.artifacts
            .iter()
            .map(|artifact| {
                let run = artifact.run().ok_or_else(|| {
                    gradebox_core::Error::ExecutionFailed(format!(
                        "run is missing for `{}`",
                        artifact.test
                    ))
                })?;
                if !run.status.is_success() || run.score == 0 {
                    return Err(gradebox_core::Error::ExecutionFailed(format!(
                        "baseline `{}` is not usable ({}, score {}): {}",
                        artifact.test, run.status, run.score, run.output
                    )));
                }
                let mut run = run.clone();
                run.baseline = true;
                Ok(run)
            })
            .collect()
    }
}
