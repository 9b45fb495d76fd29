//! Container-backed sandbox: builder and runner invocations.
//!
//! Builders write `<test>.test` binaries to `/out`; runners see exactly one
//! binary under `/in`. Both directories are the same scratch mount.

use async_trait::async_trait;
use futures::StreamExt;
use gradebox_core::catalog::Test;
use gradebox_core::executor::{Executor, JobSpec, LogStream, RegistryAuth, ResourceLimits};
use gradebox_core::run::RunStatus;
use gradebox_core::sandbox::{BuildReport, Sandbox, SandboxError, UnitResult};
use gradebox_core::scratch::ScratchDir;
use gradebox_core::stage::{SYSTEM_ERROR_MESSAGE, Stage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

const OUT_DIR: &str = "/out";
const IN_DIR: &str = "/in";
const DOCS_DIR: &str = "/docs";
const BUILD_STAGE: &str = "build";

/// Captured output of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutput {
    pub exit_code: Option<i64>,
    pub stdout: String,
    /// Stdout and stderr interleaved in arrival order.
    pub output: String,
}

impl JobOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn into_exit_error(self) -> SandboxError {
        SandboxError::Exit {
            code: self.exit_code,
            output: self.output,
        }
    }
}

/// Spawn a job, wait for it, collect its logs and remove the container.
///
/// A job that outlives its timeout is removed and reported as an exit
/// without a code.
pub async fn run_to_completion(
    executor: &dyn Executor,
    spec: JobSpec,
) -> Result<JobOutput, SandboxError> {
    let timeout = spec.timeout;
    let handle = executor
        .spawn(spec)
        .await
        .map_err(|e| SandboxError::Launch(e.to_string()))?;

    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, executor.wait(&handle))
            .await
            .ok(),
        None => Some(executor.wait(&handle).await),
    };

    let result = match waited {
        Some(Ok(result)) => result,
        Some(Err(e)) => {
            remove_quietly(executor, &handle).await;
            return Err(SandboxError::Launch(e.to_string()));
        }
        None => {
            remove_quietly(executor, &handle).await;
            let secs = timeout.map(|t| t.as_secs()).unwrap_or_default();
            return Err(SandboxError::Exit {
                code: None,
                output: format!("Timed out after {}s", secs),
            });
        }
    };

    let mut output = JobOutput {
        exit_code: result.exit_code,
        ..Default::default()
    };
    match executor.logs(&handle).await {
        Ok(mut lines) => {
            while let Some(line) = lines.next().await {
                if line.stream == LogStream::Stdout {
                    output.stdout.push_str(&line.content);
                }
                output.output.push_str(&line.content);
            }
        }
        Err(e) => warn!(job = %handle.name, error = %e, "Failed to collect job logs"),
    }

    remove_quietly(executor, &handle).await;
    debug!(job = %handle.name, exit_code = ?output.exit_code, "Job finished");
    Ok(output)
}

async fn remove_quietly(executor: &dyn Executor, handle: &gradebox_core::executor::JobHandle) {
    if let Err(e) = executor.remove(handle).await {
        warn!(job = %handle.name, error = %e, "Failed to remove job container");
    }
}

/// Sandbox images and limits.
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    pub builder_image: String,
    pub runner_image: String,
    pub registry: Option<RegistryAuth>,
    /// Limits for runner jobs. Builder jobs keep the network.
    pub limits: ResourceLimits,
    pub timeout: Option<Duration>,
    pub perf_repeats: u32,
    /// Volume the documentation build writes to.
    pub docs_volume: Option<String>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            builder_image: "stdlib-builder".to_string(),
            runner_image: "stdlib-runner".to_string(),
            registry: None,
            limits: ResourceLimits {
                memory_bytes: Some(512 * 1024 * 1024),
                nano_cpus: Some(1_000_000_000),
                network_disabled: true,
            },
            timeout: Some(Duration::from_secs(600)),
            perf_repeats: 10,
            docs_volume: None,
        }
    }
}

/// [`Sandbox`] running builder and runner images through an [`Executor`].
pub struct ContainerSandbox {
    executor: Arc<dyn Executor>,
    options: SandboxOptions,
}

impl ContainerSandbox {
    pub fn new(executor: Arc<dyn Executor>, options: SandboxOptions) -> Self {
        Self { executor, options }
    }

    fn job(&self, kind: &str, image: &str) -> JobSpec {
        let mut spec = JobSpec::new(format!("gradebox-{}-{}", kind, Uuid::now_v7()), image);
        spec.resources = self.options.limits.clone();
        spec.timeout = self.options.timeout;
        spec
    }

    fn builder_job(&self, kind: &str) -> JobSpec {
        let mut spec = self.job(kind, &self.options.builder_image);
        spec.resources.network_disabled = false;
        spec
    }

    fn runner_job(&self, kind: &str) -> JobSpec {
        self.job(kind, &self.options.runner_image)
    }

    async fn run(&self, spec: JobSpec) -> Result<JobOutput, SandboxError> {
        run_to_completion(self.executor.as_ref(), spec).await
    }

    /// Run a builder job that must exit cleanly.
    async fn run_builder(&self, spec: JobSpec) -> Result<JobOutput, SandboxError> {
        let output = self.run(spec).await?;
        if output.succeeded() {
            Ok(output)
        } else {
            Err(output.into_exit_error())
        }
    }
}

fn artifact_path(test: &str) -> String {
    format!("{}/{}.test", IN_DIR, test)
}

fn build_stage(status: RunStatus, output: impl Into<String>) -> BuildReport {
    BuildReport {
        exit_code: None,
        stages: vec![Stage::new(BUILD_STAGE, status).with_output(output)],
    }
}

/// Fold a test build's outcome into reportable stages.
pub fn normalize_build(result: Result<JobOutput, SandboxError>) -> BuildReport {
    let output = match result {
        Ok(output) => output,
        Err(SandboxError::Exit { code, output }) => {
            return BuildReport {
                exit_code: code,
                ..build_stage(RunStatus::Failure, output)
            };
        }
        Err(e) => {
            error!(error = %e, "Test build could not be launched");
            return build_stage(RunStatus::SystemError, SYSTEM_ERROR_MESSAGE);
        }
    };

    let parsed = serde_json::from_str::<Vec<Stage>>(output.stdout.trim());
    let exit_code = output.exit_code;
    let stages = match (output.succeeded(), parsed) {
        (true, Ok(stages)) if stages.is_empty() => {
            vec![Stage::new(BUILD_STAGE, RunStatus::Success)]
        }
        (true, Ok(stages)) => stages,
        (true, Err(e)) => {
            error!(error = %e, output = %output.output, "Builder printed malformed stages");
            vec![Stage::new(BUILD_STAGE, RunStatus::SystemError).with_output(SYSTEM_ERROR_MESSAGE)]
        }
        (false, Ok(mut stages)) => {
            if stages.iter().all(Stage::is_success) {
                let code = exit_code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
                stages.push(
                    Stage::new(BUILD_STAGE, RunStatus::Failure)
                        .with_output(format!("Build exited with code {}", code)),
                );
            }
            stages
        }
        (false, Err(_)) => {
            vec![Stage::new(BUILD_STAGE, RunStatus::Failure).with_output(output.output)]
        }
    };

    BuildReport { exit_code, stages }
}

/// Cycle count from `perf stat -x ;` output.
pub fn parse_cycles(output: &str) -> Option<u64> {
    output.lines().find_map(|line| {
        let parts: Vec<&str> = line.splitn(3, ';').collect();
        match parts.as_slice() {
            [value, _, event] if event.starts_with("cycles") => value.trim().parse().ok(),
            _ => None,
        }
    })
}

/// Test catalog from the `build meta` output: one successful stage whose
/// output is the JSON test list.
pub fn parse_meta(stdout: &str) -> Result<Vec<Test>, SandboxError> {
    let stages: Vec<Stage> = serde_json::from_str(stdout.trim())
        .map_err(|e| SandboxError::Malformed(format!("meta stages: {}", e)))?;
    let [stage] = stages.as_slice() else {
        return Err(SandboxError::Malformed(format!(
            "expected one meta stage, got {}",
            stages.len()
        )));
    };
    if !stage.is_success() {
        return Err(SandboxError::Malformed(format!(
            "meta stage {} failed: {}",
            stage.name, stage.output
        )));
    }
    serde_json::from_str(&stage.output)
        .map_err(|e| SandboxError::Malformed(format!("meta tests: {}", e)))
}

#[async_trait]
impl Sandbox for ContainerSandbox {
    async fn pull_images(&self) -> Result<(), SandboxError> {
        let auth = self.options.registry.as_ref();
        for image in [&self.options.builder_image, &self.options.runner_image] {
            self.executor
                .pull(image, auth)
                .await
                .map_err(|e| SandboxError::Launch(e.to_string()))?;
        }
        Ok(())
    }

    async fn build_tests(&self, archive_url: &str, scratch: &mut ScratchDir) -> BuildReport {
        if let Err(e) = scratch.clear() {
            error!(error = %e, "Failed to clear scratch directory");
            return build_stage(RunStatus::SystemError, SYSTEM_ERROR_MESSAGE);
        }

        let spec = self
            .builder_job("build-tests")
            .command(["build", "tests", archive_url])
            .volume(scratch.mount(OUT_DIR, false));
        normalize_build(self.run(spec).await)
    }

    async fn run_unit_test(
        &self,
        test: &str,
        scratch: &ScratchDir,
    ) -> Result<UnitResult, SandboxError> {
        let spec = self
            .runner_job("test")
            .command([artifact_path(test), "-test.v".to_string()])
            .volume(scratch.mount(IN_DIR, false));

        match self.run(spec).await {
            Ok(output) => {
                let status = if output.succeeded() {
                    RunStatus::Success
                } else {
                    RunStatus::Failure
                };
                Ok(UnitResult {
                    status,
                    output: output.output,
                })
            }
            Err(SandboxError::Exit { output, .. }) => Ok(UnitResult {
                status: RunStatus::Failure,
                output,
            }),
            Err(e) => Err(e),
        }
    }

    async fn run_perf(&self, test: &str, scratch: &ScratchDir) -> Result<u64, SandboxError> {
        let repeats = self.options.perf_repeats.max(1).to_string();
        let mut spec = self
            .runner_job("perf")
            .command([
                "perf".to_string(),
                "stat".to_string(),
                "-x".to_string(),
                ";".to_string(),
                "-r".to_string(),
                repeats,
                artifact_path(test),
                "-test.run".to_string(),
                "Perf".to_string(),
            ])
            .volume(scratch.mount(IN_DIR, false));
        spec.unconfined = true;

        // perf reports counters even when the benchmark exits non-zero.
        let output = self.run(spec).await?;
        match parse_cycles(&output.output) {
            Some(cycles) if cycles > 0 => Ok(cycles),
            _ => {
                debug!(test = %test, output = %output.output, "No cycles in perf output");
                Err(SandboxError::NoPerfData)
            }
        }
    }

    async fn build_baseline(&self, scratch: &mut ScratchDir) -> Result<(), SandboxError> {
        scratch.clear()?;
        let spec = self
            .builder_job("build-baseline")
            .command(["build", "baseline"])
            .volume(scratch.mount(OUT_DIR, false));
        self.run_builder(spec).await?;
        Ok(())
    }

    async fn build_meta(&self) -> Result<Vec<Test>, SandboxError> {
        let spec = self.builder_job("build-meta").command(["build", "meta"]);
        let output = self.run_builder(spec).await?;
        parse_meta(&output.stdout)
    }

    async fn build_docs(&self, web_url: &str, docs_url: &str) -> Result<(), SandboxError> {
        let mut spec = self.builder_job("build-docs").command(["build", "docs"]);
        spec.env.insert("WEB_URL".to_string(), web_url.to_string());
        spec.env.insert("DOCS_URL".to_string(), docs_url.to_string());
        if let Some(volume) = &self.options.docs_volume {
            spec = spec.volume(gradebox_core::executor::VolumeMount {
                source: volume.clone(),
                mount_path: DOCS_DIR.to_string(),
                read_only: false,
            });
        }
        self.run_builder(spec).await?;
        Ok(())
    }
}
