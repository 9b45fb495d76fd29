//! Executor trait and job types.
//!
//! Executors run one-shot sandbox jobs in isolated containers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::Result;

/// Specification for a job to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique container name for this job.
    pub name: String,
    /// Container image to run.
    pub image: String,
    /// Command to execute. Empty means the image entrypoint defaults.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Volumes to mount.
    pub volumes: Vec<VolumeMount>,
    /// Resource limits.
    pub resources: ResourceLimits,
    /// Maximum execution time.
    pub timeout: Option<Duration>,
    /// Run without the default seccomp profile (needed by `perf`).
    pub unconfined: bool,
}

impl JobSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            env: HashMap::new(),
            volumes: Vec::new(),
            resources: ResourceLimits::default(),
            timeout: None,
            unconfined: false,
        }
    }

    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn volume(mut self, mount: VolumeMount) -> Self {
        self.volumes.push(mount);
        self
    }
}

/// Resource limits for a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory_bytes: Option<i64>,
    /// CPU quota in units of 1e-9 CPUs.
    pub nano_cpus: Option<i64>,
    pub network_disabled: bool,
}

/// A volume mount specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Named volume or host path.
    pub source: String,
    /// Path to mount in the container.
    pub mount_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn bind(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.source, self.mount_path, mode)
    }
}

/// Handle to a running or completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// The job's container name.
    pub name: String,
    /// Executor-specific identifier (container ID).
    pub executor_id: String,
    /// Name of the executor running this job.
    pub executor_name: String,
}

/// Result of a completed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Exit code if the runtime reported one.
    pub exit_code: Option<i64>,
}

impl JobResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A line of log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Registry credentials for pulling private images.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub server: String,
    pub username: String,
    pub password: String,
}

/// Trait for job executors.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Pull an image so later spawns do not hit the registry.
    async fn pull(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()>;

    /// Create and start a job.
    async fn spawn(&self, spec: JobSpec) -> Result<JobHandle>;

    /// Stream of log lines from a job, ending when the job exits.
    async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>>;

    /// Wait for a job to complete.
    async fn wait(&self, handle: &JobHandle) -> Result<JobResult>;

    /// Remove the job's container, killing it if still running.
    async fn remove(&self, handle: &JobHandle) -> Result<()>;
}
