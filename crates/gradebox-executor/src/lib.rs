//! Sandbox execution for Gradebox.
//!
//! [`LocalDockerExecutor`] runs one-shot jobs on the local Docker daemon and
//! [`ContainerSandbox`] maps builder and runner invocations onto it.

pub mod docker;
pub mod sandbox;

pub use docker::LocalDockerExecutor;
pub use gradebox_core::executor::{
    Executor, JobHandle, JobResult, JobSpec, LogLine, LogStream, RegistryAuth, ResourceLimits,
    VolumeMount,
};
pub use sandbox::{ContainerSandbox, JobOutput, SandboxOptions, run_to_completion};
