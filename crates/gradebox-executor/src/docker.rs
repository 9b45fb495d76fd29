//! Local Docker executor implementation.

use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use gradebox_core::executor::*;
use gradebox_core::{Error, Result};
use tracing::{debug, info, warn};

/// Runs sandbox jobs as containers on the local Docker daemon.
pub struct LocalDockerExecutor {
    docker: Docker,
}

impl LocalDockerExecutor {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Check the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Docker is unavailable: {}", e)))?;
        Ok(())
    }
}

/// Split `repo[:tag]` into repository and tag, defaulting to `latest`.
///
/// A colon before the last slash belongs to a registry port, not a tag.
fn split_image(image: &str) -> (&str, &str) {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn credentials(auth: &RegistryAuth) -> DockerCredentials {
    DockerCredentials {
        username: Some(auth.username.clone()),
        password: Some(auth.password.clone()),
        serveraddress: Some(auth.server.clone()),
        ..Default::default()
    }
}

/// Translate a job spec into a container config.
fn container_config(spec: &JobSpec) -> Config<String> {
    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let binds: Option<Vec<String>> = if spec.volumes.is_empty() {
        None
    } else {
        Some(spec.volumes.iter().map(VolumeMount::bind).collect())
    };

    let host_config = HostConfig {
        binds,
        memory: spec.resources.memory_bytes,
        nano_cpus: spec.resources.nano_cpus,
        network_mode: spec
            .resources
            .network_disabled
            .then(|| "none".to_string()),
        security_opt: spec
            .unconfined
            .then(|| vec!["seccomp=unconfined".to_string()]),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
        env: Some(env),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        network_disabled: Some(spec.resources.network_disabled),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl Executor for LocalDockerExecutor {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn pull(&self, image: &str, auth: Option<&RegistryAuth>) -> Result<()> {
        let (repository, tag) = split_image(image);
        info!(image = %image, "Pulling image");

        let options = CreateImageOptions {
            from_image: repository.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self
            .docker
            .create_image(Some(options), None, auth.map(credentials));
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(Error::ExecutionFailed(format!(
                        "Failed to pull {}: {}",
                        image, e
                    )));
                }
            }
        }
        Ok(())
    }

    async fn spawn(&self, spec: JobSpec) -> Result<JobHandle> {
        let config = container_config(&spec);
        let create_options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        debug!(container = %spec.name, image = %spec.image, "Creating container");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to create container: {}", e)))?;

        if let Err(e) = self
            .docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
        {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(cleanup) = self.docker.remove_container(&spec.name, Some(options)).await {
                warn!(container = %spec.name, error = %cleanup, "Failed to remove unstarted container");
            }
            return Err(Error::ExecutionFailed(format!(
                "Failed to start container: {}",
                e
            )));
        }

        Ok(JobHandle {
            name: spec.name,
            executor_id: container.id,
            executor_name: self.name().to_string(),
        })
    }

    async fn logs(&self, handle: &JobHandle) -> Result<BoxStream<'static, LogLine>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let stream = self.docker.logs(&handle.name, Some(options));

        // Frames are passed through untrimmed: builders print JSON that may
        // span several frames.
        let mapped_stream = stream.filter_map(|result| async move {
            match result {
                Ok(output) => {
                    let (stream, message) = match output {
                        LogOutput::StdErr { message } => (LogStream::Stderr, message),
                        LogOutput::StdOut { message }
                        | LogOutput::Console { message }
                        | LogOutput::StdIn { message } => (LogStream::Stdout, message),
                    };
                    Some(LogLine {
                        timestamp: Utc::now(),
                        stream,
                        content: String::from_utf8_lossy(&message).into_owned(),
                    })
                }
                Err(e) => {
                    warn!(error = %e, "Log stream error");
                    None
                }
            }
        });

        Ok(Box::pin(mapped_stream))
    }

    async fn wait(&self, handle: &JobHandle) -> Result<JobResult> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.docker.wait_container(&handle.name, Some(options));
        let exit_code = match stream.next().await {
            Some(Ok(response)) => Some(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                return Err(Error::ExecutionFailed(format!(
                    "Failed to wait for container: {}",
                    e
                )));
            }
            None => None,
        };

        Ok(JobResult { exit_code })
    }

    async fn remove(&self, handle: &JobHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.docker
            .remove_container(&handle.name, Some(options))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to remove container: {}", e)))?;

        Ok(())
    }
}
