//! Runner wiring: Docker sandbox, Postgres queue, GitHub and S3.

use anyhow::{Context, Result};
use gradebox_api::services::{GitHubClient, S3ObjectStore, StaticToken};
use gradebox_config::GradeboxConfig;
use gradebox_core::scratch::ScratchDir;
use gradebox_db::{PgCatalogRepo, PgRunRepo};
use gradebox_executor::{
    ContainerSandbox, LocalDockerExecutor, RegistryAuth, ResourceLimits, SandboxOptions,
};
use gradebox_scheduler::{PgTaskQueue, Runner, RunnerDeps, RunnerSettings};
use std::sync::Arc;
use tracing::info;

fn sandbox_options(config: &GradeboxConfig) -> SandboxOptions {
    SandboxOptions {
        builder_image: config.images.builder.clone(),
        runner_image: config.images.runner.clone(),
        registry: config.images.registry.as_ref().map(|r| RegistryAuth {
            server: r.server.clone(),
            username: r.username.clone(),
            password: r.password.clone(),
        }),
        limits: ResourceLimits {
            memory_bytes: config.sandbox.memory_bytes,
            nano_cpus: config.sandbox.nano_cpus,
            network_disabled: config.sandbox.network_disabled,
        },
        timeout: config.sandbox.timeout,
        perf_repeats: config.sandbox.perf_repeats,
        docs_volume: Some(config.runner.docs_volume.clone()).filter(|v| !v.is_empty()),
    }
}

async fn build_runner(config: &GradeboxConfig) -> Result<Runner> {
    let executor = LocalDockerExecutor::new().context("Failed to connect to Docker")?;
    executor.ping().await?;
    let sandbox = ContainerSandbox::new(Arc::new(executor), sandbox_options(config));

    let pool =
        gradebox_db::create_pool(config.database_url()?, config.database.max_connections).await?;
    gradebox_db::run_migrations(&pool).await?;

    let token = config
        .github
        .token
        .clone()
        .context("github.token (or GITHUB_TOKEN) is required")?;
    let code_host = GitHubClient::new(&config.github.api_url, Arc::new(StaticToken::new(token)));
    let objects = S3ObjectStore::from_config(&config.storage).await;

    let deps = RunnerDeps {
        queue: Arc::new(PgTaskQueue::new(pool.clone()).with_claim_ttl(config.runner.claim_ttl)),
        sandbox: Arc::new(sandbox),
        lookup: Arc::new(PgRunRepo::new(pool.clone())),
        catalog: Arc::new(PgCatalogRepo::new(pool)),
        code_host: Arc::new(code_host),
        objects: Arc::new(objects),
    };

    let scratch = ScratchDir::new(&config.runner.data_dir, &config.runner.data_volume)
        .with_owner(config.runner.sandbox_uid, config.runner.sandbox_gid);

    Ok(Runner::new(
        deps,
        RunnerSettings::from_config(config),
        scratch,
    ))
}

/// Grade submissions until Ctrl-C.
pub async fn run(config: &GradeboxConfig) -> Result<()> {
    let mut runner = build_runner(config).await?;
    info!(
        poll_interval = ?runner.settings().poll_interval,
        data_dir = %config.runner.data_dir.display(),
        "Runner started"
    );

    runner
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await;
    Ok(())
}

/// Run one course upgrade regardless of the readiness flag.
pub async fn upgrade(config: &GradeboxConfig) -> Result<()> {
    let mut runner = build_runner(config).await?;
    let tests = runner
        .upgrade_course()
        .await
        .context("Course upgrade failed")?;
    println!("Course ready with {} tests", tests);
    Ok(())
}
