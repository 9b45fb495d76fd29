//! CLI command implementations.

pub mod runner;

use anyhow::{Context, Result};
use gradebox_config::{GradeboxConfig, config_from_env, load_config};
use std::path::Path;
use tracing::info;

pub fn load(path: Option<&Path>) -> Result<GradeboxConfig> {
    match path {
        Some(path) => {
            load_config(path).with_context(|| format!("Failed to load {}", path.display()))
        }
        None => config_from_env().context("Invalid configuration"),
    }
}

pub async fn migrate(config: &GradeboxConfig) -> Result<()> {
    let pool =
        gradebox_db::create_pool(config.database_url()?, config.database.max_connections).await?;
    gradebox_db::run_migrations(&pool)
        .await
        .context("Failed to apply migrations")?;
    info!("Migrations applied");
    Ok(())
}

/// Secrets are redacted by the config's `Debug` impls.
pub fn check_config(config: &GradeboxConfig) {
    println!("Configuration is valid");
    println!("{:#?}", config);
}
