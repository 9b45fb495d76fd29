//! Gradebox API server

use anyhow::Context;
use gradebox_api::services::{GitHubClient, S3ObjectStore, StaticToken};
use gradebox_api::{ApiSettings, AppState, routes};
use gradebox_config::{GradeboxConfig, config_from_env, load_config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn load() -> anyhow::Result<GradeboxConfig> {
    match std::env::var_os("GRADEBOX_CONFIG") {
        Some(path) => {
            let path = PathBuf::from(path);
            load_config(&path).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(config_from_env()?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load()?;

    info!("Connecting to database...");
    let pool = gradebox_db::create_pool(config.database_url()?, config.database.max_connections)
        .await?;
    gradebox_db::run_migrations(&pool).await?;
    info!("Database connected");

    let token = config
        .github
        .token
        .clone()
        .context("github.token (or GITHUB_TOKEN) is required")?;
    let code_host = GitHubClient::new(&config.github.api_url, Arc::new(StaticToken::new(token)));
    let objects = S3ObjectStore::from_config(&config.storage).await;

    let state = AppState::new(
        pool,
        Arc::new(code_host),
        Arc::new(objects),
        ApiSettings::from_config(&config),
    );

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.server.bind);
    let listener = TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
