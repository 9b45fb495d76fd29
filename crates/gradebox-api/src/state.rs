//! Application state.

use gradebox_config::GradeboxConfig;
use gradebox_core::catalog::CourseCatalog;
use gradebox_core::check::CodeHost;
use gradebox_core::run::ResultLookup;
use gradebox_core::storage::ObjectStore;
use gradebox_core::task::TaskQueue;
use gradebox_db::{PgCatalogRepo, PgRunRepo, PgUserRepo, UserRepo};
use gradebox_scheduler::PgTaskQueue;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Request handling settings taken from the config file.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub webhook_secret: Option<String>,
    pub api_token: Option<String>,
    pub check_name: String,
    /// Base URL for the check run's details link.
    pub details_url: Option<String>,
    pub presign_ttl: Duration,
    pub claim_ttl: Option<Duration>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            api_token: None,
            check_name: "gradebox".to_string(),
            details_url: None,
            presign_ttl: Duration::from_secs(600),
            claim_ttl: None,
        }
    }
}

impl ApiSettings {
    pub fn from_config(config: &GradeboxConfig) -> Self {
        Self {
            webhook_secret: config.github.webhook_secret.clone(),
            api_token: config.server.api_token.clone(),
            check_name: config.github.check_name.clone(),
            details_url: config.github.details_url.clone(),
            presign_ttl: config.storage.presign_ttl,
            claim_ttl: config.runner.claim_ttl,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub queue: Arc<dyn TaskQueue>,
    pub runs: Arc<dyn ResultLookup>,
    pub catalog: Arc<dyn CourseCatalog>,
    pub users: Arc<dyn UserRepo>,
    pub code_host: Arc<dyn CodeHost>,
    pub objects: Arc<dyn ObjectStore>,
    pub settings: Arc<ApiSettings>,
}

impl AppState {
    /// State backed by Postgres repositories on `pool`.
    pub fn new(
        pool: PgPool,
        code_host: Arc<dyn CodeHost>,
        objects: Arc<dyn ObjectStore>,
        settings: ApiSettings,
    ) -> Self {
        Self {
            queue: Arc::new(PgTaskQueue::new(pool.clone()).with_claim_ttl(settings.claim_ttl)),
            runs: Arc::new(PgRunRepo::new(pool.clone())),
            catalog: Arc::new(PgCatalogRepo::new(pool.clone())),
            users: Arc::new(PgUserRepo::new(pool.clone())),
            pool,
            code_host,
            objects,
            settings: Arc::new(settings),
        }
    }
}
