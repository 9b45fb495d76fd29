//! Runner and service settings with their defaults.

use gradebox_core::baseline::BaselinePolicy;
use std::path::PathBuf;
use std::time::Duration;

use crate::{ConfigError, ConfigResult};

/// Complete configuration, as read from `gradebox.kdl` plus environment.
#[derive(Debug, Clone, Default)]
pub struct GradeboxConfig {
    pub runner: RunnerConfig,
    pub images: ImageConfig,
    pub sandbox: SandboxConfig,
    pub baseline: BaselinePolicy,
    pub upgrade: UpgradeConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub github: GitHubConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub poll_interval: Duration,
    /// Scratch directory as seen by the runner process.
    pub data_dir: PathBuf,
    /// Volume name (or host path) that containers mount for `data_dir`.
    pub data_volume: String,
    /// Volume the docs builder writes rendered documentation into.
    pub docs_volume: String,
    pub sandbox_uid: u32,
    pub sandbox_gid: u32,
    /// Reclaim tasks stuck in `executing` for longer than this.
    pub claim_ttl: Option<Duration>,
    pub web_url: String,
    pub docs_url: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            data_dir: PathBuf::from("/srv/data"),
            data_volume: "gradebox-data".to_string(),
            docs_volume: "gradebox-docs".to_string(),
            sandbox_uid: 2000,
            sandbox_gid: 2000,
            claim_ttl: None,
            web_url: String::new(),
            docs_url: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub builder: String,
    pub runner: String,
    /// Pull both images before each course upgrade.
    pub pull: bool,
    pub registry: Option<RegistryConfig>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            builder: "stdlib-builder".to_string(),
            runner: "stdlib-runner".to_string(),
            pull: false,
            registry: None,
        }
    }
}

#[derive(Clone, Default)]
pub struct RegistryConfig {
    pub server: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Limits applied to every sandbox container.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
    /// Disable networking for unit and perf runs. Builders always have network.
    pub network_disabled: bool,
    pub timeout: Option<Duration>,
    pub perf_repeats: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_bytes: Some(512 * 1024 * 1024),
            nano_cpus: Some(1_000_000_000),
            network_disabled: true,
            timeout: Some(Duration::from_secs(600)),
            perf_repeats: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    /// Consecutive failures before the runner stops retrying the upgrade.
    pub max_failures: u32,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self { max_failures: 3 }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub presign_ttl: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "gradebox".to_string(),
            region: None,
            endpoint: None,
            force_path_style: false,
            presign_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

#[derive(Clone)]
pub struct GitHubConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub webhook_secret: Option<String>,
    /// Name of the check run shown on commits.
    pub check_name: String,
    pub details_url: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: None,
            webhook_secret: None,
            check_name: "gradebox".to_string(),
            details_url: None,
        }
    }
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("check_name", &self.check_name)
            .field("details_url", &self.details_url)
            .finish()
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Bearer token required on the runner and catalog endpoints.
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            api_token: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GradeboxConfig {
    /// Override secrets and deployment-specific values from the environment.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(token) = lookup("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(secret) = lookup("GITHUB_WEBHOOK_SECRET") {
            self.github.webhook_secret = Some(secret);
        }
        if let Some(token) = lookup("GRADEBOX_API_TOKEN") {
            self.server.api_token = Some(token);
        }
        if let Some(dir) = lookup("GRADEBOX_DATA_DIR") {
            self.runner.data_dir = PathBuf::from(dir);
        }
        if let Some(password) = lookup("GRADEBOX_REGISTRY_PASSWORD") {
            if let Some(registry) = self.images.registry.as_mut() {
                registry.password = password;
            }
        }
    }

    /// Reject values the runner cannot operate with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.runner.poll_interval.is_zero() {
            return Err(invalid("runner.poll-interval-secs", "must be positive"));
        }
        let threshold = self.baseline.regression_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(invalid(
                "baseline.regression-threshold",
                "must be a positive number",
            ));
        }
        if self.upgrade.max_failures == 0 {
            return Err(invalid("upgrade.max-failures", "must be at least 1"));
        }
        if self.sandbox.perf_repeats == 0 {
            return Err(invalid("sandbox.perf-repeats", "must be at least 1"));
        }
        if self.storage.bucket.is_empty() {
            return Err(invalid("storage.bucket", "must not be empty"));
        }
        if self.images.builder.is_empty() || self.images.runner.is_empty() {
            return Err(invalid("images", "builder and runner images are required"));
        }
        Ok(())
    }

    /// The database URL, which has no default.
    pub fn database_url(&self) -> ConfigResult<&str> {
        self.database
            .url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField("database.url (or DATABASE_URL)".to_string()))
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = GradeboxConfig::default();
        config.validate().unwrap();
        assert_eq!(config.runner.poll_interval, Duration::from_secs(3));
        assert_eq!(config.upgrade.max_failures, 3);
        assert_eq!(config.storage.presign_ttl, Duration::from_secs(600));
        assert!(config.runner.claim_ttl.is_none());
    }

    #[test]
    fn test_apply_env() {
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgres://localhost/gradebox"),
            ("GITHUB_TOKEN", "ghs_abc"),
            ("GRADEBOX_REGISTRY_PASSWORD", "hunter2"),
        ]
        .into_iter()
        .collect();

        let mut config = GradeboxConfig::default();
        config.images.registry = Some(RegistryConfig {
            server: "registry.example.com".to_string(),
            username: "bot".to_string(),
            password: String::new(),
        });
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database_url().unwrap(), "postgres://localhost/gradebox");
        assert_eq!(config.github.token.as_deref(), Some("ghs_abc"));
        assert_eq!(config.images.registry.unwrap().password, "hunter2");
        assert!(config.github.webhook_secret.is_none());
    }

    #[test]
    fn test_missing_database_url() {
        let config = GradeboxConfig::default();
        assert!(matches!(
            config.database_url(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = GradeboxConfig::default();
        config.github.token = Some("ghs_secret".to_string());
        config.database.url = Some("postgres://user:pw@db/gradebox".to_string());

        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("ghs_secret"));
        assert!(!rendered.contains("user:pw"));
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = GradeboxConfig::default();
        config.baseline.regression_threshold = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
