//! `gradebox.kdl` parsing.
//!
//! ```kdl
//! runner {
//!     poll-interval-secs 3
//!     data-dir "/srv/data"
//!     data-volume "gradebox-data"
//!     sandbox-owner uid=2000 gid=2000
//!     claim-ttl-secs 3600
//! }
//! images {
//!     builder "stdlib-builder"
//!     runner "stdlib-runner"
//!     pull #true
//!     registry "registry.example.com" username="bot"
//! }
//! baseline {
//!     regression-threshold 1.2
//!     perf-failure "system-error"
//! }
//! ```
//!
//! Every section and field is optional; omitted values keep their defaults.

use gradebox_core::baseline::PerfFailurePolicy;
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::settings::*;
use crate::variables::interpolate;
use crate::{ConfigError, ConfigResult};

/// Parse configuration text, resolving `${env.NAME}` with `lookup`.
pub fn parse_config<F>(kdl: &str, lookup: F) -> ConfigResult<GradeboxConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let doc: KdlDocument = kdl.parse()?;
    let parser = Parser { lookup: &lookup };
    let mut config = GradeboxConfig::default();
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        let section = node.name().value();
        if !seen.insert(section.to_string()) {
            return Err(ConfigError::Duplicate(format!("section '{}'", section)));
        }
        match section {
            "runner" => parser.runner(node, &mut config.runner)?,
            "images" => parser.images(node, &mut config.images)?,
            "sandbox" => parser.sandbox(node, &mut config.sandbox)?,
            "baseline" => parser.baseline(node, &mut config)?,
            "upgrade" => parser.upgrade(node, &mut config.upgrade)?,
            "storage" => parser.storage(node, &mut config.storage)?,
            "database" => parser.database(node, &mut config.database)?,
            "github" => parser.github(node, &mut config.github)?,
            "server" => parser.server(node, &mut config.server)?,
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Load a config file, then apply process environment overrides.
pub fn load_config(path: &Path) -> ConfigResult<GradeboxConfig> {
    let text = std::fs::read_to_string(path)?;
    let env = |name: &str| std::env::var(name).ok();
    let mut config = parse_config(&text, env)?;
    config.apply_env(env);
    config.validate()?;
    Ok(config)
}

/// Defaults plus process environment, for deployments without a file.
pub fn config_from_env() -> ConfigResult<GradeboxConfig> {
    let mut config = GradeboxConfig::default();
    config.apply_env(|name| std::env::var(name).ok());
    config.validate()?;
    Ok(config)
}

struct Parser<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Parser<'_> {
    fn runner(&self, node: &KdlNode, runner: &mut RunnerConfig) -> ConfigResult<()> {
        for child in children(node) {
            match child.name().value() {
                "poll-interval-secs" => {
                    runner.poll_interval = Duration::from_secs(required_u64(child, "runner")?);
                }
                "data-dir" => runner.data_dir = PathBuf::from(self.string(child, "runner")?),
                "data-volume" => runner.data_volume = self.string(child, "runner")?,
                "docs-volume" => runner.docs_volume = self.string(child, "runner")?,
                "sandbox-owner" => {
                    runner.sandbox_uid = u32_prop(child, "uid")?.unwrap_or(runner.sandbox_uid);
                    runner.sandbox_gid = u32_prop(child, "gid")?.unwrap_or(runner.sandbox_gid);
                }
                "claim-ttl-secs" => {
                    let secs = required_u64(child, "runner")?;
                    runner.claim_ttl = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "web-url" => runner.web_url = self.string(child, "runner")?,
                "docs-url" => runner.docs_url = self.string(child, "runner")?,
                _ => {}
            }
        }
        Ok(())
    }

    fn images(&self, node: &KdlNode, images: &mut ImageConfig) -> ConfigResult<()> {
        for child in children(node) {
            match child.name().value() {
                "builder" => images.builder = self.string(child, "images")?,
                "runner" => images.runner = self.string(child, "images")?,
                "pull" => images.pull = required_bool(child, "images")?,
                "registry" => {
                    let server = self.string(child, "images")?;
                    let username = match get_string_prop(child, "username") {
                        Some(raw) => self.expand(&raw)?,
                        None => String::new(),
                    };
                    images.registry = Some(RegistryConfig {
                        server,
                        username,
                        password: String::new(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn sandbox(&self, node: &KdlNode, sandbox: &mut SandboxConfig) -> ConfigResult<()> {
        for child in children(node) {
            match child.name().value() {
                "memory-mb" => {
                    let mb = required_u64(child, "sandbox")?;
                    sandbox.memory_bytes = Some(to_i64(mb.saturating_mul(1024 * 1024), "memory-mb")?);
                }
                "cpus" => {
                    let cpus = required_f64(child, "sandbox")?;
                    if cpus <= 0.0 {
                        return Err(invalid("sandbox.cpus", "must be positive"));
                    }
                    sandbox.nano_cpus = Some((cpus * 1e9) as i64);
                }
                "network" => sandbox.network_disabled = !required_bool(child, "sandbox")?,
                "timeout-secs" => {
                    let secs = required_u64(child, "sandbox")?;
                    sandbox.timeout = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "perf-repeats" => {
                    let repeats = required_u64(child, "sandbox")?;
                    sandbox.perf_repeats = u32::try_from(repeats)
                        .map_err(|_| invalid("sandbox.perf-repeats", "too large"))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn baseline(&self, node: &KdlNode, config: &mut GradeboxConfig) -> ConfigResult<()> {
        for child in children(node) {
            match child.name().value() {
                "regression-threshold" => {
                    config.baseline.regression_threshold = required_f64(child, "baseline")?;
                }
                "perf-failure" => {
                    config.baseline.perf_failure = match self.string(child, "baseline")?.as_str() {
                        "system-error" => PerfFailurePolicy::SystemError,
                        "ignore" => PerfFailurePolicy::Ignore,
                        other => {
                            return Err(invalid(
                                "baseline.perf-failure",
                                &format!("unknown policy: {}", other),
                            ));
                        }
                    };
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn upgrade(&self, node: &KdlNode, upgrade: &mut UpgradeConfig) -> ConfigResult<()> {
        for child in children(node) {
            if child.name().value() == "max-failures" {
                let max = required_u64(child, "upgrade")?;
                upgrade.max_failures =
                    u32::try_from(max).map_err(|_| invalid("upgrade.max-failures", "too large"))?;
            }
        }
        Ok(())
    }

    fn storage(&self, node: &KdlNode, storage: &mut StorageConfig) -> ConfigResult<()> {
        for child in children(node) {
            match child.name().value() {
                "bucket" => storage.bucket = self.string(child, "storage")?,
                "region" => storage.region = Some(self.string(child, "storage")?),
                "endpoint" => storage.endpoint = Some(self.string(child, "storage")?),
                "force-path-style" => storage.force_path_style = required_bool(child, "storage")?,
                "presign-ttl-secs" => {
                    storage.presign_ttl = Duration::from_secs(required_u64(child, "storage")?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn database(&self, node: &KdlNode, database: &mut DatabaseConfig) -> ConfigResult<()> {
        for child in children(node) {
            match child.name().value() {
                "url" => database.url = Some(self.string(child, "database")?),
                "max-connections" => {
                    let max = required_u64(child, "database")?;
                    database.max_connections = u32::try_from(max)
                        .map_err(|_| invalid("database.max-connections", "too large"))?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn github(&self, node: &KdlNode, github: &mut GitHubConfig) -> ConfigResult<()> {
        for child in children(node) {
            match child.name().value() {
                "api-url" => github.api_url = self.string(child, "github")?,
                "token" => github.token = Some(self.string(child, "github")?),
                "webhook-secret" => github.webhook_secret = Some(self.string(child, "github")?),
                "check-name" => github.check_name = self.string(child, "github")?,
                "details-url" => github.details_url = Some(self.string(child, "github")?),
                _ => {}
            }
        }
        Ok(())
    }

    fn server(&self, node: &KdlNode, server: &mut ServerConfig) -> ConfigResult<()> {
        for child in children(node) {
            match child.name().value() {
                "bind" => server.bind = self.string(child, "server")?,
                "api-token" => server.api_token = Some(self.string(child, "server")?),
                _ => {}
            }
        }
        Ok(())
    }

    /// First string argument, with environment references expanded.
    fn string(&self, node: &KdlNode, section: &str) -> ConfigResult<String> {
        let raw = get_first_string_arg(node)
            .ok_or_else(|| missing_value(node, section, "a string"))?;
        self.expand(&raw)
    }

    fn expand(&self, raw: &str) -> ConfigResult<String> {
        interpolate(raw, |name| (self.lookup)(name))
    }
}

// Helper functions for extracting values from KDL nodes

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn required_u64(node: &KdlNode, section: &str) -> ConfigResult<u64> {
    first_arg(node)
        .and_then(|v| v.as_integer())
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| missing_value(node, section, "a non-negative integer"))
}

fn required_f64(node: &KdlNode, section: &str) -> ConfigResult<f64> {
    let value = first_arg(node).ok_or_else(|| missing_value(node, section, "a number"))?;
    value
        .as_float()
        .or_else(|| value.as_integer().map(|i| i as f64))
        .ok_or_else(|| missing_value(node, section, "a number"))
}

fn required_bool(node: &KdlNode, section: &str) -> ConfigResult<bool> {
    first_arg(node)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| missing_value(node, section, "#true or #false"))
}

fn u32_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<u32>> {
    match node.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|i| u32::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| invalid(name, "expected a non-negative integer")),
    }
}

fn to_i64(value: u64, field: &str) -> ConfigResult<i64> {
    i64::try_from(value).map_err(|_| invalid(field, "too large"))
}

fn missing_value(node: &KdlNode, section: &str, expected: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: format!("{}.{}", section, node.name().value()),
        message: format!("expected {}", expected),
    }
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}
