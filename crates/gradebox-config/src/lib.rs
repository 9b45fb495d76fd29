//! Configuration for Gradebox.
//!
//! This crate handles:
//! - `gradebox.kdl` parsing
//! - Defaults for every runner, sandbox and service setting
//! - Environment overrides and `${env.NAME}` references

pub mod error;
pub mod parse;
pub mod settings;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use parse::{config_from_env, load_config, parse_config};
pub use settings::{
    DatabaseConfig, GitHubConfig, GradeboxConfig, ImageConfig, RegistryConfig, RunnerConfig,
    SandboxConfig, ServerConfig, StorageConfig, UpgradeConfig,
};
