//! Environment references inside configuration values.
//!
//! String values may contain `${env.NAME}`, replaced with the variable's
//! value. A reference to an unset variable is a configuration error.

use regex::Regex;
use std::sync::LazyLock;

use crate::{ConfigError, ConfigResult};

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{env\.([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern is valid")
});

/// Replace every `${env.NAME}` in `input` using `lookup`.
pub fn interpolate<F>(input: &str, lookup: F) -> ConfigResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = None;
    let output = VAR_REGEX.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        match lookup(name) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ConfigError::InvalidReference(format!(
            "environment variable {} is not set",
            name
        ))),
        None => Ok(output.into_owned()),
    }
}

/// Whether `input` contains any environment reference.
pub fn has_references(input: &str) -> bool {
    VAR_REGEX.is_match(input)
}
