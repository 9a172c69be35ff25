//! Checks on npm package names and versions accepted from the command line.

use depobs_model::{LATEST_VERSION, ModelError};
use once_cell::sync::Lazy;
use regex::Regex;

// At most 214 characters, not starting with a dot or underscore.
static NPM_PACKAGE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[@a-zA-Z0-9][._@/a-zA-Z0-9-]{0,213}$")
        .expect("npm package name regex should compile")
});

// node-semver version with optional pre-release and build metadata.
static NPM_PACKAGE_VERSION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[=v]?[0-9]+\.[0-9]+\.[0-9]+(-[-.0-9A-Za-z]+)?(\+[-.0-9A-Za-z]+)?$")
        .expect("npm package version regex should compile")
});

pub fn validate_npm_package_name(name: &str) -> Result<(), ModelError> {
    if NPM_PACKAGE_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(ModelError::InvalidParams(format!(
            "invalid npm package name {name:?}: must match {}",
            NPM_PACKAGE_NAME_REGEX.as_str()
        )))
    }
}

/// Accepts a semver version or `latest`.
pub fn validate_npm_package_version(version: &str) -> Result<(), ModelError> {
    if version == LATEST_VERSION || NPM_PACKAGE_VERSION_REGEX.is_match(version) {
        Ok(())
    } else {
        Err(ModelError::InvalidParams(format!(
            "invalid npm package version {version:?}: must be latest or match {}",
            NPM_PACKAGE_VERSION_REGEX.as_str()
        )))
    }
}
