use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{debug, warn};

use crate::db_url::resolve_database_url;
use crate::models::{WorkerConfig, WorkerConfigSource};

pub const CONFIG_PATH_VAR: &str = "DEPOBS_WORKER_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "DEPOBS_WORKER_CONFIG_JSON";

const CANDIDATES: &[&str] = &[
    "worker.toml",
    "worker.json",
    "config/worker.toml",
    "config/worker.json",
];

/// Read access to environment variables.
pub trait EnvLookup {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Loads `.env` from the working directory or its parents when present.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("loaded environment from {}", path.display()),
        Err(err) if err.not_found() => {}
        Err(err) => warn!("ignoring unreadable .env file: {err}"),
    }
}

fn set_if_present(env: &dyn EnvLookup, key: &str, target: &mut String) {
    if let Some(value) = env.var(key).filter(|value| !value.trim().is_empty()) {
        *target = value;
    }
}

impl WorkerConfig {
    /// Resolves configuration from the process environment and the working
    /// directory.
    pub fn load() -> anyhow::Result<(Self, WorkerConfigSource)> {
        Self::load_with(&ProcessEnv, Path::new("."))
    }

    /// Evaluation order:
    /// 1) `$DEPOBS_WORKER_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$DEPOBS_WORKER_CONFIG_JSON` (inline JSON),
    /// 3) the first default file found under `dir`,
    /// 4) defaults.
    ///
    /// Environment overrides are applied to whichever was chosen.
    pub fn load_with(
        env: &dyn EnvLookup,
        dir: &Path,
    ) -> anyhow::Result<(Self, WorkerConfigSource)> {
        let (mut config, source) = Self::select(env, dir)?;
        config.apply_env_overrides(env)?;
        Ok((config, source))
    }

    fn select(env: &dyn EnvLookup, dir: &Path) -> anyhow::Result<(Self, WorkerConfigSource)> {
        if let Some(path_str) = env.var(CONFIG_PATH_VAR)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let config = Self::load_from_file(&path)?;
            return Ok((config, WorkerConfigSource::EnvPath(path)));
        }

        if let Some(raw) = env.var(CONFIG_JSON_VAR)
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            return Ok((parsed, WorkerConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(dir) {
            let config = Self::load_from_file(&path)?;
            return Ok((config, WorkerConfigSource::File(path)));
        }

        Ok((Self::default(), WorkerConfigSource::Default))
    }

    /// `DATABASE_URL` (or the `PG*` variables), `NPM_BASE_URL`, `NPM_PAT`,
    /// `GCP_PROJECT_ID` and `JOB_STATUS_PUBSUB_SUBSCRIPTION`.
    pub fn apply_env_overrides(&mut self, env: &dyn EnvLookup) -> anyhow::Result<()> {
        if let Some((url, source)) = resolve_database_url(env, &self.database)? {
            debug!(?source, "resolved database url");
            self.database.url = Some(url);
        }
        set_if_present(env, "NPM_BASE_URL", &mut self.registry.base_url);
        if let Some(token) = env.var("NPM_PAT").filter(|token| !token.trim().is_empty()) {
            self.registry.auth_token = Some(token);
        }
        if let Some(project) = env.var("GCP_PROJECT_ID").filter(|value| !value.trim().is_empty()) {
            self.pubsub.project_id = Some(project);
        }
        if let Some(subscription) = env
            .var("JOB_STATUS_PUBSUB_SUBSCRIPTION")
            .filter(|value| !value.trim().is_empty())
        {
            self.pubsub.subscription = Some(subscription);
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read worker config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid worker config {}", path.display())),
            Some("toml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid worker config {}: {}", path.display(), err)),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Tries TOML first, then JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse worker config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid worker config json: {err}"))
    }

    fn find_default_file(dir: &Path) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|path| path.exists())
    }
}
