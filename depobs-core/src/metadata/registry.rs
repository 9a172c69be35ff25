//! npm registry documents.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depobs_model::RegistryEntry;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::MetadataRefresher;
use crate::error::{OrchestratorError, Result};
use crate::persistence::ScanStore;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    pub base_url: String,
    /// Optional read-only npm token for a higher rate limit.
    pub auth_token: Option<String>,
    /// Packages fetched concurrently per batch.
    pub package_batch_size: usize,
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://registry.npmjs.com".to_string(),
            auth_token: None,
            package_batch_size: 10,
            timeout_ms: 30_000,
        }
    }
}

/// Turns a registry package document into entries, newest first.
pub fn registry_entries_from_document(package_name: &str, doc: &Value) -> Vec<RegistryEntry> {
    let Some(versions) = doc.get("versions").and_then(Value::as_object) else {
        return Vec::new();
    };
    let times = doc.get("time").and_then(Value::as_object);

    let mut entries: Vec<RegistryEntry> = versions
        .iter()
        .map(|(version, meta)| {
            let source_url = match meta.get("repository") {
                Some(Value::String(url)) => Some(url.clone()),
                Some(repo) => repo.get("url").and_then(Value::as_str).map(str::to_string),
                None => None,
            };
            let published_at = times
                .and_then(|times| times.get(version))
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|at| at.with_timezone(&Utc));

            RegistryEntry {
                package_name: package_name.to_string(),
                package_version: Some(version.clone()),
                tarball: meta
                    .get("dist")
                    .and_then(|dist| dist.get("tarball"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                source_url,
                git_head: meta.get("gitHead").and_then(Value::as_str).map(str::to_string),
                published_at,
            }
        })
        .collect();

    entries.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    entries
}

/// Fetches `{base_url}/{package}` documents from the npm registry.
#[derive(Clone)]
pub struct NpmRegistryRefresher {
    http: reqwest::Client,
    config: RegistryConfig,
    store: Arc<dyn ScanStore>,
}

impl fmt::Debug for NpmRegistryRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NpmRegistryRefresher")
            .field("base_url", &self.config.base_url)
            .field("package_batch_size", &self.config.package_batch_size)
            .field("has_token", &self.config.auth_token.is_some())
            .finish()
    }
}

impl NpmRegistryRefresher {
    pub fn new(config: RegistryConfig, store: Arc<dyn ScanStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("depobs-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config,
            store,
        })
    }

    /// Scoped names keep their `@` but escape the separating slash.
    pub fn package_url(&self, package_name: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            package_name.replace('/', "%2F")
        )
    }

    async fn fetch_document(&self, package_name: &str) -> Result<Option<Value>> {
        let mut request = self.http.get(self.package_url(package_name));
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!(package = package_name, "package not found on npm registry");
            return Ok(None);
        }
        let doc = response.error_for_status()?.json::<Value>().await?;
        Ok(Some(doc))
    }
}

#[async_trait]
impl MetadataRefresher for NpmRegistryRefresher {
    async fn fetch_missing(&self) -> Result<()> {
        let names = self.store.package_names_missing_registry_entries().await?;
        if names.is_empty() {
            debug!("no packages missing npm registry entries");
            return Ok(());
        }
        info!(packages = names.len(), "fetching missing npm registry entries");
        self.refresh_packages(&names).await
    }

    async fn refresh_packages(&self, names: &[String]) -> Result<()> {
        let mut failures = 0usize;
        for batch in names.chunks(self.config.package_batch_size.max(1)) {
            let fetched = join_all(batch.iter().map(|name| async move {
                (name, self.fetch_document(name).await)
            }))
            .await;

            for (name, outcome) in fetched {
                match outcome {
                    Ok(Some(doc)) => {
                        let entries = registry_entries_from_document(name, &doc);
                        debug!(package = %name, versions = entries.len(), "saving npm registry entries");
                        self.store.save_registry_entries(&entries).await?;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        failures += 1;
                        warn!(package = %name, "error fetching npm registry entry: {err}");
                    }
                }
            }
        }

        if failures == names.len() && !names.is_empty() {
            return Err(OrchestratorError::Metadata(format!(
                "failed to fetch npm registry entries for all {failures} packages"
            )));
        }
        Ok(())
    }
}
