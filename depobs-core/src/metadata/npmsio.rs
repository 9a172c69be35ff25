//! npms.io package scores.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depobs_model::NpmsioScore;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::MetadataRefresher;
use crate::error::{OrchestratorError, Result};
use crate::persistence::ScanStore;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NpmsioConfig {
    pub base_url: String,
    /// Package names sent per `package/mget` request.
    pub package_batch_size: usize,
    pub timeout_ms: u64,
}

impl Default for NpmsioConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.npms.io/v2".to_string(),
            package_batch_size: 50,
            timeout_ms: 30_000,
        }
    }
}

fn score_detail(score: &Value, key: &str) -> Option<f64> {
    score.get("detail")?.get(key)?.as_f64()
}

/// Reads one `package/mget` response, keyed by package name, into scores.
/// Analyses without a name, version or analysis time are dropped.
pub fn npmsio_scores_from_response(response: &Value) -> Vec<NpmsioScore> {
    let Some(packages) = response.as_object() else {
        return Vec::new();
    };

    packages
        .iter()
        .filter_map(|(requested, analysis)| {
            let metadata = analysis.get("collected")?.get("metadata")?;
            let Some(analyzed_at) = analysis
                .get("analyzedAt")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            else {
                warn!(package = %requested, "npms.io analysis has no analyzedAt");
                return None;
            };
            let score = analysis.get("score");
            Some(NpmsioScore {
                package_name: metadata
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or(requested)
                    .to_string(),
                package_version: metadata.get("version")?.as_str()?.to_string(),
                analyzed_at: analyzed_at.with_timezone(&Utc),
                source_url: metadata
                    .get("links")
                    .and_then(|links| links.get("npm"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                score: score.and_then(|s| s.get("final")).and_then(Value::as_f64),
                quality: score.and_then(|s| score_detail(s, "quality")),
                popularity: score.and_then(|s| score_detail(s, "popularity")),
                maintenance: score.and_then(|s| score_detail(s, "maintenance")),
            })
        })
        .collect()
}

/// Posts batches of names to `{base_url}/package/mget` and stores the scores.
#[derive(Clone)]
pub struct NpmsioScoreFetcher {
    http: reqwest::Client,
    config: NpmsioConfig,
    store: Arc<dyn ScanStore>,
}

impl fmt::Debug for NpmsioScoreFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NpmsioScoreFetcher")
            .field("base_url", &self.config.base_url)
            .field("package_batch_size", &self.config.package_batch_size)
            .finish()
    }
}

impl NpmsioScoreFetcher {
    pub fn new(config: NpmsioConfig, store: Arc<dyn ScanStore>) -> Result<Self> {
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

    fn mget_url(&self) -> String {
        format!("{}/package/mget", self.config.base_url.trim_end_matches('/'))
    }

    async fn fetch_batch(&self, names: &[String]) -> Result<Vec<NpmsioScore>> {
        let response = self
            .http
            .post(self.mget_url())
            .json(names)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(npmsio_scores_from_response(&response))
    }
}

#[async_trait]
impl MetadataRefresher for NpmsioScoreFetcher {
    async fn fetch_missing(&self) -> Result<()> {
        let names = self.store.package_names_missing_npmsio_scores().await?;
        if names.is_empty() {
            debug!("no packages missing npms.io scores");
            return Ok(());
        }
        info!(packages = names.len(), "fetching missing npms.io scores");
        self.refresh_packages(&names).await
    }

    async fn refresh_packages(&self, names: &[String]) -> Result<()> {
        let batches: Vec<&[String]> = names.chunks(self.config.package_batch_size.max(1)).collect();
        let fetched = join_all(batches.iter().map(|batch| self.fetch_batch(batch))).await;

        let mut scores = Vec::new();
        let mut failed_batches = 0usize;
        for outcome in fetched {
            match outcome {
                Ok(batch) => scores.extend(batch),
                Err(err) => {
                    failed_batches += 1;
                    warn!("error fetching npms.io scores: {err}");
                }
            }
        }

        if !batches.is_empty() && failed_batches == batches.len() {
            return Err(OrchestratorError::Metadata(format!(
                "failed to fetch npms.io scores for all {} packages",
                names.len()
            )));
        }
        if scores.len() != names.len() {
            warn!(fetched = scores.len(), requested = names.len(), "npms.io returned fewer scores than requested");
        }
        self.store.save_npmsio_scores(&scores).await
    }
}
