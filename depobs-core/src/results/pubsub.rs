//! Google Cloud Pub/Sub pull subscription over the REST API.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ingest::{DeliverySubscriber, PulledMessage};
use crate::error::{OrchestratorError, Result};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PubsubConfig {
    pub base_url: String,
    pub project_id: Option<String>,
    /// Subscription id, or a full `projects/{project}/subscriptions/{id}` path.
    pub subscription: Option<String>,
    /// Static OAuth token; when unset tokens come from `token_url`.
    pub access_token: Option<String>,
    /// GCE metadata server token endpoint.
    pub token_url: String,
    pub max_messages: u32,
    pub timeout_ms: u64,
}

impl Default for PubsubConfig {
    fn default() -> Self {
        Self {
            base_url: "https://pubsub.googleapis.com/v1".to_string(),
            project_id: None,
            subscription: None,
            access_token: None,
            token_url: "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token".to_string(),
            max_messages: 50,
            timeout_ms: 90_000,
        }
    }
}

impl PubsubConfig {
    pub fn subscription_path(&self) -> Option<String> {
        let subscription = self.subscription.as_deref()?;
        if subscription.starts_with("projects/") {
            return Some(subscription.to_string());
        }
        let project = self.project_id.as_deref()?;
        Some(format!("projects/{project}/subscriptions/{subscription}"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    message_id: String,
    publish_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct PubsubSubscriber {
    http: reqwest::Client,
    config: PubsubConfig,
    subscription: String,
    token: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for PubsubSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubsubSubscriber")
            .field("base_url", &self.config.base_url)
            .field("subscription", &self.subscription)
            .field("static_token", &self.config.access_token.is_some())
            .finish()
    }
}

impl PubsubSubscriber {
    pub fn new(config: PubsubConfig) -> Result<Self> {
        let subscription = config.subscription_path().ok_or_else(|| {
            OrchestratorError::Delivery(
                "pubsub subscription is not configured; set pubsub.subscription and pubsub.project_id"
                    .to_string(),
            )
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("depobs-worker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            config,
            subscription,
            token: Mutex::new(None),
        })
    }

    fn action_url(&self, action: &str) -> String {
        format!(
            "{}/{}:{action}",
            self.config.base_url.trim_end_matches('/'),
            self.subscription
        )
    }

    async fn bearer_token(&self) -> Result<String> {
        if let Some(token) = &self.config.access_token {
            return Ok(token.clone());
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.expires_at > Instant::now()) {
            return Ok(token.value.clone());
        }

        let fetched: MetadataToken = self
            .http
            .get(&self.config.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(expires_in = fetched.expires_in, "fetched pubsub access token");
        let value = fetched.access_token.clone();
        *cached = Some(CachedToken {
            value: fetched.access_token,
            expires_at: Instant::now() + Duration::from_secs(fetched.expires_in.saturating_sub(60)),
        });
        Ok(value)
    }
}

#[async_trait]
impl DeliverySubscriber for PubsubSubscriber {
    async fn pull(&self) -> Result<Vec<PulledMessage>> {
        let token = self.bearer_token().await?;
        let response: PullResponse = self
            .http
            .post(self.action_url("pull"))
            .bearer_auth(token)
            .json(&json!({"maxMessages": self.config.max_messages}))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .received_messages
            .into_iter()
            .filter_map(|received| match STANDARD.decode(&received.message.data) {
                Ok(data) => Some(PulledMessage {
                    ack_id: received.ack_id,
                    message_id: received.message.message_id,
                    publish_time: received.message.publish_time,
                    attributes: received.message.attributes,
                    data,
                }),
                Err(err) => {
                    warn!(
                        target: "scan::ingest",
                        message_id = %received.message.message_id,
                        "message data is not base64: {err}"
                    );
                    None
                }
            })
            .collect())
    }

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<()> {
        let token = self.bearer_token().await?;
        self.http
            .post(self.action_url("acknowledge"))
            .bearer_auth(token)
            .json(&json!({"ackIds": ack_ids}))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
