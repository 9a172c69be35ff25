use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::error::Result;
use crate::persistence::ScanStore;

/// `type` recorded on stored Pub/Sub envelopes.
pub const PUBSUB_MESSAGE_TYPE: &str = "google.cloud.pubsub_v1.types.PubsubMessage";

/// A message pulled from the job output subscription, payload decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledMessage {
    pub ack_id: String,
    pub message_id: String,
    pub publish_time: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub data: Vec<u8>,
}

/// Pull side of the job output channel.
#[async_trait]
pub trait DeliverySubscriber: Send + Sync {
    async fn pull(&self) -> Result<Vec<PulledMessage>>;

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<()>;
}

/// The record stored for `message`. Fails when the payload is not JSON.
pub fn envelope(message: &PulledMessage) -> Result<Value> {
    let data: Value = serde_json::from_slice(&message.data)?;
    Ok(json!({
        "type": PUBSUB_MESSAGE_TYPE,
        "id": message.message_id,
        "publish_time": message.publish_time,
        "attributes": message.attributes,
        "data": data,
        "size": message.data.len(),
    }))
}

/// Stores pulled job output and acknowledges what was stored.
#[derive(Clone)]
pub struct DeliveryIngestor {
    subscriber: Arc<dyn DeliverySubscriber>,
    store: Arc<dyn ScanStore>,
}

impl fmt::Debug for DeliveryIngestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryIngestor")
            .field("subscriber", &std::any::type_name_of_val(self.subscriber.as_ref()))
            .field("store", &std::any::type_name_of_val(self.store.as_ref()))
            .finish()
    }
}

impl DeliveryIngestor {
    pub fn new(subscriber: Arc<dyn DeliverySubscriber>, store: Arc<dyn ScanStore>) -> Self {
        Self { subscriber, store }
    }

    /// Pulls one batch and returns how many messages were stored. Messages
    /// that fail to decode or save stay unacknowledged for redelivery.
    pub async fn ingest_once(&self) -> Result<usize> {
        let messages = self.subscriber.pull().await?;
        if messages.is_empty() {
            debug!(target: "scan::ingest", "no job output pulled");
            return Ok(0);
        }

        let mut ack_ids = Vec::with_capacity(messages.len());
        for message in &messages {
            let record = match envelope(message) {
                Ok(record) => record,
                Err(err) => {
                    error!(target: "scan::ingest", message_id = %message.message_id, "job output is not JSON: {err}");
                    continue;
                }
            };
            match self.store.save_job_result(&record).await {
                Ok(row_id) => {
                    info!(
                        target: "scan::ingest",
                        message_id = %message.message_id,
                        job_name = message.attributes.get("JOB_NAME").map(String::as_str).unwrap_or("unknown"),
                        row_id,
                        "saved job output"
                    );
                    ack_ids.push(message.ack_id.clone());
                }
                Err(err) => {
                    error!(target: "scan::ingest", message_id = %message.message_id, "error saving job output: {err}");
                }
            }
        }

        if !ack_ids.is_empty() {
            self.subscriber.acknowledge(&ack_ids).await?;
        }
        Ok(ack_ids.len())
    }
}
