//! Out-of-band job results: the delivery query seam, the delivered record
//! shape, its deserialization into persistable units and the Pub/Sub ingest
//! that writes delivered records.

mod deserialize;
mod ingest;
mod pubsub;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;

pub use deserialize::{ResultUnit, deserialize_job_results};
pub use ingest::{DeliveryIngestor, DeliverySubscriber, PUBSUB_MESSAGE_TYPE, PulledMessage, envelope};
pub use pubsub::{PubsubConfig, PubsubSubscriber};

/// Entry `type` marking the end of a job's task output.
pub const TASK_COMPLETE: &str = "task_complete";

/// One delivered record: a pubsub message envelope stored as JSON.
///
/// `data.attributes.JOB_NAME` names the job and `data.data` holds the task
/// entries in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub id: i64,
    pub inserted_at: Option<DateTime<Utc>>,
    pub data: Value,
}

impl JobResult {
    /// Task entries, or `None` for records without a `data` list.
    pub fn entries(&self) -> Option<&Vec<Value>> {
        self.data.get("data").and_then(Value::as_array)
    }

    /// Whether the last task entry is `{"type": "task_complete"}`.
    pub fn is_complete(&self) -> bool {
        self.entries()
            .and_then(|entries| entries.last())
            .and_then(|last| last.get("type"))
            .and_then(Value::as_str)
            == Some(TASK_COMPLETE)
    }

    /// Delivery identity used to process duplicate messages once. Falls back
    /// to the row id when the envelope carries no message id.
    pub fn message_id(&self) -> String {
        match self.data.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => format!("row:{}", self.id),
        }
    }

    pub fn job_name(&self) -> Option<&str> {
        self.data
            .get("attributes")
            .and_then(|attrs| attrs.get("JOB_NAME"))
            .and_then(Value::as_str)
    }
}

/// Name-keyed query over the delivery channel.
#[async_trait]
pub trait JobResultSource: Send + Sync {
    async fn results_for_job(&self, job_name: &str) -> Result<Vec<JobResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completion_requires_trailing_task_complete() {
        let done = JobResult {
            id: 1,
            inserted_at: None,
            data: json!({"data": [{"type": "task_result"}, {"type": "task_complete"}]}),
        };
        let partial = JobResult {
            id: 2,
            inserted_at: None,
            data: json!({"data": [{"type": "task_complete"}, {"type": "task_result"}]}),
        };
        let invalid = JobResult {
            id: 3,
            inserted_at: None,
            data: json!({"id": "3"}),
        };

        assert!(done.is_complete());
        assert!(!partial.is_complete());
        assert!(!invalid.is_complete());
        assert!(invalid.entries().is_none());
    }

    #[test]
    fn message_id_prefers_envelope_id() {
        let with_id = JobResult {
            id: 24,
            inserted_at: None,
            data: json!({"id": "452635538950130", "attributes": {"JOB_NAME": "scan-1-pkg-a"}}),
        };
        let without = JobResult {
            id: 25,
            inserted_at: None,
            data: json!({}),
        };
        assert_eq!(with_id.message_id(), "452635538950130");
        assert_eq!(with_id.job_name(), Some("scan-1-pkg-a"));
        assert_eq!(without.message_id(), "row:25");
    }
}
