//! Shared fakes for orchestration unit tests.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::Result;
use crate::metadata::MetadataRefresher;

/// Metadata refresher that does nothing.
#[derive(Debug, Default)]
pub struct NoopMetadata;

#[async_trait]
impl MetadataRefresher for NoopMetadata {
    async fn fetch_missing(&self) -> Result<()> {
        Ok(())
    }

    async fn refresh_packages(&self, _names: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Records which packages were refreshed and how often missing data was
/// fetched.
#[derive(Debug, Default)]
pub struct RecordingMetadata {
    pub refreshed: Mutex<Vec<String>>,
    pub fetch_missing_calls: Mutex<u32>,
}

#[async_trait]
impl MetadataRefresher for RecordingMetadata {
    async fn fetch_missing(&self) -> Result<()> {
        *self.fetch_missing_calls.lock().unwrap() += 1;
        Ok(())
    }

    async fn refresh_packages(&self, names: &[String]) -> Result<()> {
        self.refreshed.lock().unwrap().extend_from_slice(names);
        Ok(())
    }
}

/// Complete delivery for `job_name` whose `npm ls` tree is `a@1.0.0 -> b@2.0.0`.
pub fn graph_delivery(message_id: &str, job_name: &str) -> Value {
    tree_delivery(
        message_id,
        job_name,
        json!({"dependencies": {"a": {"version": "1.0.0", "dependencies": {"b": {"version": "2.0.0"}}}}}),
    )
}

/// Complete delivery for `job_name` carrying `tree` as `list_metadata` output.
pub fn tree_delivery(message_id: &str, job_name: &str, tree: Value) -> Value {
    json!({
        "id": message_id,
        "attributes": {"JOB_NAME": job_name},
        "data": [
            {"type": "task_result", "name": "list_metadata", "stdout": tree.to_string()},
            {"type": "task_complete"}
        ]
    })
}
