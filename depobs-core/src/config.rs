//! Orchestrator tuning knobs and job templates.
//!
//! All fields carry defaults so a deployment only has to spell out the job
//! templates it actually runs.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::orchestration::poll::PollPolicy;

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Job watch and result wait cadences.
    pub polling: PollingConfig,
    /// Background task supervision.
    pub supervisor: SupervisorConfig,
    /// Template for per-version tarball scan jobs.
    pub tarball_job: JobTemplate,
    /// Template for manifest/lockfile scan jobs.
    pub dep_files_job: JobTemplate,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    /// Grace period between creating a job and the first read (ms).
    pub job_initial_delay_ms: u64,
    /// Delay between job status reads (ms).
    pub job_interval_ms: u64,
    /// Optional cap on job status reads; unbounded when missing.
    pub max_job_polls: Option<u32>,
    /// Delay between result delivery queries (ms).
    pub result_interval_ms: u64,
    /// Optional cap on result delivery queries; unbounded when missing.
    pub max_result_polls: Option<u32>,
    /// Sleep after finding no queued scan (ms).
    pub idle_backoff_ms: u64,
    /// How many queued scans to look at per pickup.
    pub pickup_batch: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            job_initial_delay_ms: 1_000,
            job_interval_ms: 5_000,
            max_job_polls: None,
            result_interval_ms: 5_000,
            max_result_polls: None,
            idle_backoff_ms: 5_000,
            pickup_batch: 16,
        }
    }
}

impl PollingConfig {
    pub fn job_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::from_millis(self.job_initial_delay_ms),
            interval: Duration::from_millis(self.job_interval_ms),
            max_attempts: self.max_job_polls,
        }
    }

    pub fn result_policy(&self) -> PollPolicy {
        PollPolicy {
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(self.result_interval_ms),
            max_attempts: self.max_result_polls,
        }
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Upper bound on one wait for a finished task (ms).
    pub wait_slice_ms: u64,
    /// Names of the background routines to keep alive.
    pub task_names: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            wait_slice_ms: 5_000,
            task_names: vec!["run_next_scan".to_string()],
        }
    }
}

impl SupervisorConfig {
    pub fn wait_slice(&self) -> Duration {
        Duration::from_millis(self.wait_slice_ms)
    }
}

/// A secret mounted into the job pod as a volume.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretVolume {
    pub name: String,
    pub secret_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
}

/// Static part of a job definition; per-scan fields are layered on top by
/// [`crate::cluster::JobConfig`] builders.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobTemplate {
    /// Cluster context; `None` selects the in-cluster service account.
    pub context_name: Option<String>,
    pub namespace: String,
    pub image_name: String,
    /// Container args, i.e. the repo tasks the job runs in order.
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub backoff_limit: i32,
    pub language: String,
    pub package_manager: String,
    pub secrets: Vec<SecretVolume>,
    pub volume_mounts: Vec<VolumeMount>,
    pub service_account_name: String,
}

impl Default for JobTemplate {
    fn default() -> Self {
        Self {
            context_name: None,
            namespace: "default".to_string(),
            image_name: "mozilla/dependency-observatory:node-12".to_string(),
            args: ["write_manifest", "install", "list_metadata", "audit"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            env: BTreeMap::new(),
            backoff_limit: 4,
            language: "nodejs".to_string(),
            package_manager: "npm".to_string(),
            secrets: Vec::new(),
            volume_mounts: Vec::new(),
            service_account_name: "default".to_string(),
        }
    }
}
