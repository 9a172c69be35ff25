use std::collections::BTreeMap;
use std::fmt;

use depobs_model::ScanId;

use crate::config::{JobTemplate, SecretVolume, VolumeMount};
use crate::error::Result;

/// Version placeholder for tarball jobs launched without a known version.
pub const UNKNOWN_PACKAGE_VERSION: &str = "unknown-package-version";

/// Job name for one tarball scan of `scan_id`, unique per call.
pub fn tarball_job_name(scan_id: ScanId) -> String {
    format!("scan-{scan_id}-pkg-{:x}", rand::random::<u32>())
}

/// Job name for the manifest scan of `scan_id`, unique per call.
pub fn dep_files_job_name(scan_id: ScanId) -> String {
    format!("scan-{scan_id}-depfiles-{:x}", rand::random::<u32>())
}

/// Everything needed to create one cluster job. Built fresh per job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobConfig {
    pub context_name: Option<String>,
    pub namespace: String,
    pub name: String,
    pub image_name: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub backoff_limit: i32,
    pub secrets: Vec<SecretVolume>,
    pub volume_mounts: Vec<VolumeMount>,
    pub service_account_name: String,
}

impl JobConfig {
    fn from_template(
        template: &JobTemplate,
        name: String,
        scan_id: ScanId,
    ) -> Self {
        let mut env = template.env.clone();
        env.insert("LANGUAGE".into(), template.language.clone());
        env.insert("PACKAGE_MANAGER".into(), template.package_manager.clone());
        env.insert("INSTALL_TARGET".into(), ".".into());
        env.insert("JOB_NAME".into(), name.clone());
        env.insert("SCAN_ID".into(), scan_id.to_string());

        Self {
            context_name: template.context_name.clone(),
            namespace: template.namespace.clone(),
            name,
            image_name: template.image_name.clone(),
            args: template.args.clone(),
            env,
            backoff_limit: template.backoff_limit,
            secrets: template.secrets.clone(),
            volume_mounts: template.volume_mounts.clone(),
            service_account_name: template.service_account_name.clone(),
        }
    }

    /// Job installing one published package version from its tarball.
    pub fn for_tarball(
        template: &JobTemplate,
        name: String,
        scan_id: ScanId,
        package_name: &str,
        package_version: Option<&str>,
    ) -> Self {
        let mut config = Self::from_template(template, name, scan_id);
        config
            .env
            .insert("PACKAGE_NAME".into(), package_name.to_string());
        config.env.insert(
            "PACKAGE_VERSION".into(),
            package_version.unwrap_or(UNKNOWN_PACKAGE_VERSION).to_string(),
        );
        config
    }

    /// Job fetching the given manifest and lockfile URLs before installing.
    pub fn for_dep_files(
        template: &JobTemplate,
        name: String,
        scan_id: ScanId,
        dep_file_urls: &[String],
    ) -> Result<Self> {
        let mut config = Self::from_template(template, name, scan_id);
        config.env.insert(
            "DEP_FILE_URLS_JSON".into(),
            serde_json::to_string(dep_file_urls)?,
        );
        Ok(config)
    }
}

/// Job status counters as reported by the cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobStatus {
    pub active: i32,
    pub succeeded: i32,
    pub failed: i32,
}

/// Coarse state of a job derived from its counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobPhase {
    Running,
    Succeeded,
    Failed,
    /// Neither active nor finished; callers treat it as a failure.
    Stopped,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobPhase::Running)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobPhase::Running => "running",
            JobPhase::Succeeded => "succeeded",
            JobPhase::Failed => "failed",
            JobPhase::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Snapshot of a created or re-read cluster job.
#[derive(Clone, Debug, PartialEq)]
pub struct JobHandle {
    pub context_name: Option<String>,
    pub namespace: String,
    pub name: String,
    pub status: JobStatus,
    /// Environment the job container was launched with.
    pub env: BTreeMap<String, String>,
}

impl JobHandle {
    /// Failure wins over success when both counters are set.
    pub fn phase(&self) -> JobPhase {
        if self.status.failed > 0 {
            JobPhase::Failed
        } else if self.status.succeeded > 0 {
            JobPhase::Succeeded
        } else if self.status.active > 0 {
            JobPhase::Running
        } else {
            JobPhase::Stopped
        }
    }

    pub fn succeeded(&self) -> bool {
        self.phase() == JobPhase::Succeeded
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }
}
