//! Cluster job execution: job definitions, the cluster API seam and the
//! Kubernetes REST implementation.

mod job;
mod kube;

use async_trait::async_trait;

use crate::error::Result;

pub use job::{
    JobConfig, JobHandle, JobPhase, JobStatus, UNKNOWN_PACKAGE_VERSION,
    dep_files_job_name, tarball_job_name,
};
pub use kube::{KubeClientConfig, KubeClusterClient, KubeContext, job_manifest};

/// Creates and reads batch jobs on a compute cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submits `config` as a new job. Rejections surface as
    /// [`crate::error::OrchestratorError::JobCreation`].
    async fn create_job(&self, config: &JobConfig) -> Result<JobHandle>;

    /// Reads the current state of the job called `name`.
    async fn read_job(
        &self,
        context_name: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<JobHandle>;
}
