//! Runs one cluster job from creation to a terminal state.

use std::fmt;
use std::sync::Arc;

use depobs_model::ScanId;
use tracing::{debug, error, info};

use crate::cluster::{ClusterApi, JobConfig, JobHandle, JobPhase};
use crate::error::{OrchestratorError, Result};
use crate::orchestration::poll::{PollOutcome, PollPolicy, poll_until};

/// Creates exactly one job per call and watches it until it fails, succeeds
/// or stops. Jobs are never deleted; retries belong to the cluster through
/// `backoff_limit`.
#[derive(Clone)]
pub struct JobController {
    cluster: Arc<dyn ClusterApi>,
    policy: PollPolicy,
}

impl fmt::Debug for JobController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobController")
            .field("cluster", &std::any::type_name_of_val(self.cluster.as_ref()))
            .field("policy", &self.policy)
            .finish()
    }
}

impl JobController {
    pub fn new(cluster: Arc<dyn ClusterApi>, policy: PollPolicy) -> Self {
        Self { cluster, policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Returns the last observed handle once the job leaves the running
    /// phase. A [`JobPhase::Stopped`] handle is returned as-is; callers
    /// decide how to treat it.
    pub async fn run_job_to_completion(
        &self,
        config: &JobConfig,
        scan_id: ScanId,
    ) -> Result<JobHandle> {
        let job_name = config.name.as_str();
        info!(
            target: "scan::controller",
            %scan_id,
            job_name,
            image = %config.image_name,
            namespace = %config.namespace,
            "starting job"
        );

        let created = self.cluster.create_job(config).await.map_err(|err| match err {
            OrchestratorError::JobCreation { .. } => err,
            other => OrchestratorError::JobCreation {
                job_name: job_name.to_string(),
                reason: other.to_string(),
            },
        })?;
        debug!(target: "scan::controller", %scan_id, job_name, status = ?created.status, "job created");

        let cluster = &self.cluster;
        let context_name = config.context_name.as_deref();
        let namespace = config.namespace.as_str();

        poll_until(self.policy, &format!("job {job_name}"), |attempt| async move {
            let job = cluster.read_job(context_name, namespace, job_name).await?;
            match job.phase() {
                JobPhase::Failed => {
                    error!(target: "scan::controller", %scan_id, job_name, "job failed");
                    Ok(PollOutcome::Ready(job))
                }
                JobPhase::Succeeded => {
                    info!(target: "scan::controller", %scan_id, job_name, "job succeeded");
                    Ok(PollOutcome::Ready(job))
                }
                JobPhase::Stopped => {
                    error!(
                        target: "scan::controller",
                        %scan_id,
                        job_name,
                        "job stopped without failing or succeeding"
                    );
                    Ok(PollOutcome::Ready(job))
                }
                JobPhase::Running => {
                    debug!(
                        target: "scan::controller",
                        %scan_id,
                        job_name,
                        attempt,
                        active = job.status.active,
                        "job still running"
                    );
                    Ok(PollOutcome::Pending)
                }
            }
        })
        .await
    }
}
