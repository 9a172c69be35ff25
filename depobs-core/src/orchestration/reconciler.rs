//! Waits for a job's out-of-band results and persists them.

use std::fmt;
use std::sync::Arc;

use depobs_model::{PackageGraphId, PackageVersionId, ScanId};
use tracing::{debug, info};

use crate::error::Result;
use crate::orchestration::poll::{PollOutcome, PollPolicy, poll_until};
use crate::persistence::{SavedUnit, ScanStore};
use crate::results::{JobResult, JobResultSource, deserialize_job_results};

/// What one job's delivered output turned into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciledJob {
    pub job_name: String,
    pub package_versions: Vec<PackageVersionId>,
    pub graphs: Vec<PackageGraphId>,
    pub advisories: Vec<i64>,
}

#[derive(Clone)]
pub struct ResultReconciler {
    source: Arc<dyn JobResultSource>,
    store: Arc<dyn ScanStore>,
    policy: PollPolicy,
}

impl fmt::Debug for ResultReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultReconciler")
            .field("source", &std::any::type_name_of_val(self.source.as_ref()))
            .field("store", &std::any::type_name_of_val(self.store.as_ref()))
            .field("policy", &self.policy)
            .finish()
    }
}

impl ResultReconciler {
    pub fn new(
        source: Arc<dyn JobResultSource>,
        store: Arc<dyn ScanStore>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            source,
            store,
            policy,
        }
    }

    /// Polls the delivery channel until some record for `job_name` ends in
    /// `task_complete` and returns everything delivered so far.
    pub async fn wait_for_results(
        &self,
        scan_id: ScanId,
        job_name: &str,
    ) -> Result<Vec<JobResult>> {
        let source = &self.source;
        poll_until(self.policy, &format!("results of {job_name}"), |attempt| async move {
            let results = source.results_for_job(job_name).await?;
            if results.iter().any(JobResult::is_complete) {
                debug!(
                    target: "scan::reconcile",
                    %scan_id,
                    job_name,
                    records = results.len(),
                    "job results delivered"
                );
                Ok(PollOutcome::Ready(results))
            } else {
                info!(
                    target: "scan::reconcile",
                    %scan_id,
                    job_name,
                    attempt,
                    records = results.len(),
                    "waiting for job results"
                );
                Ok(PollOutcome::Pending)
            }
        })
        .await
    }

    /// Waits for `job_name`'s results, saves each unit once and links every
    /// saved graph to the scan.
    pub async fn reconcile(&self, scan_id: ScanId, job_name: &str) -> Result<ReconciledJob> {
        let results = self.wait_for_results(scan_id, job_name).await?;
        let units = deserialize_job_results(&results);
        info!(
            target: "scan::reconcile",
            %scan_id,
            job_name,
            units = units.len(),
            "saving job results"
        );

        let mut reconciled = ReconciledJob {
            job_name: job_name.to_string(),
            ..ReconciledJob::default()
        };
        for unit in &units {
            match self.store.save_unit(unit).await? {
                SavedUnit::PackageVersion(id) => reconciled.package_versions.push(id),
                SavedUnit::Graph(graph_id) => {
                    self.store.link_graph_to_scan(scan_id, graph_id).await?;
                    debug!(target: "scan::reconcile", %scan_id, %graph_id, "linked graph to scan");
                    reconciled.graphs.push(graph_id);
                }
                SavedUnit::Advisory(id) => reconciled.advisories.push(id),
            }
        }
        Ok(reconciled)
    }
}
