use depobs_model::Scan;
use tracing::info;

use super::{ScanServices, score_and_save};
use crate::cluster::{JobConfig, dep_files_job_name};
use crate::error::{OrchestratorError, Result};

/// Scans a manifest and its optional lockfiles with a single job and scores
/// the resulting graph.
pub async fn scan_score_npm_dep_files(scan: &Scan, services: &ScanServices) -> Result<()> {
    let scan_id = scan.id;
    let urls: Vec<String> = scan.dep_file_urls().into_iter().map(|dep| dep.url).collect();
    let config = JobConfig::for_dep_files(
        &services.config.dep_files_job,
        dep_files_job_name(scan_id),
        scan_id,
        &urls,
    )?;
    info!(target: "scan::strategy", %scan_id, job_name = %config.name, dep_files = urls.len(), "scanning dep files");

    let job = services.controller.run_job_to_completion(&config, scan_id).await?;
    if !job.succeeded() {
        return Err(OrchestratorError::JobFailed {
            job_name: job.name.clone(),
            phase: job.phase().to_string(),
        });
    }

    let job_name = job.env_var("JOB_NAME").unwrap_or(job.name.as_str());
    let reconciled = services.reconciler.reconcile(scan_id, job_name).await?;
    let graph_id = reconciled.graphs.last().copied().ok_or_else(|| {
        OrchestratorError::Scoring(format!("job {job_name} delivered no dependency graph"))
    })?;

    info!(target: "scan::strategy", %scan_id, "fetching missing registry entries");
    services.metadata.fetch_missing().await?;

    let graph = services
        .store
        .graph(graph_id)
        .await?
        .ok_or_else(|| OrchestratorError::Internal(format!("graph {graph_id} vanished")))?;
    score_and_save(scan, &graph, services).await?;
    Ok(())
}
