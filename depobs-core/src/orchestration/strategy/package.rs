use depobs_model::{PackageGraph, Scan};
use futures::future::join_all;
use tracing::{error, info, warn};

use super::release::{PlannedVersion, plan_versions};
use super::{ScanServices, score_and_save};
use crate::cluster::{JobConfig, JobHandle, tarball_job_name};
use crate::error::{OrchestratorError, Result};

/// Scans every released version of a package, or only the newest one when
/// the scan asked for `latest`, with one tarball job per version.
pub async fn scan_score_npm_package(scan: &Scan, services: &ScanServices) -> Result<()> {
    let scan_id = scan.id;
    let package_name = scan.package_name().ok_or_else(|| {
        OrchestratorError::Internal(format!("scan {scan_id} has no package name"))
    })?;
    info!(target: "scan::strategy", %scan_id, package = %package_name, "refreshing registry entries");
    services
        .metadata
        .refresh_packages(std::slice::from_ref(&package_name))
        .await?;

    let entries = services.store.registry_entries(&package_name).await?;
    let planned = plan_versions(scan_id, &entries, scan.wants_latest());
    let template = &services.config.tarball_job;
    let configs: Vec<JobConfig> = planned
        .iter()
        .filter_map(|plan| match plan {
            PlannedVersion::Tarball { version, .. } => Some(JobConfig::for_tarball(
                template,
                tarball_job_name(scan_id),
                scan_id,
                &package_name,
                Some(version),
            )),
            PlannedVersion::Unsupported { .. } => None,
        })
        .collect();
    info!(
        target: "scan::strategy",
        %scan_id,
        package = %package_name,
        registry_entries = entries.len(),
        jobs = configs.len(),
        "launching tarball jobs"
    );

    let settled = join_all(
        configs
            .iter()
            .map(|config| services.controller.run_job_to_completion(config, scan_id)),
    )
    .await;
    let jobs = settled.into_iter().collect::<Result<Vec<JobHandle>>>()?;

    let mut succeeded = Vec::with_capacity(jobs.len());
    for job in jobs {
        if job.succeeded() {
            succeeded.push(job);
        } else {
            error!(
                target: "scan::strategy",
                %scan_id,
                job_name = %job.name,
                phase = %job.phase(),
                "dropping unsuccessful job"
            );
        }
    }

    for job in &succeeded {
        let job_name = job.env_var("JOB_NAME").unwrap_or(job.name.as_str());
        services.reconciler.reconcile(scan_id, job_name).await?;
    }

    info!(target: "scan::strategy", %scan_id, "fetching missing registry entries");
    services.metadata.fetch_missing().await?;

    info!(
        target: "scan::strategy",
        %scan_id,
        package_versions = succeeded.len(),
        "scoring package versions"
    );
    for job in &succeeded {
        let (Some(name), Some(version)) = (job.env_var("PACKAGE_NAME"), job.env_var("PACKAGE_VERSION"))
        else {
            warn!(target: "scan::strategy", %scan_id, job_name = %job.name, "job has no package env");
            continue;
        };

        let Some(package) = services.store.most_recent_package_version(name, version).await? else {
            error!(
                target: "scan::strategy",
                %scan_id,
                package = name,
                version,
                "package version not found; skipping scoring"
            );
            continue;
        };

        let graph = match services.store.latest_graph_with_root(package.id).await? {
            Some(graph) => graph,
            None => {
                info!(target: "scan::strategy", %scan_id, package = name, version, "package has no children");
                PackageGraph::single_node(package.id)
            }
        };
        score_and_save(scan, &graph, services).await?;
    }

    Ok(())
}
