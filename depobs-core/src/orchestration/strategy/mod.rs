//! Per-scan-name workflows.

mod dep_files;
mod package;
mod release;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use depobs_model::{PackageGraph, Scan, ScanKind};
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::metadata::MetadataRefresher;
use crate::orchestration::controller::JobController;
use crate::orchestration::reconciler::ResultReconciler;
use crate::persistence::ScanStore;
use crate::scoring::GraphScorer;

pub use dep_files::scan_score_npm_dep_files;
pub use package::scan_score_npm_package;
pub use release::{PlannedVersion, is_release_version, plan_versions};

/// Collaborators shared by every strategy run.
#[derive(Clone)]
pub struct ScanServices {
    pub store: Arc<dyn ScanStore>,
    pub controller: JobController,
    pub reconciler: ResultReconciler,
    pub scorer: Arc<dyn GraphScorer>,
    pub metadata: Arc<dyn MetadataRefresher>,
    pub config: Arc<OrchestratorConfig>,
}

impl fmt::Debug for ScanServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanServices")
            .field("store", &std::any::type_name_of_val(self.store.as_ref()))
            .field("controller", &self.controller)
            .field("reconciler", &self.reconciler)
            .field("scorer", &std::any::type_name_of_val(self.scorer.as_ref()))
            .field("metadata", &std::any::type_name_of_val(self.metadata.as_ref()))
            .finish()
    }
}

/// Runs the workflow selected by `kind` for `scan`.
pub async fn run_strategy(kind: ScanKind, scan: &Scan, services: &ScanServices) -> Result<()> {
    match kind {
        ScanKind::NpmPackage => scan_score_npm_package(scan, services).await,
        ScanKind::NpmDepFiles => scan_score_npm_dep_files(scan, services).await,
    }
}

/// Scores `graph` and persists one report per package version.
async fn score_and_save(scan: &Scan, graph: &PackageGraph, services: &ScanServices) -> Result<usize> {
    let reports: BTreeMap<_, _> = services.scorer.score_graph(graph).await?;
    if reports.is_empty() {
        warn!(target: "scan::strategy", scan_id = %scan.id, "scorer produced no reports");
        return Ok(0);
    }
    let reports: Vec<_> = reports.into_values().collect();
    services.store.save_reports(&reports).await?;
    info!(
        target: "scan::strategy",
        scan_id = %scan.id,
        reports = reports.len(),
        "saved package reports"
    );
    Ok(reports.len())
}
