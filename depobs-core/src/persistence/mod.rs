//! Persistence seam for scans, job output, registry metadata and reports.

mod memory;
mod postgres;

use async_trait::async_trait;
use depobs_model::{
    AdvisoryFinding, NewScan, NpmsioScore, PackageGraph, PackageGraphId, PackageVersion,
    PackageVersionId, RegistryEntry, Report, Scan, ScanId, ScanStatus,
};
use serde_json::Value;

use crate::error::Result;
use crate::results::ResultUnit;

pub use memory::InMemoryScanStore;
pub use postgres::{MIGRATOR, PostgresScanStore};

/// Identity assigned to a persisted [`ResultUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedUnit {
    PackageVersion(PackageVersionId),
    Graph(PackageGraphId),
    Advisory(i64),
}

/// Relational persistence used by the orchestration core.
///
/// Writes are per entity; package versions, links, graphs and advisories
/// are get-or-create so replaying a job's output does not duplicate them.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Queued scans with ids above `after`, lowest id first.
    async fn queued_scans(&self, after: Option<ScanId>, limit: u32) -> Result<Vec<Scan>>;

    async fn scan(&self, scan_id: ScanId) -> Result<Option<Scan>>;

    async fn create_scan(&self, new_scan: &NewScan) -> Result<Scan>;

    async fn save_scan_status(&self, scan_id: ScanId, status: ScanStatus) -> Result<()>;

    async fn link_graph_to_scan(
        &self,
        scan_id: ScanId,
        graph_id: PackageGraphId,
    ) -> Result<()>;

    async fn save_unit(&self, unit: &ResultUnit) -> Result<SavedUnit>;

    /// Most recently inserted row for `name` and `version`.
    async fn most_recent_package_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<PackageVersion>>;

    async fn package_versions(&self, ids: &[PackageVersionId]) -> Result<Vec<PackageVersion>>;

    /// Most recently inserted graph rooted at `root`.
    async fn latest_graph_with_root(&self, root: PackageVersionId) -> Result<Option<PackageGraph>>;

    async fn graph(&self, graph_id: PackageGraphId) -> Result<Option<PackageGraph>>;

    /// Registry entries for `package_name`, newest first.
    async fn registry_entries(&self, package_name: &str) -> Result<Vec<RegistryEntry>>;

    async fn save_registry_entries(&self, entries: &[RegistryEntry]) -> Result<()>;

    /// Names of package versions without any stored registry entry.
    async fn package_names_missing_registry_entries(&self) -> Result<Vec<String>>;

    async fn save_npmsio_scores(&self, scores: &[NpmsioScore]) -> Result<()>;

    /// Names of package versions without any stored npms.io score.
    async fn package_names_missing_npmsio_scores(&self) -> Result<Vec<String>>;

    /// Stores one delivered message envelope and returns its row id.
    async fn save_job_result(&self, envelope: &Value) -> Result<i64>;

    async fn advisories_for_packages(&self, names: &[String]) -> Result<Vec<AdvisoryFinding>>;

    async fn save_reports(&self, reports: &[Report]) -> Result<()>;
}
