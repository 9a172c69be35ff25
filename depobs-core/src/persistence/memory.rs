//! Process-local [`ScanStore`] backing the orchestration tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use depobs_model::{
    AdvisoryFinding, NewScan, NpmsioScore, PackageGraph, PackageGraphId, PackageLink,
    PackageLinkId, PackageSpec, PackageVersion, PackageVersionId, RegistryEntry,
    Report, Scan, ScanId, ScanStatus,
};
use serde_json::Value;
use tokio::sync::RwLock;

use super::{SavedUnit, ScanStore};
use crate::error::{OrchestratorError, Result};
use crate::results::{JobResult, JobResultSource, ResultUnit};

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    scans: BTreeMap<ScanId, Scan>,
    status_history: Vec<(ScanId, ScanStatus)>,
    package_versions: Vec<PackageVersion>,
    links: Vec<PackageLink>,
    graphs: Vec<PackageGraph>,
    advisories: BTreeMap<i64, AdvisoryFinding>,
    registry: BTreeMap<String, Vec<RegistryEntry>>,
    npmsio_scores: Vec<NpmsioScore>,
    reports: Vec<Report>,
    results: Vec<JobResult>,
    saved_units: usize,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn package_version_id(&mut self, spec: &PackageSpec) -> PackageVersionId {
        if let Some(existing) = self.package_versions.iter().find(|pv| {
            pv.name == spec.name && pv.version == spec.version && pv.language == spec.language
        }) {
            return existing.id;
        }
        let id = PackageVersionId(self.next_id());
        self.package_versions.push(PackageVersion {
            id,
            name: spec.name.clone(),
            version: spec.version.clone(),
            language: spec.language.clone(),
        });
        id
    }

    fn link(&mut self, parent_id: PackageVersionId, child_id: PackageVersionId) -> PackageLink {
        if let Some(existing) = self
            .links
            .iter()
            .find(|link| link.parent_id == parent_id && link.child_id == child_id)
        {
            return *existing;
        }
        let link = PackageLink {
            id: PackageLinkId(self.next_id()),
            parent_id,
            child_id,
        };
        self.links.push(link);
        link
    }
}

/// Newest first; entries without a publish time sort last.
fn sort_newest_first(entries: &mut [RegistryEntry]) {
    entries.sort_by(|a, b| {
        match (a.published_at, b.published_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    });
}

#[derive(Debug, Default)]
pub struct InMemoryScanStore {
    state: RwLock<MemoryState>,
}

impl InMemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a queued scan with arbitrary, possibly ineligible, params.
    pub async fn insert_scan(&self, name: &str, params: Value) -> Scan {
        let mut state = self.state.write().await;
        let now = Utc::now();
        let scan = Scan {
            id: ScanId(state.next_id()),
            name: name.to_string(),
            params,
            status: ScanStatus::Queued,
            graph_id: None,
            inserted_at: now,
            updated_at: now,
        };
        state.scans.insert(scan.id, scan.clone());
        scan
    }

    /// Every status written for `scan_id`, in write order.
    pub async fn status_history(&self, scan_id: ScanId) -> Vec<ScanStatus> {
        self.state
            .read()
            .await
            .status_history
            .iter()
            .filter(|(id, _)| *id == scan_id)
            .map(|(_, status)| *status)
            .collect()
    }

    /// Appends a delivered record, as the pubsub subscriber would.
    pub async fn push_result(&self, data: Value) -> i64 {
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.results.push(JobResult {
            id,
            inserted_at: Some(Utc::now()),
            data,
        });
        id
    }

    pub async fn npmsio_scores(&self) -> Vec<NpmsioScore> {
        self.state.read().await.npmsio_scores.clone()
    }

    pub async fn reports(&self) -> Vec<Report> {
        self.state.read().await.reports.clone()
    }

    pub async fn saved_unit_count(&self) -> usize {
        self.state.read().await.saved_units
    }

    pub async fn graph_count(&self) -> usize {
        self.state.read().await.graphs.len()
    }

    pub async fn all_package_versions(&self) -> Vec<PackageVersion> {
        self.state.read().await.package_versions.clone()
    }

    pub async fn advisories(&self) -> Vec<AdvisoryFinding> {
        self.state.read().await.advisories.values().cloned().collect()
    }
}

#[async_trait]
impl JobResultSource for InMemoryScanStore {
    async fn results_for_job(&self, job_name: &str) -> Result<Vec<JobResult>> {
        Ok(self
            .state
            .read()
            .await
            .results
            .iter()
            .filter(|result| result.job_name() == Some(job_name))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScanStore for InMemoryScanStore {
    async fn queued_scans(&self, after: Option<ScanId>, limit: u32) -> Result<Vec<Scan>> {
        let state = self.state.read().await;
        Ok(state
            .scans
            .values()
            .filter(|scan| scan.status == ScanStatus::Queued)
            .filter(|scan| after.is_none_or(|after| scan.id > after))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn scan(&self, scan_id: ScanId) -> Result<Option<Scan>> {
        Ok(self.state.read().await.scans.get(&scan_id).cloned())
    }

    async fn create_scan(&self, new_scan: &NewScan) -> Result<Scan> {
        Ok(self.insert_scan(&new_scan.name, new_scan.params.clone()).await)
    }

    async fn save_scan_status(&self, scan_id: ScanId, status: ScanStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let scan = state
            .scans
            .get_mut(&scan_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("unknown scan {scan_id}")))?;
        scan.status = status;
        scan.updated_at = Utc::now();
        state.status_history.push((scan_id, status));
        Ok(())
    }

    async fn link_graph_to_scan(
        &self,
        scan_id: ScanId,
        graph_id: PackageGraphId,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let scan = state
            .scans
            .get_mut(&scan_id)
            .ok_or_else(|| OrchestratorError::Internal(format!("unknown scan {scan_id}")))?;
        scan.graph_id = Some(graph_id);
        scan.updated_at = Utc::now();
        Ok(())
    }

    async fn save_unit(&self, unit: &ResultUnit) -> Result<SavedUnit> {
        let mut state = self.state.write().await;
        state.saved_units += 1;
        let saved = match unit {
            ResultUnit::PackageVersion(spec) => {
                SavedUnit::PackageVersion(state.package_version_id(spec))
            }
            ResultUnit::Graph { root, links } => {
                let root_id = root.as_ref().map(|spec| state.package_version_id(spec));
                let mut saved_links = Vec::with_capacity(links.len());
                for (parent, child) in links {
                    let parent_id = state.package_version_id(parent);
                    let child_id = state.package_version_id(child);
                    saved_links.push(state.link(parent_id, child_id));
                }
                saved_links.sort_by_key(|link| link.id);
                saved_links.dedup_by_key(|link| link.id);
                if let Some(existing) = state
                    .graphs
                    .iter()
                    .filter(|graph| {
                        graph.root_package_version_id == root_id && graph.links == saved_links
                    })
                    .find_map(|graph| graph.id)
                {
                    return Ok(SavedUnit::Graph(existing));
                }
                let id = PackageGraphId(state.next_id());
                state.graphs.push(PackageGraph {
                    id: Some(id),
                    root_package_version_id: root_id,
                    links: saved_links,
                });
                SavedUnit::Graph(id)
            }
            ResultUnit::Advisory(finding) => {
                let id = finding.advisory.npm_advisory_id;
                state
                    .advisories
                    .entry(id)
                    .and_modify(|existing| {
                        existing.advisory = finding.advisory.clone();
                        existing
                            .impacted_versions
                            .extend(finding.impacted_versions.iter().cloned());
                    })
                    .or_insert_with(|| finding.clone());
                SavedUnit::Advisory(id)
            }
        };
        Ok(saved)
    }

    async fn most_recent_package_version(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<PackageVersion>> {
        Ok(self
            .state
            .read()
            .await
            .package_versions
            .iter()
            .rev()
            .find(|pv| pv.name == name && pv.version == version)
            .cloned())
    }

    async fn package_versions(&self, ids: &[PackageVersionId]) -> Result<Vec<PackageVersion>> {
        Ok(self
            .state
            .read()
            .await
            .package_versions
            .iter()
            .filter(|pv| ids.contains(&pv.id))
            .cloned()
            .collect())
    }

    async fn latest_graph_with_root(&self, root: PackageVersionId) -> Result<Option<PackageGraph>> {
        Ok(self
            .state
            .read()
            .await
            .graphs
            .iter()
            .rev()
            .find(|graph| graph.root_package_version_id == Some(root))
            .cloned())
    }

    async fn graph(&self, graph_id: PackageGraphId) -> Result<Option<PackageGraph>> {
        Ok(self
            .state
            .read()
            .await
            .graphs
            .iter()
            .find(|graph| graph.id == Some(graph_id))
            .cloned())
    }

    async fn registry_entries(&self, package_name: &str) -> Result<Vec<RegistryEntry>> {
        Ok(self
            .state
            .read()
            .await
            .registry
            .get(package_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_registry_entries(&self, entries: &[RegistryEntry]) -> Result<()> {
        let mut state = self.state.write().await;
        for entry in entries {
            let stored = state.registry.entry(entry.package_name.clone()).or_default();
            match stored.iter_mut().find(|existing| {
                existing.package_version.is_some()
                    && existing.package_version == entry.package_version
            }) {
                Some(existing) => *existing = entry.clone(),
                None => stored.push(entry.clone()),
            }
        }
        for stored in state.registry.values_mut() {
            sort_newest_first(stored);
        }
        Ok(())
    }

    async fn package_names_missing_registry_entries(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .package_versions
            .iter()
            .filter(|pv| !state.registry.contains_key(&pv.name))
            .map(|pv| pv.name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn save_npmsio_scores(&self, scores: &[NpmsioScore]) -> Result<()> {
        let mut state = self.state.write().await;
        for score in scores {
            let exists = state.npmsio_scores.iter().any(|stored| {
                stored.package_name == score.package_name
                    && stored.package_version == score.package_version
                    && stored.analyzed_at == score.analyzed_at
            });
            if !exists {
                state.npmsio_scores.push(score.clone());
            }
        }
        Ok(())
    }

    async fn package_names_missing_npmsio_scores(&self) -> Result<Vec<String>> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state
            .package_versions
            .iter()
            .filter(|pv| !state.npmsio_scores.iter().any(|score| score.package_name == pv.name))
            .map(|pv| pv.name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn save_job_result(&self, envelope: &Value) -> Result<i64> {
        Ok(self.push_result(envelope.clone()).await)
    }

    async fn advisories_for_packages(&self, names: &[String]) -> Result<Vec<AdvisoryFinding>> {
        Ok(self
            .state
            .read()
            .await
            .advisories
            .values()
            .filter(|finding| {
                finding
                    .advisory
                    .package_name
                    .as_ref()
                    .is_some_and(|name| names.contains(name))
            })
            .cloned()
            .collect())
    }

    async fn save_reports(&self, reports: &[Report]) -> Result<()> {
        self.state.write().await.reports.extend_from_slice(reports);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn entry(version: &str, day: Option<u32>) -> RegistryEntry {
        RegistryEntry {
            package_name: "left-pad".into(),
            package_version: Some(version.into()),
            tarball: Some(format!("https://registry.test/left-pad-{version}.tgz")),
            source_url: None,
            git_head: None,
            published_at: day.map(|d| Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn registry_entries_read_back_newest_first() {
        let store = InMemoryScanStore::new();
        store
            .save_registry_entries(&[entry("1.0.0", Some(1)), entry("1.2.0", Some(3)), entry("0.9.0", None)])
            .await
            .unwrap();
        store.save_registry_entries(&[entry("1.1.0", Some(2))]).await.unwrap();

        let versions: Vec<_> = store
            .registry_entries("left-pad")
            .await
            .unwrap()
            .into_iter()
            .filter_map(|entry| entry.package_version)
            .collect();
        assert_eq!(versions, vec!["1.2.0", "1.1.0", "1.0.0", "0.9.0"]);
    }

    #[tokio::test]
    async fn package_versions_links_and_graphs_are_get_or_create() {
        let store = InMemoryScanStore::new();
        let a = PackageSpec::npm("a", "1.0.0");
        let b = PackageSpec::npm("b", "2.0.0");
        let graph = ResultUnit::Graph {
            root: Some(a.clone()),
            links: vec![(a.clone(), b.clone())],
        };

        store.save_unit(&ResultUnit::PackageVersion(a.clone())).await.unwrap();
        let first = store.save_unit(&graph).await.unwrap();
        let second = store.save_unit(&graph).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.all_package_versions().await.len(), 2);
        assert_eq!(store.state.read().await.graphs.len(), 1);
        let SavedUnit::Graph(graph_id) = second else {
            panic!("expected graph id");
        };
        let stored = store.graph(graph_id).await.unwrap().unwrap();
        assert_eq!(stored.links.len(), 1);
        assert_eq!(store.state.read().await.links.len(), 1);
    }

    #[tokio::test]
    async fn queued_scans_skip_started_ones() {
        let store = InMemoryScanStore::new();
        let first = store.insert_scan("scan_score_npm_package", json!({})).await;
        let second = store.insert_scan("scan_score_npm_package", json!({})).await;
        store.save_scan_status(first.id, ScanStatus::Started).await.unwrap();

        let queued = store.queued_scans(None, 10).await.unwrap();
        assert_eq!(queued.iter().map(|scan| scan.id).collect::<Vec<_>>(), vec![second.id]);
        assert_eq!(store.status_history(first.id).await, vec![ScanStatus::Started]);
    }

    #[tokio::test]
    async fn queued_scans_page_by_id() {
        let store = InMemoryScanStore::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(store.insert_scan("scan_score_npm_package", json!({})).await.id);
        }

        let first_page = store.queued_scans(None, 2).await.unwrap();
        let second_page = store.queued_scans(Some(first_page[1].id), 2).await.unwrap();

        assert_eq!(first_page.iter().map(|scan| scan.id).collect::<Vec<_>>(), ids[..2].to_vec());
        assert_eq!(second_page.iter().map(|scan| scan.id).collect::<Vec<_>>(), ids[2..4].to_vec());
    }
}
