//! Scoring seam and the dependency-count scorer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use depobs_model::{
    AdvisoryFinding, PackageGraph, PackageVersion, PackageVersionId, Report,
    SeverityCounts,
};
use tracing::debug;

use crate::error::Result;
use crate::persistence::ScanStore;

/// Produces one report per package version in a graph.
#[async_trait]
pub trait GraphScorer: Send + Sync {
    async fn score_graph(
        &self,
        graph: &PackageGraph,
    ) -> Result<BTreeMap<PackageVersionId, Report>>;
}

/// Reports direct and transitive dependency counts and advisory counts by
/// severity for every node of a graph.
#[derive(Clone)]
pub struct DependencyCountScorer {
    store: Arc<dyn ScanStore>,
}

impl fmt::Debug for DependencyCountScorer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyCountScorer")
            .field("store", &std::any::type_name_of_val(self.store.as_ref()))
            .finish()
    }
}

impl DependencyCountScorer {
    pub fn new(store: Arc<dyn ScanStore>) -> Self {
        Self { store }
    }
}

fn severity_counts<'a>(
    nodes: impl IntoIterator<Item = &'a PackageVersionId>,
    versions: &BTreeMap<PackageVersionId, PackageVersion>,
    advisories: &[AdvisoryFinding],
) -> SeverityCounts {
    let mut counts = SeverityCounts::default();
    for node in nodes {
        let Some(pv) = versions.get(node) else {
            continue;
        };
        for finding in advisories {
            let same_package = finding.advisory.package_name.as_deref() == Some(pv.name.as_str());
            if same_package && finding.impacted_versions.contains(&pv.version) {
                counts.record(finding.advisory.severity.as_deref().unwrap_or_default());
            }
        }
    }
    counts
}

fn count(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

#[async_trait]
impl GraphScorer for DependencyCountScorer {
    async fn score_graph(
        &self,
        graph: &PackageGraph,
    ) -> Result<BTreeMap<PackageVersionId, Report>> {
        let ids: Vec<PackageVersionId> = graph.distinct_package_ids().into_iter().collect();
        let versions: BTreeMap<PackageVersionId, PackageVersion> = self
            .store
            .package_versions(&ids)
            .await?
            .into_iter()
            .map(|pv| (pv.id, pv))
            .collect();

        let names: Vec<String> = versions
            .values()
            .map(|pv| pv.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let advisories = self.store.advisories_for_packages(&names).await?;

        let mut release_dates = BTreeMap::new();
        for name in &names {
            for entry in self.store.registry_entries(name).await? {
                if let (Some(version), Some(published_at)) = (entry.package_version, entry.published_at) {
                    release_dates.insert((name.clone(), version), published_at);
                }
            }
        }

        let children = graph.children();
        let scoring_date = Utc::now();
        let mut reports = BTreeMap::new();
        for (id, pv) in &versions {
            let direct: BTreeSet<PackageVersionId> =
                children.get(id).cloned().unwrap_or_default();
            let all = graph.reachable_from(*id);
            let indirect: Vec<&PackageVersionId> =
                all.iter().filter(|dep| !direct.contains(*dep)).collect();

            reports.insert(
                *id,
                Report {
                    package_version_id: *id,
                    package: pv.name.clone(),
                    version: pv.version.clone(),
                    graph_id: graph.id,
                    release_date: release_dates
                        .get(&(pv.name.clone(), pv.version.clone()))
                        .copied(),
                    scoring_date,
                    immediate_deps: count(direct.len()),
                    all_deps: count(all.len()),
                    direct_vulns: severity_counts([id], &versions, &advisories),
                    indirect_vulns: severity_counts(indirect, &versions, &advisories),
                },
            );
        }
        debug!(
            target: "scan::strategy",
            graph_id = ?graph.id,
            reports = reports.len(),
            "scored package graph"
        );
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryScanStore, SavedUnit};
    use crate::results::ResultUnit;
    use depobs_model::{Advisory, PackageSpec};

    #[tokio::test]
    async fn counts_dependencies_and_vulnerabilities_per_node() {
        let store = Arc::new(InMemoryScanStore::new());
        let app = PackageSpec::npm("app", "1.0.0");
        let lib = PackageSpec::npm("lib", "2.0.0");
        let leaf = PackageSpec::npm("leaf", "0.1.0");
        let saved = store
            .save_unit(&ResultUnit::Graph {
                root: Some(app.clone()),
                links: vec![(app.clone(), lib.clone()), (lib.clone(), leaf.clone())],
            })
            .await
            .unwrap();
        store
            .save_unit(&ResultUnit::Advisory(AdvisoryFinding {
                advisory: Advisory {
                    npm_advisory_id: 1,
                    package_name: Some("leaf".into()),
                    severity: Some("moderate".into()),
                    url: None,
                    title: None,
                    vulnerable_versions: None,
                    patched_versions: None,
                },
                impacted_versions: ["0.1.0".to_string()].into(),
            }))
            .await
            .unwrap();
        let SavedUnit::Graph(graph_id) = saved else {
            panic!("expected graph");
        };
        let graph = store.graph(graph_id).await.unwrap().unwrap();

        let reports = DependencyCountScorer::new(store.clone())
            .score_graph(&graph)
            .await
            .unwrap();
        assert_eq!(reports.len(), 3);

        let by_name = |name: &str| {
            reports
                .values()
                .find(|report| report.package == name)
                .cloned()
                .unwrap()
        };
        let app_report = by_name("app");
        assert_eq!(app_report.immediate_deps, 1);
        assert_eq!(app_report.all_deps, 2);
        assert_eq!(app_report.direct_vulns.total(), 0);
        assert_eq!(app_report.indirect_vulns.medium, 1);
        assert_eq!(app_report.graph_id, Some(graph_id));

        let leaf_report = by_name("leaf");
        assert_eq!(leaf_report.all_deps, 0);
        assert_eq!(leaf_report.direct_vulns.medium, 1);
    }
}
