use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use depobs_core::cluster::{ClusterApi, JobConfig, JobHandle, JobStatus};
use depobs_core::metadata::MetadataRefresher;
use depobs_core::orchestration::{
    JobController, PollPolicy, ResultReconciler, ScanServices, TaskSupervisor, run_next_scan,
};
use depobs_core::persistence::{InMemoryScanStore, ScanStore};
use depobs_core::scoring::DependencyCountScorer;
use depobs_core::{OrchestratorConfig, Result};
use depobs_model::{DepFileUrl, NewScan, RegistryEntry, ScanStatus};
use futures::FutureExt;
use serde_json::{Map, Value, json};

/// Cluster whose jobs finish immediately and deliver an `npm ls` tree for
/// the installed package straight into the store.
struct DeliveringCluster {
    store: Arc<InMemoryScanStore>,
    deliveries_per_job: usize,
    created: Mutex<Vec<JobConfig>>,
}

impl DeliveringCluster {
    fn new(store: Arc<InMemoryScanStore>) -> Self {
        Self {
            store,
            deliveries_per_job: 1,
            created: Mutex::new(Vec::new()),
        }
    }

    fn created_versions(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter_map(|config| config.env.get("PACKAGE_VERSION").cloned())
            .collect()
    }

    fn delivery(config: &JobConfig) -> Value {
        let tree = match (config.env.get("PACKAGE_NAME"), config.env.get("PACKAGE_VERSION")) {
            (Some(name), Some(version)) => {
                let mut dependencies = Map::new();
                dependencies.insert(
                    name.clone(),
                    json!({"version": version, "dependencies": {"wordwrap": {"version": "0.0.3"}}}),
                );
                json!({ "dependencies": dependencies })
            }
            _ => json!({"name": "manifest-app", "version": "0.0.1", "dependencies": {
                "express": {"version": "4.17.1", "dependencies": {"qs": {"version": "6.7.0"}}},
                "lodash": {"version": "4.17.21"}
            }}),
        };
        json!({
            "id": format!("msg-{}", config.name),
            "attributes": {"JOB_NAME": config.name},
            "data": [
                {"type": "task_result", "name": "list_metadata", "stdout": tree.to_string()},
                {"type": "task_complete"}
            ]
        })
    }
}

#[async_trait]
impl ClusterApi for DeliveringCluster {
    async fn create_job(&self, config: &JobConfig) -> Result<JobHandle> {
        self.created.lock().unwrap().push(config.clone());
        for _ in 0..self.deliveries_per_job {
            self.store.push_result(Self::delivery(config)).await;
        }
        Ok(JobHandle {
            context_name: config.context_name.clone(),
            namespace: config.namespace.clone(),
            name: config.name.clone(),
            status: JobStatus {
                active: 1,
                succeeded: 0,
                failed: 0,
            },
            env: config.env.clone(),
        })
    }

    async fn read_job(
        &self,
        context_name: Option<&str>,
        namespace: &str,
        name: &str,
    ) -> Result<JobHandle> {
        let env = self
            .created
            .lock()
            .unwrap()
            .iter()
            .find(|config| config.name == name)
            .map(|config| config.env.clone())
            .unwrap_or_default();
        Ok(JobHandle {
            context_name: context_name.map(str::to_string),
            namespace: namespace.to_string(),
            name: name.to_string(),
            status: JobStatus {
                active: 0,
                succeeded: 1,
                failed: 0,
            },
            env,
        })
    }
}

/// Registry refresher that serves a fixed version list for every package.
struct FixedRegistry {
    store: Arc<InMemoryScanStore>,
    versions: Vec<&'static str>,
}

#[async_trait]
impl MetadataRefresher for FixedRegistry {
    async fn fetch_missing(&self) -> Result<()> {
        let missing = self.store.package_names_missing_registry_entries().await?;
        self.refresh_packages(&missing).await
    }

    async fn refresh_packages(&self, names: &[String]) -> Result<()> {
        let entries: Vec<RegistryEntry> = names
            .iter()
            .flat_map(|name| {
                self.versions.iter().enumerate().map(move |(age, version)| RegistryEntry {
                    package_name: name.clone(),
                    package_version: Some(version.to_string()),
                    tarball: Some(format!("https://registry.npmjs.org/{name}/-/{name}-{version}.tgz")),
                    source_url: None,
                    git_head: None,
                    published_at: DateTime::from_timestamp(1_700_000_000 - age as i64 * 3600, 0),
                })
            })
            .collect();
        self.store.save_registry_entries(&entries).await
    }
}

fn services(
    store: Arc<InMemoryScanStore>,
    cluster: Arc<DeliveringCluster>,
    versions: Vec<&'static str>,
) -> ScanServices {
    let fast = PollPolicy::unbounded(Duration::ZERO, Duration::from_millis(1));
    let mut config = OrchestratorConfig::default();
    config.polling.idle_backoff_ms = 1;
    ScanServices {
        store: store.clone(),
        controller: JobController::new(cluster, fast),
        reconciler: ResultReconciler::new(store.clone(), store.clone(), fast),
        scorer: Arc::new(DependencyCountScorer::new(store.clone())),
        metadata: Arc::new(FixedRegistry { store, versions }),
        config: Arc::new(config),
    }
}

#[tokio::test]
async fn package_scan_runs_from_queue_to_reports() {
    let store = Arc::new(InMemoryScanStore::new());
    let cluster = Arc::new(DeliveringCluster::new(store.clone()));
    let services = services(
        store.clone(),
        cluster.clone(),
        vec!["1.2.0", "1.1.0-beta.1", "1.0.0"],
    );
    let scan = store
        .create_scan(&NewScan::npm_package("left-pad", "1.0.0"))
        .await
        .unwrap();

    let picked = run_next_scan(&services).await.unwrap();

    assert_eq!(picked, Some(scan.id));
    assert_eq!(
        store.status_history(scan.id).await,
        vec![ScanStatus::Started, ScanStatus::Succeeded]
    );
    let mut versions = cluster.created_versions();
    versions.sort();
    assert_eq!(versions, vec!["1.0.0", "1.2.0"]);

    let reports = store.reports().await;
    let left_pad: Vec<_> = reports.iter().filter(|r| r.package == "left-pad").collect();
    assert_eq!(left_pad.len(), 2);
    assert!(left_pad.iter().all(|r| r.immediate_deps == 1 && r.all_deps == 1));
    assert!(left_pad.iter().all(|r| r.release_date.is_some()));
}

#[tokio::test]
async fn manifest_scan_is_idempotent_under_duplicate_delivery() {
    let store = Arc::new(InMemoryScanStore::new());
    let cluster = Arc::new(DeliveringCluster {
        deliveries_per_job: 2,
        ..DeliveringCluster::new(store.clone())
    });
    let services = services(store.clone(), cluster, vec!["1.0.0"]);
    let scan = store
        .create_scan(&NewScan::npm_dep_files(&[DepFileUrl {
            url: "https://example.test/package.json".into(),
            filename: Some("package.json".into()),
        }]))
        .await
        .unwrap();

    run_next_scan(&services).await.unwrap();

    assert_eq!(
        store.status_history(scan.id).await,
        vec![ScanStatus::Started, ScanStatus::Succeeded]
    );
    assert_eq!(store.all_package_versions().await.len(), 4);
    let stored = store.scan(scan.id).await.unwrap().unwrap();
    let graph = store.graph(stored.graph_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(graph.links.len(), 3);

    let app = store
        .reports()
        .await
        .into_iter()
        .find(|r| r.package == "manifest-app")
        .unwrap();
    assert_eq!(app.immediate_deps, 2);
    assert_eq!(app.all_deps, 3);
}

#[tokio::test]
async fn supervised_worker_drains_the_queue_and_stops() {
    let store = Arc::new(InMemoryScanStore::new());
    let cluster = Arc::new(DeliveringCluster::new(store.clone()));
    let services = services(store.clone(), cluster, vec!["2.0.0", "1.9.0", "1.8.0"]);
    let first = store
        .create_scan(&NewScan::npm_package("left-pad", "latest"))
        .await
        .unwrap();
    let ignored = store
        .insert_scan("scan_score_npm_package", json!({"name": "scan_score_npm_package"}))
        .await;
    let second = store
        .create_scan(&NewScan::npm_package("wordwrap", "latest"))
        .await
        .unwrap();

    let mut supervisor = TaskSupervisor::new(Duration::from_millis(5));
    let task_services = services.clone();
    supervisor.register("run_next_scan", move || {
        let services = task_services.clone();
        async move {
            let picked = run_next_scan(&services).await?;
            anyhow::Ok(picked.map(|scan_id| format!("scan {scan_id}")))
        }
        .boxed()
    });
    let shutdown = supervisor.shutdown_token();
    let worker = tokio::spawn(supervisor.run());

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let done = store.scan(second.id).await.unwrap().unwrap().status;
            if done.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(10), worker)
        .await
        .unwrap()
        .unwrap();

    for scan_id in [first.id, second.id] {
        assert_eq!(
            store.status_history(scan_id).await,
            vec![ScanStatus::Started, ScanStatus::Succeeded]
        );
    }
    assert!(store.status_history(ignored.id).await.is_empty());
}
