//! Scan pickup and the queued -> started -> terminal lifecycle.

use depobs_model::{Scan, ScanId, ScanStatus};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::orchestration::strategy::{ScanServices, run_strategy};

/// How a pickup attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Params were ineligible or the name unknown; status left untouched.
    Ignored,
    Succeeded,
    Failed,
}

/// Runs `scan` through its strategy, persisting `started` first and the
/// terminal status last. Strategy errors are logged and recorded as a
/// failed scan; only persistence errors on the status writes propagate.
pub async fn run_scan(scan: &Scan, services: &ScanServices) -> Result<ScanOutcome> {
    let scan_id = scan.id;
    if scan.params().is_none() {
        warn!(target: "scan::state", %scan_id, name = %scan.name, "ignoring scan with ineligible params");
        return Ok(ScanOutcome::Ignored);
    }
    let Some(kind) = scan.kind() else {
        warn!(target: "scan::state", %scan_id, name = %scan.name, "ignoring scan with unknown name");
        return Ok(ScanOutcome::Ignored);
    };

    let started = scan.status.transition(ScanStatus::Started)?;
    services.store.save_scan_status(scan_id, started).await?;
    info!(target: "scan::state", %scan_id, %kind, "scan started");

    match run_strategy(kind, scan, services).await {
        Ok(()) => {
            let status = started.transition(ScanStatus::Succeeded)?;
            services.store.save_scan_status(scan_id, status).await?;
            info!(target: "scan::state", %scan_id, %kind, "scan succeeded");
            Ok(ScanOutcome::Succeeded)
        }
        Err(err) => {
            let chain = anyhow::Error::from(err);
            error!(target: "scan::state", %scan_id, %kind, error = ?chain, "scan failed");
            let status = started.transition(ScanStatus::Failed)?;
            services.store.save_scan_status(scan_id, status).await?;
            Ok(ScanOutcome::Failed)
        }
    }
}

fn is_runnable(scan: &Scan) -> bool {
    scan.params().is_some() && scan.kind().is_some()
}

/// Oldest runnable queued scan, paging past ineligible ones.
async fn next_runnable_scan(services: &ScanServices) -> Result<Option<Scan>> {
    let batch = services.config.polling.pickup_batch.max(1);
    let mut after = None;
    loop {
        let page = services.store.queued_scans(after, batch).await?;
        for scan in &page {
            if is_runnable(scan) {
                return Ok(Some(scan.clone()));
            }
            debug!(target: "scan::state", scan_id = %scan.id, name = %scan.name, "skipping ineligible queued scan");
        }
        match page.last() {
            Some(last) if page.len() == batch as usize => after = Some(last.id),
            _ => return Ok(None),
        }
    }
}

/// Picks the oldest runnable queued scan and runs it to a terminal status.
///
/// Returns the scan id, or `None` after sleeping the idle backoff when no
/// queued scan is runnable.
pub async fn run_next_scan(services: &ScanServices) -> Result<Option<ScanId>> {
    let Some(scan) = next_runnable_scan(services).await? else {
        let polling = &services.config.polling;
        debug!(
            target: "scan::state",
            backoff_ms = polling.idle_backoff_ms,
            "no runnable scan queued"
        );
        tokio::time::sleep(polling.idle_backoff()).await;
        return Ok(None);
    };

    run_scan(&scan, services).await?;
    Ok(Some(scan.id))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::orchestration::controller::JobController;
    use crate::orchestration::controller::fakes::{RecordingCluster, status};
    use crate::orchestration::poll::PollPolicy;
    use crate::orchestration::reconciler::ResultReconciler;
    use crate::orchestration::testing::{NoopMetadata, graph_delivery};
    use crate::persistence::{InMemoryScanStore, ScanStore};
    use crate::scoring::DependencyCountScorer;

    fn services(store: Arc<InMemoryScanStore>, cluster: Arc<RecordingCluster>) -> ScanServices {
        let fast = PollPolicy::unbounded(Duration::ZERO, Duration::from_millis(1));
        let mut config = OrchestratorConfig::default();
        config.polling.idle_backoff_ms = 1;
        ScanServices {
            store: store.clone(),
            controller: JobController::new(cluster, fast),
            reconciler: ResultReconciler::new(store.clone(), store.clone(), fast),
            scorer: Arc::new(DependencyCountScorer::new(store)),
            metadata: Arc::new(NoopMetadata),
            config: Arc::new(config),
        }
    }

    fn dep_files_params() -> serde_json::Value {
        json!({
            "name": "scan_score_npm_dep_files",
            "args": [],
            "kwargs": {"dep_file_urls": [{"url": "https://example.test/package.json", "filename": "package.json"}]}
        })
    }

    #[tokio::test]
    async fn ineligible_params_leave_scan_queued() {
        let store = Arc::new(InMemoryScanStore::new());
        let cluster = Arc::new(RecordingCluster::succeeding());
        let scan = store
            .insert_scan("scan_score_npm_package", json!({"name": "scan_score_npm_package", "args": ["a"]}))
            .await;

        let outcome = run_scan(&scan, &services(store.clone(), cluster.clone())).await.unwrap();

        assert_eq!(outcome, ScanOutcome::Ignored);
        assert!(store.status_history(scan.id).await.is_empty());
        assert_eq!(store.scan(scan.id).await.unwrap().unwrap().status, ScanStatus::Queued);
        assert!(cluster.created_names().is_empty());
    }

    #[tokio::test]
    async fn unknown_name_leaves_scan_queued() {
        let store = Arc::new(InMemoryScanStore::new());
        let cluster = Arc::new(RecordingCluster::succeeding());
        let scan = store
            .insert_scan("scan_score_pypi_package", json!({"name": "x", "args": [], "kwargs": {}}))
            .await;

        let outcome = run_scan(&scan, &services(store.clone(), cluster)).await.unwrap();

        assert_eq!(outcome, ScanOutcome::Ignored);
        assert!(store.status_history(scan.id).await.is_empty());
    }

    #[tokio::test]
    async fn strategy_error_marks_scan_failed_after_started() {
        let store = Arc::new(InMemoryScanStore::new());
        let cluster = Arc::new(RecordingCluster::default());
        cluster.set_default_script(vec![status(0, 0, 1)]);
        let scan = store.insert_scan("scan_score_npm_dep_files", dep_files_params()).await;

        let outcome = run_scan(&scan, &services(store.clone(), cluster)).await.unwrap();

        assert_eq!(outcome, ScanOutcome::Failed);
        assert_eq!(
            store.status_history(scan.id).await,
            vec![ScanStatus::Started, ScanStatus::Failed]
        );
    }

    #[tokio::test]
    async fn successful_strategy_marks_scan_succeeded() {
        let store = Arc::new(InMemoryScanStore::new());
        let cluster = Arc::new(RecordingCluster::succeeding());
        let scan = store.insert_scan("scan_score_npm_dep_files", dep_files_params()).await;
        let services = services(store.clone(), cluster.clone());

        let runner = {
            let store = store.clone();
            let cluster = cluster.clone();
            async move {
                loop {
                    if let Some(name) = cluster.created_names().first().cloned() {
                        store.push_result(graph_delivery("m1", &name)).await;
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        };
        let (outcome, ()) = tokio::join!(run_scan(&scan, &services), runner);

        assert_eq!(outcome.unwrap(), ScanOutcome::Succeeded);
        assert_eq!(
            store.status_history(scan.id).await,
            vec![ScanStatus::Started, ScanStatus::Succeeded]
        );
        let stored = store.scan(scan.id).await.unwrap().unwrap();
        assert!(stored.graph_id.is_some());
        assert_eq!(store.reports().await.len(), 2);
    }

    #[tokio::test]
    async fn next_scan_skips_ineligible_head_of_queue() {
        let store = Arc::new(InMemoryScanStore::new());
        let cluster = Arc::new(RecordingCluster::default());
        cluster.set_default_script(vec![status(0, 0, 1)]);
        let ineligible = store.insert_scan("scan_score_npm_dep_files", json!({})).await;
        let runnable = store.insert_scan("scan_score_npm_dep_files", dep_files_params()).await;

        let picked = run_next_scan(&services(store.clone(), cluster)).await.unwrap();

        assert_eq!(picked, Some(runnable.id));
        assert!(store.status_history(ineligible.id).await.is_empty());
    }

    #[tokio::test]
    async fn next_scan_pages_past_a_full_batch_of_ineligible_scans() {
        let store = Arc::new(InMemoryScanStore::new());
        let cluster = Arc::new(RecordingCluster::default());
        cluster.set_default_script(vec![status(0, 0, 1)]);
        for _ in 0..5 {
            store.insert_scan("scan_score_npm_dep_files", json!({"name": "x"})).await;
        }
        let runnable = store.insert_scan("scan_score_npm_dep_files", dep_files_params()).await;
        let mut services = services(store.clone(), cluster);
        let mut config = (*services.config).clone();
        config.polling.pickup_batch = 2;
        services.config = Arc::new(config);

        let picked = run_next_scan(&services).await.unwrap();

        assert_eq!(picked, Some(runnable.id));
        assert_eq!(
            store.status_history(runnable.id).await,
            vec![ScanStatus::Started, ScanStatus::Failed]
        );
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let store = Arc::new(InMemoryScanStore::new());
        let cluster = Arc::new(RecordingCluster::succeeding());

        let picked = run_next_scan(&services(store, cluster)).await.unwrap();

        assert_eq!(picked, None);
    }
}
