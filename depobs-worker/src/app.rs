//! Wires configuration into the orchestration services.

use std::sync::Arc;

use anyhow::{Context, bail};
use depobs_config::WorkerConfig;
use depobs_core::cluster::KubeClusterClient;
use depobs_core::metadata::{
    CombinedRefresher, MetadataRefresher, NpmRegistryRefresher, NpmsioScoreFetcher,
};
use depobs_core::orchestration::{
    JobController, ResultReconciler, ScanOutcome, ScanServices, TaskSupervisor, run_next_scan,
    run_scan,
};
use depobs_core::persistence::{PostgresScanStore, ScanStore};
use depobs_core::results::{DeliveryIngestor, PubsubSubscriber};
use depobs_core::scoring::DependencyCountScorer;
use depobs_core::validation::{validate_npm_package_name, validate_npm_package_version};
use depobs_model::NewScan;
use futures::FutureExt;
use tracing::{info, warn};

pub const RUN_NEXT_SCAN: &str = "run_next_scan";
pub const SAVE_PUBSUB: &str = "save_pubsub";

/// Background tasks `run` knows how to supervise.
pub const TASK_NAMES: &[&str] = &[RUN_NEXT_SCAN, SAVE_PUBSUB];

pub async fn connect_store(config: &WorkerConfig) -> anyhow::Result<Arc<PostgresScanStore>> {
    let url = config
        .database
        .url
        .as_deref()
        .context("no database configured; set DATABASE_URL or database.url")?;
    let store = PostgresScanStore::connect(url, config.database.max_connections)
        .await
        .context("failed to connect to PostgreSQL")?;
    Ok(Arc::new(store))
}

/// Builds the collaborators every scan needs on top of `store`.
pub fn build_services(
    config: &WorkerConfig,
    store: Arc<PostgresScanStore>,
) -> anyhow::Result<ScanServices> {
    let polling = &config.orchestrator.polling;
    let cluster = KubeClusterClient::new(&config.cluster)
        .context("failed to build Kubernetes client")?;
    let registry = NpmRegistryRefresher::new(config.registry.clone(), store.clone())
        .context("failed to build npm registry client")?;
    let npmsio = NpmsioScoreFetcher::new(config.npmsio.clone(), store.clone())
        .context("failed to build npms.io client")?;
    let refreshers: Vec<Arc<dyn MetadataRefresher>> = vec![Arc::new(registry), Arc::new(npmsio)];

    Ok(ScanServices {
        store: store.clone(),
        controller: JobController::new(Arc::new(cluster), polling.job_policy()),
        reconciler: ResultReconciler::new(store.clone(), store.clone(), polling.result_policy()),
        scorer: Arc::new(DependencyCountScorer::new(store)),
        metadata: Arc::new(CombinedRefresher::new(refreshers)),
        config: Arc::new(config.orchestrator.clone()),
    })
}

/// `task_names` in first-seen order, each once.
pub fn distinct_task_names(task_names: &[String]) -> Vec<String> {
    let mut distinct: Vec<String> = Vec::with_capacity(task_names.len());
    for name in task_names {
        if distinct.contains(name) {
            warn!(task = %name, "task requested more than once; running a single instance");
        } else {
            distinct.push(name.clone());
        }
    }
    distinct
}

/// A supervisor with one factory per requested task name.
pub fn supervisor_for(
    config: &WorkerConfig,
    services: &ScanServices,
    task_names: &[String],
) -> anyhow::Result<TaskSupervisor> {
    let mut supervisor = TaskSupervisor::new(services.config.supervisor.wait_slice());
    for name in distinct_task_names(task_names) {
        match name.as_str() {
            RUN_NEXT_SCAN => {
                let services = services.clone();
                supervisor.register(RUN_NEXT_SCAN, move || {
                    let services = services.clone();
                    async move {
                        let picked = run_next_scan(&services).await?;
                        anyhow::Ok(picked.map(|scan_id| format!("ran scan {scan_id}")))
                    }
                    .boxed()
                });
            }
            SAVE_PUBSUB => {
                let subscriber = PubsubSubscriber::new(config.pubsub.clone())
                    .context("failed to build Pub/Sub subscriber")?;
                let store: Arc<dyn ScanStore> = services.store.clone();
                let ingestor = DeliveryIngestor::new(Arc::new(subscriber), store);
                let idle_backoff = services.config.polling.idle_backoff();
                supervisor.register(SAVE_PUBSUB, move || {
                    let ingestor = ingestor.clone();
                    async move {
                        let saved = ingestor.ingest_once().await?;
                        if saved == 0 {
                            tokio::time::sleep(idle_backoff).await;
                            return anyhow::Ok(None);
                        }
                        anyhow::Ok(Some(format!("saved {saved} messages")))
                    }
                    .boxed()
                });
            }
            other => bail!("unknown task {other:?}; expected one of {TASK_NAMES:?}"),
        }
    }
    Ok(supervisor)
}

/// Supervises `task_names` until Ctrl-C, then lets running tasks finish.
pub async fn run_tasks(
    config: &WorkerConfig,
    services: ScanServices,
    task_names: &[String],
) -> anyhow::Result<()> {
    let supervisor = supervisor_for(config, &services, task_names)?;
    let shutdown = supervisor.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received; finishing running tasks"),
            Err(err) => warn!("failed to listen for interrupt: {err}"),
        }
        shutdown.cancel();
    });

    info!(tasks = ?task_names, "starting background tasks");
    supervisor.run().await;
    Ok(())
}

/// Queues an npm package scan and runs it inline.
pub async fn scan_npm_package(
    services: &ScanServices,
    package_name: &str,
    package_version: &str,
) -> anyhow::Result<()> {
    validate_npm_package_name(package_name)?;
    validate_npm_package_version(package_version)?;

    let scan = services
        .store
        .create_scan(&NewScan::npm_package(package_name, package_version))
        .await
        .context("failed to queue scan")?;
    info!(scan_id = %scan.id, package_name, package_version, "running npm package scan");

    match run_scan(&scan, services).await? {
        ScanOutcome::Succeeded => Ok(()),
        ScanOutcome::Failed => bail!("scan {} failed", scan.id),
        ScanOutcome::Ignored => bail!("scan {} was not eligible to run", scan.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn repeated_task_names_collapse_in_order() {
        let distinct = distinct_task_names(&names(&[
            RUN_NEXT_SCAN,
            SAVE_PUBSUB,
            RUN_NEXT_SCAN,
        ]));

        assert_eq!(distinct, names(&[RUN_NEXT_SCAN, SAVE_PUBSUB]));
    }

    #[test]
    fn distinct_task_names_keep_single_requests() {
        assert_eq!(distinct_task_names(&names(&[SAVE_PUBSUB])), names(&[SAVE_PUBSUB]));
        assert!(distinct_task_names(&[]).is_empty());
    }
}
