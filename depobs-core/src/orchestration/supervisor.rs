//! Keeps a fixed set of named background tasks running.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one run of a supervised task produced. `Ok(None)` means the task
/// had nothing to do.
pub type TaskOutput = anyhow::Result<Option<String>>;

/// Builds a fresh run of a named task.
pub type TaskFactory = Arc<dyn Fn() -> BoxFuture<'static, TaskOutput> + Send + Sync>;

/// Result of one [`TaskSupervisor::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorStep {
    /// Nothing finished within the wait slice.
    Waiting,
    /// A task finished and was launched again under the same name.
    Relaunched(String),
    /// Shutdown was requested and every in-flight task has finished.
    Drained,
}

pub struct TaskSupervisor {
    factories: BTreeMap<String, TaskFactory>,
    tasks: JoinSet<TaskOutput>,
    names: HashMap<Id, String>,
    shutdown: CancellationToken,
    wait_slice: Duration,
}

impl fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("tasks", &self.factories.keys().collect::<Vec<_>>())
            .field("in_flight", &self.tasks.len())
            .field("wait_slice", &self.wait_slice)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl TaskSupervisor {
    pub fn new(wait_slice: Duration) -> Self {
        Self {
            factories: BTreeMap::new(),
            tasks: JoinSet::new(),
            names: HashMap::new(),
            shutdown: CancellationToken::new(),
            wait_slice,
        }
    }

    /// Registers `factory` under `name`, replacing any earlier registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> BoxFuture<'static, TaskOutput> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Cancelling this token stops relaunches and drains in-flight tasks.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn in_flight_count(&self, name: &str) -> usize {
        self.names.values().filter(|running| *running == name).count()
    }

    /// Launches one run of every registered task.
    pub fn start(&mut self) {
        let names: Vec<String> = self.factories.keys().cloned().collect();
        for name in names {
            self.launch(&name);
        }
    }

    fn launch(&mut self, name: &str) {
        let Some(factory) = self.factories.get(name) else {
            warn!(target: "scan::supervisor", task = name, "no factory registered");
            return;
        };
        let handle = self.tasks.spawn(factory());
        self.names.insert(handle.id(), name.to_string());
        debug!(target: "scan::supervisor", task = name, "launched task");
    }

    fn record(&mut self, joined: Result<(Id, TaskOutput), JoinError>) -> Option<String> {
        let (id, outcome) = match joined {
            Ok((id, output)) => (id, Ok(output)),
            Err(err) => (err.id(), Err(err)),
        };
        let name = self.names.remove(&id)?;

        match outcome {
            Err(err) if err.is_cancelled() => {
                warn!(target: "scan::supervisor", task = %name, "task cancelled");
            }
            Err(err) => {
                error!(target: "scan::supervisor", task = %name, error = %err, "task panicked");
            }
            Ok(Err(err)) => {
                error!(target: "scan::supervisor", task = %name, error = ?err, "task errored");
            }
            Ok(Ok(None)) => {
                debug!(target: "scan::supervisor", task = %name, "task completed without a result");
            }
            Ok(Ok(Some(result))) => {
                info!(target: "scan::supervisor", task = %name, result = %result, "task completed");
            }
        }
        Some(name)
    }

    /// Waits up to the wait slice for a task to finish, then either relaunches
    /// it or, once shutdown was requested, drains everything still running.
    pub async fn step(&mut self) -> SupervisorStep {
        if self.tasks.is_empty() {
            return SupervisorStep::Drained;
        }

        let finished =
            match tokio::time::timeout(self.wait_slice, self.tasks.join_next_with_id()).await {
                Ok(Some(joined)) => self.record(joined),
                Ok(None) | Err(_) => None,
            };

        if self.shutdown.is_cancelled() {
            info!(
                target: "scan::supervisor",
                in_flight = self.tasks.len(),
                "shutdown requested; waiting for running tasks"
            );
            self.drain().await;
            return SupervisorStep::Drained;
        }

        match finished {
            Some(name) => {
                self.launch(&name);
                SupervisorStep::Relaunched(name)
            }
            None => SupervisorStep::Waiting,
        }
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.record(joined);
        }
    }

    /// Starts every task and supervises until shutdown drains them.
    pub async fn run(mut self) {
        self.start();
        info!(
            target: "scan::supervisor",
            tasks = ?self.factories.keys().collect::<Vec<_>>(),
            "supervising tasks"
        );
        while self.step().await != SupervisorStep::Drained {}
        info!(target: "scan::supervisor", "all tasks stopped");
    }
}
