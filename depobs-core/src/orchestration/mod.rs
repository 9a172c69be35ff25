//! Scan orchestration: job lifecycle, result reconciliation, strategies,
//! the scan state machine and task supervision.

pub mod controller;
pub mod poll;
pub mod reconciler;
pub mod state;
pub mod strategy;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::JobController;
pub use poll::{PollOutcome, PollPolicy, poll_until};
pub use reconciler::{ReconciledJob, ResultReconciler};
pub use state::{ScanOutcome, run_next_scan, run_scan};
pub use strategy::{ScanServices, run_strategy};
pub use supervisor::{SupervisorStep, TaskFactory, TaskOutput, TaskSupervisor};
