//! # depobs-core
//!
//! Scan orchestration for the dependency observatory worker. Picks queued
//! scans, runs npm analysis jobs on a Kubernetes cluster, reconciles the
//! results they deliver out of band, and persists scored reports.
//!
//! - [`orchestration`]: job lifecycle, reconciliation, strategies, the scan
//!   state machine and the task supervisor
//! - [`cluster`]: job configs and the Kubernetes REST client
//! - [`persistence`]: Postgres and in-memory stores
//! - [`results`]: delivered job output, its deserialization and Pub/Sub ingest
//! - [`scoring`] and [`metadata`]: report scoring, npm registry and npms.io refresh

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod metadata;
pub mod orchestration;
pub mod persistence;
pub mod results;
pub mod scoring;
pub mod validation;

#[cfg(test)]
pub(crate) mod http_stub;

pub use config::{JobTemplate, OrchestratorConfig, PollingConfig, SupervisorConfig};
pub use error::{OrchestratorError, Result};
