use std::path::PathBuf;

use depobs_core::OrchestratorConfig;
use depobs_core::cluster::KubeClientConfig;
use depobs_core::metadata::{NpmsioConfig, RegistryConfig};
use depobs_core::results::PubsubConfig;
use serde::{Deserialize, Serialize};

/// Where the effective worker configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorkerConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. `DATABASE_URL` wins over this value.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// Top-level worker settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub database: DatabaseConfig,
    /// Kubernetes API access for the in-cluster context and any named
    /// contexts referenced by job templates.
    pub cluster: KubeClientConfig,
    /// npm registry client used to refresh package metadata.
    pub registry: RegistryConfig,
    pub npmsio: NpmsioConfig,
    /// Subscription that job containers publish their output to.
    pub pubsub: PubsubConfig,
    /// Poll cadences, supervision and job templates.
    pub orchestrator: OrchestratorConfig,
}
