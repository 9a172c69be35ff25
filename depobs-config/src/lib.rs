//! Configuration for the dependency observatory worker.
//!
//! [`WorkerConfig`] gathers the database, cluster, npm registry and
//! orchestrator sections. [`WorkerConfig::load`] resolves it from an
//! explicit file, inline JSON, a default file or built-in defaults, then
//! applies environment overrides.

#![allow(missing_docs)]

pub mod db_url;
pub mod loader;
pub mod models;

pub use db_url::{DatabaseUrlSource, resolve_database_url};
pub use loader::{CONFIG_JSON_VAR, CONFIG_PATH_VAR, EnvLookup, ProcessEnv, load_dotenv};
pub use models::{DatabaseConfig, WorkerConfig, WorkerConfigSource};
