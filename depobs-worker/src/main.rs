//! # depobs-worker
//!
//! Runs dependency observatory scans as Kubernetes jobs.
//!
//! `run` supervises background tasks that pull queued scans from PostgreSQL,
//! `npm scan` runs a single package scan inline and `db migrate` applies the
//! schema migrations.

mod app;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand, builder::PossibleValuesParser};
use depobs_config::{ProcessEnv, WorkerConfig};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "depobs-worker")]
#[command(about = "Dependency observatory scan worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(ClapArgs, Debug, Clone, Default)]
struct GlobalArgs {
    /// Path to a TOML or JSON worker config file
    #[arg(long, global = true, env = "DEPOBS_WORKER_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// PostgreSQL connection string (overrides config)
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Namespace scan jobs are created in (overrides config)
    #[arg(long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Supervise background tasks until interrupted
    Run {
        /// Task to run; repeat to run several. Defaults to the configured tasks.
        #[arg(long = "task-name", value_parser = PossibleValuesParser::new(app::TASK_NAMES))]
        task_names: Vec<String>,
    },
    /// npm scans
    #[command(subcommand)]
    Npm(NpmCommand),
    /// Database maintenance
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Subcommand, Debug)]
enum NpmCommand {
    /// Scan one npm package and score its dependency graphs
    Scan {
        #[arg(env = "PACKAGE_NAME")]
        package_name: String,
        /// A release version or `latest`
        #[arg(env = "PACKAGE_VERSION", default_value = "latest")]
        package_version: String,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommand {
    /// Apply pending migrations and exit
    Migrate,
}

fn load_config(args: &GlobalArgs) -> anyhow::Result<WorkerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = WorkerConfig::load_from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            config.apply_env_overrides(&ProcessEnv)?;
            config
        }
        None => {
            let (config, source) = WorkerConfig::load()?;
            info!(?source, "loaded worker config");
            config
        }
    };
    apply_cli_overrides(&mut config, args);
    Ok(config)
}

fn apply_cli_overrides(config: &mut WorkerConfig, args: &GlobalArgs) {
    if let Some(url) = &args.database_url {
        config.database.url = Some(url.clone());
    }
    if let Some(namespace) = &args.namespace {
        config.orchestrator.tarball_job.namespace = namespace.clone();
        config.orchestrator.dep_files_job.namespace = namespace.clone();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    depobs_config::load_dotenv();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,scan::controller=info,scan::reconcile=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&cli.global)?;
    let store = app::connect_store(&config).await?;

    match cli.command {
        Command::Db(DbCommand::Migrate) => {
            store.migrate().await.context("failed to apply migrations")?;
            info!("database migrations applied");
        }
        Command::Npm(NpmCommand::Scan {
            package_name,
            package_version,
        }) => {
            let services = app::build_services(&config, store)?;
            app::scan_npm_package(&services, &package_name, &package_version).await?;
        }
        Command::Run { task_names } => {
            let task_names = if task_names.is_empty() {
                config.orchestrator.supervisor.task_names.clone()
            } else {
                task_names
            };
            let services = app::build_services(&config, store)?;
            app::run_tasks(&config, services, &task_names).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_repeated_task_names() {
        let cli = Cli::try_parse_from([
            "depobs-worker",
            "run",
            "--task-name",
            "run_next_scan",
            "--task-name",
            "run_next_scan",
        ])
        .unwrap();

        match cli.command {
            Command::Run { task_names } => assert_eq!(task_names.len(), 2),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn run_rejects_unknown_task_names() {
        let err = Cli::try_parse_from(["depobs-worker", "run", "--task-name", "save_deps"]);
        assert!(err.is_err());
    }

    #[test]
    fn npm_scan_takes_name_and_version() {
        let cli = Cli::try_parse_from([
            "depobs-worker",
            "npm",
            "scan",
            "left-pad",
            "1.3.0",
            "--namespace",
            "scans",
        ])
        .unwrap();

        assert_eq!(cli.global.namespace.as_deref(), Some("scans"));
        match cli.command {
            Command::Npm(NpmCommand::Scan {
                package_name,
                package_version,
            }) => {
                assert_eq!(package_name, "left-pad");
                assert_eq!(package_version, "1.3.0");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_overrides_replace_config_values() {
        let args = GlobalArgs {
            config: None,
            database_url: Some("postgres://cli@localhost/depobs".into()),
            namespace: Some("scans".into()),
        };
        let mut config = WorkerConfig::default();
        config.database.url = Some("postgres://file@localhost/depobs".into());

        apply_cli_overrides(&mut config, &args);

        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://cli@localhost/depobs")
        );
        assert_eq!(config.orchestrator.tarball_job.namespace, "scans");
        assert_eq!(config.orchestrator.dep_files_job.namespace, "scans");
    }
}
