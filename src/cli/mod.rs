//! # Command Line Interface
//!
//! Operator tooling: database management, cluster registration and the
//! connection operations, run in-process against the configured database.

pub mod clusters;
pub mod connections;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use crate::config::{AppConfig, DatabaseConfig};
use crate::observability::{init_observability, log_config_info};
use crate::startup::ControlPlane;
use crate::storage::{
    create_pool, get_migration_version, list_applied_migrations, run_migrations,
    validate_migrations, MigrationInfo,
};
use crate::{APP_NAME, VERSION};

#[derive(Parser)]
#[command(name = "egressplane")]
#[command(about = "Outgoing connection registry and credential rotation")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true, env = "EGRESSPLANE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database URL override
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Return as soon as a mutation is committed, without waiting for workers
    #[arg(long, global = true)]
    pub no_settle: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Database management commands
    Database {
        #[command(subcommand)]
        command: DatabaseCommands,
    },

    /// Cluster management commands
    Cluster {
        #[command(subcommand)]
        command: clusters::ClusterCommands,
    },

    /// Connection definition commands
    Connection {
        #[command(subcommand)]
        command: connections::ConnectionCommands,
    },

    /// Report component health
    Health,
}

#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Run pending migrations
    Migrate,

    /// Show migration status
    Status,

    /// List all applied migrations
    List,
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if cli.verbose {
        config.observability.log_level = "debug".to_string();
    }
    config.validate()?;

    let metrics = init_observability(&config.observability).await?;
    info!(app_name = APP_NAME, version = VERSION, "Starting egressplane");
    log_config_info(&config);

    let command = match cli.command {
        Commands::Database { command } => {
            handle_database_command(command, &config.database).await?;
            return Ok(ExitCode::SUCCESS);
        }
        other => other,
    };

    let pool = create_pool(&config.database).await?;
    let mut plane = ControlPlane::build(&config, pool, metrics).await?;
    plane.spawn_local_workers(config.membership.local_workers, &config);

    let succeeded = match command {
        Commands::Cluster { command } => {
            clusters::handle_cluster_command(command, &plane.clusters).await?;
            true
        }
        Commands::Connection { command } => {
            let settle = (!cli.no_settle).then(|| config.broadcast.settle_window());
            connections::handle_connection_command(command, &plane.api, settle).await?
        }
        Commands::Health => {
            let checks = plane.health.check_all().await;
            output::print_json(&checks)?;
            checks.values().all(|check| check.status.is_operational())
        }
        Commands::Database { .. } => true,
    };

    plane.shutdown();
    Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Handle database management commands
async fn handle_database_command(
    command: DatabaseCommands,
    config: &DatabaseConfig,
) -> anyhow::Result<()> {
    let pool = create_pool(config).await?;

    match command {
        DatabaseCommands::Migrate => {
            println!("Running database migrations...");
            run_migrations(&pool).await?;
            println!("Migrations completed successfully!");
        }

        DatabaseCommands::Status => {
            let version = get_migration_version(&pool).await?;
            if validate_migrations(&pool).await? {
                println!("Database schema is up to date (version {})", version.unwrap_or(0));
            } else {
                println!("Database schema has pending migrations");
                anyhow::bail!("pending migrations");
            }
        }

        DatabaseCommands::List => {
            let migrations = list_applied_migrations(&pool).await?;
            if migrations.is_empty() {
                println!("No migrations have been applied");
            } else {
                println!("Applied migrations:");
                print_migrations_table(&migrations);
            }
        }
    }

    Ok(())
}

fn print_migrations_table(migrations: &[MigrationInfo]) {
    output::print_table_header(&[("Version", 16), ("Description", 40), ("Status", 8)]);
    for migration in migrations {
        println!(
            "{:<16} {:<40} {:<8}",
            migration.version,
            output::truncate(&migration.description, 40),
            if migration.success { "ok" } else { "failed" }
        );
    }
}
