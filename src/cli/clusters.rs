//! Cluster CLI commands

use anyhow::Result;
use clap::Subcommand;

use super::output::{print_json, print_table_header};
use crate::domain::ClusterId;
use crate::storage::ClusterRepository;

#[derive(Subcommand)]
pub enum ClusterCommands {
    /// Register a cluster that connections can be scoped to
    Register {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Show one cluster
    Get {
        #[arg(value_name = "ID")]
        id: i64,
    },

    /// List registered clusters
    List {
        /// Output format (json or table)
        #[arg(short, long, default_value = "table", value_parser = ["json", "table"])]
        output: String,
    },
}

/// Handle cluster management commands
pub async fn handle_cluster_command(
    command: ClusterCommands,
    clusters: &ClusterRepository,
) -> Result<()> {
    match command {
        ClusterCommands::Register { name } => {
            let cluster = clusters.create_cluster(&name).await?;
            print_json(&cluster)?;
        }
        ClusterCommands::Get { id } => {
            let cluster = clusters.get_by_id(ClusterId::new(id)).await?;
            print_json(&cluster)?;
        }
        ClusterCommands::List { output } => {
            let all = clusters.list().await?;
            if output == "json" {
                print_json(&all)?;
            } else if all.is_empty() {
                println!("No clusters found");
            } else {
                print_table_header(&[("ID", 6), ("Name", 32), ("Created", 25)]);
                for cluster in all {
                    println!(
                        "{:<6} {:<32} {:<25}",
                        cluster.id,
                        cluster.name,
                        cluster.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                }
                println!();
            }
        }
    }
    Ok(())
}
