//! Connection CLI commands
//!
//! Each command builds the flat field set the operation API expects and prints
//! the resulting envelope. Mutations optionally wait for the worker nodes to
//! settle before returning.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use super::output::{print_envelope, OutputFormat};
use crate::api::{ApiResponse, ConnectionApi, Operation};

#[derive(Subcommand)]
pub enum ConnectionCommands {
    /// Create a new FTP connection definition
    #[command(
        after_help = "EXAMPLES:\n    egressplane connection create --name gnupg --host ftp.gnupg.dk --user anonymous --dircache\n\n    # Initial password from the environment\n    EGRESSPLANE_PASSWORD=secret egressplane connection create --name mirror --host ftp.example.org --user sync"
    )]
    Create {
        /// Cluster the definition belongs to
        #[arg(long, default_value_t = 1)]
        cluster_id: i64,

        #[arg(long)]
        name: String,

        #[arg(long)]
        host: String,

        #[arg(long, default_value_t = 21)]
        port: i64,

        #[arg(long)]
        user: String,

        /// Connect timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout: i64,

        /// Cache directory listings
        #[arg(long)]
        dircache: bool,

        /// Store the definition disabled
        #[arg(long)]
        inactive: bool,

        /// Initial password
        #[arg(long, env = "EGRESSPLANE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Rotate the credential of a connection
    ChangePassword {
        #[arg(value_name = "ID")]
        id: i64,

        #[arg(long, env = "EGRESSPLANE_PASSWORD", hide_env_values = true)]
        password1: String,

        /// Confirmation; must equal --password1
        #[arg(long, env = "EGRESSPLANE_PASSWORD_CONFIRM", hide_env_values = true)]
        password2: String,
    },

    /// Edit non-secret attributes of a connection
    Edit {
        #[arg(value_name = "ID")]
        id: i64,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<i64>,

        #[arg(long)]
        user: Option<String>,

        #[arg(long)]
        timeout: Option<i64>,

        #[arg(long)]
        dircache: Option<bool>,

        #[arg(long)]
        active: Option<bool>,
    },

    /// Delete a connection and revoke its credential
    Delete {
        #[arg(value_name = "ID")]
        id: i64,
    },

    /// Show one connection definition
    Get {
        #[arg(value_name = "ID")]
        id: i64,
    },

    /// List the connections of a cluster
    List {
        #[arg(long, default_value_t = 1)]
        cluster_id: i64,

        /// Output format (json or table)
        #[arg(short, long, default_value = "table", value_parser = ["json", "table"])]
        output: String,
    },

    /// Send a raw JSON field set to an operation
    #[command(
        after_help = "EXAMPLES:\n    egressplane connection request change_password --json '{\"id\": 1, \"password1\": \"a\", \"password2\": \"a\"}'\n\n    egressplane connection request create --file create.json"
    )]
    Request {
        /// create, change_password, delete, get, list or edit
        #[arg(value_name = "OPERATION")]
        operation: String,

        /// Field set as inline JSON
        #[arg(long, conflicts_with = "file")]
        json: Option<String>,

        /// Path to a JSON file holding the field set
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

impl ConnectionCommands {
    /// Operation and raw field set this command sends
    pub fn to_request(&self) -> Result<(Operation, Value)> {
        let request = match self {
            ConnectionCommands::Create {
                cluster_id,
                name,
                host,
                port,
                user,
                timeout,
                dircache,
                inactive,
                password,
            } => {
                let mut fields = json!({
                    "cluster_id": cluster_id,
                    "name": name,
                    "is_active": !inactive,
                    "host": host,
                    "port": port,
                    "dircache": dircache,
                    "user": user,
                    "timeout": timeout,
                });
                if let Some(password) = password {
                    fields["password"] = json!(password);
                }
                (Operation::Create, fields)
            }
            ConnectionCommands::ChangePassword { id, password1, password2 } => (
                Operation::ChangePassword,
                json!({"id": id, "password1": password1, "password2": password2}),
            ),
            ConnectionCommands::Edit { id, name, host, port, user, timeout, dircache, active } => {
                let mut fields = Map::new();
                fields.insert("id".to_string(), json!(id));
                let optional = [
                    ("name", name.as_ref().map(|v| json!(v))),
                    ("host", host.as_ref().map(|v| json!(v))),
                    ("port", port.map(|v| json!(v))),
                    ("user", user.as_ref().map(|v| json!(v))),
                    ("timeout", timeout.map(|v| json!(v))),
                    ("dircache", dircache.map(|v| json!(v))),
                    ("is_active", active.map(|v| json!(v))),
                ];
                for (field, value) in optional {
                    if let Some(value) = value {
                        fields.insert(field.to_string(), value);
                    }
                }
                (Operation::Edit, Value::Object(fields))
            }
            ConnectionCommands::Delete { id } => (Operation::Delete, json!({"id": id})),
            ConnectionCommands::Get { id } => (Operation::Get, json!({"id": id})),
            ConnectionCommands::List { cluster_id, .. } => {
                (Operation::List, json!({"cluster_id": cluster_id}))
            }
            ConnectionCommands::Request { operation, json, file } => {
                let operation: Operation = operation.parse()?;
                let raw = match (json, file) {
                    (Some(inline), _) => inline.clone(),
                    (None, Some(path)) => std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                    (None, None) => anyhow::bail!("Either --json or --file is required"),
                };
                let fields = serde_json::from_str(&raw).context("Field set is not valid JSON")?;
                (operation, fields)
            }
        };
        Ok(request)
    }

    fn output_format(&self) -> Result<OutputFormat> {
        match self {
            ConnectionCommands::List { output, .. } => output.parse(),
            _ => Ok(OutputFormat::Json),
        }
    }
}

/// Handle connection commands; returns whether the operation succeeded
pub async fn handle_connection_command(
    command: ConnectionCommands,
    api: &ConnectionApi,
    settle_window: Option<Duration>,
) -> Result<bool> {
    let (operation, fields) = command.to_request()?;
    let response = api.handle(operation, &fields).await;

    if let Some(window) = settle_window {
        await_settle(api, &response, window).await;
    }

    print_envelope(&response.envelope, command.output_format()?)?;
    Ok(response.envelope.is_ok())
}

async fn await_settle(api: &ConnectionApi, response: &ApiResponse, window: Duration) {
    let Some(outcome) = &response.outcome else {
        return;
    };

    let report = api.coordinator().settle(outcome, window).await;
    if report.settled {
        info!(
            connection_id = %report.connection_id,
            nodes = report.acknowledged.len(),
            "Mutation settled on all worker nodes"
        );
    } else {
        warn!(
            connection_id = %report.connection_id,
            lagging = ?report.lagging,
            window_ms = window.as_millis() as u64,
            "Mutation not yet settled on every worker node"
        );
    }
}
