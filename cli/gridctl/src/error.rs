//! Error handling and display for the CLI.

use std::path::PathBuf;

use colored::Colorize;
use grid_reconcile::ReconcileError;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Deployment rejected: {0}")]
    Rejected(#[source] ReconcileError),

    #[error("Desired deployment targets node {0}, which is not in the snapshot")]
    UnknownNode(grid_id::NodeId),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::Parse { .. } => {
                eprintln!(
                    "\n{}",
                    "Hint: Snapshots and desired files are JSON objects keyed by node id.".yellow()
                );
            }
            CliError::Rejected(ReconcileError::InsufficientCapacity { .. }) => {
                eprintln!(
                    "\n{}",
                    "Hint: Pick another node or shrink the deployment.".yellow()
                );
            }
            CliError::Rejected(ReconcileError::InsufficientPublicIps { .. }) => {
                eprintln!(
                    "\n{}",
                    "Hint: Release public IPs on the farm or deploy fewer `ip` workloads.".yellow()
                );
            }
            CliError::Rejected(ReconcileError::IpCountIncreaseUnsupported { .. }) => {
                eprintln!(
                    "\n{}",
                    "Hint: Remove the deployment first, then create it again with more IPs."
                        .yellow()
                );
            }
            CliError::UnknownNode(_) | CliError::Rejected(ReconcileError::UnknownNode { .. }) => {
                eprintln!(
                    "\n{}",
                    "Hint: Take a fresh snapshot that includes the node.".yellow()
                );
            }
            _ => {}
        }
    }
}
