//! CLI commands.

mod check;
mod plan;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use grid_id::NodeId;
use grid_reconcile::{Deployment, GridSnapshot, ReconcilerConfig};
use serde::de::DeserializeOwned;

use crate::error::CliError;
use crate::output::{print_warning, OutputFormat};

/// Snapshots older than this get a warning.
const STALE_AFTER_MINUTES: i64 = 60;

/// gridctl - Plan and check grid deployments against a snapshot.
#[derive(Debug, Parser)]
#[command(name = "gridctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Log level used when RUST_LOG is unset.
    #[arg(long, global = true, env = "GRID_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Grid snapshot (JSON) to plan against.
    #[arg(long, global = true, env = "GRID_SNAPSHOT", default_value = "snapshot.json")]
    snapshot: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show which nodes a reconcile would delete, create or update.
    Plan(plan::PlanCommand),

    /// Run admission (capacity, public IPs, gateways) without deploying.
    Check(check::CheckCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let format = OutputFormat::parse(&self.format);

        match self.command {
            Commands::Plan(cmd) => cmd.run(CommandContext::load(&self.snapshot, format)?),
            Commands::Check(cmd) => cmd.run(CommandContext::load(&self.snapshot, format)?).await,
            Commands::Version => {
                println!("gridctl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub format: OutputFormat,
    pub snapshot: GridSnapshot,
    pub config: ReconcilerConfig,
}

impl CommandContext {
    fn load(path: &Path, format: OutputFormat) -> Result<Self> {
        let snapshot: GridSnapshot = read_json(path)?;
        if let Some(age) = snapshot.age(Utc::now()) {
            if age.num_minutes() > STALE_AFTER_MINUTES {
                print_warning(&format!(
                    "snapshot is {} minutes old; capacity and IP counts may have changed",
                    age.num_minutes()
                ));
            }
        }

        Ok(Self {
            format,
            snapshot,
            config: ReconcilerConfig::from_env(),
        })
    }

    /// Load a desired-state file, rejecting nodes the snapshot doesn't know.
    pub fn load_desired(&self, path: &Path) -> Result<BTreeMap<NodeId, Deployment>> {
        let desired: BTreeMap<NodeId, Deployment> = read_json(path)?;
        if let Some(node) = desired
            .keys()
            .find(|node| !self.snapshot.nodes.iter().any(|n| n.node_id == **node))
        {
            return Err(CliError::UnknownNode(*node).into());
        }
        Ok(desired)
    }

    /// Deployments currently bound by the snapshot's contracts.
    pub fn current(&self) -> BTreeMap<NodeId, Deployment> {
        self.snapshot
            .deployments
            .iter()
            .filter(|(_, dl)| dl.contract_id.is_some())
            .map(|(node, dl)| (*node, dl.clone()))
            .collect()
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
