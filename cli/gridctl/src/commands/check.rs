//! Check command: dry-run admission against the snapshot.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use grid_reconcile::{validate_deployments, Capacity};
use serde::Serialize;
use tabled::Tabled;
use tokio_util::sync::CancellationToken;

use crate::error::CliError;
use crate::output::{print_output, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Desired deployments (JSON object keyed by node id).
    #[arg(long)]
    desired: PathBuf,
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct CapacityRow {
    #[tabled(rename = "Node")]
    node: u32,

    #[tabled(rename = "Farm")]
    farm: u32,

    #[tabled(rename = "Needed")]
    needed: Capacity,

    #[tabled(rename = "Free")]
    free: Capacity,

    #[tabled(rename = "Public IPs")]
    public_ips: u32,
}

impl CheckCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let desired = ctx.load_desired(&self.desired)?;
        let current = ctx.current();

        validate_deployments(
            &ctx.snapshot,
            &ctx.snapshot,
            &current,
            &desired,
            &ctx.config,
            &CancellationToken::new(),
        )
        .await
        .map_err(CliError::Rejected)?;

        let mut rows = Vec::new();
        for (node, dl) in &desired {
            let Some(info) = ctx.snapshot.nodes.iter().find(|n| n.node_id == *node) else {
                continue;
            };
            let freed = match current.get(node) {
                Some(previous) => previous.capacity()?,
                None => Capacity::ZERO,
            };
            rows.push(CapacityRow {
                node: node.get(),
                farm: info.farm_id.get(),
                needed: dl.capacity()?,
                free: info.capacity.free_with(freed),
                public_ips: dl.public_ip_count(),
            });
        }

        print_output(&rows, ctx.format);
        if ctx.format == OutputFormat::Table {
            print_success(&format!("{} deployment(s) admitted", desired.len()));
        }
        Ok(())
    }
}
