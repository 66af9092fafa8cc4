//! Plan command: what a reconcile toward a desired file would do.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use grid_reconcile::hash::same_workload_names;
use grid_reconcile::{
    deployment_hash, workload_changes, ChangeKind, Deployment, ReconcilePlan,
};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_output, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Desired deployments (JSON object keyed by node id).
    #[arg(long)]
    desired: PathBuf,
}

#[derive(Debug, Clone, Serialize, Tabled)]
struct PlanRow {
    #[tabled(rename = "Node")]
    node: u32,

    #[tabled(rename = "Action")]
    action: &'static str,

    #[tabled(rename = "Contract")]
    contract: String,

    #[tabled(rename = "Version")]
    version: String,

    #[tabled(rename = "Workloads")]
    workloads: String,
}

impl PlanCommand {
    pub fn run(self, ctx: CommandContext) -> Result<()> {
        let desired = ctx.load_desired(&self.desired)?;
        let current = ctx.snapshot.contract_map();
        let plan = ReconcilePlan::between(&current, &desired);

        let mut rows = Vec::new();
        for (node, contract) in &plan.delete {
            let names = ctx
                .snapshot
                .deployments
                .get(node)
                .map(|dl| prefixed('-', dl.workloads.iter().map(|w| w.name.as_str())))
                .unwrap_or_default();
            rows.push(PlanRow {
                node: node.get(),
                action: "delete",
                contract: contract.to_string(),
                version: "-".to_string(),
                workloads: names,
            });
        }

        for node in &plan.create {
            let Some(dl) = desired.get(node) else {
                continue;
            };
            rows.push(PlanRow {
                node: node.get(),
                action: "create",
                contract: "-".to_string(),
                version: dl.version.to_string(),
                workloads: prefixed('+', dl.workloads.iter().map(|w| w.name.as_str())),
            });
        }

        for (node, contract) in &plan.update {
            let Some(wanted) = desired.get(node) else {
                continue;
            };
            let live = ctx
                .snapshot
                .deployments
                .get(node)
                .filter(|dl| dl.contract_id == Some(*contract));
            rows.push(update_row(node.get(), contract.to_string(), live, wanted)?);
        }

        if ctx.format == OutputFormat::Json {
            crate::output::print_json(&serde_json::json!({ "plan": plan, "rows": rows }));
        } else {
            print_output(&rows, ctx.format);
        }
        Ok(())
    }
}

fn update_row(
    node: u32,
    contract: String,
    live: Option<&Deployment>,
    wanted: &Deployment,
) -> Result<PlanRow> {
    let Some(live) = live else {
        return Ok(PlanRow {
            node,
            action: "update",
            contract,
            version: "?".to_string(),
            workloads: "live deployment not in snapshot".to_string(),
        });
    };

    if deployment_hash(live)? == deployment_hash(wanted)? && same_workload_names(live, wanted) {
        return Ok(PlanRow {
            node,
            action: "unchanged",
            contract,
            version: live.version.to_string(),
            workloads: String::new(),
        });
    }

    let changes = workload_changes(live, wanted)?;
    let summary: Vec<String> = changes
        .iter()
        .filter_map(|c| {
            let sign = match c.kind {
                ChangeKind::Added => '+',
                ChangeKind::Modified => '~',
                ChangeKind::Removed => '-',
                ChangeKind::Unchanged => return None,
            };
            Some(format!("{sign}{}", c.name))
        })
        .collect();

    Ok(PlanRow {
        node,
        action: "update",
        contract,
        version: format!("{} -> {}", live.version, live.next_version()?),
        workloads: summary.join(" "),
    })
}

fn prefixed<'a>(sign: char, names: impl Iterator<Item = &'a str>) -> String {
    names
        .map(|name| format!("{sign}{name}"))
        .collect::<Vec<_>>()
        .join(" ")
}
