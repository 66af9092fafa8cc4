//! Reconcile planning.
//!
//! Pure functions that decide which nodes go through which phase, and which
//! workloads of an update actually changed. Nothing here talks to the grid.

use std::collections::BTreeMap;

use grid_id::{ContractId, NodeId};
use serde::Serialize;

use crate::error::ReconcileResult;
use crate::hash::workload_hashes;
use crate::model::{ContractMap, Deployment};

/// Node sets for the three phases, each in ascending node order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    /// Bound in old, absent from new.
    pub delete: Vec<(NodeId, ContractId)>,

    /// Absent from old, present in new.
    pub create: Vec<NodeId>,

    /// Present in both; may still be skipped if nothing changed.
    pub update: Vec<(NodeId, ContractId)>,
}

impl ReconcilePlan {
    pub fn between<D>(old: &ContractMap, new: &BTreeMap<NodeId, D>) -> Self {
        let mut plan = Self::default();

        for (&node, &contract) in old {
            if new.contains_key(&node) {
                plan.update.push((node, contract));
            } else {
                plan.delete.push((node, contract));
            }
        }
        plan.create = new
            .keys()
            .filter(|node| !old.contains_key(node))
            .copied()
            .collect();

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.create.is_empty() && self.update.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Unchanged,
    Removed,
}

/// How one workload differs between the live and desired deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadChange {
    pub name: String,
    pub kind: ChangeKind,
}

/// Compare workloads by semantic hash, in desired order then removed ones.
pub fn workload_changes(
    live: &Deployment,
    desired: &Deployment,
) -> ReconcileResult<Vec<WorkloadChange>> {
    let live_hashes = workload_hashes(live)?;
    let desired_hashes = workload_hashes(desired)?;

    let mut changes = Vec::with_capacity(desired.workloads.len());
    for workload in &desired.workloads {
        let kind = match (live_hashes.get(&workload.name), desired_hashes.get(&workload.name)) {
            (None, _) => ChangeKind::Added,
            (Some(before), Some(after)) if before == after => ChangeKind::Unchanged,
            _ => ChangeKind::Modified,
        };
        changes.push(WorkloadChange {
            name: workload.name.clone(),
            kind,
        });
    }
    for workload in &live.workloads {
        if !desired_hashes.contains_key(&workload.name) {
            changes.push(WorkloadChange {
                name: workload.name.clone(),
                kind: ChangeKind::Removed,
            });
        }
    }

    Ok(changes)
}
