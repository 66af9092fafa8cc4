//! Content hashing for change detection.
//!
//! Hashes are SHA-256 over compact JSON. `serde_json::Value` objects keep
//! their keys sorted, so the bytes do not depend on field order.
//!
//! Two families of digest exist:
//! - **semantic** ([`workload_hash`], [`deployment_hash`]): what a workload
//!   *is*, excluding versions, contract binding, signatures and node results.
//!   Used to decide whether anything needs redeploying.
//! - **challenge** ([`challenge_hash`]): what gets signed and committed to the
//!   ledger, including every version.

use std::collections::BTreeMap;
use std::fmt;

use grid_id::NodeId;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::error::{ReconcileError, ReconcileResult};
use crate::model::{Deployment, Workload};

/// A SHA-256 content digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash the compact encoding of a JSON value.
    pub fn of_json(value: &serde_json::Value) -> Self {
        Self(Sha256::digest(value.to_string().as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn encode<T: serde::Serialize>(value: &T) -> ReconcileResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ReconcileError::Encoding(e.to_string()))
}

fn workload_identity(workload: &Workload) -> ReconcileResult<serde_json::Value> {
    Ok(json!({
        "name": workload.name,
        "type": encode(&workload.kind)?,
        "data": workload.data,
        "metadata": workload.metadata,
        "description": workload.description,
    }))
}

/// Digest of a workload's semantic fields.
pub fn workload_hash(workload: &Workload) -> ReconcileResult<ContentHash> {
    Ok(ContentHash::of_json(&workload_identity(workload)?))
}

/// Digest of a whole deployment's semantic content.
///
/// Covers deployment metadata and the ordered workload hashes.
pub fn deployment_hash(deployment: &Deployment) -> ReconcileResult<ContentHash> {
    let workloads = deployment
        .workloads
        .iter()
        .map(|w| workload_hash(w).map(|h| h.to_hex()))
        .collect::<ReconcileResult<Vec<_>>>()?;

    Ok(ContentHash::of_json(&json!({
        "metadata": deployment.metadata,
        "description": deployment.description,
        "workloads": workloads,
    })))
}

/// Digest that is signed and committed to the contract.
pub fn challenge_hash(deployment: &Deployment) -> ReconcileResult<ContentHash> {
    let workloads = deployment
        .workloads
        .iter()
        .map(|w| {
            let mut value = workload_identity(w)?;
            value["version"] = json!(w.version);
            Ok(value)
        })
        .collect::<ReconcileResult<Vec<_>>>()?;

    Ok(ContentHash::of_json(&json!({
        "version": deployment.version,
        "twin_id": encode(&deployment.twin_id)?,
        "metadata": deployment.metadata,
        "description": deployment.description,
        "workloads": workloads,
    })))
}

/// Workload name to semantic hash.
pub fn workload_hashes(deployment: &Deployment) -> ReconcileResult<BTreeMap<String, ContentHash>> {
    deployment
        .workloads
        .iter()
        .map(|w| Ok((w.name.clone(), workload_hash(w)?)))
        .collect()
}

/// Workload name to current version.
pub fn workload_versions(deployment: &Deployment) -> BTreeMap<String, u32> {
    deployment
        .workloads
        .iter()
        .map(|w| (w.name.clone(), w.version))
        .collect()
}

/// True when both deployments hold exactly the same workload names.
pub fn same_workload_names(a: &Deployment, b: &Deployment) -> bool {
    a.workloads.len() == b.workloads.len() && a.workload_names() == b.workload_names()
}

/// Turn `desired` into the next version of `live`.
///
/// The deployment version becomes the one after `live.version`. Workloads
/// whose hash changed, or that are new, take that version; unchanged
/// workloads keep the version they have on the node so they are not
/// redeployed. `node` only names the deployment in errors.
pub fn assign_versions(
    node: NodeId,
    live: &Deployment,
    desired: &mut Deployment,
) -> ReconcileResult<()> {
    let live_hashes = workload_hashes(live)?;
    let live_versions = workload_versions(live);

    desired.version = live
        .next_version()
        .map_err(|e| ReconcileError::InvalidDeployment {
            node,
            reason: e.to_string(),
        })?;
    for workload in &mut desired.workloads {
        let hash = workload_hash(workload)?;
        workload.version = match (live_hashes.get(&workload.name), live_versions.get(&workload.name)) {
            (Some(previous), Some(version)) if *previous == hash => *version,
            _ => desired.version,
        };
    }
    Ok(())
}
