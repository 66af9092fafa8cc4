//! Admission checks for a proposed set of deployments.
//!
//! Admission runs once over the *complete* proposal against one directory
//! snapshot and never mutates anything. Public IPs are accounted globally:
//! every IP held by the deployments being replaced is released before any new
//! request is counted, mirroring what the ledger will do once contracts are
//! cancelled or updated.

use std::collections::BTreeMap;

use grid_id::{FarmId, NodeId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::call::bounded;
use crate::clients::{Directory, Farm, Ledger, NodeInfo};
use crate::config::ReconcilerConfig;
use crate::error::{ContractOperation, ReconcileError, ReconcileResult};
use crate::model::{Capacity, Deployment, WorkloadType};

/// Free public IPs per farm, as seen by one admission pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FarmIpPool {
    free: BTreeMap<FarmId, u32>,
}

impl FarmIpPool {
    /// Count the IPs of each farm that no contract owns.
    pub fn from_farms(farms: &[Farm]) -> Self {
        Self {
            free: farms.iter().map(|f| (f.farm_id, f.free_ips())).collect(),
        }
    }

    pub fn available(&self, farm: FarmId) -> u32 {
        self.free.get(&farm).copied().unwrap_or(0)
    }

    /// Return `count` IPs to the farm.
    pub fn release(&mut self, farm: FarmId, count: u32) {
        let free = self.free.entry(farm).or_insert(0);
        *free = free.saturating_add(count);
    }

    /// Take `count` IPs for `node`. On shortfall the pool is left unchanged.
    pub fn reserve(&mut self, farm: FarmId, node: NodeId, count: u32) -> ReconcileResult<()> {
        let available = self.available(farm);
        if count > available {
            return Err(ReconcileError::InsufficientPublicIps {
                farm,
                node,
                requested: count,
                available,
            });
        }
        if count > 0 {
            self.free.insert(farm, available - count);
        }
        Ok(())
    }
}

/// Reject gateway workloads the node cannot serve.
pub fn check_gateway_support(
    node: NodeId,
    info: &NodeInfo,
    deployment: &Deployment,
) -> ReconcileResult<()> {
    if deployment.has_workload(WorkloadType::GatewayFqdnProxy) && !info.has_public_ipv4() {
        return Err(ReconcileError::GatewayConfigMissing {
            node,
            workload: WorkloadType::GatewayFqdnProxy,
            requirement: "ipv4",
        });
    }
    if deployment.has_workload(WorkloadType::GatewayNameProxy) && !info.has_domain() {
        return Err(ReconcileError::GatewayConfigMissing {
            node,
            workload: WorkloadType::GatewayNameProxy,
            requirement: "domain",
        });
    }
    Ok(())
}

/// Reject a deployment needing more than `total - used + freed`.
pub fn check_capacity(
    node: NodeId,
    info: &NodeInfo,
    needed: Capacity,
    freed: Capacity,
) -> ReconcileResult<()> {
    let free = info.capacity.free_with(freed);
    if !needed.fits_within(&free) {
        return Err(ReconcileError::InsufficientCapacity { node, needed, free });
    }
    Ok(())
}

fn invalid(node: NodeId, reason: impl ToString) -> ReconcileError {
    ReconcileError::InvalidDeployment {
        node,
        reason: reason.to_string(),
    }
}

/// Validate `new` against live capacity, IP quota and public config.
///
/// `old` holds the deployment objects currently bound to each node; their
/// capacity and IPs count as released.
#[instrument(skip_all, fields(old = old.len(), new = new.len()))]
pub async fn validate_deployments(
    directory: &dyn Directory,
    ledger: &dyn Ledger,
    old: &BTreeMap<NodeId, Deployment>,
    new: &BTreeMap<NodeId, Deployment>,
    config: &ReconcilerConfig,
    cancel: &CancellationToken,
) -> ReconcileResult<()> {
    let limit = config.directory_timeout;
    let nodes = bounded(cancel, limit, directory.list_nodes())
        .await
        .map_err(|e| e.into_directory("failed to fetch nodes from the directory"))?;
    let farms = bounded(cancel, limit, directory.list_farms())
        .await
        .map_err(|e| e.into_directory("failed to fetch farms from the directory"))?;

    let listed: BTreeMap<NodeId, NodeInfo> = nodes.into_iter().map(|n| (n.node_id, n)).collect();
    let mut ips = FarmIpPool::from_farms(&farms);

    for (node, deployment) in old {
        let info = listed
            .get(node)
            .ok_or(ReconcileError::UnknownNode { node: *node })?;
        ips.release(info.farm_id, deployment.public_ip_count());
    }

    for (&node, deployment) in new {
        deployment.validate().map_err(|e| invalid(node, e))?;
        let needed = deployment.capacity().map_err(|e| invalid(node, e))?;
        let required_ips = deployment.public_ip_count();

        let live = bounded(cancel, limit, directory.get_node(node))
            .await
            .map_err(|e| e.into_directory(&format!("couldn't get node {node} info")))?;

        let mut freed = Capacity::ZERO;
        if let Some(previous) = old.get(&node) {
            freed = previous.capacity().map_err(|e| {
                invalid(node, format!("couldn't read capacity of the current deployment: {e}"))
            })?;

            let contract_id = previous
                .contract_id
                .ok_or_else(|| invalid(node, "current deployment is not bound to a contract"))?;
            let contract = bounded(cancel, config.ledger_timeout, ledger.get_contract(contract_id))
                .await
                .map_err(|e| e.into_contract(ContractOperation::Get, node, Some(contract_id)))?;

            if required_ips > contract.public_ips {
                return Err(ReconcileError::IpCountIncreaseUnsupported {
                    node,
                    contract: contract_id,
                    current: contract.public_ips,
                    requested: required_ips,
                });
            }
        }

        let info = listed
            .get(&node)
            .ok_or(ReconcileError::UnknownNode { node })?;
        ips.reserve(info.farm_id, node, required_ips)?;
        check_gateway_support(node, info, deployment)?;
        check_capacity(node, &live, needed, freed)?;

        debug!(
            node = %node,
            needed = %needed,
            public_ips = required_ips,
            "Deployment admitted"
        );
    }

    Ok(())
}
