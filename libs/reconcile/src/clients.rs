//! Collaborator interfaces consumed by the reconciler.
//!
//! The grid is reached through four seams:
//! - [`NodeClientPool`] / [`NodeClient`]: per-node deployment RPC
//! - [`Ledger`]: contract creation, update and cancellation
//! - [`Directory`]: node and farm listings with capacity and public config
//! - [`Identity`]: twin id and signing
//!
//! Transports are out of scope; tests use in-memory fakes.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use grid_id::{ContractId, FarmId, NodeId, TwinId};
use serde::{Deserialize, Serialize};

use crate::error::RpcResult;
use crate::model::{Capacity, Deployment};

// =============================================================================
// Directory types
// =============================================================================

/// Public network configuration of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicConfig {
    #[serde(default)]
    pub ipv4: String,

    #[serde(default)]
    pub ipv6: String,

    #[serde(default)]
    pub gw4: String,

    #[serde(default)]
    pub gw6: String,

    #[serde(default)]
    pub domain: String,
}

/// Total and used capacity of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub total: Capacity,

    #[serde(default)]
    pub used: Capacity,
}

impl NodeCapacity {
    /// `total - used + freed`, saturating; `freed` is what a replaced deployment held.
    pub fn free_with(&self, freed: Capacity) -> Capacity {
        (self.total + freed).saturating_sub(self.used)
    }
}

/// A node as described by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,

    pub farm_id: FarmId,

    pub capacity: NodeCapacity,

    #[serde(default)]
    pub public_config: Option<PublicConfig>,
}

impl NodeInfo {
    pub fn has_public_ipv4(&self) -> bool {
        self.public_config
            .as_ref()
            .is_some_and(|c| !c.ipv4.is_empty())
    }

    pub fn has_domain(&self) -> bool {
        self.public_config
            .as_ref()
            .is_some_and(|c| !c.domain.is_empty())
    }
}

/// A public IP owned by a farm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmIp {
    pub ip: String,

    #[serde(default)]
    pub gateway: String,

    /// Contract currently holding the IP, if any.
    #[serde(default)]
    pub contract_id: Option<ContractId>,
}

/// A farm and its public IP pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Farm {
    pub farm_id: FarmId,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub public_ips: Vec<FarmIp>,
}

impl Farm {
    /// IPs with no owning contract.
    pub fn free_ips(&self) -> u32 {
        let free = self
            .public_ips
            .iter()
            .filter(|ip| ip.contract_id.is_none())
            .count();
        u32::try_from(free).unwrap_or(u32::MAX)
    }
}

// =============================================================================
// Ledger types
// =============================================================================

/// Ledger record binding a deployment to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: ContractId,

    pub node_id: NodeId,

    pub twin_id: TwinId,

    /// Hex challenge hash of the deployment committed to the ledger.
    pub deployment_hash: String,

    /// Number of public IPs reserved by the contract.
    pub public_ips: u32,
}

// =============================================================================
// Traits
// =============================================================================

/// RPC handle for one node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Fetch the deployment bound to `contract`.
    async fn get_deployment(&self, contract: ContractId) -> RpcResult<Deployment>;

    /// Submit a new deployment. Its `contract_id` must be set.
    async fn deploy_deployment(&self, deployment: &Deployment) -> RpcResult<()>;

    /// Submit a new version of an existing deployment.
    async fn update_deployment(&self, deployment: &Deployment) -> RpcResult<()>;

    /// Ask the node to tear down the deployment bound to `contract`.
    async fn delete_deployment(&self, contract: ContractId) -> RpcResult<()>;

    /// Network interfaces of the node; used as a liveness probe.
    async fn list_interfaces(&self) -> RpcResult<BTreeMap<String, Vec<IpAddr>>>;
}

/// Resolves node ids to live RPC handles.
#[async_trait]
pub trait NodeClientPool: Send + Sync {
    async fn node_client(&self, node: NodeId) -> RpcResult<Arc<dyn NodeClient>>;
}

/// Contract ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create a node contract committing to `hash` and reserving `public_ips`.
    async fn create_node_contract(
        &self,
        identity: &dyn Identity,
        node: NodeId,
        hash: &str,
        public_ips: u32,
    ) -> RpcResult<ContractId>;

    /// Replace the deployment hash committed by `contract`.
    async fn update_node_contract(
        &self,
        identity: &dyn Identity,
        contract: ContractId,
        hash: &str,
    ) -> RpcResult<ContractId>;

    async fn cancel_contract(&self, identity: &dyn Identity, contract: ContractId) -> RpcResult<()>;

    async fn get_contract(&self, contract: ContractId) -> RpcResult<Contract>;
}

/// Node and farm directory.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn list_nodes(&self) -> RpcResult<Vec<NodeInfo>>;

    async fn list_farms(&self) -> RpcResult<Vec<Farm>>;

    async fn get_node(&self, node: NodeId) -> RpcResult<NodeInfo>;
}

/// Signing credential of the deploying twin.
pub trait Identity: Send + Sync {
    fn twin_id(&self) -> TwinId;

    fn sign(&self, message: &[u8]) -> RpcResult<Vec<u8>>;
}

/// The collaborators one reconciler talks to.
#[derive(Clone)]
pub struct Grid {
    pub nodes: Arc<dyn NodeClientPool>,
    pub ledger: Arc<dyn Ledger>,
    pub directory: Arc<dyn Directory>,
    pub identity: Arc<dyn Identity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_with_adds_back_released_capacity() {
        let capacity = NodeCapacity {
            total: Capacity { mru: 8, sru: 100, hru: 0 },
            used: Capacity { mru: 6, sru: 120, hru: 0 },
        };
        assert_eq!(
            capacity.free_with(Capacity::ZERO),
            Capacity { mru: 2, sru: 0, hru: 0 }
        );
        assert_eq!(
            capacity.free_with(Capacity { mru: 1, sru: 30, hru: 0 }),
            Capacity { mru: 3, sru: 10, hru: 0 }
        );
    }
}
