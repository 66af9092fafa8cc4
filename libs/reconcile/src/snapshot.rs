//! Offline grid snapshot.
//!
//! A [`GridSnapshot`] is a JSON capture of the directory and ledger plus the
//! deployments currently bound to each node. It implements [`Directory`] and
//! the read side of [`Ledger`], which is enough to plan and admit a change
//! without reaching the grid.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grid_id::{ContractId, NodeId};
use serde::{Deserialize, Serialize};

use crate::clients::{Contract, Directory, Farm, Identity, Ledger, NodeInfo};
use crate::error::{RpcError, RpcResult};
use crate::model::{ContractMap, Deployment};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    /// When the snapshot was captured.
    #[serde(default)]
    pub taken_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub nodes: Vec<NodeInfo>,

    #[serde(default)]
    pub farms: Vec<Farm>,

    #[serde(default)]
    pub contracts: Vec<Contract>,

    /// Deployment bound to each node, with its `contract_id` set.
    #[serde(default)]
    pub deployments: BTreeMap<NodeId, Deployment>,
}

impl GridSnapshot {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Contracts of the captured deployments, keyed by node.
    pub fn contract_map(&self) -> ContractMap {
        self.deployments
            .iter()
            .filter_map(|(node, dl)| dl.contract_id.map(|c| (*node, c)))
            .collect()
    }

    /// Time since capture, if the capture time is known.
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.taken_at.map(|taken| now - taken)
    }

    fn read_only<T>(operation: &str) -> RpcResult<T> {
        Err(RpcError::new(format!(
            "{operation} is not available on a read-only snapshot"
        )))
    }
}

#[async_trait]
impl Directory for GridSnapshot {
    async fn list_nodes(&self) -> RpcResult<Vec<NodeInfo>> {
        Ok(self.nodes.clone())
    }

    async fn list_farms(&self) -> RpcResult<Vec<Farm>> {
        Ok(self.farms.clone())
    }

    async fn get_node(&self, node: NodeId) -> RpcResult<NodeInfo> {
        self.nodes
            .iter()
            .find(|n| n.node_id == node)
            .cloned()
            .ok_or_else(|| RpcError::new(format!("node {node} not found")))
    }
}

#[async_trait]
impl Ledger for GridSnapshot {
    async fn create_node_contract(
        &self,
        _identity: &dyn Identity,
        _node: NodeId,
        _hash: &str,
        _public_ips: u32,
    ) -> RpcResult<ContractId> {
        Self::read_only("create contract")
    }

    async fn update_node_contract(
        &self,
        _identity: &dyn Identity,
        _contract: ContractId,
        _hash: &str,
    ) -> RpcResult<ContractId> {
        Self::read_only("update contract")
    }

    async fn cancel_contract(&self, _identity: &dyn Identity, _contract: ContractId) -> RpcResult<()> {
        Self::read_only("cancel contract")
    }

    async fn get_contract(&self, contract: ContractId) -> RpcResult<Contract> {
        self.contracts
            .iter()
            .find(|c| c.contract_id == contract)
            .cloned()
            .ok_or_else(|| RpcError::new(format!("contract {contract} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "taken_at": "2026-01-02T03:04:05Z",
        "nodes": [
            {"node_id": 11, "farm_id": 1, "capacity": {"total": {"mru": 100, "sru": 100, "hru": 0}}}
        ],
        "farms": [
            {"farm_id": 1, "public_ips": [{"ip": "185.0.0.1/24"}, {"ip": "185.0.0.2/24", "contract_id": 5}]}
        ],
        "contracts": [
            {"contract_id": 5, "node_id": 11, "twin_id": 3, "deployment_hash": "ab", "public_ips": 1}
        ],
        "deployments": {
            "11": {"version": 1, "contract_id": 5, "workloads": []}
        }
    }"#;

    #[test]
    fn test_parse_snapshot() {
        let snapshot = GridSnapshot::from_json(SNAPSHOT).unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.farms[0].free_ips(), 1);
        assert_eq!(
            snapshot.contract_map(),
            [(NodeId::new(11).unwrap(), ContractId::new(5).unwrap())].into()
        );
    }

    #[test]
    fn test_snapshot_age() {
        let snapshot = GridSnapshot::from_json(SNAPSHOT).unwrap();
        let now = "2026-01-02T04:04:05Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(snapshot.age(now), Some(chrono::Duration::hours(1)));
        assert_eq!(GridSnapshot::default().age(now), None);
    }

    #[tokio::test]
    async fn test_snapshot_lookups() {
        let snapshot = GridSnapshot::from_json(SNAPSHOT).unwrap();
        let node = snapshot.get_node(NodeId::new(11).unwrap()).await.unwrap();
        assert_eq!(node.farm_id.get(), 1);
        assert!(snapshot.get_node(NodeId::new(12).unwrap()).await.is_err());

        let contract = snapshot
            .get_contract(ContractId::new(5).unwrap())
            .await
            .unwrap();
        assert_eq!(contract.public_ips, 1);
    }
}
