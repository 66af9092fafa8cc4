//! Error taxonomy for reconciliation.

use std::fmt;
use std::time::Duration;

use grid_id::{ContractId, FarmId, NodeId};
use thiserror::Error;

use crate::model::{Capacity, ContractMap, WorkloadType};

/// Result type for reconciliation operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Failure reported by a collaborator (node RPC, ledger, directory, identity).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct RpcError(String);

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// Result type returned by collaborator traits.
pub type RpcResult<T> = Result<T, RpcError>;

/// Node RPC operations, named in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOperation {
    Connect,
    GetDeployment,
    Deploy,
    Update,
    Delete,
    ListInterfaces,
}

impl fmt::Display for NodeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connect => "connect",
            Self::GetDeployment => "get deployment",
            Self::Deploy => "deploy",
            Self::Update => "update deployment",
            Self::Delete => "delete deployment",
            Self::ListInterfaces => "list interfaces",
        })
    }
}

/// Ledger contract operations, named in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractOperation {
    Create,
    Update,
    Cancel,
    Get,
}

impl fmt::Display for ContractOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Cancel => "cancel",
            Self::Get => "get",
        })
    }
}

fn contract_suffix(contract: &Option<ContractId>) -> String {
    contract.map(|c| format!(" {c}")).unwrap_or_default()
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The deployment failed its self-consistency check.
    #[error("invalid deployment for node {node}: {reason}")]
    InvalidDeployment { node: NodeId, reason: String },

    #[error("node {node} doesn't have enough resources. needed: {needed}, free: {free}")]
    InsufficientCapacity {
        node: NodeId,
        needed: Capacity,
        free: Capacity,
    },

    #[error(
        "farm {farm} doesn't have enough public ips for node {node}: requested {requested}, available {available}"
    )]
    InsufficientPublicIps {
        farm: FarmId,
        node: NodeId,
        requested: u32,
        available: u32,
    },

    /// Raising the reserved IP count needs a delete and recreate.
    #[error(
        "increasing the number of reserved public ips in a deployment is not supported, node: {node}, contract: {contract}, current: {current}, requested: {requested}"
    )]
    IpCountIncreaseUnsupported {
        node: NodeId,
        contract: ContractId,
        current: u32,
        requested: u32,
    },

    #[error("node {node} can't deploy a {workload} workload as it doesn't have a public {requirement} configured")]
    GatewayConfigMissing {
        node: NodeId,
        workload: WorkloadType,
        requirement: &'static str,
    },

    #[error("node {node} not returned from the directory")]
    UnknownNode { node: NodeId },

    #[error("node {node}: {operation} failed: {reason}")]
    NodeUnreachable {
        node: NodeId,
        operation: NodeOperation,
        reason: String,
    },

    #[error("failed to {operation} contract{} for node {node}: {reason}", contract_suffix(.contract))]
    ContractOperationFailed {
        operation: ContractOperation,
        node: NodeId,
        contract: Option<ContractId>,
        reason: String,
    },

    #[error("directory request failed: {reason}")]
    Directory { reason: String },

    #[error("signing deployment for node {node} failed: {reason}")]
    Signing { node: NodeId, reason: String },

    #[error("waiting for deployment {contract} on node {node} to reach version {version} timed out after {elapsed:?}")]
    ConvergenceTimeout {
        node: NodeId,
        contract: ContractId,
        version: u32,
        elapsed: Duration,
    },

    #[error("workload {index} ({name}) failed within deployment {contract} on node {node} with error {message}")]
    WorkloadFailed {
        node: NodeId,
        contract: ContractId,
        index: usize,
        name: String,
        message: String,
    },

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("operation cancelled")]
    Cancelled,

    /// Submission failed and the compensating cancel failed too.
    #[error(
        "error sending deployment to node {node}: {primary}; error cancelling contract: {cancel}; you must cancel it manually (id: {contract})"
    )]
    OrphanedContract {
        node: NodeId,
        contract: ContractId,
        #[source]
        primary: Box<ReconcileError>,
        cancel: Box<ReconcileError>,
    },

    /// The prior state was never read, so there is nothing to revert to.
    #[error("failed to deploy deployments: {primary}; failed to fetch deployment objects to revert deployments: {fetch}; try again")]
    RevertImpossible {
        #[source]
        primary: Box<ReconcileError>,
        fetch: Box<ReconcileError>,
    },

    #[error("failed to deploy deployments: {primary}; failed to revert deployments: {revert}; try again")]
    RevertFailed {
        #[source]
        primary: Box<ReconcileError>,
        revert: Box<ReconcileError>,
    },
}

impl ReconcileError {
    /// True when the grid may be left in a state that needs an operator.
    pub fn is_manual_intervention(&self) -> bool {
        matches!(
            self,
            Self::OrphanedContract { .. } | Self::RevertImpossible { .. } | Self::RevertFailed { .. }
        )
    }

    /// True for errors raised by admission, before anything was sent.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            Self::InvalidDeployment { .. }
                | Self::InsufficientCapacity { .. }
                | Self::InsufficientPublicIps { .. }
                | Self::IpCountIncreaseUnsupported { .. }
                | Self::GatewayConfigMissing { .. }
                | Self::UnknownNode { .. }
        )
    }

    /// The error that started a compensating chain.
    pub fn primary(&self) -> &ReconcileError {
        match self {
            Self::OrphanedContract { primary, .. }
            | Self::RevertImpossible { primary, .. }
            | Self::RevertFailed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// Contract that must be cancelled by hand, if any.
    pub fn orphaned_contract(&self) -> Option<ContractId> {
        match self {
            Self::OrphanedContract { contract, .. } => Some(*contract),
            Self::RevertImpossible { primary, .. } => primary.orphaned_contract(),
            Self::RevertFailed { primary, revert } => primary
                .orphaned_contract()
                .or_else(|| revert.orphaned_contract()),
            _ => None,
        }
    }
}

/// A failed reconciliation together with the best-known contract map.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ReconcileFailure {
    /// Contracts as they stood when the failure was returned.
    pub current: ContractMap,

    #[source]
    pub error: ReconcileError,
}

impl ReconcileFailure {
    pub fn new(current: ContractMap, error: ReconcileError) -> Self {
        Self { current, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u32) -> NodeId {
        NodeId::new(n).unwrap()
    }

    fn contract(n: u64) -> ContractId {
        ContractId::new(n).unwrap()
    }

    #[test]
    fn test_contract_error_names_contract_when_known() {
        let err = ReconcileError::ContractOperationFailed {
            operation: ContractOperation::Cancel,
            node: node(3),
            contract: Some(contract(77)),
            reason: "rpc down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to cancel contract 77 for node 3: rpc down"
        );

        let err = ReconcileError::ContractOperationFailed {
            operation: ContractOperation::Create,
            node: node(3),
            contract: None,
            reason: "rpc down".to_string(),
        };
        assert_eq!(err.to_string(), "failed to create contract for node 3: rpc down");
    }

    #[test]
    fn test_orphaned_contract_chain() {
        let err = ReconcileError::OrphanedContract {
            node: node(1),
            contract: contract(9),
            primary: Box::new(ReconcileError::NodeUnreachable {
                node: node(1),
                operation: NodeOperation::Deploy,
                reason: "timeout".to_string(),
            }),
            cancel: Box::new(ReconcileError::Cancelled),
        };

        assert!(err.is_manual_intervention());
        assert_eq!(err.orphaned_contract(), Some(contract(9)));
        assert!(matches!(
            err.primary(),
            ReconcileError::NodeUnreachable { .. }
        ));
        assert!(err.to_string().contains("you must cancel it manually (id: 9)"));

        let wrapped = ReconcileError::RevertFailed {
            primary: Box::new(err),
            revert: Box::new(ReconcileError::Cancelled),
        };
        assert_eq!(wrapped.orphaned_contract(), Some(contract(9)));
        assert!(matches!(
            wrapped.primary(),
            ReconcileError::NodeUnreachable { .. }
        ));
    }

    #[test]
    fn test_admission_classification() {
        assert!(ReconcileError::UnknownNode { node: node(1) }.is_admission());
        assert!(!ReconcileError::Cancelled.is_admission());
    }
}
