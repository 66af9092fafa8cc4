//! Deployment reconciliation for the compute grid.
//!
//! This library drives a set of per-node deployments from what is running on
//! the grid toward what is desired. Key concepts:
//!
//! - **Contract map**: node id to the ledger contract owning its deployment.
//! - **Admission**: capacity, public IP and gateway checks over the whole
//!   proposal before anything is mutated.
//! - **Phases**: deletions, then creations, then updates, each in node order.
//! - **Convergence**: polling a node until every workload of a submitted
//!   version reports a terminal state.
//!
//! # Invariants
//!
//! - Unchanged deployments are never resubmitted
//! - Unchanged workloads keep their version across updates
//! - Every failure reports the contract map as it stood when it happened
//! - A contract created for a failed submission is cancelled, or reported

mod call;

pub mod admission;
pub mod clients;
pub mod clock;
pub mod config;
pub mod converge;
pub mod engine;
pub mod error;
pub mod hash;
pub mod model;
pub mod orchestrator;
pub mod plan;
pub mod snapshot;

pub use admission::{validate_deployments, FarmIpPool};
pub use clients::{
    Contract, Directory, Farm, FarmIp, Grid, Identity, Ledger, NodeCapacity, NodeClient,
    NodeClientPool, NodeInfo, PublicConfig,
};
pub use clock::{Clock, TokioClock};
pub use config::{ConvergenceConfig, ReconcilerConfig};
pub use converge::{wait_for_deployment, ConvergenceWatch, Progress};
pub use engine::Reconciler;
pub use error::{
    ContractOperation, NodeOperation, ReconcileError, ReconcileFailure, ReconcileResult, RpcError,
    RpcResult,
};
pub use hash::{challenge_hash, deployment_hash, workload_hash, ContentHash};
pub use model::{
    Capacity, ContractMap, Deployment, DeploymentError, ResultState, Signature, Workload,
    WorkloadResult, WorkloadType,
};
pub use plan::{workload_changes, ChangeKind, ReconcilePlan, WorkloadChange};
pub use snapshot::GridSnapshot;
