//! Test doubles for the grid reconciler.
//!
//! [`FakeGrid`] is one shared in-memory grid implementing every collaborator
//! trait: node RPC, ledger and directory. It records each call it receives and
//! accepts injected faults. [`ManualClock`] advances time only when the code
//! under test sleeps.

mod clock;
mod grid;
mod identity;

pub use clock::ManualClock;
pub use grid::{Call, FakeGrid, FakeNode};
pub use identity::FakeIdentity;

use grid_id::{ContractId, FarmId, NodeId, TwinId};
use grid_reconcile::{Deployment, Workload, WorkloadType};
use serde_json::json;

pub const GIB: u64 = 1024 * 1024 * 1024;

pub fn node(n: u32) -> NodeId {
    NodeId::new(n).expect("node ids in tests are non-zero")
}

pub fn farm(n: u32) -> FarmId {
    FarmId::new(n).expect("farm ids in tests are non-zero")
}

pub fn twin(n: u32) -> TwinId {
    TwinId::new(n).expect("twin ids in tests are non-zero")
}

pub fn contract(n: u64) -> ContractId {
    ContractId::new(n).expect("contract ids in tests are non-zero")
}

/// A virtual machine with 1 vCPU.
pub fn vm(name: &str, memory: u64, disk: u64) -> Workload {
    Workload::new(
        name,
        WorkloadType::ZMachine,
        json!({
            "flist": "https://hub.grid.tf/tf-official-apps/base:latest.flist",
            "network": {"interfaces": [{"network": "net", "ip": "10.20.2.5"}]},
            "size": disk,
            "compute_capacity": {"cpu": 1, "memory": memory},
            "entrypoint": "/sbin/zinit init",
        }),
    )
}

pub fn zmount(name: &str, size: u64) -> Workload {
    Workload::new(name, WorkloadType::ZMount, json!({"size": size}))
}

pub fn public_ip(name: &str) -> Workload {
    Workload::new(name, WorkloadType::PublicIp, json!({"v4": true, "v6": false}))
}

pub fn deployment(workloads: Vec<Workload>) -> Deployment {
    Deployment::new(workloads)
}
