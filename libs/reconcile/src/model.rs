//! Deployment data model.
//!
//! A [`Deployment`] is the unit a node runs under one ledger contract. It owns
//! an ordered list of [`Workload`]s whose payloads are opaque JSON, decoded
//! here only as far as capacity accounting and self-validation need.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, AddAssign};

use grid_id::{ContractId, NodeId, TwinId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Node id to contract id, the shape every reconciliation call returns.
pub type ContractMap = BTreeMap<NodeId, ContractId>;

/// Maximum workload name length accepted by nodes.
pub const MAX_WORKLOAD_NAME_LEN: usize = 50;

// =============================================================================
// Capacity
// =============================================================================

/// Additive resource vector, all fields in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// Memory.
    #[serde(default)]
    pub mru: u64,

    /// SSD storage.
    #[serde(default)]
    pub sru: u64,

    /// HDD storage.
    #[serde(default)]
    pub hru: u64,
}

impl Capacity {
    pub const ZERO: Self = Self {
        mru: 0,
        sru: 0,
        hru: 0,
    };

    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self {
            mru: self.mru.saturating_sub(other.mru),
            sru: self.sru.saturating_sub(other.sru),
            hru: self.hru.saturating_sub(other.hru),
        }
    }

    /// True when every dimension of `self` is at most the same dimension of `free`.
    #[must_use]
    pub fn fits_within(&self, free: &Self) -> bool {
        self.mru <= free.mru && self.sru <= free.sru && self.hru <= free.hru
    }
}

impl Add for Capacity {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            mru: self.mru.saturating_add(other.mru),
            sru: self.sru.saturating_add(other.sru),
            hru: self.hru.saturating_add(other.hru),
        }
    }
}

impl AddAssign for Capacity {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl std::iter::Sum for Capacity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[mru: {}, sru: {}, hru: {}]",
            self.mru, self.sru, self.hru
        )
    }
}

// =============================================================================
// Workloads
// =============================================================================

/// Workload kinds understood by grid nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkloadType {
    #[serde(rename = "network")]
    Network,
    #[serde(rename = "zmachine")]
    ZMachine,
    #[serde(rename = "zmount")]
    ZMount,
    #[serde(rename = "ip")]
    PublicIp,
    #[serde(rename = "zdb")]
    Zdb,
    #[serde(rename = "qsfs")]
    Qsfs,
    #[serde(rename = "gateway-fqdn-proxy")]
    GatewayFqdnProxy,
    #[serde(rename = "gateway-name-proxy")]
    GatewayNameProxy,
    #[serde(rename = "zlogs")]
    ZLogs,
}

impl WorkloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::ZMachine => "zmachine",
            Self::ZMount => "zmount",
            Self::PublicIp => "ip",
            Self::Zdb => "zdb",
            Self::Qsfs => "qsfs",
            Self::GatewayFqdnProxy => "gateway-fqdn-proxy",
            Self::GatewayNameProxy => "gateway-name-proxy",
            Self::ZLogs => "zlogs",
        }
    }
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reported by the node for a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultState {
    /// No result yet.
    #[default]
    #[serde(rename = "")]
    Pending,
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "deleted")]
    Deleted,
}

/// Node-reported outcome of a workload. Never written locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadResult {
    #[serde(default)]
    pub state: ResultState,

    #[serde(default, rename = "error")]
    pub message: String,
}

/// A single unit of work inside a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub version: u32,

    pub name: String,

    #[serde(rename = "type")]
    pub kind: WorkloadType,

    /// Type-specific payload, opaque to the reconciler outside capacity accounting.
    #[serde(default)]
    pub data: serde_json::Value,

    #[serde(default)]
    pub metadata: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub result: WorkloadResult,
}

#[derive(Deserialize)]
struct ComputeCapacity {
    cpu: u8,
    memory: u64,
}

#[derive(Deserialize)]
struct ZMachineData {
    #[serde(default)]
    size: u64,
    compute_capacity: ComputeCapacity,
}

#[derive(Deserialize)]
struct SizedData {
    size: u64,
}

#[derive(Deserialize)]
struct QsfsData {
    cache: u64,
}

impl Workload {
    pub fn new(name: impl Into<String>, kind: WorkloadType, data: serde_json::Value) -> Self {
        Self {
            version: 0,
            name: name.into(),
            kind,
            data,
            metadata: String::new(),
            description: String::new(),
            result: WorkloadResult::default(),
        }
    }

    /// Resources this workload reserves on its node.
    pub fn capacity(&self) -> Result<Capacity, DeploymentError> {
        let payload_err = |e: serde_json::Error| DeploymentError::Payload {
            name: self.name.clone(),
            kind: self.kind,
            reason: e.to_string(),
        };

        let capacity = match self.kind {
            WorkloadType::ZMachine => {
                let vm: ZMachineData =
                    serde_json::from_value(self.data.clone()).map_err(payload_err)?;
                if vm.compute_capacity.cpu == 0 || vm.compute_capacity.memory == 0 {
                    return Err(DeploymentError::Payload {
                        name: self.name.clone(),
                        kind: self.kind,
                        reason: "compute capacity requires cpu and memory".to_string(),
                    });
                }
                Capacity {
                    mru: vm.compute_capacity.memory,
                    sru: vm.size,
                    hru: 0,
                }
            }
            WorkloadType::ZMount => {
                let disk: SizedData =
                    serde_json::from_value(self.data.clone()).map_err(payload_err)?;
                Capacity {
                    sru: disk.size,
                    ..Capacity::ZERO
                }
            }
            WorkloadType::Zdb => {
                let zdb: SizedData =
                    serde_json::from_value(self.data.clone()).map_err(payload_err)?;
                Capacity {
                    hru: zdb.size,
                    ..Capacity::ZERO
                }
            }
            WorkloadType::Qsfs => {
                let qsfs: QsfsData =
                    serde_json::from_value(self.data.clone()).map_err(payload_err)?;
                Capacity {
                    sru: qsfs.cache,
                    ..Capacity::ZERO
                }
            }
            WorkloadType::Network
            | WorkloadType::PublicIp
            | WorkloadType::GatewayFqdnProxy
            | WorkloadType::GatewayNameProxy
            | WorkloadType::ZLogs => Capacity::ZERO,
        };

        Ok(capacity)
    }
}

// =============================================================================
// Deployments
// =============================================================================

/// Signature over a deployment's challenge hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub twin_id: TwinId,

    /// Hex-encoded signature bytes.
    pub signature: String,
}

/// Self-consistency failures of a deployment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeploymentError {
    #[error("workload name {name:?} is invalid")]
    InvalidName { name: String },

    #[error("multiple workloads with the same name {name:?}")]
    DuplicateName { name: String },

    #[error("workload {name:?} version {workload} is ahead of deployment version {deployment}")]
    VersionAhead {
        name: String,
        workload: u32,
        deployment: u32,
    },

    #[error("deployment version {version} cannot be incremented")]
    VersionExhausted { version: u32 },

    #[error("workload {name:?} has an invalid {kind} payload: {reason}")]
    Payload {
        name: String,
        kind: WorkloadType,
        reason: String,
    },
}

/// Everything a node runs under one contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub version: u32,

    #[serde(default)]
    pub twin_id: Option<TwinId>,

    #[serde(default)]
    pub contract_id: Option<ContractId>,

    #[serde(default)]
    pub metadata: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub workloads: Vec<Workload>,

    #[serde(default)]
    pub signatures: Vec<Signature>,
}

impl Deployment {
    pub fn new(workloads: Vec<Workload>) -> Self {
        Self {
            workloads,
            ..Self::default()
        }
    }

    pub fn workload(&self, name: &str) -> Option<&Workload> {
        self.workloads.iter().find(|w| w.name == name)
    }

    pub fn workload_names(&self) -> BTreeSet<&str> {
        self.workloads.iter().map(|w| w.name.as_str()).collect()
    }

    pub fn has_workload(&self, kind: WorkloadType) -> bool {
        self.workloads.iter().any(|w| w.kind == kind)
    }

    /// Number of public IPs the deployment reserves from its farm.
    pub fn public_ip_count(&self) -> u32 {
        let count = self
            .workloads
            .iter()
            .filter(|w| w.kind == WorkloadType::PublicIp)
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// Sum of every workload's capacity.
    pub fn capacity(&self) -> Result<Capacity, DeploymentError> {
        self.workloads.iter().map(Workload::capacity).sum()
    }

    /// Version the next update of this deployment must carry.
    pub fn next_version(&self) -> Result<u32, DeploymentError> {
        self.version
            .checked_add(1)
            .ok_or(DeploymentError::VersionExhausted {
                version: self.version,
            })
    }

    /// Self-consistency check run before anything is sent to a node.
    pub fn validate(&self) -> Result<(), DeploymentError> {
        let mut seen = BTreeSet::new();
        for workload in &self.workloads {
            if !is_valid_name(&workload.name) {
                return Err(DeploymentError::InvalidName {
                    name: workload.name.clone(),
                });
            }
            if !seen.insert(workload.name.as_str()) {
                return Err(DeploymentError::DuplicateName {
                    name: workload.name.clone(),
                });
            }
            if workload.version > self.version {
                return Err(DeploymentError::VersionAhead {
                    name: workload.name.clone(),
                    workload: workload.version,
                    deployment: self.version,
                });
            }
            workload.capacity()?;
        }
        Ok(())
    }

    /// Attach `signature` for `twin`, replacing an earlier one from the same twin.
    pub fn attach_signature(&mut self, twin: TwinId, signature: &[u8]) {
        self.signatures.retain(|s| s.twin_id != twin);
        self.signatures.push(Signature {
            twin_id: twin,
            signature: hex::encode(signature),
        });
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_WORKLOAD_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn vm(name: &str, memory: u64, size: u64) -> Workload {
        Workload::new(
            name,
            WorkloadType::ZMachine,
            json!({"flist": "https://hub/vm.flist", "size": size, "compute_capacity": {"cpu": 2, "memory": memory}}),
        )
    }

    #[test]
    fn test_capacity_sums_workloads() {
        let dl = Deployment::new(vec![
            vm("vm1", 2 * GIB, 10 * GIB),
            Workload::new("disk", WorkloadType::ZMount, json!({"size": 5 * GIB})),
            Workload::new("db", WorkloadType::Zdb, json!({"size": 7 * GIB, "mode": "user"})),
            Workload::new("ip", WorkloadType::PublicIp, json!({"v4": true})),
        ]);

        let cap = dl.capacity().unwrap();
        assert_eq!(
            cap,
            Capacity {
                mru: 2 * GIB,
                sru: 15 * GIB,
                hru: 7 * GIB
            }
        );
        assert_eq!(dl.public_ip_count(), 1);
    }

    #[test]
    fn test_capacity_fits_within() {
        let need = Capacity {
            mru: 2,
            sru: 2,
            hru: 0,
        };
        assert!(need.fits_within(&need));
        assert!(!need.fits_within(&Capacity {
            mru: 2,
            sru: 1,
            hru: 100
        }));
    }

    #[test]
    fn test_capacity_display() {
        let cap = Capacity {
            mru: 1,
            sru: 2,
            hru: 3,
        };
        assert_eq!(cap.to_string(), "[mru: 1, sru: 2, hru: 3]");
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let dl = Deployment::new(vec![vm("vm", GIB, GIB), vm("vm", GIB, GIB)]);
        assert!(matches!(
            dl.validate(),
            Err(DeploymentError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_payload() {
        let dl = Deployment::new(vec![Workload::new(
            "disk",
            WorkloadType::ZMount,
            json!({"size": "big"}),
        )]);
        assert!(matches!(
            dl.validate(),
            Err(DeploymentError::Payload { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_invalid_name() {
        let dl = Deployment::new(vec![vm("my vm", GIB, GIB)]);
        assert!(matches!(
            dl.validate(),
            Err(DeploymentError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_workload_version_ahead() {
        let mut w = vm("vm", GIB, GIB);
        w.version = 3;
        let mut dl = Deployment::new(vec![w]);
        dl.version = 2;
        assert!(matches!(
            dl.validate(),
            Err(DeploymentError::VersionAhead { .. })
        ));
    }

    #[test]
    fn test_next_version_stops_at_max() {
        let mut dl = Deployment::new(vec![vm("vm", GIB, GIB)]);
        dl.version = 41;
        assert_eq!(dl.next_version(), Ok(42));

        dl.version = u32::MAX;
        assert_eq!(
            dl.next_version(),
            Err(DeploymentError::VersionExhausted { version: u32::MAX })
        );
    }

    #[test]
    fn test_attach_signature_replaces_same_twin() {
        let twin = TwinId::new(7).unwrap();
        let mut dl = Deployment::default();
        dl.attach_signature(twin, &[1, 2]);
        dl.attach_signature(twin, &[3, 4]);
        assert_eq!(dl.signatures.len(), 1);
        assert_eq!(dl.signatures[0].signature, "0304");
    }

    #[test]
    fn test_result_state_wire_format() {
        let r: WorkloadResult = serde_json::from_value(json!({"state": "", "error": ""})).unwrap();
        assert_eq!(r.state, ResultState::Pending);
        let r: WorkloadResult =
            serde_json::from_value(json!({"state": "error", "error": "boom"})).unwrap();
        assert_eq!(r.state, ResultState::Error);
        assert_eq!(r.message, "boom");
    }
}
