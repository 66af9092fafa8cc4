use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use grid_id::{ContractId, FarmId, NodeId};
use grid_reconcile::{
    challenge_hash, Capacity, Contract, Deployment, Directory, Farm, FarmIp, Grid, Identity,
    Ledger, NodeCapacity, NodeClient, NodeClientPool, NodeInfo, PublicConfig, ResultState,
    RpcError, RpcResult,
};
use tracing::debug;

use crate::identity::FakeIdentity;
use crate::twin;

/// A call received by the fake grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(NodeId),
    GetDeployment { node: NodeId, contract: ContractId },
    Deploy { node: NodeId, contract: ContractId },
    Update { node: NodeId, contract: ContractId },
    Delete { node: NodeId, contract: ContractId },
    ListInterfaces(NodeId),
    CreateContract { node: NodeId, public_ips: u32 },
    UpdateContract(ContractId),
    CancelContract(ContractId),
    GetContract(ContractId),
    ListNodes,
    ListFarms,
    GetNode(NodeId),
}

impl Call {
    /// True for calls that change node or ledger state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Deploy { .. }
                | Self::Update { .. }
                | Self::Delete { .. }
                | Self::CreateContract { .. }
                | Self::UpdateContract(_)
                | Self::CancelContract(_)
        )
    }
}

#[derive(Debug, Default)]
struct NodeFaults {
    unreachable: bool,
    fail_get: bool,
    fail_deploy: bool,
    fail_update: bool,
    fail_delete: bool,
    /// Polls left before submitted workloads report `ok`.
    pending_polls: u32,
    /// Workload name and message to fail on the next submission carrying it.
    failing_workload: Option<(String, String)>,
}

#[derive(Debug)]
struct NodeState {
    info: NodeInfo,
    listed: bool,
    deployments: BTreeMap<ContractId, Deployment>,
    faults: NodeFaults,
}

impl NodeState {
    /// Fill in the results a node would report for a fresh submission.
    fn settle(&mut self, dl: &mut Deployment) {
        let hit = matches!(
            &self.faults.failing_workload,
            Some((name, _)) if dl.workload(name).is_some()
        );
        let failing = if hit {
            self.faults.failing_workload.take()
        } else {
            None
        };
        for workload in &mut dl.workloads {
            workload.result.message.clear();
            workload.result.state = if self.faults.pending_polls > 0 {
                ResultState::Pending
            } else {
                ResultState::Ok
            };
            if let Some((name, message)) = &failing {
                if workload.name == *name {
                    workload.result.state = ResultState::Error;
                    workload.result.message = message.clone();
                }
            }
        }
    }

    fn check_reachable(&self) -> RpcResult<()> {
        if self.faults.unreachable {
            return Err(RpcError::new(format!(
                "node {} is not reachable",
                self.info.node_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LedgerFaults {
    fail_create: bool,
    fail_update: bool,
    fail_cancel: bool,
    /// `update_node_contract` moves the contract to a fresh id.
    renumber_on_update: bool,
}

#[derive(Debug)]
struct GridState {
    nodes: BTreeMap<NodeId, NodeState>,
    farms: BTreeMap<FarmId, Farm>,
    contracts: BTreeMap<ContractId, Contract>,
    next_contract: u64,
    ledger_faults: LedgerFaults,
    calls: Vec<Call>,
}

impl GridState {
    fn node(&mut self, node: NodeId) -> RpcResult<&mut NodeState> {
        self.nodes
            .get_mut(&node)
            .ok_or_else(|| RpcError::new(format!("node {node} not found")))
    }

    /// Directory view of a node: `used` grows with what is deployed on it.
    fn node_info(&self, node: NodeId) -> RpcResult<NodeInfo> {
        let state = self
            .nodes
            .get(&node)
            .ok_or_else(|| RpcError::new(format!("node {node} not found")))?;
        let deployed: Capacity = state
            .deployments
            .values()
            .map(|dl| dl.capacity().unwrap_or(Capacity::ZERO))
            .sum();

        let mut info = state.info.clone();
        info.capacity.used += deployed;
        Ok(info)
    }

    fn create_contract(
        &mut self,
        node: NodeId,
        owner: grid_id::TwinId,
        hash: &str,
        public_ips: u32,
    ) -> RpcResult<ContractId> {
        let farm_id = self.node(node)?.info.farm_id;
        let contract_id = ContractId::new(self.next_contract)
            .map_err(|e| RpcError::new(e.to_string()))?;

        let farm = self
            .farms
            .get_mut(&farm_id)
            .ok_or_else(|| RpcError::new(format!("farm {farm_id} not found")))?;
        let mut free: Vec<&mut FarmIp> = farm
            .public_ips
            .iter_mut()
            .filter(|ip| ip.contract_id.is_none())
            .collect();
        if free.len() < public_ips as usize {
            return Err(RpcError::new(format!(
                "farm {farm_id} doesn't have {public_ips} free public ips"
            )));
        }
        for ip in free.iter_mut().take(public_ips as usize) {
            ip.contract_id = Some(contract_id);
        }

        self.next_contract += 1;
        self.contracts.insert(
            contract_id,
            Contract {
                contract_id,
                node_id: node,
                twin_id: owner,
                deployment_hash: hash.to_string(),
                public_ips,
            },
        );
        Ok(contract_id)
    }

    fn cancel_contract(&mut self, contract: ContractId) -> RpcResult<()> {
        self.contracts
            .remove(&contract)
            .ok_or_else(|| RpcError::new(format!("contract {contract} not found")))?;
        for farm in self.farms.values_mut() {
            for ip in &mut farm.public_ips {
                if ip.contract_id == Some(contract) {
                    ip.contract_id = None;
                }
            }
        }
        Ok(())
    }

    /// Move `old` to the next contract id along with its IPs and deployment.
    fn renumber_contract(&mut self, old: ContractId) -> RpcResult<ContractId> {
        let new = ContractId::new(self.next_contract).map_err(|e| RpcError::new(e.to_string()))?;
        let mut record = self
            .contracts
            .remove(&old)
            .ok_or_else(|| RpcError::new(format!("contract {old} not found")))?;
        self.next_contract += 1;
        record.contract_id = new;
        let node = record.node_id;
        self.contracts.insert(new, record);

        for farm in self.farms.values_mut() {
            for ip in &mut farm.public_ips {
                if ip.contract_id == Some(old) {
                    ip.contract_id = Some(new);
                }
            }
        }
        let state = self.node(node)?;
        if let Some(mut dl) = state.deployments.remove(&old) {
            dl.contract_id = Some(new);
            state.deployments.insert(new, dl);
        }
        Ok(new)
    }

        /// A node accepts a deployment only if it matches its signed contract.
    fn check_committed(
        &self,
        node: NodeId,
        dl: &Deployment,
        identity: &FakeIdentity,
    ) -> RpcResult<ContractId> {
        let contract_id = dl
            .contract_id
            .ok_or_else(|| RpcError::new("deployment has no contract id"))?;
        let contract = self
            .contracts
            .get(&contract_id)
            .ok_or_else(|| RpcError::new(format!("contract {contract_id} not found")))?;
        if contract.node_id != node {
            return Err(RpcError::new(format!(
                "contract {contract_id} belongs to node {}",
                contract.node_id
            )));
        }

        let hash = challenge_hash(dl).map_err(|e| RpcError::new(e.to_string()))?;
        if contract.deployment_hash != hash.to_hex() {
            return Err(RpcError::new("deployment hash doesn't match contract"));
        }
        let signed = dl
            .signatures
            .iter()
            .any(|s| s.twin_id == identity.twin_id() && identity.verify(hash.as_bytes(), &s.signature));
        if !signed {
            return Err(RpcError::new("deployment is not signed by the contract owner"));
        }
        Ok(contract_id)
    }
}

/// Shared in-memory grid.
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct FakeGrid {
    state: Arc<Mutex<GridState>>,
    identity: Arc<FakeIdentity>,
}

impl FakeGrid {
    /// Empty grid signing as twin 7. Contract ids start at 100.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GridState {
                nodes: BTreeMap::new(),
                farms: BTreeMap::new(),
                contracts: BTreeMap::new(),
                next_contract: 100,
                ledger_faults: LedgerFaults::default(),
                calls: Vec::new(),
            })),
            identity: Arc::new(FakeIdentity::new(twin(7))),
        }
    }

    fn state(&self) -> MutexGuard<'_, GridState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_node_state(&self, node: NodeId, f: impl FnOnce(&mut NodeState)) {
        if let Some(state) = self.state().nodes.get_mut(&node) {
            f(state);
        }
    }

    /// Add a farm owning `free_ips` unassigned public IPs.
    pub fn with_farm(self, farm: FarmId, free_ips: usize) -> Self {
        let public_ips = (0..free_ips)
            .map(|i| FarmIp {
                ip: format!("185.206.122.{}/24", i + 10),
                gateway: "185.206.122.1".to_string(),
                contract_id: None,
            })
            .collect();
        self.state().farms.insert(
            farm,
            Farm {
                farm_id: farm,
                name: format!("farm-{farm}"),
                public_ips,
            },
        );
        self
    }

    pub fn with_node(self, node: NodeId, farm: FarmId, total: Capacity) -> Self {
        self.state().nodes.insert(
            node,
            NodeState {
                info: NodeInfo {
                    node_id: node,
                    farm_id: farm,
                    capacity: NodeCapacity {
                        total,
                        used: Capacity::ZERO,
                    },
                    public_config: None,
                },
                listed: true,
                deployments: BTreeMap::new(),
                faults: NodeFaults::default(),
            },
        );
        self
    }

    pub fn with_public_config(self, node: NodeId, config: PublicConfig) -> Self {
        self.with_node_state(node, |n| n.info.public_config = Some(config));
        self
    }

    /// Bind `dl` to a fresh contract on `node` as if an earlier run deployed it.
    ///
    /// Panics if the ledger refuses the contract.
    pub fn seed_deployment(&self, node: NodeId, dl: Deployment) -> ContractId {
        let mut dl = dl;
        let owner = self.identity.twin_id();
        dl.twin_id = Some(owner);

        let hash = match challenge_hash(&dl) {
            Ok(hash) => hash,
            Err(e) => panic!("seeding deployment on node {node}: {e}"),
        };
        dl.attach_signature(owner, &self.identity.signature_for(hash.as_bytes()));

        let mut state = self.state();
        let contract =
            match state.create_contract(node, owner, &hash.to_hex(), dl.public_ip_count()) {
                Ok(contract) => contract,
                Err(e) => panic!("seeding deployment on node {node}: {e}"),
            };
        dl.contract_id = Some(contract);
        for workload in &mut dl.workloads {
            workload.result.state = ResultState::Ok;
        }
        if let Ok(n) = state.node(node) {
            n.deployments.insert(contract, dl);
        }
        contract
    }

    // Faults

    pub fn set_unreachable(&self, node: NodeId, unreachable: bool) {
        self.with_node_state(node, |n| n.faults.unreachable = unreachable);
    }

    pub fn fail_get(&self, node: NodeId) {
        self.with_node_state(node, |n| n.faults.fail_get = true);
    }

    pub fn fail_deploy(&self, node: NodeId) {
        self.with_node_state(node, |n| n.faults.fail_deploy = true);
    }

    pub fn fail_update(&self, node: NodeId) {
        self.with_node_state(node, |n| n.faults.fail_update = true);
    }

    pub fn fail_delete(&self, node: NodeId) {
        self.with_node_state(node, |n| n.faults.fail_delete = true);
    }

    /// Report `message` for workload `name` on the next submission carrying it.
    pub fn fail_workload(&self, node: NodeId, name: &str, message: &str) {
        let failing = Some((name.to_string(), message.to_string()));
        self.with_node_state(node, |n| n.faults.failing_workload = failing);
    }

    /// Keep submitted workloads pending until the `polls`-th `get_deployment`.
    pub fn converge_after(&self, node: NodeId, polls: u32) {
        self.with_node_state(node, |n| n.faults.pending_polls = polls);
    }

    /// Keep submitted workloads pending forever.
    pub fn leave_pending(&self, node: NodeId) {
        self.converge_after(node, u32::MAX);
    }

    /// Serve the node from `get_node` but omit it from `list_nodes`.
    pub fn hide_from_listing(&self, node: NodeId) {
        self.with_node_state(node, |n| n.listed = false);
    }

    pub fn fail_create_contract(&self) {
        self.state().ledger_faults.fail_create = true;
    }

    pub fn fail_update_contract(&self) {
        self.state().ledger_faults.fail_update = true;
    }

    /// Make contract updates hand back a new contract id.
    pub fn renumber_on_update(&self) {
        self.state().ledger_faults.renumber_on_update = true;
    }

        pub fn fail_cancel_contract(&self) {
        self.state().ledger_faults.fail_cancel = true;
    }

    // Inspection

    pub fn identity(&self) -> Arc<FakeIdentity> {
        self.identity.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Deployment stored by a node under `contract`.
    pub fn deployment(&self, node: NodeId, contract: ContractId) -> Option<Deployment> {
        self.state()
            .nodes
            .get(&node)
            .and_then(|n| n.deployments.get(&contract).cloned())
    }

    pub fn contract(&self, contract: ContractId) -> Option<Contract> {
        self.state().contracts.get(&contract).cloned()
    }

    pub fn contract_count(&self) -> usize {
        self.state().contracts.len()
    }

    pub fn free_ips(&self, farm: FarmId) -> u32 {
        self.state()
            .farms
            .get(&farm)
            .map(Farm::free_ips)
            .unwrap_or(0)
    }

    /// Collaborators backed by this grid.
    pub fn grid(&self) -> Grid {
        Grid {
            nodes: Arc::new(self.clone()),
            ledger: Arc::new(self.clone()),
            directory: Arc::new(self.clone()),
            identity: self.identity.clone(),
        }
    }
}

impl Default for FakeGrid {
    fn default() -> Self {
        Self::new()
    }
}

/// RPC handle to one node of a [`FakeGrid`].
pub struct FakeNode {
    node: NodeId,
    grid: FakeGrid,
}

#[async_trait]
impl NodeClientPool for FakeGrid {
    async fn node_client(&self, node: NodeId) -> RpcResult<Arc<dyn NodeClient>> {
        let mut state = self.state();
        state.calls.push(Call::Connect(node));
        state.node(node)?.check_reachable()?;
        Ok(Arc::new(FakeNode {
            node,
            grid: self.clone(),
        }))
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn get_deployment(&self, contract: ContractId) -> RpcResult<Deployment> {
        let mut state = self.grid.state();
        state.calls.push(Call::GetDeployment {
            node: self.node,
            contract,
        });
        let node = state.node(self.node)?;
        node.check_reachable()?;
        if node.faults.fail_get {
            return Err(RpcError::new("get deployment failed"));
        }

        if node.faults.pending_polls > 0 && node.faults.pending_polls < u32::MAX {
            node.faults.pending_polls -= 1;
            if node.faults.pending_polls == 0 {
                for dl in node.deployments.values_mut() {
                    for workload in &mut dl.workloads {
                        if workload.result.state == ResultState::Pending {
                            workload.result.state = ResultState::Ok;
                        }
                    }
                }
            }
        }

        node.deployments
            .get(&contract)
            .cloned()
            .ok_or_else(|| RpcError::new(format!("deployment {contract} not found")))
    }

    async fn deploy_deployment(&self, deployment: &Deployment) -> RpcResult<()> {
        let mut state = self.grid.state();
        let contract = deployment.contract_id;
        if let Some(contract) = contract {
            state.calls.push(Call::Deploy {
                node: self.node,
                contract,
            });
        }
        let contract = state.check_committed(self.node, deployment, &self.grid.identity)?;

        let node = state.node(self.node)?;
        node.check_reachable()?;
        if node.faults.fail_deploy {
            return Err(RpcError::new("deploy failed: node rejected the deployment"));
        }
        if node.deployments.contains_key(&contract) {
            return Err(RpcError::new(format!("deployment {contract} already exists")));
        }

        let mut dl = deployment.clone();
        node.settle(&mut dl);
        debug!(node = %self.node, contract = %contract, "[FAKE] Deployment stored");
        node.deployments.insert(contract, dl);
        Ok(())
    }

    async fn update_deployment(&self, deployment: &Deployment) -> RpcResult<()> {
        let mut state = self.grid.state();
        if let Some(contract) = deployment.contract_id {
            state.calls.push(Call::Update {
                node: self.node,
                contract,
            });
        }
        let contract = state.check_committed(self.node, deployment, &self.grid.identity)?;

        let node = state.node(self.node)?;
        node.check_reachable()?;
        if node.faults.fail_update {
            return Err(RpcError::new("update failed: node rejected the deployment"));
        }
        let current = node
            .deployments
            .get(&contract)
            .ok_or_else(|| RpcError::new(format!("deployment {contract} not found")))?;
        if deployment.version <= current.version {
            return Err(RpcError::new(format!(
                "version {} is not newer than {}",
                deployment.version, current.version
            )));
        }

        let mut dl = deployment.clone();
        node.settle(&mut dl);
        node.deployments.insert(contract, dl);
        Ok(())
    }

    async fn delete_deployment(&self, contract: ContractId) -> RpcResult<()> {
        let mut state = self.grid.state();
        state.calls.push(Call::Delete {
            node: self.node,
            contract,
        });
        let node = state.node(self.node)?;
        node.check_reachable()?;
        if node.faults.fail_delete {
            return Err(RpcError::new("delete failed"));
        }
        node.deployments.remove(&contract);
        Ok(())
    }

    async fn list_interfaces(&self) -> RpcResult<BTreeMap<String, Vec<IpAddr>>> {
        let mut state = self.grid.state();
        state.calls.push(Call::ListInterfaces(self.node));
        state.node(self.node)?.check_reachable()?;

        let last = u8::try_from(self.node.get() % 250).unwrap_or(0) + 1;
        Ok([(
            "zos".to_string(),
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))],
        )]
        .into())
    }
}

#[async_trait]
impl Ledger for FakeGrid {
    async fn create_node_contract(
        &self,
        identity: &dyn Identity,
        node: NodeId,
        hash: &str,
        public_ips: u32,
    ) -> RpcResult<ContractId> {
        let mut state = self.state();
        state.calls.push(Call::CreateContract { node, public_ips });
        if state.ledger_faults.fail_create {
            return Err(RpcError::new("create contract rejected"));
        }
        state.create_contract(node, identity.twin_id(), hash, public_ips)
    }

    async fn update_node_contract(
        &self,
        identity: &dyn Identity,
        contract: ContractId,
        hash: &str,
    ) -> RpcResult<ContractId> {
        let mut state = self.state();
        state.calls.push(Call::UpdateContract(contract));
        if state.ledger_faults.fail_update {
            return Err(RpcError::new("update contract rejected"));
        }
        let record = state
            .contracts
            .get_mut(&contract)
            .ok_or_else(|| RpcError::new(format!("contract {contract} not found")))?;
        if record.twin_id != identity.twin_id() {
            return Err(RpcError::new("twin is not the contract owner"));
        }
        record.deployment_hash = hash.to_string();
        if state.ledger_faults.renumber_on_update {
            return state.renumber_contract(contract);
        }
        Ok(contract)
    }

    async fn cancel_contract(&self, _identity: &dyn Identity, contract: ContractId) -> RpcResult<()> {
        let mut state = self.state();
        state.calls.push(Call::CancelContract(contract));
        if state.ledger_faults.fail_cancel {
            return Err(RpcError::new("cancel contract rejected"));
        }
        state.cancel_contract(contract)
    }

    async fn get_contract(&self, contract: ContractId) -> RpcResult<Contract> {
        let mut state = self.state();
        state.calls.push(Call::GetContract(contract));
        state
            .contracts
            .get(&contract)
            .cloned()
            .ok_or_else(|| RpcError::new(format!("contract {contract} not found")))
    }
}

#[async_trait]
impl Directory for FakeGrid {
    async fn list_nodes(&self) -> RpcResult<Vec<NodeInfo>> {
        let mut state = self.state();
        state.calls.push(Call::ListNodes);
        let listed: Vec<NodeId> = state
            .nodes
            .iter()
            .filter(|(_, n)| n.listed)
            .map(|(id, _)| *id)
            .collect();
        listed.into_iter().map(|id| state.node_info(id)).collect()
    }

    async fn list_farms(&self) -> RpcResult<Vec<Farm>> {
        let mut state = self.state();
        state.calls.push(Call::ListFarms);
        Ok(state.farms.values().cloned().collect())
    }

    async fn get_node(&self, node: NodeId) -> RpcResult<NodeInfo> {
        let mut state = self.state();
        state.calls.push(Call::GetNode(node));
        state.node_info(node)
    }
}
