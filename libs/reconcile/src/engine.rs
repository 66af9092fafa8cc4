//! Reconciliation engine.
//!
//! Drives the grid from one contract map to a desired set of deployments in
//! three strictly ordered phases: deletions, creations, updates. Node order
//! inside a phase is ascending node id.
//!
//! Only the creation phase compensates: a contract created for a submission
//! that then fails is cancelled again. Update failures are surfaced as-is and
//! deletion failures on the node side are logged and swallowed.

use std::collections::BTreeMap;
use std::sync::Arc;

use grid_id::{ContractId, NodeId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::call::bounded;
use crate::clients::{Grid, NodeClient};
use crate::clock::{Clock, TokioClock};
use crate::config::ReconcilerConfig;
use crate::converge::wait_for_deployment;
use crate::error::{
    ContractOperation, NodeOperation, ReconcileError, ReconcileFailure, ReconcileResult,
};
use crate::hash::{assign_versions, challenge_hash, deployment_hash, same_workload_names};
use crate::model::{ContractMap, Deployment};
use crate::plan::ReconcilePlan;

/// Reconciles deployments against one grid.
#[derive(Clone)]
pub struct Reconciler {
    pub(crate) grid: Grid,
    pub(crate) config: ReconcilerConfig,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(grid: Grid, config: ReconcilerConfig) -> Self {
        Self {
            grid,
            config,
            clock: Arc::new(TokioClock),
        }
    }

    /// Replace the clock used by convergence polling.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Reconcile `old` toward `new`.
    ///
    /// `observed` holds live deployment objects already fetched for nodes in
    /// `old`; an entry is used in place of `get_deployment` when its contract
    /// id matches. On failure the returned map reflects every contract
    /// created or cancelled before the error.
    #[instrument(skip_all, fields(old = old.len(), new = new.len()))]
    pub async fn apply(
        &self,
        old: &ContractMap,
        new: &BTreeMap<NodeId, Deployment>,
        observed: &BTreeMap<NodeId, Deployment>,
        cancel: &CancellationToken,
    ) -> Result<ContractMap, ReconcileFailure> {
        let plan = ReconcilePlan::between(old, new);
        let mut current = old.clone();

        for &(node, contract) in &plan.delete {
            if let Err(e) = self.delete_node(node, contract, &mut current, cancel).await {
                return Err(ReconcileFailure::new(current, e));
            }
        }

        for &node in &plan.create {
            let Some(desired) = new.get(&node) else {
                continue;
            };
            if let Err(e) = self.create_node(node, desired, &mut current, cancel).await {
                return Err(ReconcileFailure::new(current, e));
            }
        }

        for &(node, contract) in &plan.update {
            let Some(desired) = new.get(&node) else {
                continue;
            };
            let live = observed
                .get(&node)
                .filter(|dl| dl.contract_id == Some(contract));
            if let Err(e) = self
                .update_node(node, contract, desired, live, &mut current, cancel)
                .await
            {
                return Err(ReconcileFailure::new(current, e));
            }
        }

        Ok(current)
    }

    async fn delete_node(
        &self,
        node: NodeId,
        contract: ContractId,
        current: &mut ContractMap,
        cancel: &CancellationToken,
    ) -> ReconcileResult<()> {
        info!(node = %node, contract = %contract, "Cancelling contract");
        bounded(
            cancel,
            self.config.ledger_timeout,
            self.grid
                .ledger
                .cancel_contract(self.grid.identity.as_ref(), contract),
        )
        .await
        .map_err(|e| e.into_contract(ContractOperation::Cancel, node, Some(contract)))?;
        current.remove(&node);

        // The node drops the deployment on its own once the contract is gone.
        let client = match self.node_client(node, cancel).await {
            Ok(client) => client,
            Err(e) => {
                warn!(node = %node, contract = %contract, error = %e, "Failed to reach node for deployment deletion");
                return Ok(());
            }
        };
        if let Err(e) = bounded(
            cancel,
            self.config.delete_timeout,
            client.delete_deployment(contract),
        )
        .await
        {
            warn!(node = %node, contract = %contract, error = %e, "Failed to delete deployment on node");
        }
        Ok(())
    }

    async fn create_node(
        &self,
        node: NodeId,
        desired: &Deployment,
        current: &mut ContractMap,
        cancel: &CancellationToken,
    ) -> ReconcileResult<()> {
        let client = self.node_client(node, cancel).await?;

        let mut dl = desired.clone();
        dl.contract_id = None;
        let hash = self.seal(node, &mut dl)?;
        let public_ips = dl.public_ip_count();

        let contract = bounded(
            cancel,
            self.config.ledger_timeout,
            self.grid.ledger.create_node_contract(
                self.grid.identity.as_ref(),
                node,
                &hash,
                public_ips,
            ),
        )
        .await
        .map_err(|e| e.into_contract(ContractOperation::Create, node, None))?;
        dl.contract_id = Some(contract);
        info!(node = %node, contract = %contract, public_ips, "Created contract");

        if let Err(e) = bounded(
            cancel,
            self.config.submit_timeout,
            client.deploy_deployment(&dl),
        )
        .await
        {
            let primary = e.into_node(node, NodeOperation::Deploy);
            return Err(self.compensate_create(node, contract, primary).await);
        }
        current.insert(node, contract);
        info!(node = %node, contract = %contract, version = dl.version, "Deployment submitted");

        self.converge(node, client.as_ref(), contract, dl.version, cancel)
            .await
    }

    /// Cancel a contract whose deployment never reached the node.
    ///
    /// Runs on its own token so a cancelled caller still releases the contract.
    async fn compensate_create(
        &self,
        node: NodeId,
        contract: ContractId,
        primary: ReconcileError,
    ) -> ReconcileError {
        warn!(node = %node, contract = %contract, error = %primary, "Deployment submission failed, cancelling contract");
        let result = bounded(
            &CancellationToken::new(),
            self.config.ledger_timeout,
            self.grid
                .ledger
                .cancel_contract(self.grid.identity.as_ref(), contract),
        )
        .await;

        match result {
            Ok(()) => primary,
            Err(e) => ReconcileError::OrphanedContract {
                node,
                contract,
                primary: Box::new(primary),
                cancel: Box::new(e.into_contract(ContractOperation::Cancel, node, Some(contract))),
            },
        }
    }

    async fn update_node(
        &self,
        node: NodeId,
        contract: ContractId,
        desired: &Deployment,
        observed: Option<&Deployment>,
        current: &mut ContractMap,
        cancel: &CancellationToken,
    ) -> ReconcileResult<()> {
        let mut client = None;
        let live = match observed {
            Some(dl) => dl.clone(),
            None => {
                let c = self.node_client(node, cancel).await?;
                let dl = bounded(cancel, self.config.get_timeout, c.get_deployment(contract))
                    .await
                    .map_err(|e| e.into_node(node, NodeOperation::GetDeployment))?;
                client = Some(c);
                dl
            }
        };

        let live_hash = deployment_hash(&live)?;
        let desired_hash = deployment_hash(desired)?;
        if live_hash == desired_hash && same_workload_names(&live, desired) {
            debug!(node = %node, contract = %contract, hash = %live_hash, "Deployment unchanged, skipping");
            return Ok(());
        }

        let client = match client {
            Some(c) => c,
            None => self.node_client(node, cancel).await?,
        };

        let mut dl = desired.clone();
        dl.contract_id = Some(contract);
        assign_versions(node, &live, &mut dl)?;
        let hash = self.seal(node, &mut dl)?;

        let updated = bounded(
            cancel,
            self.config.ledger_timeout,
            self.grid
                .ledger
                .update_node_contract(self.grid.identity.as_ref(), contract, &hash),
        )
        .await
        .map_err(|e| e.into_contract(ContractOperation::Update, node, Some(contract)))?;
        // The challenge hash excludes the contract id, so the signature survives rebinding.
        dl.contract_id = Some(updated);
        info!(node = %node, contract = %updated, previous = %contract, version = dl.version, "Updated contract");

        bounded(
            cancel,
            self.config.submit_timeout,
            client.update_deployment(&dl),
        )
        .await
        .map_err(|e| e.into_node(node, NodeOperation::Update))?;
        current.insert(node, updated);
        info!(node = %node, contract = %updated, version = dl.version, "Deployment update submitted");

        self.converge(node, client.as_ref(), updated, dl.version, cancel)
            .await
    }

    /// Stamp the twin, validate, then sign. Returns the hex challenge hash.
    fn seal(&self, node: NodeId, dl: &mut Deployment) -> ReconcileResult<String> {
        let twin = self.grid.identity.twin_id();
        dl.twin_id = Some(twin);
        dl.validate()
            .map_err(|e| ReconcileError::InvalidDeployment {
                node,
                reason: e.to_string(),
            })?;

        let hash = challenge_hash(dl)?;
        let signature = self
            .grid
            .identity
            .sign(hash.as_bytes())
            .map_err(|e| ReconcileError::Signing {
                node,
                reason: e.to_string(),
            })?;
        dl.attach_signature(twin, &signature);
        debug!(node = %node, hash = %hash, "Deployment signed");

        Ok(hash.to_hex())
    }

    async fn converge(
        &self,
        node: NodeId,
        client: &dyn NodeClient,
        contract: ContractId,
        version: u32,
        cancel: &CancellationToken,
    ) -> ReconcileResult<()> {
        wait_for_deployment(
            node,
            client,
            contract,
            version,
            &self.config.convergence,
            self.clock.as_ref(),
            cancel,
        )
        .await
    }

    pub(crate) async fn node_client(
        &self,
        node: NodeId,
        cancel: &CancellationToken,
    ) -> ReconcileResult<Arc<dyn NodeClient>> {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        self.grid
            .nodes
            .node_client(node)
            .await
            .map_err(|e| ReconcileError::NodeUnreachable {
                node,
                operation: NodeOperation::Connect,
                reason: e.to_string(),
            })
    }
}
