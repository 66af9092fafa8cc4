//! Orchestration entry points: fetch, admit, reconcile, revert.

use std::collections::BTreeMap;

use grid_id::NodeId;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::admission::validate_deployments;
use crate::call::bounded;
use crate::engine::Reconciler;
use crate::error::{NodeOperation, ReconcileError, ReconcileFailure, ReconcileResult};
use crate::model::{ContractMap, Deployment};

impl Reconciler {
    /// Move the grid from `old` to `new`.
    ///
    /// With `revert_on_failure`, a failed run is followed by a second run from
    /// the partial map back toward the deployment objects fetched up front.
    /// Every failure carries the best-known contract map.
    #[instrument(skip_all, fields(old = old.len(), new = new.len(), revert_on_failure = revert_on_failure))]
    pub async fn deploy(
        &self,
        old: &ContractMap,
        new: &BTreeMap<NodeId, Deployment>,
        revert_on_failure: bool,
        cancel: &CancellationToken,
    ) -> Result<ContractMap, ReconcileFailure> {
        let fetched = self.fetch_deployments(old, cancel).await;
        match &fetched {
            Ok(objects) => {
                if let Err(e) = self.validate(objects, new, cancel).await {
                    return Err(ReconcileFailure::new(old.clone(), e));
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch current deployments, skipping admission");
            }
        }

        let observed = fetched.as_ref().cloned().unwrap_or_default();
        let failure = match self.apply(old, new, &observed, cancel).await {
            Ok(current) => return Ok(current),
            Err(failure) => failure,
        };
        if !revert_on_failure || matches!(failure.error, ReconcileError::Cancelled) {
            return Err(failure);
        }

        let ReconcileFailure {
            current: partial,
            error: primary,
        } = failure;
        let previous = match fetched {
            Ok(objects) => objects,
            Err(fetch) => {
                return Err(ReconcileFailure::new(
                    partial,
                    ReconcileError::RevertImpossible {
                        primary: Box::new(primary),
                        fetch: Box::new(fetch),
                    },
                ));
            }
        };

        warn!(error = %primary, "Reconciliation failed, reverting");
        match self.apply(&partial, &previous, &BTreeMap::new(), cancel).await {
            Ok(reverted) => {
                info!(contracts = reverted.len(), "Reverted deployments");
                Err(ReconcileFailure::new(reverted, primary))
            }
            Err(revert) => Err(ReconcileFailure::new(
                revert.current,
                ReconcileError::RevertFailed {
                    primary: Box::new(primary),
                    revert: Box::new(revert.error),
                },
            )),
        }
    }

    /// Fetch the deployment object bound to every contract in `old`.
    #[instrument(skip_all, fields(count = old.len()))]
    pub async fn fetch_deployments(
        &self,
        old: &ContractMap,
        cancel: &CancellationToken,
    ) -> ReconcileResult<BTreeMap<NodeId, Deployment>> {
        let mut objects = BTreeMap::new();
        for (&node, &contract) in old {
            let client = self.node_client(node, cancel).await?;
            let mut dl = bounded(
                cancel,
                self.config.get_timeout,
                client.get_deployment(contract),
            )
            .await
            .map_err(|e| e.into_node(node, NodeOperation::GetDeployment))?;
            dl.contract_id.get_or_insert(contract);
            objects.insert(node, dl);
        }
        Ok(objects)
    }

    /// Run admission for `new` against the objects currently deployed.
    pub async fn validate(
        &self,
        old: &BTreeMap<NodeId, Deployment>,
        new: &BTreeMap<NodeId, Deployment>,
        cancel: &CancellationToken,
    ) -> ReconcileResult<()> {
        validate_deployments(
            self.grid.directory.as_ref(),
            self.grid.ledger.as_ref(),
            old,
            new,
            &self.config,
            cancel,
        )
        .await
    }

    /// Probe every node with `list_interfaces`; fail on the first dead one.
    #[instrument(skip(self, cancel))]
    pub async fn check_nodes_up(
        &self,
        nodes: &[NodeId],
        cancel: &CancellationToken,
    ) -> ReconcileResult<()> {
        for &node in nodes {
            let client = self.node_client(node, cancel).await?;
            bounded(cancel, self.config.liveness_timeout, client.list_interfaces())
                .await
                .map_err(|e| e.into_node(node, NodeOperation::ListInterfaces))?;
        }
        Ok(())
    }
}
