//! Convergence waiting.
//!
//! After a deployment version is submitted the node applies it
//! asynchronously. [`ConvergenceWatch`] is the pure state machine that
//! classifies each observed deployment; [`wait_for_deployment`] drives it by
//! polling the node through an injected [`Clock`].

use std::time::{Duration, Instant};

use grid_id::{ContractId, NodeId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::call::bounded;
use crate::clients::NodeClient;
use crate::clock::Clock;
use crate::config::ConvergenceConfig;
use crate::error::{NodeOperation, ReconcileError, ReconcileResult};
use crate::model::{Deployment, ResultState};

/// Classification of one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Wrong version on the node, or at least one workload without a result.
    Pending,

    /// Every workload reports `ok` at the expected version.
    Converged,

    /// A workload reached a terminal non-ok state.
    Failed {
        index: usize,
        name: String,
        message: String,
    },
}

/// State machine tracking one deployment version until it settles.
#[derive(Debug, Clone)]
pub struct ConvergenceWatch {
    expected_version: u32,
    started: Instant,
    deadline: Duration,
    observations: u32,
}

impl ConvergenceWatch {
    pub fn new(expected_version: u32, started: Instant, deadline: Duration) -> Self {
        Self {
            expected_version,
            started,
            deadline,
            observations: 0,
        }
    }

    /// Classify a freshly fetched deployment.
    ///
    /// A failed workload wins over pending ones: the wait is over as soon as
    /// any workload fails.
    pub fn observe(&mut self, deployment: &Deployment) -> Progress {
        self.observations += 1;

        if deployment.version != self.expected_version {
            return Progress::Pending;
        }

        let mut pending = false;
        for (index, workload) in deployment.workloads.iter().enumerate() {
            match workload.result.state {
                ResultState::Pending => pending = true,
                ResultState::Ok => {}
                ResultState::Error | ResultState::Deleted => {
                    return Progress::Failed {
                        index,
                        name: workload.name.clone(),
                        message: workload.result.message.clone(),
                    };
                }
            }
        }

        if pending {
            Progress::Pending
        } else {
            Progress::Converged
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.elapsed(now) >= self.deadline
    }

    pub fn observations(&self) -> u32 {
        self.observations
    }
}

/// Poll `client` until deployment `contract` settles at `version`.
#[instrument(skip(client, config, clock, cancel), fields(node = %node, contract = %contract))]
pub async fn wait_for_deployment(
    node: NodeId,
    client: &dyn NodeClient,
    contract: ContractId,
    version: u32,
    config: &ConvergenceConfig,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> ReconcileResult<()> {
    let mut watch = ConvergenceWatch::new(version, clock.now(), config.deadline);

    loop {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        let now = clock.now();
        if watch.expired(now) {
            return Err(ReconcileError::ConvergenceTimeout {
                node,
                contract,
                version,
                elapsed: watch.elapsed(now),
            });
        }

        let deployment = bounded(cancel, config.poll_timeout, client.get_deployment(contract))
            .await
            .map_err(|e| e.into_node(node, NodeOperation::GetDeployment))?;

        match watch.observe(&deployment) {
            Progress::Converged => {
                debug!(
                    version,
                    polls = watch.observations(),
                    "Deployment converged"
                );
                return Ok(());
            }
            Progress::Failed {
                index,
                name,
                message,
            } => {
                return Err(ReconcileError::WorkloadFailed {
                    node,
                    contract,
                    index,
                    name,
                    message,
                });
            }
            Progress::Pending => {
                debug!(
                    expected = version,
                    observed = deployment.version,
                    "Deployment not converged yet"
                );
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ReconcileError::Cancelled),
            () = clock.sleep(config.poll_interval) => {}
        }
    }
}
