//! Bounded collaborator calls.
//!
//! Every node, ledger and directory call runs under its own timeout and the
//! caller's cancellation token. [`CallError`] is then mapped into the
//! reconciliation taxonomy with node and contract context attached.

use std::future::Future;
use std::time::Duration;

use grid_id::{ContractId, NodeId};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{ContractOperation, NodeOperation, ReconcileError, RpcError, RpcResult};

#[derive(Debug, Error)]
pub(crate) enum CallError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl CallError {
    pub(crate) fn into_node(self, node: NodeId, operation: NodeOperation) -> ReconcileError {
        match self {
            Self::Cancelled => ReconcileError::Cancelled,
            other => ReconcileError::NodeUnreachable {
                node,
                operation,
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn into_contract(
        self,
        operation: ContractOperation,
        node: NodeId,
        contract: Option<ContractId>,
    ) -> ReconcileError {
        match self {
            Self::Cancelled => ReconcileError::Cancelled,
            other => ReconcileError::ContractOperationFailed {
                operation,
                node,
                contract,
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn into_directory(self, what: &str) -> ReconcileError {
        match self {
            Self::Cancelled => ReconcileError::Cancelled,
            other => ReconcileError::Directory {
                reason: format!("{what}: {other}"),
            },
        }
    }
}

/// Run `fut` until it completes, `limit` elapses, or `cancel` fires.
pub(crate) async fn bounded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    fut: F,
) -> Result<T, CallError>
where
    F: Future<Output = RpcResult<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CallError::Cancelled),
        result = tokio::time::timeout(limit, fut) => match result {
            Ok(inner) => inner.map_err(CallError::from),
            Err(_) => Err(CallError::TimedOut(limit)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let cancel = CancellationToken::new();
        let value = bounded(&cancel, Duration::from_secs(1), async { Ok::<_, RpcError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let cancel = CancellationToken::new();
        let result = bounded(&cancel, Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, RpcError>(())
        })
        .await;
        assert!(matches!(result, Err(CallError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_bounded_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = bounded(&cancel, Duration::from_secs(1), async { Ok::<_, RpcError>(()) }).await;
        assert!(matches!(result, Err(CallError::Cancelled)));
    }

    #[test]
    fn test_cancelled_maps_to_cancelled() {
        let node = NodeId::new(1).unwrap();
        assert!(matches!(
            CallError::Cancelled.into_node(node, NodeOperation::Deploy),
            ReconcileError::Cancelled
        ));
        assert!(matches!(
            CallError::TimedOut(Duration::from_secs(1)).into_node(node, NodeOperation::Deploy),
            ReconcileError::NodeUnreachable { .. }
        ));
    }
}
