//! End-to-end deploy runs, including revert.

mod common;

use std::collections::BTreeMap;

use grid_reconcile::{deployment_hash, ContractMap, NodeOperation, ReconcileError};
use grid_testing::{contract, deployment, node, public_ip, vm, zmount, GIB};
use tokio_util::sync::CancellationToken;

use common::{fake_grid, reconciler};

#[tokio::test]
async fn test_deploy_creates_fresh_deployment() {
    let fake = fake_grid(1);
    let new = BTreeMap::from([(
        node(1),
        deployment(vec![vm("vm", 2 * GIB, 10 * GIB), public_ip("ip")]),
    )]);

    let current = reconciler(&fake)
        .deploy(&ContractMap::new(), &new, true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(current, ContractMap::from([(node(1), contract(100))]));
}

#[tokio::test]
async fn test_deploy_is_idempotent() {
    let fake = fake_grid(1);
    let dl = deployment(vec![vm("vm", 2 * GIB, 10 * GIB), public_ip("ip")]);
    let c1 = fake.seed_deployment(node(1), dl.clone());
    fake.clear_calls();

    let old = ContractMap::from([(node(1), c1)]);
    let current = reconciler(&fake)
        .deploy(&old, &BTreeMap::from([(node(1), dl)]), true, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(current, old);
    assert!(fake.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_admission_rejection_returns_old_map() {
    let fake = fake_grid(0);
    let c1 = fake.seed_deployment(node(1), deployment(vec![zmount("disk", GIB)]));
    fake.clear_calls();

    let old = ContractMap::from([(node(1), c1)]);
    let new = BTreeMap::from([(node(2), deployment(vec![public_ip("ip")]))]);
    let failure = reconciler(&fake)
        .deploy(&old, &new, true, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.current, old);
    assert!(failure.error.is_admission());
    assert!(fake.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_failed_run_is_reverted() {
    let fake = fake_grid(0);
    let original = deployment(vec![vm("vm", 2 * GIB, 10 * GIB), zmount("disk", GIB)]);
    let c1 = fake.seed_deployment(node(1), original.clone());
    fake.fail_workload(node(1), "vm", "failed to boot");

    let old = ContractMap::from([(node(1), c1)]);
    let new = BTreeMap::from([
        (
            node(1),
            deployment(vec![vm("vm", 4 * GIB, 10 * GIB), zmount("disk", GIB)]),
        ),
        (node(2), deployment(vec![zmount("disk", GIB)])),
    ]);

    let failure = reconciler(&fake)
        .deploy(&old, &new, true, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.current, old);
    assert!(matches!(
        failure.error,
        ReconcileError::WorkloadFailed { .. }
    ));

    // node 2 was created then deleted again.
    assert!(fake.contract(contract(101)).is_none());
    let reverted = fake.deployment(node(1), c1).unwrap();
    assert_eq!(
        deployment_hash(&reverted).unwrap(),
        deployment_hash(&original).unwrap()
    );
    assert_eq!(reverted.version, 2);
    assert_eq!(reverted.workload("vm").unwrap().version, 2);
    assert_eq!(reverted.workload("disk").unwrap().version, 0);
}

#[tokio::test]
async fn test_failed_run_without_revert_keeps_partial_map() {
    let fake = fake_grid(0);
    let c1 = fake.seed_deployment(node(1), deployment(vec![zmount("disk", GIB)]));
    fake.fail_update(node(1));

    let old = ContractMap::from([(node(1), c1)]);
    let new = BTreeMap::from([
        (node(1), deployment(vec![zmount("disk", 2 * GIB)])),
        (node(2), deployment(vec![zmount("disk", GIB)])),
    ]);
    let failure = reconciler(&fake)
        .deploy(&old, &new, false, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        failure.current,
        ContractMap::from([(node(1), c1), (node(2), contract(101))])
    );
    assert!(fake.contract(contract(101)).is_some());
}

#[tokio::test]
async fn test_revert_impossible_without_old_objects() {
    let fake = fake_grid(0);
    let c1 = fake.seed_deployment(node(1), deployment(vec![zmount("disk", GIB)]));
    fake.fail_get(node(1));

    let old = ContractMap::from([(node(1), c1)]);
    let new = BTreeMap::from([(node(1), deployment(vec![zmount("disk", 2 * GIB)]))]);
    let failure = reconciler(&fake)
        .deploy(&old, &new, true, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.current, old);
    assert!(failure.error.is_manual_intervention());
    match &failure.error {
        ReconcileError::RevertImpossible { primary, fetch } => {
            assert!(matches!(
                **primary,
                ReconcileError::NodeUnreachable {
                    operation: NodeOperation::GetDeployment,
                    ..
                }
            ));
            assert!(matches!(**fetch, ReconcileError::NodeUnreachable { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_revert_failure_reports_both_errors() {
    let fake = fake_grid(0);
    let c1 = fake.seed_deployment(node(1), deployment(vec![zmount("disk", GIB)]));
    fake.fail_workload(node(1), "disk", "disk io error");
    // Nothing is cancelled going forward, so only the revert trips on this.
    fake.fail_cancel_contract();

    let old = ContractMap::from([(node(1), c1)]);
    let new = BTreeMap::from([
        (node(1), deployment(vec![zmount("disk", 2 * GIB)])),
        (node(2), deployment(vec![zmount("disk", GIB)])),
    ]);
    let failure = reconciler(&fake)
        .deploy(&old, &new, true, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(failure.error.is_manual_intervention());
    match &failure.error {
        ReconcileError::RevertFailed { primary, revert } => {
            assert!(matches!(**primary, ReconcileError::WorkloadFailed { .. }));
            assert!(matches!(
                **revert,
                ReconcileError::ContractOperationFailed { .. }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        failure.current,
        ContractMap::from([(node(1), c1), (node(2), contract(101))])
    );
    assert!(fake.contract(contract(101)).is_some());
}

#[tokio::test]
async fn test_cancelled_run_is_not_reverted() {
    let fake = fake_grid(0);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let failure = reconciler(&fake)
        .deploy(
            &ContractMap::new(),
            &BTreeMap::from([(node(1), deployment(vec![zmount("disk", GIB)]))]),
            true,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(failure.error, ReconcileError::Cancelled));
    assert!(fake.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_fetch_deployments() {
    let fake = fake_grid(0);
    let c1 = fake.seed_deployment(node(1), deployment(vec![zmount("disk", GIB)]));
    let c2 = fake.seed_deployment(node(3), deployment(vec![zmount("disk", GIB)]));

    let objects = reconciler(&fake)
        .fetch_deployments(
            &ContractMap::from([(node(1), c1), (node(3), c2)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(objects.len(), 2);
    assert_eq!(objects[&node(1)].contract_id, Some(c1));
    assert_eq!(objects[&node(3)].contract_id, Some(c2));
}

#[tokio::test]
async fn test_check_nodes_up() {
    let fake = fake_grid(0);
    let engine = reconciler(&fake);
    let cancel = CancellationToken::new();

    engine
        .check_nodes_up(&[node(1), node(2)], &cancel)
        .await
        .unwrap();

    fake.set_unreachable(node(2), true);
    let err = engine
        .check_nodes_up(&[node(1), node(2), node(3)], &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NodeUnreachable { node: n, .. } if n == node(2)));
}
