//! Admission against the fake directory and an offline snapshot.

mod common;

use std::collections::BTreeMap;

use grid_id::NodeId;
use grid_reconcile::{
    validate_deployments, Capacity, ContractMap, Deployment, GridSnapshot, NodeCapacity, NodeInfo,
    PublicConfig, ReconcileError, ReconcilerConfig, Workload, WorkloadType,
};
use grid_testing::{deployment, farm, node, public_ip, vm, zmount, FakeGrid, GIB};
use rstest::rstest;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{fake_grid, node_capacity, reconciler};

fn with_ips(count: usize) -> Deployment {
    let mut workloads = vec![vm("vm", GIB, GIB)];
    workloads.extend((0..count).map(|i| public_ip(&format!("ip{i}"))));
    deployment(workloads)
}

async fn fetched(fake: &FakeGrid, old: &ContractMap) -> BTreeMap<NodeId, Deployment> {
    reconciler(fake)
        .fetch_deployments(old, &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_rejects_more_ips_than_farm_has() {
    let fake = fake_grid(1);
    let new = BTreeMap::from([(node(1), with_ips(2))]);

    let err = reconciler(&fake)
        .validate(&BTreeMap::new(), &new, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::InsufficientPublicIps {
            requested: 2,
            available: 1,
            ..
        }
    ));
    assert!(err.is_admission());
    assert_eq!(fake.free_ips(farm(1)), 1);
    assert!(fake.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_ips_are_counted_across_nodes() {
    let fake = fake_grid(3);
    let new = BTreeMap::from([(node(1), with_ips(2)), (node(2), with_ips(2))]);

    let err = reconciler(&fake)
        .validate(&BTreeMap::new(), &new, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::InsufficientPublicIps {
            requested: 2,
            available: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn test_ips_released_by_any_old_deployment_are_reusable() {
    let fake = fake_grid(1);
    let c1 = fake.seed_deployment(node(1), with_ips(1));
    assert_eq!(fake.free_ips(farm(1)), 0);

    let old = BTreeMap::from([(node(1), c1)]);
    let objects = fetched(&fake, &old).await;
    let new = BTreeMap::from([(node(1), with_ips(0)), (node(2), with_ips(1))]);

    reconciler(&fake)
        .validate(&objects, &new, &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejects_ip_count_increase() {
    let fake = fake_grid(3);
    let c1 = fake.seed_deployment(node(1), with_ips(1));
    let objects = fetched(&fake, &BTreeMap::from([(node(1), c1)])).await;

    let err = reconciler(&fake)
        .validate(
            &objects,
            &BTreeMap::from([(node(1), with_ips(2))]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        ReconcileError::IpCountIncreaseUnsupported {
            contract,
            current,
            requested,
            ..
        } => {
            assert_eq!(contract, c1);
            assert_eq!(current, 1);
            assert_eq!(requested, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
#[case::decrease(0)]
#[case::equal(1)]
#[tokio::test]
async fn test_accepts_ip_count_decrease_or_equal(#[case] requested: usize) {
    let fake = fake_grid(3);
    let c1 = fake.seed_deployment(node(1), with_ips(1));
    let objects = fetched(&fake, &BTreeMap::from([(node(1), c1)])).await;

    reconciler(&fake)
        .validate(
            &objects,
            &BTreeMap::from([(node(1), with_ips(requested))]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_rejects_over_capacity() {
    let fake = fake_grid(0);
    let new = BTreeMap::from([(node(1), deployment(vec![vm("vm", 32 * GIB, GIB)]))]);

    let err = reconciler(&fake)
        .validate(&BTreeMap::new(), &new, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ReconcileError::InsufficientCapacity { needed, free, .. } => {
            assert_eq!(needed.mru, 32 * GIB);
            assert_eq!(free, node_capacity());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_capacity_of_replaced_deployment_is_freed() {
    let fake = fake_grid(0);
    let c1 = fake.seed_deployment(node(1), deployment(vec![vm("vm", 12 * GIB, GIB)]));
    let objects = fetched(&fake, &BTreeMap::from([(node(1), c1)])).await;
    let engine = reconciler(&fake);
    let cancel = CancellationToken::new();

    // 12 GiB in use of 16: a 14 GiB vm only fits in place of the old one.
    let bigger = BTreeMap::from([(node(1), deployment(vec![vm("vm", 14 * GIB, GIB)]))]);
    engine.validate(&objects, &bigger, &cancel).await.unwrap();

    let err = engine
        .validate(&BTreeMap::new(), &bigger, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::InsufficientCapacity { .. }));
}

#[tokio::test]
async fn test_gateway_requires_public_config() {
    let fake = fake_grid(0).with_public_config(
        node(2),
        PublicConfig {
            ipv4: "185.206.122.33/24".to_string(),
            gw4: "185.206.122.1".to_string(),
            ..PublicConfig::default()
        },
    );
    let gateway = || {
        deployment(vec![Workload::new(
            "gw",
            WorkloadType::GatewayFqdnProxy,
            json!({"fqdn": "app.example.com", "backends": ["http://10.20.2.5:8080"]}),
        )])
    };
    let engine = reconciler(&fake);
    let cancel = CancellationToken::new();

    let err = engine
        .validate(&BTreeMap::new(), &BTreeMap::from([(node(1), gateway())]), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::GatewayConfigMissing {
            requirement: "ipv4",
            ..
        }
    ));

    engine
        .validate(&BTreeMap::new(), &BTreeMap::from([(node(2), gateway())]), &cancel)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unlisted_node_is_unknown() {
    let fake = fake_grid(0);
    fake.hide_from_listing(node(2));

    let err = reconciler(&fake)
        .validate(
            &BTreeMap::new(),
            &BTreeMap::from([(node(2), deployment(vec![zmount("disk", GIB)]))]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::UnknownNode { node: n } if n == node(2)));
}

#[tokio::test]
async fn test_rejects_invalid_deployment() {
    let fake = fake_grid(0);
    let dup = deployment(vec![zmount("disk", GIB), zmount("disk", 2 * GIB)]);

    let err = reconciler(&fake)
        .validate(
            &BTreeMap::new(),
            &BTreeMap::from([(node(1), dup)]),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::InvalidDeployment { .. }));
}

#[tokio::test]
async fn test_snapshot_admission_rejects_over_capacity() {
    let snapshot = GridSnapshot {
        nodes: vec![NodeInfo {
            node_id: node(4),
            farm_id: farm(2),
            capacity: NodeCapacity {
                total: Capacity {
                    mru: 8 * GIB,
                    sru: 100 * GIB,
                    hru: 0,
                },
                used: Capacity {
                    mru: 6 * GIB,
                    sru: 0,
                    hru: 0,
                },
            },
            public_config: None,
        }],
        ..GridSnapshot::default()
    };
    let new = BTreeMap::from([(node(4), deployment(vec![vm("vm", 4 * GIB, GIB)]))]);

    let err = validate_deployments(
        &snapshot,
        &snapshot,
        &BTreeMap::new(),
        &new,
        &ReconcilerConfig::default(),
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ReconcileError::InsufficientCapacity { .. }));
}
