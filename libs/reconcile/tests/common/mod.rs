//! Shared fixtures for reconciler integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use grid_reconcile::{Capacity, ConvergenceConfig, Reconciler, ReconcilerConfig};
use grid_testing::{farm, node, FakeGrid, ManualClock, GIB};

pub fn node_capacity() -> Capacity {
    Capacity {
        mru: 16 * GIB,
        sru: 200 * GIB,
        hru: 1000 * GIB,
    }
}

/// Three nodes on farm 1, which owns `free_ips` public IPs.
pub fn fake_grid(free_ips: usize) -> FakeGrid {
    FakeGrid::new()
        .with_farm(farm(1), free_ips)
        .with_node(node(1), farm(1), node_capacity())
        .with_node(node(2), farm(1), node_capacity())
        .with_node(node(3), farm(1), node_capacity())
}

pub fn test_config() -> ReconcilerConfig {
    ReconcilerConfig {
        convergence: ConvergenceConfig {
            deadline: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(1),
        },
        ..ReconcilerConfig::default()
    }
}

pub fn reconciler(fake: &FakeGrid) -> Reconciler {
    Reconciler::new(fake.grid(), test_config()).with_clock(Arc::new(ManualClock::new()))
}
