//! Shared helpers for mesh base tests.

#![allow(dead_code)]

use netmesh_comm::{EndpointConfig, MemoryNetwork};
use netmesh_core::{MeshBaseConfig, NetMeshBase};
use netmesh_store::Store;
use netmesh_types::NetMeshBaseIdentifier;
use std::sync::Arc;
use std::time::Duration;

pub fn node_id(s: &str) -> NetMeshBaseIdentifier {
    NetMeshBaseIdentifier::parse(s).unwrap()
}

/// Short timers so tests converge in milliseconds.
pub fn fast_config() -> MeshBaseConfig {
    MeshBaseConfig {
        access_timeout: Duration::from_secs(3),
        lock_timeout: Duration::from_secs(3),
        lock_arbitration_window: Duration::from_millis(200),
        cease_timeout: Duration::from_millis(500),
        endpoint: EndpointConfig {
            delta_respond: Duration::from_millis(5),
            delta_resend: Duration::from_millis(20),
            delta_recover: Duration::from_millis(200),
            random_variation: 0.1,
        },
        ..MeshBaseConfig::default()
    }
}

pub fn open_node(network: &MemoryNetwork, name: &str) -> NetMeshBase {
    open_node_with(network, name, fast_config())
}

pub fn open_node_with(network: &MemoryNetwork, name: &str, config: MeshBaseConfig) -> NetMeshBase {
    NetMeshBase::builder(Arc::new(network.attach(node_id(name))))
        .config(config)
        .open()
        .unwrap()
}

pub fn open_node_with_store(network: &MemoryNetwork, name: &str, store: Arc<dyn Store>) -> NetMeshBase {
    NetMeshBase::builder(Arc::new(network.attach(node_id(name))))
        .config(fast_config())
        .store(store)
        .open()
        .unwrap()
}

/// Polls `check` until it holds, failing after five seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
