//! Shared helpers for probe tests.

#![allow(dead_code)]

use async_trait::async_trait;
use netmesh_comm::EndpointConfig;
use netmesh_core::MeshBaseConfig;
use netmesh_probe::{FetchedResource, Fetcher, MemoryFetcher, ProbeManagerConfig, ProbeResult};
use netmesh_types::NetMeshBaseIdentifier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn node_id(s: &str) -> NetMeshBaseIdentifier {
    NetMeshBaseIdentifier::parse(s).unwrap()
}

pub fn fast_config() -> MeshBaseConfig {
    MeshBaseConfig {
        access_timeout: Duration::from_secs(3),
        lock_timeout: Duration::from_secs(3),
        lock_arbitration_window: Duration::from_millis(100),
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

pub fn manager_config() -> ProbeManagerConfig {
    ProbeManagerConfig {
        time_not_needed_till_expires: Some(Duration::from_millis(100)),
        expiry_check_interval: Duration::from_millis(50),
        default_coherence: None,
        shadow: fast_config(),
    }
}

pub fn json(body: &str) -> FetchedResource {
    FetchedResource::new(body.as_bytes(), Some("application/json"))
}

/// A feed with one item.
pub const FEED_V1: &str = r#"{ "objects": [
    { "id": "", "types": ["Feed"], "properties": { "title": "News" },
      "neighbors": { "item-1": ["contains"] } },
    { "id": "item-1", "types": ["Item"], "properties": { "title": "First", "rank": 1 } }
] }"#;

/// The same feed after item-1 was replaced by item-2.
pub const FEED_V2: &str = r#"{ "objects": [
    { "id": "", "types": ["Feed"], "properties": { "title": "News" },
      "neighbors": { "item-2": ["contains"] } },
    { "id": "item-2", "types": ["Item"], "properties": { "title": "Second" } }
] }"#;

/// Wraps a [`MemoryFetcher`] and counts fetches.
#[derive(Default)]
pub struct CountingFetcher {
    pub inner: MemoryFetcher,
    fetches: AtomicUsize,
}

impl CountingFetcher {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for CountingFetcher {
    fn supports(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.inner.supports(id)
    }

    async fn fetch(&self, id: &NetMeshBaseIdentifier) -> ProbeResult<FetchedResource> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(id).await
    }
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
