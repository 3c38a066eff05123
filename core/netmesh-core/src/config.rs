//! Configuration of a NetMeshBase.

use netmesh_comm::{EndpointConfig, EndpointKind};
use netmesh_types::CoherenceSpecification;
use std::time::Duration;

/// Configuration for a NetMeshBase.
#[derive(Debug, Clone)]
pub struct MeshBaseConfig {
    /// How long `access_locally` waits for replicas to arrive.
    pub access_timeout: Duration,
    /// How long `try_obtain_lock` waits for the lock to arrive.
    pub lock_timeout: Duration,
    /// How long lock requests are collected before the smallest requester
    /// is chosen.
    pub lock_arbitration_window: Duration,
    /// How long `kill_proxy` waits for the farewell message to go out.
    pub cease_timeout: Duration,
    /// Discipline of new proxies' endpoints.
    pub endpoint_kind: EndpointKind,
    /// Timing of new proxies' endpoints.
    pub endpoint: EndpointConfig,
    /// Coherence of proxies obtained without an explicit one.
    pub default_coherence: Option<CoherenceSpecification>,
}

impl Default for MeshBaseConfig {
    fn default() -> Self {
        Self {
            access_timeout: Duration::from_secs(10),
            lock_timeout: Duration::from_secs(10),
            lock_arbitration_window: Duration::from_millis(50),
            cease_timeout: Duration::from_secs(2),
            endpoint_kind: EndpointKind::PingPong,
            endpoint: EndpointConfig::default(),
            default_coherence: None,
        }
    }
}
