//! Routes packets between a primary transport and an in-process network.

use super::{MemoryNetwork, MemoryTransport, Transport};
use crate::{CommResult, Packet};
use async_trait::async_trait;
use netmesh_types::NetMeshBaseIdentifier;
use std::sync::Arc;

/// Sends to nodes attached to a local [`MemoryNetwork`] in-process, and to
/// everybody else over the primary transport.
///
/// Used by nodes that host in-process partners, such as the shadow bases of
/// their Probes.
pub struct CompositeTransport {
    primary: Arc<dyn Transport>,
    local_network: MemoryNetwork,
    local: MemoryTransport,
}

impl CompositeTransport {
    /// Creates a composite transport. The node is attached to
    /// `local_network` under the primary transport's identifier.
    pub fn new(primary: Arc<dyn Transport>, local_network: MemoryNetwork) -> Self {
        let local = local_network.attach(primary.local_identifier().clone());
        Self {
            primary,
            local_network,
            local,
        }
    }

    /// The in-process network.
    #[must_use]
    pub fn local_network(&self) -> &MemoryNetwork {
        &self.local_network
    }
}

#[async_trait]
impl Transport for CompositeTransport {
    fn local_identifier(&self) -> &NetMeshBaseIdentifier {
        self.primary.local_identifier()
    }

    async fn attempt_send(&self, packet: Packet) -> CommResult<()> {
        if self.local_network.is_attached(&packet.receiver) {
            self.local.attempt_send(packet).await
        } else {
            self.primary.attempt_send(packet).await
        }
    }

    async fn recv(&self) -> Option<Packet> {
        tokio::select! {
            Some(packet) = self.primary.recv() => Some(packet),
            Some(packet) = self.local.recv() => Some(packet),
            else => None,
        }
    }

    async fn shutdown(&self) {
        self.local.shutdown().await;
        self.primary.shutdown().await;
    }
}
