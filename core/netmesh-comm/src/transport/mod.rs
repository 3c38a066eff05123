//! Transport layer abstraction.
//!
//! A transport moves [`Packet`]s between nodes. It makes no delivery
//! promises: a send may fail, and a failed send may be retried by the
//! endpoint above it. Reliability and ordering live in the endpoints.

mod composite;
mod memory;
mod tcp;

pub use composite::CompositeTransport;
pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::{TcpTransport, TcpTransportConfig};

use crate::{CommResult, Packet};
use async_trait::async_trait;
use netmesh_types::NetMeshBaseIdentifier;

/// Moves packets between this node and its partners.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns the identifier of the node this transport belongs to.
    fn local_identifier(&self) -> &NetMeshBaseIdentifier;

    /// Attempts to hand a packet to its receiver.
    ///
    /// A retryable failure means the packet was not delivered; a fatal one
    /// (see [`CommError::is_fatal`](crate::CommError::is_fatal)) means no
    /// later attempt will succeed either.
    async fn attempt_send(&self, packet: Packet) -> CommResult<()>;

    /// Receives the next incoming packet.
    /// Returns `None` if the transport is shutting down.
    async fn recv(&self) -> Option<Packet>;

    /// Stops the transport. Pending and later sends fail fatally.
    async fn shutdown(&self);
}
