//! Message endpoints and transports for NetMesh.
//!
//! Provides reliable, ordered delivery of application messages between two
//! nodes over a transport that may lose or refuse packets.
//!
//! # Architecture
//!
//! - **Transport**: moves [`Packet`]s between nodes; may fail at any time
//!   ([`MemoryNetwork`] in-process, [`TcpTransport`] over TCP,
//!   [`CompositeTransport`] routing between the two)
//! - **Endpoint**: owns the send queue and the retry timers for one partner
//!   ([`PingPongEndpoint`], [`FireAndForgetEndpoint`])
//! - **ReturnSynchronizer**: correlates responses with requests so callers
//!   can wait for an answer
//!
//! Each endpoint runs as a single tokio task that owns its timer; callers
//! talk to it over a channel, so enqueueing never blocks.

mod codec;
pub mod endpoint;
mod error;
mod packet;
mod synchronizer;
pub mod transport;

pub use codec::{read_packet, write_packet, MAX_PACKET_SIZE};
pub use endpoint::{
    BidirectionalMessageEndpoint, EndpointConfig, EndpointKind, EndpointMessage, EndpointState,
    FireAndForgetEndpoint, MessageEndpoint, MessageEndpointListener, PingPongEndpoint,
};
pub use error::{CommError, CommResult};
pub use packet::Packet;
pub use synchronizer::{
    CarriesInvocationId, ReturnSynchronizer, ReturnSynchronizerEndpoint,
    SynchronizerTransaction,
};
pub use transport::{
    CompositeTransport, MemoryNetwork, MemoryTransport, TcpTransport, TcpTransportConfig, Transport,
};
