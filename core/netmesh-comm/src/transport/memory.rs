//! In-process transport with fault injection.

use super::Transport;
use crate::{CommError, CommResult, Packet};
use async_trait::async_trait;
use netmesh_types::NetMeshBaseIdentifier;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::trace;

#[derive(Default)]
struct NetworkState {
    nodes: HashMap<NetMeshBaseIdentifier, mpsc::UnboundedSender<Packet>>,
    /// Remaining number of sends to a receiver that must fail.
    failures: HashMap<NetMeshBaseIdentifier, usize>,
    /// Unordered pairs of nodes that cannot reach each other.
    partitions: HashSet<(NetMeshBaseIdentifier, NetMeshBaseIdentifier)>,
    delivered: u64,
}

fn pair(
    a: &NetMeshBaseIdentifier,
    b: &NetMeshBaseIdentifier,
) -> (NetMeshBaseIdentifier, NetMeshBaseIdentifier) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// A set of in-process nodes that can exchange packets.
///
/// Cloning yields another handle to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a node and returns its transport.
    ///
    /// Attaching an identifier again replaces the previous attachment.
    pub fn attach(&self, id: NetMeshBaseIdentifier) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().nodes.insert(id.clone(), tx);
        MemoryTransport {
            local: id,
            network: self.clone(),
            incoming_rx: AsyncMutex::new(rx),
            closed: AtomicBool::new(false),
        }
    }

    /// Detaches a node; sends to it fail from now on.
    pub fn detach(&self, id: &NetMeshBaseIdentifier) {
        self.lock().nodes.remove(id);
    }

    /// Whether a node is attached.
    #[must_use]
    pub fn is_attached(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.lock().nodes.contains_key(id)
    }

    /// Makes the next `count` sends to `receiver` fail.
    pub fn fail_next_sends_to(&self, receiver: &NetMeshBaseIdentifier, count: usize) {
        self.lock().failures.insert(receiver.clone(), count);
    }

    /// Cuts communication between two nodes in both directions.
    pub fn partition(&self, a: &NetMeshBaseIdentifier, b: &NetMeshBaseIdentifier) {
        self.lock().partitions.insert(pair(a, b));
    }

    /// Restores communication between two nodes.
    pub fn heal(&self, a: &NetMeshBaseIdentifier, b: &NetMeshBaseIdentifier) {
        self.lock().partitions.remove(&pair(a, b));
    }

    /// Number of packets delivered so far.
    #[must_use]
    pub fn delivered_count(&self) -> u64 {
        self.lock().delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        // The state has no invariants a panicking holder could break.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deliver(&self, packet: Packet) -> CommResult<()> {
        let mut state = self.lock();

        if let Some(remaining) = state.failures.get_mut(&packet.receiver) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CommError::Unreachable(format!(
                    "{} (injected failure)",
                    packet.receiver
                )));
            }
        }
        if state
            .partitions
            .contains(&pair(&packet.sender, &packet.receiver))
        {
            return Err(CommError::Unreachable(format!(
                "{} (partitioned)",
                packet.receiver
            )));
        }

        let receiver = packet.receiver.clone();
        let tx = state
            .nodes
            .get(&receiver)
            .ok_or_else(|| CommError::Unreachable(receiver.to_string()))?;
        tx.send(packet)
            .map_err(|_| CommError::Unreachable(receiver.to_string()))?;
        state.delivered += 1;
        Ok(())
    }
}

/// A node's handle on a [`MemoryNetwork`].
pub struct MemoryTransport {
    local: NetMeshBaseIdentifier,
    network: MemoryNetwork,
    incoming_rx: AsyncMutex<mpsc::UnboundedReceiver<Packet>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// The network this transport is attached to.
    #[must_use]
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_identifier(&self) -> &NetMeshBaseIdentifier {
        &self.local
    }

    async fn attempt_send(&self, packet: Packet) -> CommResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CommError::EndpointDead);
        }
        trace!(
            "memory: {} -> {} token {}",
            packet.sender, packet.receiver, packet.token
        );
        self.network.deliver(packet)
    }

    async fn recv(&self) -> Option<Packet> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let mut rx = self.incoming_rx.lock().await;
        rx.recv().await
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the network's sender ends any pending `recv`.
        self.network.detach(&self.local);
    }
}
