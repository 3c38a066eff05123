//! TCP transport.
//!
//! Node identifiers of the form `tcp://host:port` are dialed directly.
//! Packets are framed with the length-prefixed JSON codec; one outgoing
//! connection per partner is kept open and re-established on failure.
//! Each partner has its own connection slot, so a partner that cannot be
//! reached only delays packets to itself.

use super::Transport;
use crate::{read_packet, write_packet, CommError, CommResult, Packet};
use async_trait::async_trait;
use netmesh_types::NetMeshBaseIdentifier;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Scheme of identifiers this transport can dial.
pub const TCP_SCHEME: &str = "tcp";

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// The outgoing connection to one partner, if established.
type ConnectionSlot = Arc<Mutex<Option<TcpStream>>>;

/// Configuration for the TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransportConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Timeout for establishing outgoing connections.
    pub connect_timeout: Duration,
    /// Capacity of the incoming packet queue.
    pub incoming_capacity: usize,
}

impl Default for TcpTransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 7341)),
            connect_timeout: Duration::from_secs(5),
            incoming_capacity: 256,
        }
    }
}

/// Transport over plain TCP connections.
pub struct TcpTransport {
    local: NetMeshBaseIdentifier,
    config: TcpTransportConfig,
    local_addr: SocketAddr,
    connections: StdMutex<HashMap<SocketAddr, ConnectionSlot>>,
    incoming_rx: Mutex<mpsc::Receiver<Packet>>,
    accept_task: JoinHandle<()>,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
}

impl TcpTransport {
    /// Binds the listener and starts accepting connections.
    pub async fn bind(local: NetMeshBaseIdentifier, config: TcpTransportConfig) -> CommResult<Self> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let (incoming_tx, incoming_rx) = mpsc::channel(config.incoming_capacity);
        let running = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, _) = watch::channel(false);

        info!("TCP transport for {} listening on {}", local, local_addr);

        let accept_task = tokio::spawn(Self::accept_loop(listener, incoming_tx, running.clone()));

        Ok(Self {
            local,
            config,
            local_addr,
            connections: StdMutex::new(HashMap::new()),
            incoming_rx: Mutex::new(incoming_rx),
            accept_task,
            running,
            shutdown_tx,
        })
    }

    /// The address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolves a node identifier to a socket address.
    pub fn resolve(id: &NetMeshBaseIdentifier) -> CommResult<SocketAddr> {
        if id.scheme() != TCP_SCHEME {
            return Err(CommError::InvalidAddress(id.to_string()));
        }
        id.authority()
            .trim_end_matches('/')
            .parse()
            .map_err(|_| CommError::InvalidAddress(id.to_string()))
    }

    async fn accept_loop(
        listener: TcpListener,
        incoming_tx: mpsc::Sender<Packet>,
        running: Arc<AtomicBool>,
    ) {
        while running.load(Ordering::SeqCst) {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept TCP connection: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    continue;
                }
            };
            debug!("Accepted TCP connection from {}", peer);

            let tx = incoming_tx.clone();
            tokio::spawn(async move {
                let mut stream = stream;
                loop {
                    match read_packet(&mut stream).await {
                        Ok(Some(packet)) => {
                            if tx.send(packet).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Dropping TCP connection from {}: {}", peer, e);
                            break;
                        }
                    }
                }
                debug!("TCP connection from {} closed", peer);
            });
        }
    }

    fn slot(&self, addr: SocketAddr) -> ConnectionSlot {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(addr)
            .or_default()
            .clone()
    }

    async fn connect(&self, addr: SocketAddr) -> CommResult<TcpStream> {
        match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(CommError::Unreachable(format!("{addr}: {e}"))),
            Err(_) => Err(CommError::Unreachable(format!("{addr}: connect timed out"))),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_identifier(&self) -> &NetMeshBaseIdentifier {
        &self.local
    }

    async fn attempt_send(&self, packet: Packet) -> CommResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CommError::EndpointDead);
        }
        let addr = Self::resolve(&packet.receiver)?;
        let slot = self.slot(addr);
        let mut connection = slot.lock().await;

        // A cached connection may have been closed by the partner; retry once
        // on a fresh one before reporting failure.
        if let Some(mut stream) = connection.take() {
            if write_packet(&mut stream, &packet).await.is_ok() {
                *connection = Some(stream);
                return Ok(());
            }
            debug!("Cached connection to {} failed, reconnecting", addr);
        }

        let mut stream = self.connect(addr).await?;
        write_packet(&mut stream, &packet)
            .await
            .map_err(|e| CommError::Unreachable(format!("{addr}: {e}")))?;
        *connection = Some(stream);
        Ok(())
    }

    async fn recv(&self) -> Option<Packet> {
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            return None;
        }
        let mut rx = self.incoming_rx.lock().await;
        tokio::select! {
            packet = rx.recv() => packet,
            _ = shutdown.changed() => None,
        }
    }

    async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.accept_task.abort();
        self.shutdown_tx.send_replace(true);
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("TCP transport for {} stopped", self.local);
    }
}
