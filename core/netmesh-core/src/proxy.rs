//! Proxies.
//!
//! A [`Proxy`] is the local base's side of the conversation with one
//! partner. It owns the message endpoint towards the partner and a task
//! that applies the partner's messages in arrival order.

use crate::meshbase::BaseInner;
use crate::{MeshError, MeshResult, XprisoMessage};
use netmesh_comm::{
    BidirectionalMessageEndpoint, CommError, EndpointConfig, EndpointKind, EndpointState,
    FireAndForgetEndpoint, MessageEndpointListener, PingPongEndpoint, ReturnSynchronizerEndpoint,
    SynchronizerTransaction, Transport,
};
use netmesh_types::{CoherenceSpecification, NetMeshBaseIdentifier};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Replication state of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyStatus {
    /// Created, nothing requested yet.
    Uninitialized,
    /// First request sent, waiting for the answer.
    AwaitingInitialSync,
    Synchronized,
    /// A lock request is outstanding.
    AwaitingLockTransfer,
    /// Torn down; a new proxy must be obtained.
    Dead,
}

/// The externalized form of a proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyData {
    pub local: NetMeshBaseIdentifier,
    pub partner: NetMeshBaseIdentifier,
    pub coherence: Option<CoherenceSpecification>,
    pub status: ProxyStatus,
    pub next_request_id: u64,
    pub endpoint_kind: EndpointKind,
    pub endpoint: EndpointState<XprisoMessage>,
}

enum Inbound {
    Message(XprisoMessage),
    Disabled(String),
}

/// Forwards what the endpoint receives to the proxy's inbound task.
struct InboundForwarder(mpsc::UnboundedSender<Inbound>);

impl MessageEndpointListener<XprisoMessage> for InboundForwarder {
    fn message_received(&self, message: &XprisoMessage) {
        let _ = self.0.send(Inbound::Message(message.clone()));
    }

    fn disabling_error(&self, _unsent: &[XprisoMessage], error: &CommError) {
        let _ = self.0.send(Inbound::Disabled(error.to_string()));
    }
}

/// The local side of the replication relationship with one partner.
pub struct Proxy {
    local: NetMeshBaseIdentifier,
    partner: NetMeshBaseIdentifier,
    endpoint: ReturnSynchronizerEndpoint<XprisoMessage>,
    status: Mutex<ProxyStatus>,
    coherence: Mutex<Option<CoherenceSpecification>>,
    inbound_task: Mutex<Option<JoinHandle<()>>>,
}

impl Proxy {
    pub(crate) fn spawn(
        base: Weak<BaseInner>,
        transport: Arc<dyn Transport>,
        kind: EndpointKind,
        config: EndpointConfig,
        partner: NetMeshBaseIdentifier,
        coherence: Option<CoherenceSpecification>,
    ) -> Arc<Self> {
        let local = transport.local_identifier().clone();
        Self::build(base, transport, config, ProxyData {
            local,
            partner,
            coherence,
            status: ProxyStatus::Uninitialized,
            next_request_id: 1,
            endpoint_kind: kind,
            endpoint: EndpointState::default(),
        })
    }

    pub(crate) fn restore(
        base: Weak<BaseInner>,
        transport: Arc<dyn Transport>,
        config: EndpointConfig,
        data: ProxyData,
    ) -> Arc<Self> {
        let resume = data.status != ProxyStatus::Uninitialized;
        let proxy = Self::build(base, transport, config, data);
        if resume {
            proxy.start_communicating();
        }
        proxy
    }

    fn build(
        base: Weak<BaseInner>,
        transport: Arc<dyn Transport>,
        config: EndpointConfig,
        data: ProxyData,
    ) -> Arc<Self> {
        let name = format!("{}->{}", data.local, data.partner);
        let endpoint: Arc<dyn BidirectionalMessageEndpoint<XprisoMessage>> = match data.endpoint_kind {
            EndpointKind::PingPong => {
                PingPongEndpoint::restore(name, config, transport, data.partner.clone(), data.endpoint)
            }
            EndpointKind::FireAndForget => {
                FireAndForgetEndpoint::restore(name, config, transport, data.partner.clone(), data.endpoint)
            }
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        endpoint.add_listener(Arc::new(InboundForwarder(inbound_tx)));

        let status = match data.status {
            ProxyStatus::Dead => ProxyStatus::Uninitialized,
            other => other,
        };
        let proxy = Arc::new(Self {
            local: data.local,
            partner: data.partner,
            endpoint: ReturnSynchronizerEndpoint::with_next_request_id(endpoint, data.next_request_id),
            status: Mutex::new(status),
            coherence: Mutex::new(data.coherence),
            inbound_task: Mutex::new(None),
        });

        let task = tokio::spawn(Self::inbound_loop(Arc::downgrade(&proxy), base, inbound_rx));
        *lock(&proxy.inbound_task) = Some(task);
        proxy
    }

    async fn inbound_loop(
        proxy: Weak<Proxy>,
        base: Weak<BaseInner>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
    ) {
        while let Some(event) = inbound.recv().await {
            let (Some(proxy), Some(base)) = (proxy.upgrade(), base.upgrade()) else {
                break;
            };
            match event {
                Inbound::Message(message) => {
                    base.handle_incoming(&proxy, message.clone()).await;
                    proxy.endpoint.complete_from(&message);
                }
                Inbound::Disabled(reason) => {
                    warn!("Proxy {} -> {} disabled: {}", proxy.local, proxy.partner, reason);
                    base.remove_proxy(&proxy.partner);
                    proxy.die();
                    break;
                }
            }
        }
    }

    /// The partner node.
    #[must_use]
    pub fn partner(&self) -> &NetMeshBaseIdentifier {
        &self.partner
    }

    /// The local node.
    #[must_use]
    pub fn local(&self) -> &NetMeshBaseIdentifier {
        &self.local
    }

    #[must_use]
    pub fn status(&self) -> ProxyStatus {
        *lock(&self.status)
    }

    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.status() == ProxyStatus::Dead
    }

    #[must_use]
    pub fn coherence(&self) -> Option<CoherenceSpecification> {
        lock(&self.coherence).clone()
    }

    pub(crate) fn set_coherence(&self, coherence: CoherenceSpecification) {
        *lock(&self.coherence) = Some(coherence);
    }

    /// Number of messages waiting to be sent.
    #[must_use]
    pub fn queued_messages(&self) -> usize {
        self.endpoint.endpoint().messages_to_be_sent().len()
    }

    /// Snapshot of the proxy's restorable state.
    #[must_use]
    pub fn externalize(&self) -> ProxyData {
        let endpoint = self.endpoint.endpoint();
        ProxyData {
            local: self.local.clone(),
            partner: self.partner.clone(),
            coherence: self.coherence(),
            status: self.status(),
            next_request_id: self.endpoint.next_request_id(),
            endpoint_kind: endpoint.kind(),
            endpoint: endpoint.externalize(),
        }
    }

    /// Tears the proxy down. Queued messages are dropped.
    pub fn die(&self) {
        let previous = std::mem::replace(&mut *lock(&self.status), ProxyStatus::Dead);
        if previous == ProxyStatus::Dead {
            return;
        }
        debug!("Proxy {} -> {} dies", self.local, self.partner);
        self.endpoint.endpoint().die();
        if let Some(task) = lock(&self.inbound_task).take() {
            // The task may be the caller; it exits on its own then.
            if !task.is_finished() {
                task.abort();
            }
        }
    }

    // ── Crate-internal messaging ────────────────────────────────

    pub(crate) fn set_status(&self, status: ProxyStatus) {
        let mut current = lock(&self.status);
        if *current != ProxyStatus::Dead {
            *current = status;
        }
    }

    /// Moves from `from` to `to` if the proxy is in state `from`.
    pub(crate) fn transition(&self, from: ProxyStatus, to: ProxyStatus) {
        let mut current = lock(&self.status);
        if *current == from {
            *current = to;
        }
    }

    pub(crate) fn deliver(&self, packet: netmesh_comm::Packet) {
        self.endpoint.endpoint().deliver(packet);
    }

    pub(crate) fn start_communicating(&self) {
        self.endpoint.endpoint().start_communicating();
    }

    /// Queues a one-way message.
    pub(crate) fn send(&self, message: XprisoMessage) -> MeshResult<()> {
        if self.is_dead() {
            return Err(MeshError::ProxyDead(self.partner.clone()));
        }
        self.endpoint.send(message)?;
        self.start_communicating();
        Ok(())
    }

    /// Sends a request and waits for its response.
    pub(crate) async fn request(
        &self,
        message: XprisoMessage,
        timeout: std::time::Duration,
    ) -> MeshResult<XprisoMessage> {
        if self.is_dead() {
            return Err(MeshError::ProxyDead(self.partner.clone()));
        }
        let mut transaction: SynchronizerTransaction<'_, u64, XprisoMessage> =
            self.endpoint.begin_transaction();
        let request_id = self.endpoint.call(&mut transaction, message)?;
        self.start_communicating();

        transaction.join(timeout).await.map_err(|e| match e {
            CommError::Timeout => MeshError::Timeout,
            other => MeshError::Comm(other),
        })?;
        Ok(transaction.result_for(&request_id)?)
    }

    pub(crate) fn local_endpoint_queue(&self) -> Vec<XprisoMessage> {
        self.endpoint.endpoint().messages_to_be_sent()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
