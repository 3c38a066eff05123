//! The task that drives an endpoint.

use super::{Command, EndpointConfig, EndpointKind, EndpointMessage, EndpointState, MessageEndpoint, Shared};
use crate::transport::Transport;
use crate::{CommError, Packet};
use netmesh_types::NetMeshBaseIdentifier;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of handing a batch to the transport.
pub(super) enum SendOutcome {
    Sent,
    Failed,
    Disabled,
}

pub(super) struct EndpointTask<T> {
    pub(super) name: String,
    pub(super) local: NetMeshBaseIdentifier,
    pub(super) partner: NetMeshBaseIdentifier,
    pub(super) kind: EndpointKind,
    pub(super) config: EndpointConfig,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) shared: Arc<Shared<T>>,
    /// When the next action runs. At most one action is ever pending.
    pub(super) deadline: Option<Instant>,
}

/// Spawns the task for a new endpoint and returns its handle.
pub(super) fn spawn<T: EndpointMessage>(
    kind: EndpointKind,
    name: impl Into<String>,
    config: EndpointConfig,
    transport: Arc<dyn Transport>,
    partner: NetMeshBaseIdentifier,
    state: EndpointState<T>,
) -> Arc<MessageEndpoint<T>> {
    let name = name.into();
    let shared = Arc::new(Shared::new(state));
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let task = EndpointTask {
        name: name.clone(),
        local: transport.local_identifier().clone(),
        partner: partner.clone(),
        kind,
        config,
        transport,
        shared: shared.clone(),
        deadline: None,
    };
    tokio::spawn(task.run(commands_rx));

    Arc::new(MessageEndpoint {
        name,
        partner,
        kind,
        shared,
        commands: commands_tx,
    })
}

impl<T: EndpointMessage> EndpointTask<T> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Endpoint {} started ({:?})", self.name, self.kind);

        loop {
            let deadline = self.deadline;
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if self.shared.is_dead() {
                        break;
                    }
                    match command {
                        Command::Start => {
                            if self.deadline.is_none() {
                                self.do_action().await;
                            }
                        }
                        Command::Stop => self.deadline = None,
                        Command::Enqueued => {
                            if self.kind == EndpointKind::FireAndForget {
                                self.deadline = None;
                                self.do_action().await;
                            }
                        }
                        Command::Incoming(packet) => self.incoming(packet),
                    }
                }
                () = timer => {
                    self.deadline = None;
                    if self.shared.is_dead() {
                        break;
                    }
                    self.do_action().await;
                }
            }
        }

        debug!("Endpoint {} stopped", self.name);
    }

    async fn do_action(&mut self) {
        match self.kind {
            EndpointKind::PingPong => self.ping_pong_action().await,
            EndpointKind::FireAndForget => self.fire_and_forget_action().await,
        }
    }

    fn incoming(&mut self, packet: Packet) {
        if packet.sender != self.partner {
            warn!(
                "Endpoint {} dropping packet from {}, expected {}",
                self.name, packet.sender, self.partner
            );
            return;
        }
        let messages = match packet.decode::<T>() {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Endpoint {} cannot decode token {}: {}", self.name, packet.token, e);
                return;
            }
        };
        match self.kind {
            EndpointKind::PingPong => self.ping_pong_incoming(packet.token, messages),
            EndpointKind::FireAndForget => self.fire_and_forget_incoming(packet.token, messages),
        }
    }

    /// Replaces the pending action with one `base` (randomized) from now.
    pub(super) fn schedule(&mut self, base: Duration) {
        self.deadline = Some(Instant::now() + self.config.randomize(base));
    }

    /// Hands a batch to the transport and fires the matching events.
    pub(super) async fn send(&mut self, token: u64, batch: &[T]) -> SendOutcome {
        let packet = match Packet::encode(self.local.clone(), self.partner.clone(), token, batch) {
            Ok(packet) => packet,
            Err(e) => {
                self.disable(batch, &e);
                return SendOutcome::Disabled;
            }
        };

        match self.transport.attempt_send(packet).await {
            Ok(()) => {
                debug!(
                    "Endpoint {} sent token {} with {} message(s)",
                    self.name,
                    token,
                    batch.len()
                );
                for listener in self.shared.listeners() {
                    listener.token_sent(token);
                    for message in batch {
                        listener.message_sent(message);
                    }
                }
                SendOutcome::Sent
            }
            Err(e) if e.is_fatal() => {
                self.disable(batch, &e);
                SendOutcome::Disabled
            }
            Err(e) => {
                info!("Endpoint {} failed to send token {}: {}", self.name, token, e);
                for listener in self.shared.listeners() {
                    for message in batch {
                        listener.message_sending_failed(message);
                    }
                }
                SendOutcome::Failed
            }
        }
    }

    fn disable(&mut self, unsent: &[T], error: &CommError) {
        warn!("Endpoint {} disabled: {}", self.name, error);
        self.deadline = None;
        for listener in self.shared.listeners() {
            listener.disabling_error(unsent, error);
        }
    }

    pub(super) fn fire_received(&self, token: u64, messages: &[T]) {
        for listener in self.shared.listeners() {
            listener.token_received(token);
            for message in messages {
                listener.message_received(message);
            }
        }
    }
}
