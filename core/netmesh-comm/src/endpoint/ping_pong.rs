//! Token-passing endpoint.
//!
//! Tokens alternate between the partners: whoever received token `n` answers
//! with `n + 1`. The initiator starts with token 1. When no answer arrives
//! within the recover delay, the last token is resent with the same batch;
//! the partner recognizes the duplicate and answers again.

use super::task::{self, EndpointTask, SendOutcome};
use super::{EndpointConfig, EndpointKind, EndpointMessage, EndpointState, MessageEndpoint};
use crate::transport::Transport;
use netmesh_types::NetMeshBaseIdentifier;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Constructor for token-passing endpoints.
pub struct PingPongEndpoint;

impl PingPongEndpoint {
    /// Spawns a fresh endpoint towards `partner`.
    pub fn spawn<T: EndpointMessage>(
        name: impl Into<String>,
        config: EndpointConfig,
        transport: Arc<dyn Transport>,
        partner: NetMeshBaseIdentifier,
    ) -> Arc<MessageEndpoint<T>> {
        Self::restore(name, config, transport, partner, EndpointState::default())
    }

    /// Spawns an endpoint that continues from an externalized state.
    pub fn restore<T: EndpointMessage>(
        name: impl Into<String>,
        config: EndpointConfig,
        transport: Arc<dyn Transport>,
        partner: NetMeshBaseIdentifier,
        state: EndpointState<T>,
    ) -> Arc<MessageEndpoint<T>> {
        task::spawn(EndpointKind::PingPong, name, config, transport, partner, state)
    }
}

impl<T: EndpointMessage> EndpointTask<T> {
    pub(super) async fn ping_pong_action(&mut self) {
        let (token, batch) = {
            let mut state = self.shared.state();
            let token = match (state.last_sent_token, state.last_received_token) {
                (None, None) => 1,
                (Some(sent), None) => sent,
                (None, Some(received)) => received + 1,
                (Some(sent), Some(received)) if received == sent + 1 => received + 1,
                (Some(sent), Some(received)) if received + 1 == sent => sent,
                (Some(sent), Some(received)) => {
                    warn!(
                        "Endpoint {} out of step (sent {}, received {}), continuing from received",
                        self.name, sent, received
                    );
                    received + 1
                }
            };

            let batch = if state.last_sent_token == Some(token) {
                state.messages_sent_last.clone()
            } else {
                let batch = std::mem::take(&mut state.messages_to_be_sent);
                state.last_sent_token = Some(token);
                state.messages_sent_last = batch.clone();
                batch
            };
            (token, batch)
        };

        // Set up recovery before sending; the answer may arrive first.
        self.schedule(self.config.delta_recover);

        match self.send(token, &batch).await {
            SendOutcome::Sent | SendOutcome::Disabled => {}
            SendOutcome::Failed => self.schedule(self.config.delta_resend),
        }
    }

    pub(super) fn ping_pong_incoming(&mut self, token: u64, messages: Vec<T>) {
        {
            let mut state = self.shared.state();

            if let Some(received) = state.last_received_token {
                if token < received {
                    trace!("Endpoint {} ignoring stale token {}", self.name, token);
                    return;
                }
                if token == received {
                    // Our answer got lost; answer again.
                    debug!("Endpoint {} received duplicate token {}", self.name, token);
                    drop(state);
                    self.schedule(self.config.delta_respond);
                    return;
                }
            } else if state.last_sent_token == Some(token) {
                // Both sides started at the same time. The smaller node
                // identifier keeps its token; the other side yields.
                if self.local < self.partner {
                    debug!("Endpoint {} keeps token {} after collision", self.name, token);
                    return;
                }
                debug!("Endpoint {} yields token {} after collision", self.name, token);
                let mut requeued = std::mem::take(&mut state.messages_sent_last);
                requeued.append(&mut state.messages_to_be_sent);
                state.messages_to_be_sent = requeued;
                state.last_sent_token = None;
            }

            state.last_received_token = Some(token);
        }

        self.fire_received(token, &messages);
        self.schedule(self.config.delta_respond);
    }
}
