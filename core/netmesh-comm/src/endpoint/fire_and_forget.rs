//! Endpoint that sends as soon as something is queued.
//!
//! Every packet carries a fresh token. A batch the transport refused is
//! kept, together with its token, and retried before anything newer; the
//! receiver drops tokens it has already seen.

use super::task::{self, EndpointTask, SendOutcome};
use super::{EndpointConfig, EndpointKind, EndpointMessage, EndpointState, MessageEndpoint};
use crate::transport::Transport;
use netmesh_types::NetMeshBaseIdentifier;
use std::sync::Arc;
use tracing::trace;

/// Constructor for fire-and-forget endpoints.
pub struct FireAndForgetEndpoint;

impl FireAndForgetEndpoint {
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
        task::spawn(EndpointKind::FireAndForget, name, config, transport, partner, state)
    }
}

impl<T: EndpointMessage> EndpointTask<T> {
    pub(super) async fn fire_and_forget_action(&mut self) {
        loop {
            let (token, batch) = {
                let mut state = self.shared.state();
                if state.messages_sent_last.is_empty() {
                    if state.messages_to_be_sent.is_empty() {
                        return;
                    }
                    let token = state.last_sent_token.map_or(1, |t| t + 1);
                    state.messages_sent_last = std::mem::take(&mut state.messages_to_be_sent);
                    state.last_sent_token = Some(token);
                }
                // Retry of a refused batch keeps its token.
                let token = state.last_sent_token.unwrap_or(1);
                (token, state.messages_sent_last.clone())
            };

            match self.send(token, &batch).await {
                SendOutcome::Sent => self.shared.state().messages_sent_last.clear(),
                SendOutcome::Failed => {
                    self.schedule(self.config.delta_resend);
                    return;
                }
                SendOutcome::Disabled => return,
            }
        }
    }

    pub(super) fn fire_and_forget_incoming(&mut self, token: u64, messages: Vec<T>) {
        {
            let mut state = self.shared.state();
            if state.last_received_token.is_some_and(|received| token <= received) {
                trace!("Endpoint {} ignoring duplicate token {}", self.name, token);
                return;
            }
            state.last_received_token = Some(token);
        }
        self.fire_received(token, &messages);
    }
}
