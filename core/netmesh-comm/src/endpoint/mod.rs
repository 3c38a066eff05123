//! Message endpoints.
//!
//! An endpoint owns the conversation with exactly one partner: a queue of
//! messages waiting to be sent, the batch most recently sent, and the timer
//! that drives the next send. Two disciplines are provided:
//!
//! - [`PingPongEndpoint`]: a token bounces between the two partners. Each
//!   side answers a received token with the next one, piggy-backing whatever
//!   it has queued, and resends its last batch if no answer arrives.
//! - [`FireAndForgetEndpoint`]: sends as soon as something is queued and
//!   retries failed sends after a delay.
//!
//! Both run as a tokio task that alone owns the timer, so there is never
//! more than one pending action per endpoint.

mod fire_and_forget;
mod ping_pong;
mod task;

pub use fire_and_forget::FireAndForgetEndpoint;
pub use ping_pong::PingPongEndpoint;

use crate::{CommError, CommResult, Packet};
use netmesh_types::NetMeshBaseIdentifier;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Bound for anything an endpoint can carry.
pub trait EndpointMessage: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> EndpointMessage for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Timing parameters of an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Delay between receiving a token and answering it.
    pub delta_respond: Duration,
    /// Delay before retrying a send the transport refused.
    pub delta_resend: Duration,
    /// Delay after a send before assuming the packet or its answer was lost.
    pub delta_recover: Duration,
    /// Relative random variation applied to every delay, e.g. 0.05 for ±2.5%.
    pub random_variation: f64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            delta_respond: Duration::from_millis(500),
            delta_resend: Duration::from_secs(1),
            delta_recover: Duration::from_secs(5),
            random_variation: 0.05,
        }
    }
}

impl EndpointConfig {
    /// Applies the random variation to a delay.
    #[must_use]
    pub fn randomize(&self, base: Duration) -> Duration {
        let factor = (rand::random::<f64>() - 0.5) * self.random_variation + 1.0;
        base.mul_f64(factor.max(0.0))
    }
}

/// Which discipline an endpoint follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointKind {
    PingPong,
    FireAndForget,
}

/// The restorable state of an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointState<T> {
    pub last_sent_token: Option<u64>,
    pub last_received_token: Option<u64>,
    /// The batch carried by the last sent token; resent on recovery.
    pub messages_sent_last: Vec<T>,
    /// Messages waiting for the next send.
    pub messages_to_be_sent: Vec<T>,
}

impl<T> Default for EndpointState<T> {
    fn default() -> Self {
        Self {
            last_sent_token: None,
            last_received_token: None,
            messages_sent_last: Vec::new(),
            messages_to_be_sent: Vec::new(),
        }
    }
}

/// Receives endpoint events. All methods default to doing nothing.
///
/// Events are fired from the endpoint task (or, for enqueueing, from the
/// caller), never while the endpoint's state is locked.
pub trait MessageEndpointListener<T>: Send + Sync {
    fn message_enqueued(&self, _message: &T) {}
    fn message_sent(&self, _message: &T) {}
    fn message_sending_failed(&self, _message: &T) {}
    fn message_received(&self, _message: &T) {}
    fn token_sent(&self, _token: u64) {}
    fn token_received(&self, _token: u64) {}
    /// The endpoint can no longer send. `unsent` holds what was in flight.
    fn disabling_error(&self, _unsent: &[T], _error: &CommError) {}
}

/// An endpoint that sends to and receives from one partner.
pub trait BidirectionalMessageEndpoint<T>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// The partner node.
    fn partner(&self) -> &NetMeshBaseIdentifier;

    /// The discipline this endpoint follows.
    fn kind(&self) -> EndpointKind;

    /// Queues a message. Fails if the endpoint is dead.
    fn enqueue_message_for_send(&self, message: T) -> CommResult<()>;

    /// Messages waiting for the next send.
    fn messages_to_be_sent(&self) -> Vec<T>;

    /// The batch carried by the last sent token.
    fn messages_sent_last(&self) -> Vec<T>;

    fn add_listener(&self, listener: Arc<dyn MessageEndpointListener<T>>);

    /// Starts sending if nothing is scheduled yet.
    fn start_communicating(&self);

    /// Cancels the pending action. Queued messages are kept.
    fn stop_communicating(&self);

    /// Hands an incoming packet from the partner to the endpoint.
    fn deliver(&self, packet: Packet);

    /// Snapshot of the restorable state.
    fn externalize(&self) -> EndpointState<T>;

    /// Stops the endpoint for good.
    fn die(&self);

    fn is_dead(&self) -> bool;
}

/// Command sent to the endpoint task.
pub(crate) enum Command {
    Start,
    Stop,
    Enqueued,
    Incoming(Packet),
}

/// State shared between an endpoint handle and its task.
pub(crate) struct Shared<T> {
    state: Mutex<EndpointState<T>>,
    listeners: RwLock<Vec<Arc<dyn MessageEndpointListener<T>>>>,
    dead: AtomicBool,
}

impl<T> Shared<T> {
    fn new(state: EndpointState<T>) -> Self {
        Self {
            state: Mutex::new(state),
            listeners: RwLock::new(Vec::new()),
            dead: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, EndpointState<T>> {
        // Every critical section leaves the state consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn listeners(&self) -> Vec<Arc<dyn MessageEndpointListener<T>>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }
}

/// Handle to a running endpoint task.
///
/// Dropping the last handle stops the task.
pub struct MessageEndpoint<T> {
    name: String,
    partner: NetMeshBaseIdentifier,
    kind: EndpointKind,
    shared: Arc<Shared<T>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl<T: EndpointMessage> MessageEndpoint<T> {
    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Endpoint {} task is gone", self.name);
        }
    }
}

impl<T: EndpointMessage> BidirectionalMessageEndpoint<T> for MessageEndpoint<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn partner(&self) -> &NetMeshBaseIdentifier {
        &self.partner
    }

    fn kind(&self) -> EndpointKind {
        self.kind
    }

    fn enqueue_message_for_send(&self, message: T) -> CommResult<()> {
        if self.shared.is_dead() {
            return Err(CommError::EndpointDead);
        }
        self.shared.state().messages_to_be_sent.push(message.clone());
        for listener in self.shared.listeners() {
            listener.message_enqueued(&message);
        }
        if self.kind == EndpointKind::FireAndForget {
            self.command(Command::Enqueued);
        }
        Ok(())
    }

    fn messages_to_be_sent(&self) -> Vec<T> {
        self.shared.state().messages_to_be_sent.clone()
    }

    fn messages_sent_last(&self) -> Vec<T> {
        self.shared.state().messages_sent_last.clone()
    }

    fn add_listener(&self, listener: Arc<dyn MessageEndpointListener<T>>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    fn start_communicating(&self) {
        self.command(Command::Start);
    }

    fn stop_communicating(&self) {
        self.command(Command::Stop);
    }

    fn deliver(&self, packet: Packet) {
        self.command(Command::Incoming(packet));
    }

    fn externalize(&self) -> EndpointState<T> {
        self.shared.state().clone()
    }

    fn die(&self) {
        if !self.shared.dead.swap(true, Ordering::SeqCst) {
            debug!("Endpoint {} dies", self.name);
            self.command(Command::Stop);
        }
    }

    fn is_dead(&self) -> bool {
        self.shared.is_dead()
    }
}
