//! Correlates responses with the requests that caused them.
//!
//! A caller opens a transaction, registers one open query per request it
//! sends, and joins: the join returns once every query has its result, or
//! fails when the timeout expires. Results that arrive after the
//! transaction has ended are discarded.

use crate::endpoint::{BidirectionalMessageEndpoint, EndpointMessage};
use crate::{CommError, CommResult};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

struct OpenQuery<R> {
    result: Option<R>,
    waiters: Vec<Arc<Notify>>,
}

/// Tracks open queries and their results.
pub struct ReturnSynchronizer<K, R> {
    name: String,
    queries: Mutex<HashMap<K, OpenQuery<R>>>,
}

impl<K, R> ReturnSynchronizer<K, R>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    R: Clone,
{
    /// Creates a synchronizer; `name` is used in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queries: Mutex::new(HashMap::new()),
        }
    }

    /// Opens a transaction.
    pub fn begin_transaction(&self) -> SynchronizerTransaction<'_, K, R> {
        SynchronizerTransaction {
            synchronizer: self,
            notify: Arc::new(Notify::new()),
            keys: Vec::new(),
        }
    }

    /// Records the result of a query and wakes the transactions waiting for
    /// it. Returns false if nobody is waiting for `key`.
    pub fn query_has_completed(&self, key: &K, result: R) -> bool {
        let mut queries = self.lock();
        let Some(query) = queries.get_mut(key) else {
            debug!("{}: discarding result for unknown query {:?}", self.name, key);
            return false;
        };
        trace!("{}: query {:?} completed", self.name, key);
        query.result = Some(result);
        for waiter in &query.waiters {
            waiter.notify_one();
        }
        true
    }

    /// Whether `key` is an open query, complete or not.
    #[must_use]
    pub fn is_open(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of open queries.
    #[must_use]
    pub fn open_query_count(&self) -> usize {
        self.lock().len()
    }

    fn all_complete(&self, keys: &[K]) -> bool {
        let queries = self.lock();
        keys.iter()
            .all(|k| queries.get(k).is_some_and(|q| q.result.is_some()))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, OpenQuery<R>>> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A set of queries a caller waits for together.
///
/// Dropping the transaction ends it; its queries are forgotten.
pub struct SynchronizerTransaction<'a, K, R>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    R: Clone,
{
    synchronizer: &'a ReturnSynchronizer<K, R>,
    notify: Arc<Notify>,
    keys: Vec<K>,
}

impl<K, R> SynchronizerTransaction<'_, K, R>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    R: Clone,
{
    /// Registers a query whose result this transaction waits for.
    pub fn add_open_query(&mut self, key: K) {
        let mut queries = self.synchronizer.lock();
        queries
            .entry(key.clone())
            .or_insert_with(|| OpenQuery {
                result: None,
                waiters: Vec::new(),
            })
            .waiters
            .push(self.notify.clone());
        self.keys.push(key);
    }

    /// Queries registered with this transaction.
    #[must_use]
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    /// Waits until every query has completed.
    pub async fn join(&self, timeout: Duration) -> CommResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.synchronizer.all_complete(&self.keys) {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return if self.synchronizer.all_complete(&self.keys) {
                    Ok(())
                } else {
                    Err(CommError::Timeout)
                };
            }
        }
    }

    /// Returns the result of a completed query.
    pub fn result_for(&self, key: &K) -> CommResult<R> {
        self.synchronizer
            .lock()
            .get(key)
            .and_then(|q| q.result.clone())
            .ok_or_else(|| CommError::QueryIncomplete(format!("{key:?}")))
    }

    /// Whether every query has completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.synchronizer.all_complete(&self.keys)
    }
}

impl<K, R> Drop for SynchronizerTransaction<'_, K, R>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    R: Clone,
{
    fn drop(&mut self) {
        let mut queries = self.synchronizer.lock();
        for key in &self.keys {
            if let Some(query) = queries.get_mut(key) {
                query.waiters.retain(|w| !Arc::ptr_eq(w, &self.notify));
                if query.waiters.is_empty() {
                    queries.remove(key);
                }
            }
        }
    }
}

/// A message that can carry a request identifier and a response identifier.
pub trait CarriesInvocationId {
    fn request_id(&self) -> Option<u64>;
    fn set_request_id(&mut self, id: u64);
    /// The request this message answers, if any.
    fn response_id(&self) -> Option<u64>;
}

/// An endpoint paired with a synchronizer keyed by request identifier.
///
/// Responses are not routed automatically: whoever processes incoming
/// messages calls [`complete_from`](Self::complete_from) once a message has
/// been fully handled, so a woken caller observes its effects.
pub struct ReturnSynchronizerEndpoint<T> {
    endpoint: Arc<dyn BidirectionalMessageEndpoint<T>>,
    synchronizer: ReturnSynchronizer<u64, T>,
    next_request_id: AtomicU64,
}

impl<T> ReturnSynchronizerEndpoint<T>
where
    T: EndpointMessage + CarriesInvocationId,
{
    /// Wraps an endpoint; request identifiers start at 1.
    pub fn new(endpoint: Arc<dyn BidirectionalMessageEndpoint<T>>) -> Self {
        Self::with_next_request_id(endpoint, 1)
    }

    /// Wraps an endpoint, continuing request identifiers at `next`.
    pub fn with_next_request_id(endpoint: Arc<dyn BidirectionalMessageEndpoint<T>>, next: u64) -> Self {
        let name = format!("sync:{}", endpoint.name());
        Self {
            endpoint,
            synchronizer: ReturnSynchronizer::new(name),
            next_request_id: AtomicU64::new(next.max(1)),
        }
    }

    /// The wrapped endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Arc<dyn BidirectionalMessageEndpoint<T>> {
        &self.endpoint
    }

    /// The identifier the next call will use.
    #[must_use]
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.load(Ordering::SeqCst)
    }

    /// Opens a transaction.
    pub fn begin_transaction(&self) -> SynchronizerTransaction<'_, u64, T> {
        self.synchronizer.begin_transaction()
    }

    /// Stamps `message` with a fresh request identifier, registers it with
    /// the transaction and queues it. Returns the request identifier.
    pub fn call(
        &self,
        transaction: &mut SynchronizerTransaction<'_, u64, T>,
        mut message: T,
    ) -> CommResult<u64> {
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        message.set_request_id(id);
        transaction.add_open_query(id);
        self.endpoint.enqueue_message_for_send(message)?;
        Ok(id)
    }

    /// Queues a message without waiting for an answer.
    pub fn send(&self, message: T) -> CommResult<()> {
        self.endpoint.enqueue_message_for_send(message)
    }

    /// Completes the query `message` answers, if any. Returns true if a
    /// transaction was waiting for it.
    pub fn complete_from(&self, message: &T) -> bool {
        match message.response_id() {
            Some(id) => self.synchronizer.query_has_completed(&id, message.clone()),
            None => false,
        }
    }
}
