//! The NetMeshBase.
//!
//! A [`NetMeshBase`] is one node's store of MeshObjects. It holds home
//! replicas of the objects it created and replicas of objects homed
//! elsewhere, and keeps one [`Proxy`] per partner node it replicates with.
//!
//! Changes propagate in a star around each object's home replica: the
//! home sends its changes to every node holding a replica, a lock holder
//! elsewhere sends its changes to the home, and the home forwards them to
//! the remaining replicas.

use crate::persistence;
use crate::transaction::{Origin, Transaction};
use crate::{
    Deltas, MeshBaseConfig, MeshError, MeshObjectListener, MeshResult, NetMeshObject, Proxy,
    ProxyStatus, XprisoMessage,
};
use async_trait::async_trait;
use netmesh_comm::Transport;
use netmesh_store::Store;
use netmesh_types::{
    now_millis, ChangeStamp, CoherenceSpecification, MeshObjectData, MeshObjectIdentifier,
    NetMeshBaseIdentifier,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Called before a proxy towards a new partner is created.
///
/// Lets a base prepare the partner first, e.g. run the Probe of a
/// probe-managed resource so the partner has content to serve.
#[async_trait]
pub trait ProxyObtainHook: Send + Sync {
    async fn before_obtain(
        &self,
        partner: &NetMeshBaseIdentifier,
        coherence: Option<&CoherenceSpecification>,
    ) -> MeshResult<()>;
}

/// A pending lock request from a partner.
#[derive(Debug, Clone)]
pub(crate) struct LockClaim {
    pub(crate) requester: NetMeshBaseIdentifier,
    pub(crate) request_id: Option<u64>,
}

/// Summary of one proxy, for status reports.
#[derive(Debug, Clone, Serialize)]
pub struct ProxySummary {
    pub partner: NetMeshBaseIdentifier,
    pub status: ProxyStatus,
    pub queued_messages: usize,
    pub coherence: Option<CoherenceSpecification>,
}

pub(crate) struct BaseInner {
    pub(crate) identifier: NetMeshBaseIdentifier,
    pub(crate) config: MeshBaseConfig,
    pub(crate) transport: Arc<dyn Transport>,
    objects: RwLock<HashMap<MeshObjectIdentifier, NetMeshObject>>,
    writer: tokio::sync::Mutex<()>,
    proxies: RwLock<HashMap<NetMeshBaseIdentifier, Arc<Proxy>>>,
    listeners: RwLock<HashMap<MeshObjectIdentifier, Vec<Arc<dyn MeshObjectListener>>>>,
    /// Highest change token seen; local writes are stamped above it.
    clock: AtomicU64,
    store: Option<Arc<dyn Store>>,
    obtain_hook: Option<Arc<dyn ProxyObtainHook>>,
    pub(crate) lock_claims: Mutex<HashMap<MeshObjectIdentifier, Vec<LockClaim>>>,
    closed: AtomicBool,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl BaseInner {
    pub(crate) fn objects_read(&self) -> RwLockReadGuard<'_, HashMap<MeshObjectIdentifier, NetMeshObject>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn objects_write(&self) -> RwLockWriteGuard<'_, HashMap<MeshObjectIdentifier, NetMeshObject>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }

    fn proxies_read(&self) -> RwLockReadGuard<'_, HashMap<NetMeshBaseIdentifier, Arc<Proxy>>> {
        self.proxies.read().unwrap_or_else(|e| e.into_inner())
    }

    fn proxies_write(&self) -> RwLockWriteGuard<'_, HashMap<NetMeshBaseIdentifier, Arc<Proxy>>> {
        self.proxies.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// A stamp for a local write.
    pub(crate) fn next_stamp(&self) -> ChangeStamp {
        let token = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        ChangeStamp::new(token, self.identifier.clone())
    }

    /// Advances the clock past a stamp seen from elsewhere.
    pub(crate) fn observe(&self, stamp: &ChangeStamp) {
        self.clock.fetch_max(stamp.token, Ordering::SeqCst);
    }

    pub(crate) async fn begin(self: &Arc<Self>, origin: Origin) -> Transaction<'_> {
        let writer = self.writer.lock().await;
        Transaction::new(self, writer, origin)
    }

    pub(crate) fn find(&self, id: &MeshObjectIdentifier) -> Option<NetMeshObject> {
        self.objects_read().get(id).cloned()
    }

    /// Looks up an object and records the read.
    pub(crate) fn read(&self, id: &MeshObjectIdentifier) -> Option<NetMeshObject> {
        let mut objects = self.objects_write();
        let object = objects.get_mut(id)?;
        object.time_read = now_millis();
        Some(object.clone())
    }

    pub(crate) fn has_listeners(&self, id: &MeshObjectIdentifier) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .is_some_and(|l| !l.is_empty())
    }

    // ── Commit and propagation ──────────────────────────────────

    pub(crate) fn commit(
        self: &Arc<Self>,
        working: BTreeMap<MeshObjectIdentifier, Option<NetMeshObject>>,
        forgotten: BTreeSet<MeshObjectIdentifier>,
        origin: &Origin,
    ) -> MeshResult<Deltas> {
        let mut changes: Vec<(Deltas, NetMeshObject)> = Vec::new();
        {
            let objects = self.objects_read();
            for (id, after) in &working {
                let before = objects.get(id);
                let deltas = Deltas::diff(
                    before.map(|o| &o.data),
                    after.as_ref().map(|o| &o.data),
                );
                if deltas.is_empty() {
                    continue;
                }
                if let Some(meta) = after.as_ref().or(before) {
                    changes.push((deltas, meta.clone()));
                }
            }
        }

        // A failing store aborts the commit before anything is published.
        if let Some(store) = &self.store {
            for (id, after) in &working {
                match after {
                    Some(object) => persistence::save_object(store.as_ref(), object)?,
                    None => persistence::delete_object(store.as_ref(), id)?,
                }
            }
            for id in &forgotten {
                persistence::delete_object(store.as_ref(), id)?;
            }
        }

        {
            let mut objects = self.objects_write();
            for (id, after) in working {
                match after {
                    Some(object) => {
                        objects.insert(id, object);
                    }
                    None => {
                        objects.remove(&id);
                    }
                }
            }
            for id in &forgotten {
                objects.remove(id);
            }
        }

        let mut all = Deltas::default();
        let mut outgoing: BTreeMap<NetMeshBaseIdentifier, Deltas> = BTreeMap::new();
        for (deltas, meta) in &changes {
            for target in Self::targets(meta, origin) {
                outgoing.entry(target).or_default().extend(deltas.clone());
            }
            all.extend(deltas.clone());
        }
        let deleted: BTreeSet<MeshObjectIdentifier> = all.deletions.iter().cloned().collect();
        for (target, mut deltas) in outgoing {
            deltas.drop_neighbor_removals_of(&deleted);
            let conveyed = self.convey_related(&target, &deltas);
            if deltas.is_empty() && conveyed.is_empty() {
                continue;
            }
            let mut message = XprisoMessage::new(self.identifier.clone(), target.clone());
            message.deltas = deltas;
            message.conveyed_objects = conveyed;
            if let Err(e) = self.proxy_for(&target).send(message) {
                warn!("Failed to queue changes for {}: {}", target, e);
            }
        }

        self.notify_listeners(&changes);

        if !all.is_empty() {
            debug!(
                "Committed changes to {} object(s) on {}",
                changes.len(),
                self.identifier
            );
        }
        Ok(all)
    }

    /// Nodes the changes of an object go to.
    fn targets(meta: &NetMeshObject, origin: &Origin) -> BTreeSet<NetMeshBaseIdentifier> {
        let mut targets = match (&meta.proxy_towards_home, origin) {
            (None, _) => meta.proxies.clone(),
            (Some(home), Origin::Local) => BTreeSet::from([home.clone()]),
            (Some(_), Origin::Remote(_)) => BTreeSet::new(),
        };
        if let Origin::Remote(sender) = origin {
            targets.remove(sender);
        }
        targets
    }

    /// Full replicas of objects homed here that `target` is about to be
    /// related to without holding them. `target` becomes one of their
    /// replica holders.
    fn convey_related(&self, target: &NetMeshBaseIdentifier, deltas: &Deltas) -> Vec<MeshObjectData> {
        let mut conveyed = Vec::new();
        let mut objects = self.objects_write();
        for change in &deltas.neighbor_additions {
            if change.neighbor.base() != &self.identifier {
                continue;
            }
            let Some(neighbor) = objects.get_mut(&change.neighbor) else {
                continue;
            };
            if !neighbor.is_home_replica() || !neighbor.proxies.insert(target.clone()) {
                continue;
            }
            conveyed.push(neighbor.data.clone());
            if let Some(store) = &self.store {
                if let Err(e) = persistence::save_object(store.as_ref(), neighbor) {
                    warn!("Failed to persist {}: {}", change.neighbor, e);
                }
            }
        }
        conveyed
    }

    fn notify_listeners(&self, changes: &[(Deltas, NetMeshObject)]) {
        let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner()).clone();
        if listeners.is_empty() {
            return;
        }
        for (deltas, meta) in changes {
            if let Some(registered) = listeners.get(meta.identifier()) {
                for listener in registered {
                    listener.object_changed(meta.identifier(), deltas);
                }
            }
        }
    }

    // ── Proxies ─────────────────────────────────────────────────

    pub(crate) fn find_proxy(&self, partner: &NetMeshBaseIdentifier) -> Option<Arc<Proxy>> {
        self.proxies_read()
            .get(partner)
            .filter(|p| !p.is_dead())
            .cloned()
    }

    /// Returns the live proxy towards `partner`, creating it if needed.
    pub(crate) fn proxy_for(self: &Arc<Self>, partner: &NetMeshBaseIdentifier) -> Arc<Proxy> {
        if let Some(proxy) = self.find_proxy(partner) {
            return proxy;
        }
        let mut proxies = self.proxies_write();
        if let Some(proxy) = proxies.get(partner).filter(|p| !p.is_dead()) {
            return proxy.clone();
        }
        let proxy = Proxy::spawn(
            Arc::downgrade(self),
            self.transport.clone(),
            self.config.endpoint_kind,
            self.config.endpoint.clone(),
            partner.clone(),
            self.config.default_coherence.clone(),
        );
        proxies.insert(partner.clone(), proxy.clone());
        debug!("Created proxy {} -> {}", self.identifier, partner);
        proxy
    }

    pub(crate) async fn obtain_proxy(
        self: &Arc<Self>,
        partner: &NetMeshBaseIdentifier,
        coherence: Option<CoherenceSpecification>,
    ) -> MeshResult<Arc<Proxy>> {
        if self.is_closed() {
            return Err(MeshError::Closed);
        }
        if partner == &self.identifier {
            return Err(MeshError::Protocol(format!(
                "{partner} cannot have a proxy towards itself"
            )));
        }
        let existing = self.find_proxy(partner);
        if existing.is_none() {
            if let Some(hook) = &self.obtain_hook {
                hook.before_obtain(partner, coherence.as_ref()).await?;
            }
        }
        let proxy = existing.unwrap_or_else(|| self.proxy_for(partner));
        if let Some(coherence) = coherence {
            proxy.set_coherence(coherence);
        }
        Ok(proxy)
    }

    pub(crate) fn remove_proxy(&self, partner: &NetMeshBaseIdentifier) -> Option<Arc<Proxy>> {
        let removed = self.proxies_write().remove(partner);
        if let Some(store) = &self.store {
            if let Err(e) = persistence::delete_proxy(store.as_ref(), partner) {
                warn!("Failed to delete persisted proxy {}: {}", partner, e);
            }
        }
        removed
    }

    /// Removes every trace of `partner` from the objects' metadata.
    pub(crate) async fn forget_partner(self: &Arc<Self>, partner: &NetMeshBaseIdentifier) -> MeshResult<()> {
        let affected: Vec<MeshObjectIdentifier> = self
            .objects_read()
            .values()
            .filter(|o| o.proxies.contains(partner) || o.lock_location.as_ref() == Some(partner))
            .map(|o| o.identifier().clone())
            .collect();
        if affected.is_empty() {
            return Ok(());
        }

        let mut tx = self.begin(Origin::Remote(partner.clone())).await;
        for id in &affected {
            if let Some(object) = tx.load(id) {
                object.proxies.remove(partner);
                if object.lock_location.as_ref() == Some(partner) {
                    warn!("Reclaiming lock of {} from departed {}", id, partner);
                    object.lock_location = None;
                    object.has_lock = true;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Drops replicas locally and tells their homes. Lock holders hand the
    /// lock back first.
    ///
    /// With `only_unchanged`, replicas that changed since the caller looked
    /// at them are kept. Returns the identifiers of the replicas dropped.
    pub(crate) async fn purge(
        self: &Arc<Self>,
        replicas: Vec<NetMeshObject>,
        only_unchanged: bool,
    ) -> MeshResult<Vec<MeshObjectIdentifier>> {
        if replicas.is_empty() {
            return Ok(Vec::new());
        }
        let replicas: Vec<NetMeshObject> = {
            let mut tx = self.begin(Origin::Local).await;
            let mut selected = Vec::new();
            for replica in replicas {
                match tx.get(replica.identifier()) {
                    Some(current) if !only_unchanged || current == replica => selected.push(current),
                    _ => {}
                }
            }
            for replica in &selected {
                tx.forget(replica.identifier());
            }
            tx.commit()?;
            selected
        };
        let purged: Vec<MeshObjectIdentifier> =
            replicas.iter().map(|r| r.identifier().clone()).collect();

        let mut by_home: BTreeMap<NetMeshBaseIdentifier, XprisoMessage> = BTreeMap::new();
        for replica in replicas {
            let Some(home) = replica.proxy_towards_home.clone() else {
                continue;
            };
            let message = by_home
                .entry(home.clone())
                .or_insert_with(|| XprisoMessage::new(self.identifier.clone(), home));
            if replica.has_lock {
                message.conveyed_objects.push(replica.data.clone());
                message.push_lock_objects.push(replica.identifier().clone());
            }
            message.requested_canceled_objects.push(replica.identifier().clone());
        }
        for (home, message) in by_home {
            if let Err(e) = self.proxy_for(&home).send(message) {
                warn!("Failed to cancel replicas at {}: {}", home, e);
            }
        }
        Ok(purged)
    }

    async fn receive_loop(base: Weak<BaseInner>, transport: Arc<dyn Transport>) {
        while let Some(packet) = transport.recv().await {
            let Some(base) = base.upgrade() else { break };
            if packet.receiver != base.identifier {
                warn!(
                    "{} dropping packet addressed to {}",
                    base.identifier, packet.receiver
                );
                continue;
            }
            if base.is_closed() {
                break;
            }
            let proxy = match base.find_proxy(&packet.sender) {
                Some(proxy) => proxy,
                // Token chatter from a partner we no longer talk to.
                None if packet.is_empty() => {
                    trace!("{} ignoring empty packet from {}", base.identifier, packet.sender);
                    continue;
                }
                None => base.proxy_for(&packet.sender),
            };
            proxy.deliver(packet);
        }
    }
}

impl Drop for BaseInner {
    fn drop(&mut self) {
        if let Some(task) = self.receive_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

/// Builder for [`NetMeshBase`].
pub struct NetMeshBaseBuilder {
    transport: Arc<dyn Transport>,
    config: MeshBaseConfig,
    store: Option<Arc<dyn Store>>,
    obtain_hook: Option<Arc<dyn ProxyObtainHook>>,
}

impl NetMeshBaseBuilder {
    #[must_use]
    pub fn config(mut self, config: MeshBaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Persists objects and proxies in `store`, restoring them on open.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn obtain_hook(mut self, hook: Arc<dyn ProxyObtainHook>) -> Self {
        self.obtain_hook = Some(hook);
        self
    }

    /// Opens the base and starts receiving. Must be called within a tokio
    /// runtime.
    pub fn open(self) -> MeshResult<NetMeshBase> {
        let identifier = self.transport.local_identifier().clone();
        let now = now_millis();

        let mut objects = HashMap::new();
        let mut proxies = Vec::new();
        if let Some(store) = &self.store {
            for object in persistence::load_objects(store.as_ref())? {
                objects.insert(object.identifier().clone(), object);
            }
            proxies = persistence::load_proxies(store.as_ref())?;
        }

        let home_id = MeshObjectIdentifier::home_object(identifier.clone());
        if !objects.contains_key(&home_id) {
            let home = NetMeshObject::new_home(MeshObjectData::new(home_id.clone(), now), now);
            if let Some(store) = &self.store {
                persistence::save_object(store.as_ref(), &home)?;
            }
            objects.insert(home_id, home);
        }

        let clock = objects
            .values()
            .flat_map(|o| o.data.properties.values())
            .map(|slot| slot.stamp.token)
            .max()
            .unwrap_or(0);

        let object_count = objects.len();
        let inner = Arc::new(BaseInner {
            identifier: identifier.clone(),
            config: self.config,
            transport: self.transport.clone(),
            objects: RwLock::new(objects),
            writer: tokio::sync::Mutex::new(()),
            proxies: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(clock),
            store: self.store,
            obtain_hook: self.obtain_hook,
            lock_claims: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            receive_task: Mutex::new(None),
        });

        let proxy_count = proxies.len();
        for data in proxies {
            let partner = data.partner.clone();
            let proxy = Proxy::restore(
                Arc::downgrade(&inner),
                inner.transport.clone(),
                inner.config.endpoint.clone(),
                data,
            );
            inner.proxies_write().insert(partner, proxy);
        }

        let task = tokio::spawn(BaseInner::receive_loop(
            Arc::downgrade(&inner),
            self.transport,
        ));
        *inner.receive_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);

        info!(
            "Opened NetMeshBase {} with {} object(s) and {} proxy(ies)",
            identifier, object_count, proxy_count
        );
        Ok(NetMeshBase { inner })
    }
}

/// A node's graph of MeshObjects.
///
/// Cloning yields another handle to the same base.
#[derive(Clone)]
pub struct NetMeshBase {
    pub(crate) inner: Arc<BaseInner>,
}

/// A handle that does not keep the base alive.
#[derive(Clone)]
pub struct WeakNetMeshBase {
    inner: Weak<BaseInner>,
}

impl WeakNetMeshBase {
    #[must_use]
    pub fn upgrade(&self) -> Option<NetMeshBase> {
        self.inner.upgrade().map(|inner| NetMeshBase { inner })
    }
}

impl NetMeshBase {
    /// Starts building a base that communicates over `transport`. The base
    /// takes the transport's identifier.
    pub fn builder(transport: Arc<dyn Transport>) -> NetMeshBaseBuilder {
        NetMeshBaseBuilder {
            transport,
            config: MeshBaseConfig::default(),
            store: None,
            obtain_hook: None,
        }
    }

    #[must_use]
    pub fn identifier(&self) -> &NetMeshBaseIdentifier {
        &self.inner.identifier
    }

    #[must_use]
    pub fn config(&self) -> &MeshBaseConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakNetMeshBase {
        WeakNetMeshBase {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Identifier of this base's home object.
    #[must_use]
    pub fn home_object_identifier(&self) -> MeshObjectIdentifier {
        MeshObjectIdentifier::home_object(self.inner.identifier.clone())
    }

    /// Returns the local replica, if resident.
    #[must_use]
    pub fn find_locally(&self, id: &MeshObjectIdentifier) -> Option<NetMeshObject> {
        self.inner.read(id)
    }

    /// Number of resident objects, the home object included.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.inner.objects_read().len()
    }

    /// Identifiers of all resident objects, sorted.
    #[must_use]
    pub fn identifiers(&self) -> Vec<MeshObjectIdentifier> {
        let mut ids: Vec<_> = self.inner.objects_read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns the object, fetching a replica from its home if needed.
    pub async fn access_locally(&self, id: &MeshObjectIdentifier) -> MeshResult<NetMeshObject> {
        let mut found = self.access_locally_many(std::slice::from_ref(id)).await?;
        found.pop().ok_or_else(|| MeshError::NotFound(id.clone()))
    }

    /// Returns the objects, fetching replicas from their homes as needed.
    ///
    /// Fails with [`MeshError::Access`] if any object cannot be obtained;
    /// the error carries the objects that could.
    pub async fn access_locally_many(
        &self,
        ids: &[MeshObjectIdentifier],
    ) -> MeshResult<Vec<NetMeshObject>> {
        let mut wanted: BTreeMap<NetMeshBaseIdentifier, Vec<MeshObjectIdentifier>> = BTreeMap::new();
        {
            let objects = self.inner.objects_read();
            for id in ids {
                if !objects.contains_key(id) && id.base() != &self.inner.identifier {
                    wanted.entry(id.base().clone()).or_default().push(id.clone());
                }
            }
        }

        let requests = wanted.into_iter().map(|(home, objects)| {
            let inner = self.inner.clone();
            async move {
                if let Err(e) = inner.request_replicas(&home, objects).await {
                    debug!("Requesting replicas from {} failed: {}", home, e);
                }
            }
        });
        futures::future::join_all(requests).await;

        let mut found = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.inner.read(id) {
                Some(object) => found.push(object),
                None => missing.push(id.clone()),
            }
        }
        if missing.is_empty() {
            Ok(found)
        } else {
            Err(MeshError::Access {
                missing,
                partial: found,
            })
        }
    }

    /// Opens a transaction, waiting for the current writer to finish.
    pub async fn begin_transaction(&self) -> Transaction<'_> {
        self.inner.begin(Origin::Local).await
    }

    /// Obtains the locks of `ids`, then opens a transaction.
    pub async fn begin_transaction_with_locks(
        &self,
        ids: &[MeshObjectIdentifier],
    ) -> MeshResult<Transaction<'_>> {
        for id in ids {
            self.try_obtain_lock(id).await?;
        }
        let mut tx = self.inner.begin(Origin::Local).await;
        for id in ids {
            // The lock may have been granted away in between.
            if !tx.get(id).is_some_and(|o| o.has_lock) {
                return Err(MeshError::NotPermitted(id.clone()));
            }
        }
        Ok(tx)
    }

    /// Obtains the write lock for a resident object.
    pub async fn try_obtain_lock(&self, id: &MeshObjectIdentifier) -> MeshResult<()> {
        self.inner.try_obtain_lock(id).await
    }

    /// Returns the proxy towards `partner`, creating it if needed.
    pub async fn obtain_proxy_for(
        &self,
        partner: &NetMeshBaseIdentifier,
        coherence: Option<CoherenceSpecification>,
    ) -> MeshResult<Arc<Proxy>> {
        self.inner.obtain_proxy(partner, coherence).await
    }

    #[must_use]
    pub fn find_proxy(&self, partner: &NetMeshBaseIdentifier) -> Option<Arc<Proxy>> {
        self.inner.find_proxy(partner)
    }

    /// All live proxies, sorted by partner.
    #[must_use]
    pub fn proxies(&self) -> Vec<Arc<Proxy>> {
        let mut proxies: Vec<_> = self
            .inner
            .proxies_read()
            .values()
            .filter(|p| !p.is_dead())
            .cloned()
            .collect();
        proxies.sort_by(|a, b| a.partner().cmp(b.partner()));
        proxies
    }

    #[must_use]
    pub fn proxy_summaries(&self) -> Vec<ProxySummary> {
        self.proxies()
            .iter()
            .map(|p| ProxySummary {
                partner: p.partner().clone(),
                status: p.status(),
                queued_messages: p.queued_messages(),
                coherence: p.coherence(),
            })
            .collect()
    }

    /// Re-fetches the full state of a replica from its home.
    pub async fn resynchronize(&self, id: &MeshObjectIdentifier) -> MeshResult<NetMeshObject> {
        let object = self
            .inner
            .find(id)
            .ok_or_else(|| MeshError::NotFound(id.clone()))?;
        let Some(home) = object.proxy_towards_home.clone() else {
            return Ok(object);
        };

        let proxy = self.inner.obtain_proxy(&home, None).await?;
        let mut request = XprisoMessage::new(self.inner.identifier.clone(), home);
        request.requested_resynchronize.push(id.clone());
        let response = proxy.request(request, self.inner.config.access_timeout).await?;

        if response.unknown_objects.contains(id) {
            let mut tx = self.inner.begin(Origin::Local).await;
            tx.forget(id);
            tx.commit()?;
            return Err(MeshError::NotFound(id.clone()));
        }
        self.inner
            .read(id)
            .ok_or_else(|| MeshError::NotFound(id.clone()))
    }

    /// Drops a replica and tells its home to stop sending its changes.
    pub async fn purge_replica(&self, id: &MeshObjectIdentifier) -> MeshResult<()> {
        let object = self
            .inner
            .find(id)
            .ok_or_else(|| MeshError::NotFound(id.clone()))?;
        if object.is_home_replica() {
            return Err(MeshError::NotPermitted(id.clone()));
        }
        self.inner.purge(vec![object], false).await?;
        Ok(())
    }

    /// Says goodbye to `partner` and tears down the proxy.
    pub async fn kill_proxy(&self, partner: &NetMeshBaseIdentifier) -> MeshResult<()> {
        let Some(proxy) = self.inner.remove_proxy(partner) else {
            return Ok(());
        };

        let mut farewell = XprisoMessage::new(self.inner.identifier.clone(), partner.clone());
        farewell.cease_communications = true;
        if proxy.send(farewell).is_ok() {
            let deadline = tokio::time::Instant::now() + self.inner.config.cease_timeout;
            while !proxy.local_endpoint_queue().is_empty() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        proxy.die();
        info!("Killed proxy {} -> {}", self.inner.identifier, partner);
        self.inner.forget_partner(partner).await
    }

    /// Registers a listener for an object's committed changes.
    pub fn add_listener(&self, id: &MeshObjectIdentifier, listener: Arc<dyn MeshObjectListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(id.clone())
            .or_default()
            .push(listener);
    }

    /// Unregisters a listener. Returns false if it was not registered.
    pub fn remove_listener(&self, id: &MeshObjectIdentifier, listener: &Arc<dyn MeshObjectListener>) -> bool {
        let mut listeners = self.inner.listeners.write().unwrap_or_else(|e| e.into_inner());
        let Some(registered) = listeners.get_mut(id) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|l| !Arc::ptr_eq(l, listener));
        let removed = registered.len() != before;
        if registered.is_empty() {
            listeners.remove(id);
        }
        removed
    }

    #[must_use]
    pub fn has_listeners(&self, id: &MeshObjectIdentifier) -> bool {
        self.inner.has_listeners(id)
    }

    /// Writes the externalized proxies to the store, if any.
    pub fn persist_proxies(&self) -> MeshResult<()> {
        let Some(store) = &self.inner.store else {
            return Ok(());
        };
        for proxy in self.proxies() {
            persistence::save_proxy(store.as_ref(), &proxy.externalize())?;
        }
        Ok(())
    }

    /// Persists the proxies and stops communicating.
    pub async fn close(&self) -> MeshResult<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let persisted = self.persist_proxies();
        let proxies: Vec<Arc<Proxy>> = self.inner.proxies_write().drain().map(|(_, p)| p).collect();
        for proxy in proxies {
            proxy.die();
        }
        if let Some(task) = self.inner.receive_task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        self.inner.transport.shutdown().await;
        info!("Closed NetMeshBase {}", self.inner.identifier);
        persisted
    }
}

impl BaseInner {
    /// Asks `home` for replicas of `objects` and waits for the answer.
    pub(crate) async fn request_replicas(
        self: &Arc<Self>,
        home: &NetMeshBaseIdentifier,
        objects: Vec<MeshObjectIdentifier>,
    ) -> MeshResult<XprisoMessage> {
        let proxy = self.obtain_proxy(home, None).await?;
        proxy.transition(ProxyStatus::Uninitialized, ProxyStatus::AwaitingInitialSync);

        let mut request = XprisoMessage::new(self.identifier.clone(), home.clone());
        request.requested_first_time_objects = objects;
        proxy.request(request, self.config.access_timeout).await
    }
}
