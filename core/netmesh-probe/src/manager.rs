//! Probe managers.
//!
//! A probe manager owns the shadow bases of a node. It creates a shadow the
//! first time a resource is asked for, runs its Probe right away, and hands
//! out the same shadow afterwards. The [`PassiveProbeManager`] does nothing
//! on its own; the [`ScheduledProbeManager`] re-runs Probes as their
//! coherence specifications demand and retires shadows nobody needs.

use crate::{Fetcher, ProbeDirectory, ProbeError, ProbeResult, ShadowMeshBase};
use async_trait::async_trait;
use netmesh_comm::MemoryNetwork;
use netmesh_core::MeshBaseConfig;
use netmesh_types::{now_millis, CoherenceSpecification, NetMeshBaseIdentifier};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration of a probe manager.
#[derive(Debug, Clone)]
pub struct ProbeManagerConfig {
    /// How long a shadow without partners is kept; `None` keeps it forever.
    pub time_not_needed_till_expires: Option<Duration>,
    /// How often the scheduled manager looks for expired shadows.
    pub expiry_check_interval: Duration,
    /// Coherence of shadows obtained without one.
    pub default_coherence: Option<CoherenceSpecification>,
    /// Configuration of the shadow bases.
    pub shadow: MeshBaseConfig,
}

impl Default for ProbeManagerConfig {
    fn default() -> Self {
        Self {
            time_not_needed_till_expires: Some(Duration::from_secs(10 * 60)),
            expiry_check_interval: Duration::from_secs(30),
            default_coherence: Some(CoherenceSpecification::default()),
            shadow: MeshBaseConfig::default(),
        }
    }
}

/// Keyed cache of shadow bases.
#[async_trait]
pub trait ProbeManager: Send + Sync {
    /// The in-process network the shadows are attached to.
    fn network(&self) -> &MemoryNetwork;

    /// Whether `id` names a resource this manager can shadow.
    fn manages(&self, id: &NetMeshBaseIdentifier) -> bool;

    /// Returns the shadow of `id`, creating it and running its Probe first
    /// if there is none. A shadow whose first run fails is not kept.
    async fn obtain_for(
        &self,
        id: &NetMeshBaseIdentifier,
        coherence: Option<CoherenceSpecification>,
    ) -> ProbeResult<Arc<ShadowMeshBase>>;

    fn get(&self, id: &NetMeshBaseIdentifier) -> Option<Arc<ShadowMeshBase>>;

    /// Identifiers of all current shadows, sorted.
    fn shadow_identifiers(&self) -> Vec<NetMeshBaseIdentifier>;

    /// Re-runs the Probe of an existing shadow.
    async fn update_now(&self, id: &NetMeshBaseIdentifier) -> ProbeResult<Option<Duration>>;

    /// Closes and forgets a shadow. Returns whether there was one.
    async fn remove(&self, id: &NetMeshBaseIdentifier) -> bool;

    /// Removes the shadows that have had no partners for longer than
    /// allowed. Returns their identifiers.
    async fn expire_unneeded(&self) -> Vec<NetMeshBaseIdentifier>;
}

/// State shared by both managers.
struct ManagerCore {
    config: ProbeManagerConfig,
    network: MemoryNetwork,
    fetcher: Arc<dyn Fetcher>,
    probes: ProbeDirectory,
    shadows: RwLock<HashMap<NetMeshBaseIdentifier, Arc<ShadowMeshBase>>>,
    /// Serializes shadow creation.
    creating: tokio::sync::Mutex<()>,
}

impl ManagerCore {
    fn new(config: ProbeManagerConfig, fetcher: Arc<dyn Fetcher>, probes: ProbeDirectory) -> Self {
        Self {
            config,
            network: MemoryNetwork::new(),
            fetcher,
            probes,
            shadows: RwLock::new(HashMap::new()),
            creating: tokio::sync::Mutex::new(()),
        }
    }

    fn get(&self, id: &NetMeshBaseIdentifier) -> Option<Arc<ShadowMeshBase>> {
        self.shadows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    fn manages(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.get(id).is_some() || self.fetcher.supports(id)
    }

    fn shadow_identifiers(&self) -> Vec<NetMeshBaseIdentifier> {
        let mut ids: Vec<_> = self
            .shadows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Returns the shadow and whether it was just created.
    async fn obtain_for(
        &self,
        id: &NetMeshBaseIdentifier,
        coherence: Option<CoherenceSpecification>,
    ) -> ProbeResult<(Arc<ShadowMeshBase>, bool)> {
        if let Some(shadow) = self.get(id) {
            if coherence.is_some() {
                shadow.set_coherence(coherence);
            }
            return Ok((shadow, false));
        }

        let _creating = self.creating.lock().await;
        if let Some(shadow) = self.get(id) {
            return Ok((shadow, false));
        }
        if !self.fetcher.supports(id) {
            return Err(ProbeError::NotProbeManaged(id.to_string()));
        }

        let shadow = Arc::new(ShadowMeshBase::open(
            id.clone(),
            &self.network,
            self.config.shadow.clone(),
            self.fetcher.clone(),
            self.probes.clone(),
            coherence.or_else(|| self.config.default_coherence.clone()),
        )?);
        if let Err(e) = shadow.do_update_now().await {
            if let Err(close_err) = shadow.close().await {
                debug!("Closing failed shadow {} failed: {}", id, close_err);
            }
            return Err(e);
        }

        self.shadows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), shadow.clone());
        info!("Created shadow {}", id);
        Ok((shadow, true))
    }

    async fn update_now(&self, id: &NetMeshBaseIdentifier) -> ProbeResult<Option<Duration>> {
        let shadow = self
            .get(id)
            .ok_or_else(|| ProbeError::NotFound(id.to_string()))?;
        shadow.do_update_now().await
    }

    async fn remove(&self, id: &NetMeshBaseIdentifier) -> bool {
        let removed = self
            .shadows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        match removed {
            Some(shadow) => {
                if let Err(e) = shadow.close().await {
                    warn!("Failed to close shadow {}: {}", id, e);
                }
                true
            }
            None => false,
        }
    }

    async fn expire_unneeded(&self) -> Vec<NetMeshBaseIdentifier> {
        let now = now_millis();
        let shadows: Vec<Arc<ShadowMeshBase>> = self
            .shadows
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        let mut expired = Vec::new();
        for shadow in shadows {
            let unneeded_for = shadow.track_needed(now);
            let Some(ttl) = self.config.time_not_needed_till_expires else {
                continue;
            };
            if unneeded_for.is_some_and(|d| d >= ttl) {
                expired.push(shadow.resource().clone());
            }
        }

        for id in &expired {
            self.remove(id).await;
            info!("Expired unneeded shadow {}", id);
        }
        expired.sort();
        expired
    }
}

/// A probe manager that only runs Probes when asked to.
pub struct PassiveProbeManager {
    core: ManagerCore,
}

impl PassiveProbeManager {
    #[must_use]
    pub fn new(config: ProbeManagerConfig, fetcher: Arc<dyn Fetcher>, probes: ProbeDirectory) -> Self {
        Self {
            core: ManagerCore::new(config, fetcher, probes),
        }
    }
}

#[async_trait]
impl ProbeManager for PassiveProbeManager {
    fn network(&self) -> &MemoryNetwork {
        &self.core.network
    }

    fn manages(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.core.manages(id)
    }

    async fn obtain_for(
        &self,
        id: &NetMeshBaseIdentifier,
        coherence: Option<CoherenceSpecification>,
    ) -> ProbeResult<Arc<ShadowMeshBase>> {
        self.core
            .obtain_for(id, coherence)
            .await
            .map(|(shadow, _)| shadow)
    }

    fn get(&self, id: &NetMeshBaseIdentifier) -> Option<Arc<ShadowMeshBase>> {
        self.core.get(id)
    }

    fn shadow_identifiers(&self) -> Vec<NetMeshBaseIdentifier> {
        self.core.shadow_identifiers()
    }

    async fn update_now(&self, id: &NetMeshBaseIdentifier) -> ProbeResult<Option<Duration>> {
        self.core.update_now(id).await
    }

    async fn remove(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.core.remove(id).await
    }

    async fn expire_unneeded(&self) -> Vec<NetMeshBaseIdentifier> {
        self.core.expire_unneeded().await
    }
}

/// A probe manager that re-runs Probes on schedule and expires unneeded
/// shadows periodically.
pub struct ScheduledProbeManager {
    core: ManagerCore,
    runs: std::sync::Mutex<HashMap<NetMeshBaseIdentifier, JoinHandle<()>>>,
    expiry_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledProbeManager {
    /// Creates the manager and starts its expiry loop. Must be called within
    /// a tokio runtime.
    pub fn start(
        config: ProbeManagerConfig,
        fetcher: Arc<dyn Fetcher>,
        probes: ProbeDirectory,
    ) -> Arc<Self> {
        let interval = config.expiry_check_interval;
        let manager = Arc::new(Self {
            core: ManagerCore::new(config, fetcher, probes),
            runs: std::sync::Mutex::new(HashMap::new()),
            expiry_task: std::sync::Mutex::new(None),
        });

        let weak = Arc::downgrade(&manager);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.expire_unneeded().await;
            }
        });
        *manager
            .expiry_task
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(task);
        manager
    }

    /// Whether a re-run is scheduled for `id`.
    #[must_use]
    pub fn is_scheduled(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .is_some_and(|task| !task.is_finished())
    }

    fn schedule(&self, shadow: &Arc<ShadowMeshBase>, first: Duration) {
        let weak: Weak<ShadowMeshBase> = Arc::downgrade(shadow);
        let task = tokio::spawn(async move {
            let mut delay = first;
            loop {
                tokio::time::sleep(delay).await;
                let Some(shadow) = weak.upgrade() else {
                    break;
                };
                match shadow.do_update_now().await {
                    Ok(Some(next)) => delay = next,
                    Ok(None) => break,
                    // Keep the previous delay and try again.
                    Err(_) => {}
                }
            }
        });
        let previous = self
            .runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(shadow.resource().clone(), task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn unschedule(&self, id: &NetMeshBaseIdentifier) {
        if let Some(task) = self
            .runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
        {
            task.abort();
        }
    }
}

#[async_trait]
impl ProbeManager for ScheduledProbeManager {
    fn network(&self) -> &MemoryNetwork {
        &self.core.network
    }

    fn manages(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.core.manages(id)
    }

    async fn obtain_for(
        &self,
        id: &NetMeshBaseIdentifier,
        coherence: Option<CoherenceSpecification>,
    ) -> ProbeResult<Arc<ShadowMeshBase>> {
        let (shadow, created) = self.core.obtain_for(id, coherence).await?;
        if let (true, Some(delay)) = (created, shadow.status().delay) {
            self.schedule(&shadow, delay);
        }
        Ok(shadow)
    }

    fn get(&self, id: &NetMeshBaseIdentifier) -> Option<Arc<ShadowMeshBase>> {
        self.core.get(id)
    }

    fn shadow_identifiers(&self) -> Vec<NetMeshBaseIdentifier> {
        self.core.shadow_identifiers()
    }

    async fn update_now(&self, id: &NetMeshBaseIdentifier) -> ProbeResult<Option<Duration>> {
        let delay = self.core.update_now(id).await?;
        if let (Some(delay), Some(shadow)) = (delay, self.core.get(id)) {
            self.schedule(&shadow, delay);
        }
        Ok(delay)
    }

    async fn remove(&self, id: &NetMeshBaseIdentifier) -> bool {
        self.unschedule(id);
        self.core.remove(id).await
    }

    async fn expire_unneeded(&self) -> Vec<NetMeshBaseIdentifier> {
        let expired = self.core.expire_unneeded().await;
        for id in &expired {
            self.unschedule(id);
        }
        expired
    }
}

impl Drop for ScheduledProbeManager {
    fn drop(&mut self) {
        if let Some(task) = self
            .expiry_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        for (_, task) in self
            .runs
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
        {
            task.abort();
        }
    }
}
