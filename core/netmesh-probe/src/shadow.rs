//! Shadow bases.
//!
//! A [`ShadowMeshBase`] is an ordinary NetMeshBase that stands in for an
//! external resource. It takes the resource's identifier, is home to every
//! object the resource's Probe produces, and serves replicas to partners
//! like any other node. Each Probe run is diffed into it in a single
//! transaction, so partners only ever see complete runs.

use crate::{Fetcher, ProbeDirectory, ProbeResult, StagingMeshBase};
use netmesh_comm::MemoryNetwork;
use netmesh_core::{MeshBaseConfig, NetMeshBase};
use netmesh_types::{now_millis, CoherenceSpecification, MeshObjectIdentifier, NetMeshBaseIdentifier};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bookkeeping of past runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShadowStatus {
    pub runs: u64,
    pub failures: u64,
    /// When the last run started, in milliseconds since the epoch.
    pub last_run: Option<u64>,
    pub last_success: Option<u64>,
    /// Error of the last run, if it failed.
    pub current_problem: Option<String>,
    /// Delay chosen after the last successful run.
    #[serde(skip)]
    pub delay: Option<Duration>,
    /// Since when no partner has held a replica of the shadow's objects.
    pub unneeded_since: Option<u64>,
}

pub struct ShadowMeshBase {
    resource: NetMeshBaseIdentifier,
    base: NetMeshBase,
    network: MemoryNetwork,
    fetcher: Arc<dyn Fetcher>,
    probes: ProbeDirectory,
    coherence: Mutex<Option<CoherenceSpecification>>,
    status: Mutex<ShadowStatus>,
    /// Serializes runs.
    running: tokio::sync::Mutex<()>,
}

impl ShadowMeshBase {
    /// Creates an empty shadow for `resource`, attached to `network`.
    pub fn open(
        resource: NetMeshBaseIdentifier,
        network: &MemoryNetwork,
        config: MeshBaseConfig,
        fetcher: Arc<dyn Fetcher>,
        probes: ProbeDirectory,
        coherence: Option<CoherenceSpecification>,
    ) -> ProbeResult<Self> {
        let transport = Arc::new(network.attach(resource.clone()));
        let base = match NetMeshBase::builder(transport).config(config).open() {
            Ok(base) => base,
            Err(e) => {
                network.detach(&resource);
                return Err(e.into());
            }
        };
        Ok(Self {
            resource,
            base,
            network: network.clone(),
            fetcher,
            probes,
            coherence: Mutex::new(coherence),
            status: Mutex::new(ShadowStatus::default()),
            running: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn resource(&self) -> &NetMeshBaseIdentifier {
        &self.resource
    }

    /// The base holding the last successfully probed content.
    #[must_use]
    pub fn base(&self) -> &NetMeshBase {
        &self.base
    }

    #[must_use]
    pub fn coherence(&self) -> Option<CoherenceSpecification> {
        lock(&self.coherence).clone()
    }

    pub fn set_coherence(&self, coherence: Option<CoherenceSpecification>) {
        *lock(&self.coherence) = coherence;
    }

    #[must_use]
    pub fn status(&self) -> ShadowStatus {
        lock(&self.status).clone()
    }

    /// Error of the last run, if it failed.
    #[must_use]
    pub fn current_problem(&self) -> Option<String> {
        lock(&self.status).current_problem.clone()
    }

    /// Whether any partner still holds a replica of one of the shadow's
    /// objects. An idle proxy does not count.
    #[must_use]
    pub fn is_needed(&self) -> bool {
        self.base
            .identifiers()
            .iter()
            .filter_map(|id| self.base.find_locally(id))
            .any(|object| !object.proxies.is_empty())
    }

    /// Records whether the shadow is needed at `now` and returns for how
    /// long it has not been, if at all.
    pub fn track_needed(&self, now: u64) -> Option<Duration> {
        let needed = self.is_needed();
        let mut status = lock(&self.status);
        if needed {
            status.unneeded_since = None;
            None
        } else {
            let since = *status.unneeded_since.get_or_insert(now);
            Some(Duration::from_millis(now.saturating_sub(since)))
        }
    }

    /// Runs the Probe now and applies its result.
    ///
    /// Returns the delay until the next run according to the coherence
    /// specification, `None` if the shadow should not be re-run. On failure
    /// the content from the previous run stays in place.
    pub async fn do_update_now(&self) -> ProbeResult<Option<Duration>> {
        let _running = self.running.lock().await;
        let started = now_millis();
        lock(&self.status).last_run = Some(started);

        match self.run().await {
            Ok(changed) => {
                let coherence = self.coherence();
                let mut status = lock(&self.status);
                let delay = coherence
                    .as_ref()
                    .and_then(|c| c.next_delay(status.delay, changed));
                status.runs += 1;
                status.last_success = Some(started);
                status.current_problem = None;
                status.delay = delay;
                debug!(
                    "Probed {} (changed: {}), next run in {:?}",
                    self.resource, changed, delay
                );
                Ok(delay)
            }
            Err(e) => {
                warn!("Probe run for {} failed: {}", self.resource, e);
                let mut status = lock(&self.status);
                status.runs += 1;
                status.failures += 1;
                status.current_problem = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Fetches, probes and applies. Returns whether anything changed.
    async fn run(&self) -> ProbeResult<bool> {
        let fetched = self.fetcher.fetch(&self.resource).await?;
        let probe = self.probes.probe_for(fetched.content_type.as_deref())?;

        let mut staging = StagingMeshBase::new(self.resource.clone());
        let coherence = self.coherence();
        probe.read(
            &self.resource,
            coherence.as_ref(),
            &fetched.bytes,
            fetched.content_type.as_deref(),
            &mut staging,
        )?;

        let staged = staging.into_objects();
        let staged_ids: BTreeSet<MeshObjectIdentifier> = staged.keys().cloned().collect();
        let stale: Vec<MeshObjectIdentifier> = self
            .base
            .identifiers()
            .into_iter()
            .filter(|id| id.base() == &self.resource && !staged_ids.contains(id))
            .collect();

        // Partners may have been granted locks; the run overwrites everything.
        let granted: Vec<MeshObjectIdentifier> = staged_ids
            .iter()
            .chain(&stale)
            .filter(|id| self.base.find_locally(id).is_some_and(|o| !o.has_lock))
            .cloned()
            .collect();
        if !granted.is_empty() {
            debug!("Recalling {} lock(s) before updating {}", granted.len(), self.resource);
        }

        let mut tx = self.base.begin_transaction_with_locks(&granted).await?;
        for data in staged.values() {
            tx.update_to_match(data)?;
        }
        for id in &stale {
            if tx.contains(id) {
                tx.delete_object(id)?;
            }
        }
        let deltas = tx.commit()?;
        Ok(!deltas.is_empty())
    }

    /// Closes the base and detaches it from the network.
    pub async fn close(&self) -> ProbeResult<()> {
        let result = self.base.close().await;
        self.network.detach(&self.resource);
        info!("Closed shadow {}", self.resource);
        Ok(result?)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
