//! Sweeping stale replicas.
//!
//! A [`Sweeper`] decides which replicas a base no longer needs: expired
//! ones and ones nobody has read for a while. Removing a replica drops it
//! locally and cancels it at its home, so the home stops sending its
//! changes. Home replicas, the home object, lock holders and objects with
//! listeners are never swept.

use crate::{MeshResult, NetMeshBase, NetMeshObject, WeakNetMeshBase};
use netmesh_types::{now_millis, MeshObjectIdentifier};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Decides which replicas to remove.
pub trait Sweeper: Send + Sync {
    /// Whether the replica has expired.
    fn should_be_deleted(&self, object: &NetMeshObject, now: u64) -> bool;

    /// Whether the replica is no longer needed.
    fn should_be_purged(&self, object: &NetMeshObject, now: u64) -> bool;
}

/// Configuration of [`DefaultSweeper`] and [`ScheduledSweeper`].
#[derive(Debug, Clone)]
pub struct SweepPolicy {
    /// Purge replicas not read for this long; `None` never purges.
    pub purge_unread_after: Option<Duration>,
    /// Remove replicas past their expiry time.
    pub delete_expired: bool,
    /// Pause between two scheduled sweep steps.
    pub interval: Duration,
    /// Objects examined per scheduled step.
    pub batch_size: usize,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            purge_unread_after: Some(Duration::from_secs(60 * 60)),
            delete_expired: true,
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Sweeps by expiry time and last read.
#[derive(Debug, Clone, Default)]
pub struct DefaultSweeper {
    policy: SweepPolicy,
}

impl DefaultSweeper {
    #[must_use]
    pub fn new(policy: SweepPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &SweepPolicy {
        &self.policy
    }
}

impl Sweeper for DefaultSweeper {
    fn should_be_deleted(&self, object: &NetMeshObject, now: u64) -> bool {
        self.policy.delete_expired && object.data.is_expired_at(now)
    }

    fn should_be_purged(&self, object: &NetMeshObject, now: u64) -> bool {
        self.policy.purge_unread_after.is_some_and(|after| {
            let after = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);
            now.saturating_sub(object.time_read) >= after
        })
    }
}

/// What a sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Expired replicas.
    pub deleted: Vec<MeshObjectIdentifier>,
    /// Unneeded replicas.
    pub purged: Vec<MeshObjectIdentifier>,
}

impl SweepReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.purged.is_empty()
    }

    fn merge(&mut self, other: Self) {
        self.deleted.extend(other.deleted);
        self.purged.extend(other.purged);
    }
}

impl NetMeshBase {
    /// Runs the sweeper over every resident object.
    pub async fn sweep_all_now(&self, sweeper: &dyn Sweeper) -> MeshResult<SweepReport> {
        let ids = self.identifiers();
        let report = self.sweep(sweeper, &ids).await?;
        if !report.is_empty() {
            info!(
                "Swept {}: deleted {}, purged {}",
                self.identifier(),
                report.deleted.len(),
                report.purged.len()
            );
        }
        Ok(report)
    }

    async fn sweep(&self, sweeper: &dyn Sweeper, ids: &[MeshObjectIdentifier]) -> MeshResult<SweepReport> {
        let now = now_millis();
        let mut report = SweepReport::default();
        let mut doomed = Vec::new();
        {
            let objects = self.inner.objects_read();
            for id in ids {
                let Some(object) = objects.get(id) else { continue };
                if object.is_home_replica() || object.has_lock || id.is_home_object() {
                    continue;
                }
                if self.inner.has_listeners(id) {
                    continue;
                }
                if sweeper.should_be_deleted(object, now) {
                    report.deleted.push(id.clone());
                } else if sweeper.should_be_purged(object, now) {
                    report.purged.push(id.clone());
                } else {
                    continue;
                }
                doomed.push(object.clone());
            }
        }
        // Anything touched since it was examined survives.
        let purged: BTreeSet<MeshObjectIdentifier> =
            self.inner.purge(doomed, true).await?.into_iter().collect();
        report.deleted.retain(|id| purged.contains(id));
        report.purged.retain(|id| purged.contains(id));
        Ok(report)
    }
}

/// Sweeps a base incrementally on a timer, `batch_size` objects at a time.
///
/// Holds the base weakly; the task ends when the base goes away or the
/// sweeper is dropped.
pub struct ScheduledSweeper {
    task: JoinHandle<()>,
}

impl ScheduledSweeper {
    pub fn start(base: &NetMeshBase, sweeper: Arc<dyn Sweeper>, policy: SweepPolicy) -> Self {
        let task = tokio::spawn(Self::run(base.downgrade(), sweeper, policy));
        Self { task }
    }

    async fn run(base: WeakNetMeshBase, sweeper: Arc<dyn Sweeper>, policy: SweepPolicy) {
        let batch_size = policy.batch_size.max(1);
        let mut cursor: Option<MeshObjectIdentifier> = None;
        let mut total = SweepReport::default();

        loop {
            tokio::time::sleep(policy.interval).await;
            let Some(base) = base.upgrade() else { break };

            let batch: Vec<MeshObjectIdentifier> = base
                .identifiers()
                .into_iter()
                .filter(|id| cursor.as_ref().is_none_or(|last| id > last))
                .take(batch_size)
                .collect();
            cursor = if batch.len() < batch_size { None } else { batch.last().cloned() };

            match base.sweep(sweeper.as_ref(), &batch).await {
                Ok(report) => total.merge(report),
                Err(e) => warn!("Scheduled sweep of {} failed: {}", base.identifier(), e),
            }
            if cursor.is_none() {
                if !total.is_empty() {
                    info!(
                        "Sweep pass over {} done: deleted {}, purged {}",
                        base.identifier(),
                        total.deleted.len(),
                        total.purged.len()
                    );
                }
                total = SweepReport::default();
            }
        }
        debug!("Scheduled sweeper stopped");
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ScheduledSweeper {
    fn drop(&mut self) {
        self.task.abort();
    }
}
