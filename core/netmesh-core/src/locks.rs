//! Write-lock transfer.
//!
//! Only the node holding an object's lock may change it. The lock lives at
//! the home replica unless it has been granted away; the home remembers
//! where it went. Every lock request goes to the home, which collects the
//! requests arriving within a short window and grants the lock to the
//! requester with the smallest identifier. The others are denied and may
//! try again.

use crate::meshbase::{BaseInner, LockClaim};
use crate::transaction::Origin;
use crate::{MeshError, MeshResult, ProxyStatus, XprisoMessage};
use netmesh_types::{MeshObjectIdentifier, NetMeshBaseIdentifier};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl BaseInner {
    pub(crate) async fn try_obtain_lock(self: &Arc<Self>, id: &MeshObjectIdentifier) -> MeshResult<()> {
        if self.is_closed() {
            return Err(MeshError::Closed);
        }
        let object = match self.find(id) {
            Some(object) => object,
            None if id.base() != &self.identifier => {
                self.request_replicas(id.base(), vec![id.clone()]).await?;
                self.find(id).ok_or_else(|| MeshError::NotFound(id.clone()))?
            }
            None => return Err(MeshError::NotFound(id.clone())),
        };
        if object.has_lock {
            return Ok(());
        }

        let holder = match (&object.proxy_towards_home, &object.lock_location) {
            (Some(home), _) => home.clone(),
            (None, Some(holder)) => holder.clone(),
            (None, None) => {
                warn!("Home replica of {} has no lock holder, reclaiming", id);
                let mut tx = self.begin(Origin::Local).await;
                if let Some(object) = tx.load(id) {
                    object.has_lock = true;
                }
                tx.commit()?;
                return Ok(());
            }
        };
        self.request_lock_from(&holder, id).await
    }

    /// Asks `holder` for the lock and waits for it to arrive.
    async fn request_lock_from(
        self: &Arc<Self>,
        holder: &NetMeshBaseIdentifier,
        id: &MeshObjectIdentifier,
    ) -> MeshResult<()> {
        let proxy = self.obtain_proxy(holder, None).await?;
        proxy.set_status(ProxyStatus::AwaitingLockTransfer);

        let mut request = XprisoMessage::new(self.identifier.clone(), holder.clone());
        request.requested_lock_objects.push(id.clone());
        let result = proxy.request(request, self.config.lock_timeout).await;
        proxy.transition(ProxyStatus::AwaitingLockTransfer, ProxyStatus::Synchronized);

        let response = result?;
        // The response has been applied before the request completes.
        if response.push_lock_objects.contains(id) && self.find(id).is_some_and(|o| o.has_lock) {
            debug!("{} obtained the lock of {} from {}", self.identifier, id, holder);
            Ok(())
        } else {
            debug!("{} was denied the lock of {} by {}", self.identifier, id, holder);
            Err(MeshError::NotPermitted(id.clone()))
        }
    }

    pub(crate) async fn receive_lock_requests(
        self: &Arc<Self>,
        sender: &NetMeshBaseIdentifier,
        message: &XprisoMessage,
    ) {
        for id in &message.requested_lock_objects {
            let Some(object) = self.find(id) else {
                self.deny_lock(sender, id, message.request_id);
                continue;
            };

            if object.is_home_replica() {
                let first = {
                    let mut claims = self.lock_claims.lock().unwrap_or_else(|e| e.into_inner());
                    let pending = claims.entry(id.clone()).or_default();
                    pending.push(LockClaim {
                        requester: sender.clone(),
                        request_id: message.request_id,
                    });
                    pending.len() == 1
                };
                if first {
                    let base = Arc::clone(self);
                    let id = id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(base.config.lock_arbitration_window).await;
                        base.arbitrate(&id).await;
                    });
                }
            } else if id.base() == sender && object.has_lock {
                // The home recalls the lock it granted us.
                if let Err(e) = self.hand_over_lock(id, sender, message.request_id).await {
                    warn!("Failed to return the lock of {} to {}: {}", id, sender, e);
                    self.deny_lock(sender, id, message.request_id);
                }
            } else {
                self.deny_lock(sender, id, message.request_id);
            }
        }
    }

    /// Grants the lock to the smallest pending requester and denies the
    /// rest.
    async fn arbitrate(self: &Arc<Self>, id: &MeshObjectIdentifier) {
        let claims = self
            .lock_claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .unwrap_or_default();
        let Some(winner) = claims.iter().min_by(|a, b| a.requester.cmp(&b.requester)).cloned() else {
            return;
        };
        for claim in &claims {
            if claim.requester != winner.requester {
                self.deny_lock(&claim.requester, id, claim.request_id);
            }
        }

        if let Err(e) = self.grant_lock(id, &winner).await {
            warn!("Failed to grant the lock of {} to {}: {}", id, winner.requester, e);
            self.deny_lock(&winner.requester, id, winner.request_id);
        }
    }

    async fn grant_lock(self: &Arc<Self>, id: &MeshObjectIdentifier, winner: &LockClaim) -> MeshResult<()> {
        let object = self.find(id).ok_or_else(|| MeshError::NotFound(id.clone()))?;
        if !object.has_lock {
            match &object.lock_location {
                Some(holder) if holder != &winner.requester => {
                    self.request_lock_from(holder, id).await?;
                }
                _ => {}
            }
        }

        let data = {
            let mut tx = self.begin(Origin::Local).await;
            let object = tx.load(id).ok_or_else(|| MeshError::NotFound(id.clone()))?;
            object.has_lock = false;
            object.lock_location = Some(winner.requester.clone());
            object.proxies.insert(winner.requester.clone());
            let data = object.data.clone();
            tx.commit()?;
            data
        };

        let mut grant = XprisoMessage::new(self.identifier.clone(), winner.requester.clone());
        grant.response_id = winner.request_id;
        grant.conveyed_objects.push(data);
        grant.push_lock_objects.push(id.clone());
        self.proxy_for(&winner.requester).send(grant)?;
        info!("Granted the lock of {} to {}", id, winner.requester);
        Ok(())
    }

    /// Gives a granted lock back to the object's home.
    async fn hand_over_lock(
        self: &Arc<Self>,
        id: &MeshObjectIdentifier,
        home: &NetMeshBaseIdentifier,
        request_id: Option<u64>,
    ) -> MeshResult<()> {
        let data = {
            let mut tx = self.begin(Origin::Local).await;
            let object = tx.load(id).ok_or_else(|| MeshError::NotFound(id.clone()))?;
            object.has_lock = false;
            let data = object.data.clone();
            tx.commit()?;
            data
        };

        let mut push = XprisoMessage::new(self.identifier.clone(), home.clone());
        push.response_id = request_id;
        push.conveyed_objects.push(data);
        push.push_lock_objects.push(id.clone());
        self.proxy_for(home).send(push)?;
        debug!("Returned the lock of {} to {}", id, home);
        Ok(())
    }

    fn deny_lock(self: &Arc<Self>, requester: &NetMeshBaseIdentifier, id: &MeshObjectIdentifier, request_id: Option<u64>) {
        let mut denial = XprisoMessage::new(self.identifier.clone(), requester.clone());
        denial.response_id = request_id;
        denial.denied_lock_objects.push(id.clone());
        if let Err(e) = self.proxy_for(requester).send(denial) {
            warn!("Failed to deny the lock of {} to {}: {}", id, requester, e);
        }
    }
}
