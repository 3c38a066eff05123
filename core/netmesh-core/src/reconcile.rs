//! Applying incoming Xpriso messages.
//!
//! Every message from a partner is applied in one remote-origin
//! transaction. Changes are only accepted from the node that may make
//! them: the object's home, or at the home, the node the lock was granted
//! to. Anything else is logged and dropped, so a misbehaving partner
//! cannot corrupt a replica.

use crate::meshbase::BaseInner;
use crate::transaction::{Origin, Transaction};
use crate::{MeshResult, NetMeshObject, Proxy, ProxyStatus, XprisoMessage, PROTOCOL_VERSION};
use netmesh_types::{now_millis, MeshObjectData, MeshObjectIdentifier, NetMeshBaseIdentifier};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl BaseInner {
    /// Applies a message received through `proxy` and queues the answer,
    /// if one is due.
    pub(crate) async fn handle_incoming(self: &Arc<Self>, proxy: &Arc<Proxy>, message: XprisoMessage) {
        let sender = proxy.partner().clone();
        if message.protocol_version != PROTOCOL_VERSION {
            warn!(
                "Dropping message from {} with protocol version {}",
                sender, message.protocol_version
            );
            return;
        }
        if message.sender != sender || message.receiver != self.identifier {
            warn!(
                "Dropping misaddressed message {} -> {} on proxy {} -> {}",
                message.sender, message.receiver, self.identifier, sender
            );
            return;
        }

        if message.cease_communications {
            info!("{} ceases communication with {}", sender, self.identifier);
            self.remove_proxy(&sender);
            proxy.die();
            if let Err(e) = self.forget_partner(&sender).await {
                warn!("Failed to forget {}: {}", sender, e);
            }
            return;
        }

        if message.response_id.is_some() {
            proxy.transition(ProxyStatus::AwaitingInitialSync, ProxyStatus::Synchronized);
        }
        if !message.requested_first_time_objects.is_empty() {
            proxy.transition(ProxyStatus::Uninitialized, ProxyStatus::Synchronized);
        }

        let response = match self.apply_incoming(&sender, &message).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to apply message from {}: {}", sender, e);
                let mut response = XprisoMessage::response_to(&message);
                response.unknown_objects = message
                    .requested_first_time_objects
                    .iter()
                    .chain(&message.requested_resynchronize)
                    .cloned()
                    .collect();
                Some(response)
            }
        };
        if message.request_id.is_some() && message.requested_lock_objects.is_empty() {
            if let Some(response) = response {
                if let Err(e) = proxy.send(response) {
                    warn!("Failed to answer {}: {}", sender, e);
                }
            }
        }

        if !message.requested_lock_objects.is_empty() {
            self.receive_lock_requests(&sender, &message).await;
        }
    }

    async fn apply_incoming(
        self: &Arc<Self>,
        sender: &NetMeshBaseIdentifier,
        message: &XprisoMessage,
    ) -> MeshResult<Option<XprisoMessage>> {
        let mut tx = self.begin(Origin::Remote(sender.clone())).await;
        let deltas = &message.deltas;

        for data in deltas.creations.iter().chain(&message.conveyed_objects) {
            if self.may_change(&mut tx, sender, &data.identifier) {
                self.accept_replica(&mut tx, data);
            }
        }

        for change in &deltas.type_additions {
            if let Some(object) = self.changeable(&mut tx, sender, &change.object) {
                object.data.types.insert(change.type_name.clone());
            }
        }
        for change in &deltas.type_removals {
            if let Some(object) = self.changeable(&mut tx, sender, &change.object) {
                object.data.types.remove(&change.type_name);
            }
        }

        for change in &deltas.property_changes {
            self.observe(&change.stamp);
            if let Some(object) = self.changeable(&mut tx, sender, &change.object) {
                let newer = object
                    .data
                    .property_stamp(&change.property)
                    .is_none_or(|current| change.stamp.supersedes(current));
                if newer {
                    object
                        .data
                        .set_property(change.property.clone(), change.value.clone(), change.stamp.clone());
                }
            }
        }

        for change in &deltas.neighbor_additions {
            if let Some(object) = self.changeable(&mut tx, sender, &change.object) {
                object
                    .data
                    .neighbors
                    .entry(change.neighbor.clone())
                    .or_default()
                    .extend(change.roles.iter().cloned());
            }
        }
        for change in &deltas.neighbor_removals {
            if let Some(object) = self.changeable(&mut tx, sender, &change.object) {
                object.data.neighbors.remove(&change.neighbor);
            }
        }
        for change in &deltas.role_additions {
            if let Some(object) = self.changeable(&mut tx, sender, &change.object) {
                if let Some(roles) = object.data.neighbors.get_mut(&change.neighbor) {
                    roles.insert(change.role.clone());
                }
            }
        }
        for change in &deltas.role_removals {
            if let Some(object) = self.changeable(&mut tx, sender, &change.object) {
                if let Some(roles) = object.data.neighbors.get_mut(&change.neighbor) {
                    roles.remove(&change.role);
                }
            }
        }

        for change in &deltas.expiry_changes {
            if let Some(object) = self.changeable(&mut tx, sender, &change.object) {
                object.data.time_expires = change.time_expires;
            }
        }

        for id in &deltas.deletions {
            if id.is_home_object() {
                warn!("{} tried to delete home object {}", sender, id);
                continue;
            }
            let Some(object) = self.changeable(&mut tx, sender, id) else {
                continue;
            };
            let neighbors: Vec<MeshObjectIdentifier> = object.data.neighbors.keys().cloned().collect();
            tx.remove_with_back_references(id, &neighbors);
        }

        for id in &message.push_lock_objects {
            self.accept_lock(&mut tx, sender, id);
        }

        let mut response = XprisoMessage::response_to(message);
        for id in message
            .requested_first_time_objects
            .iter()
            .chain(&message.requested_resynchronize)
        {
            match self.serve_replica(&mut tx, sender, id) {
                Some(data) => response.conveyed_objects.push(data),
                None => response.unknown_objects.push(id.clone()),
            }
        }

        for id in &message.requested_canceled_objects {
            let Some(object) = tx.load(id) else { continue };
            if !object.is_home_replica() {
                continue;
            }
            object.proxies.remove(sender);
            if object.lock_location.as_ref() == Some(sender) {
                warn!("{} cancelled {} while holding its lock, reclaiming", sender, id);
                object.lock_location = None;
                object.has_lock = true;
            }
        }

        tx.commit()?;
        Ok(Some(response))
    }

    /// Whether `sender` may change the object: it is the object's home, or
    /// we are home and granted it the lock.
    fn may_change(
        &self,
        tx: &mut Transaction<'_>,
        sender: &NetMeshBaseIdentifier,
        id: &MeshObjectIdentifier,
    ) -> bool {
        if id.base() == sender {
            return true;
        }
        let permitted = tx.load(id).is_some_and(|object| {
            object.is_home_replica() && object.lock_location.as_ref() == Some(sender)
        });
        if !permitted {
            warn!("Rejecting change to {} from {}: not permitted", id, sender);
        }
        permitted
    }

    /// The working copy of a resident object `sender` may change.
    fn changeable<'t>(
        &self,
        tx: &'t mut Transaction<'_>,
        sender: &NetMeshBaseIdentifier,
        id: &MeshObjectIdentifier,
    ) -> Option<&'t mut NetMeshObject> {
        // Changes to objects not replicated here are of no interest.
        tx.load(id)?;
        if !self.may_change(tx, sender, id) {
            return None;
        }
        tx.load(id)
    }

    /// Creates a replica from conveyed data or merges the data into the
    /// resident one. Properties only move forward.
    fn accept_replica(&self, tx: &mut Transaction<'_>, data: &MeshObjectData) {
        for slot in data.properties.values() {
            self.observe(&slot.stamp);
        }
        let Some(object) = tx.load(&data.identifier) else {
            debug!("New replica of {} on {}", data.identifier, self.identifier);
            tx.put(NetMeshObject::new_replica(data.clone(), now_millis()));
            return;
        };
        object.data.types = data.types.clone();
        object.data.neighbors = data.neighbors.clone();
        object.data.time_expires = data.time_expires;
        object.data.time_created = data.time_created;
        object.data.time_updated = object.data.time_updated.max(data.time_updated);
        for (name, slot) in &data.properties {
            let newer = object
                .data
                .property_stamp(name)
                .is_none_or(|current| slot.stamp.supersedes(current));
            if newer {
                object.data.properties.insert(name.clone(), slot.clone());
            }
        }
    }

    fn accept_lock(&self, tx: &mut Transaction<'_>, sender: &NetMeshBaseIdentifier, id: &MeshObjectIdentifier) {
        let Some(object) = tx.load(id) else {
            warn!("{} pushed the lock of unknown {}", sender, id);
            return;
        };
        if object.is_home_replica() {
            if object.lock_location.as_ref() != Some(sender) {
                warn!("{} pushed the lock of {} it does not hold", sender, id);
                return;
            }
            object.lock_location = None;
        } else if id.base() != sender {
            warn!("{} pushed the lock of {} homed at {}", sender, id, id.base());
            return;
        }
        object.has_lock = true;
        debug!("{} now holds the lock of {}", self.identifier, id);
    }

    /// Registers `sender` as a replica holder and returns the full state,
    /// if this base holds the home replica.
    fn serve_replica(
        &self,
        tx: &mut Transaction<'_>,
        sender: &NetMeshBaseIdentifier,
        id: &MeshObjectIdentifier,
    ) -> Option<MeshObjectData> {
        if id.base() != &self.identifier {
            return None;
        }
        let object = tx.load(id)?;
        object.proxies.insert(sender.clone());
        Some(object.data.clone())
    }
}
