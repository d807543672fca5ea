// SPDX-License-Identifier: MIT OR Apache-2.0
//! Change notifications for objects and connections.
//!
//! Listeners subscribe either to one entity or to everything. Subscriptions
//! are keyed by entity identity, so a deleted entity's listeners can be
//! dropped without the entity keeping any back-references.

use crate::connection::ConnectionId;
use crate::engine::Message;
use crate::object::ObjectId;
use crate::path::PathState;
use egui::Rect;
use indexmap::IndexMap;

/// Identity of an entity that can change
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// A patch object
    Object(ObjectId),
    /// A connection
    Connection(ConnectionId),
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Entity was added to the canvas
    Created,
    /// Object moved or resized
    Moved,
    /// Connection path changed in the editor
    PathChanged,
    /// Selection state changed
    Selected,
    /// GUI object sent or received a message
    Value,
    /// Entity was removed
    Deleted,
}

/// Data carried by a change
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeDetail {
    /// No extra data
    None,
    /// New object bounds
    Bounds(Rect),
    /// New path state
    Path(PathState),
    /// New selection state
    Selected(bool),
    /// Message sent or received
    Message(Message),
}

/// A change notification
#[derive(Debug, Clone, PartialEq)]
pub struct ChangePayload {
    /// Entity that changed
    pub entity: EntityKey,
    /// Change data
    pub detail: ChangeDetail,
}

/// Receives change notifications
pub trait ChangeListener: Send {
    /// Called once per published change
    fn on_changed(&mut self, kind: ChangeKind, payload: &ChangePayload);
}

impl<F> ChangeListener for F
where
    F: FnMut(ChangeKind, &ChangePayload) + Send,
{
    fn on_changed(&mut self, kind: ChangeKind, payload: &ChangePayload) {
        self(kind, payload);
    }
}

/// Handle returned by [`ChangeRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    entity: Option<EntityKey>,
    listener: Box<dyn ChangeListener>,
}

/// Publish/subscribe registry
#[derive(Default)]
pub struct ChangeRegistry {
    next_id: u64,
    subscriptions: IndexMap<SubscriptionId, Subscription>,
}

impl ChangeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(
        &mut self,
        entity: Option<EntityKey>,
        listener: Box<dyn ChangeListener>,
    ) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscriptions.insert(id, Subscription { entity, listener });
        id
    }

    /// Listen to changes of one entity
    pub fn subscribe(
        &mut self,
        entity: EntityKey,
        listener: impl ChangeListener + 'static,
    ) -> SubscriptionId {
        self.insert(Some(entity), Box::new(listener))
    }

    /// Listen to every change
    pub fn subscribe_all(&mut self, listener: impl ChangeListener + 'static) -> SubscriptionId {
        self.insert(None, Box::new(listener))
    }

    /// Remove a subscription; returns whether it existed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.shift_remove(&id).is_some()
    }

    /// Drop all subscriptions to `entity`
    pub fn forget(&mut self, entity: &EntityKey) {
        self.subscriptions
            .retain(|_, sub| sub.entity.as_ref() != Some(entity));
    }

    /// Number of subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether nobody is listening
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Notify the entity's listeners, then the global ones. Returns the
    /// number of listeners called.
    pub fn publish(&mut self, kind: ChangeKind, entity: EntityKey, detail: ChangeDetail) -> usize {
        let payload = ChangePayload { entity, detail };
        let mut notified = 0;

        for sub in self.subscriptions.values_mut() {
            if sub.entity.as_ref() == Some(&payload.entity) {
                sub.listener.on_changed(kind, &payload);
                notified += 1;
            }
        }
        for sub in self.subscriptions.values_mut() {
            if sub.entity.is_none() {
                sub.listener.on_changed(kind, &payload);
                notified += 1;
            }
        }

        notified
    }
}

impl std::fmt::Debug for ChangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeRegistry")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
