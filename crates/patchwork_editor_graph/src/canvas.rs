// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canvas holding the editor-side objects and connections.
//!
//! Objects and connections live in arenas keyed by identity; anything that
//! refers to another entity stores its key and looks it up here, getting
//! `None` once the entity is gone. The canvas also owns the path update
//! queue and the undo history, and is the only place that talks to the
//! engine.

use crate::config::EditorConfig;
use crate::connection::{Connection, ConnectionHit, ConnectionId};
use crate::engine::{Engine, Message};
use crate::events::{ChangeDetail, ChangeKind, ChangeRegistry, EntityKey};
use crate::geometry::Obstacle;
use crate::history::{Batch, History, HistoryError, Replay};
use crate::iolet::{IoletDirection, IoletRef};
use crate::object::{Object, ObjectId, ObjectKind};
use crate::path::PathState;
use crate::pathfinder::RouteOutcome;
use crate::updater::{PathUpdateHandle, PathUpdater, TickReport};
use egui::{Pos2, Rect, Vec2};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Instant;

/// Error when creating or editing a connection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// Object not found
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// Iolet not found
    #[error("Iolet not found: {0}")]
    IoletNotFound(IoletRef),

    /// Outlet used as inlet or the other way round
    #[error("Wrong iolet direction: {0}")]
    WrongDirection(IoletRef),

    /// Signal outlet into a control inlet
    #[error("Incompatible iolets: {outlet} -> {inlet}")]
    IncompatibleIolets {
        /// Source end
        outlet: IoletRef,
        /// Destination end
        inlet: IoletRef,
    },

    /// Self-loop not allowed
    #[error("Self-loop not allowed on {0}")]
    SelfLoop(ObjectId),

    /// Same outlet and inlet are already connected
    #[error("Already connected: {0}")]
    AlreadyConnected(ConnectionId),

    /// Connection not found
    #[error("Connection not found: {0}")]
    ConnectionNotFound(ConnectionId),
}

/// Result type for canvas connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;

/// Editor canvas
#[derive(Debug)]
pub struct Canvas {
    objects: IndexMap<ObjectId, Object>,
    connections: IndexMap<ConnectionId, Connection>,
    engine: Arc<Engine>,
    updater: PathUpdater,
    history: History,
    events: ChangeRegistry,
    config: EditorConfig,
}

impl Canvas {
    /// Create an empty canvas on top of `engine`
    pub fn new(engine: Arc<Engine>, config: EditorConfig) -> Self {
        Self {
            objects: IndexMap::new(),
            connections: IndexMap::new(),
            engine,
            updater: PathUpdater::new(config.update_interval()),
            history: History::new(),
            events: ChangeRegistry::new(),
            config,
        }
    }

    /// Editor configuration
    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Shared engine handle
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Path update queue
    pub fn updater(&self) -> &PathUpdater {
        &self.updater
    }

    /// Producer handle of the path update queue
    pub fn update_handle(&self) -> PathUpdateHandle {
        self.updater.handle()
    }

    /// Undo history
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Change notifications
    pub fn events_mut(&mut self) -> &mut ChangeRegistry {
        &mut self.events
    }

    // Objects

    /// Add an object and place it in the engine
    pub fn add_object(&mut self, object: Object) -> ObjectId {
        let id = object.id;
        let bounds = object.bounds;
        self.engine.lock().set_object_bounds(id, bounds);
        self.objects.insert(id, object);
        self.events
            .publish(ChangeKind::Created, EntityKey::Object(id), ChangeDetail::Bounds(bounds));
        id
    }

    /// Get an object by ID
    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    /// Get all objects
    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.values()
    }

    /// Get the number of objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Move an object by `delta`
    pub fn move_object(&mut self, id: ObjectId, delta: Vec2) -> bool {
        match self.objects.get(&id) {
            Some(obj) => {
                let bounds = obj.bounds.translate(delta);
                self.set_object_bounds(id, bounds)
            }
            None => false,
        }
    }

    /// Move or resize an object
    pub fn set_object_bounds(&mut self, id: ObjectId, bounds: Rect) -> bool {
        if !self.apply_bounds(id, bounds) {
            return false;
        }
        self.engine.lock().set_object_bounds(id, bounds);
        true
    }

    fn apply_bounds(&mut self, id: ObjectId, bounds: Rect) -> bool {
        let Some(obj) = self.objects.get_mut(&id) else {
            return false;
        };
        obj.bounds = bounds;
        self.events
            .publish(ChangeKind::Moved, EntityKey::Object(id), ChangeDetail::Bounds(bounds));
        self.refresh_connections_of(id);
        true
    }

    /// Pick up placement changes made on the engine side. Returns the number
    /// of objects that moved.
    pub fn sync_object_bounds(&mut self) -> usize {
        let moved: Vec<(ObjectId, Rect)> = {
            let storage = self.engine.lock();
            let moved = self
                .objects
                .values()
                .filter_map(|obj| {
                    storage
                        .object_bounds(obj.id)
                        .filter(|bounds| *bounds != obj.bounds)
                        .map(|bounds| (obj.id, bounds))
                })
                .collect();
            moved
        };
        for (id, bounds) in &moved {
            self.apply_bounds(*id, *bounds);
        }
        moved.len()
    }

    /// Pick up path states written on the engine side. Nothing is read
    /// while edits of our own are still queued, and connections in the
    /// middle of a gesture keep their state. Returns the number of
    /// connections whose path changed.
    pub fn sync_path_states(&mut self) -> usize {
        if self.updater.is_running() {
            return 0;
        }
        let written: Vec<(ConnectionId, PathState)> = {
            let storage = self.engine.lock();
            let written = self
                .connections
                .values()
                .filter(|conn| !conn.in_gesture())
                .filter_map(|conn| {
                    storage
                        .path_state(conn.id())
                        .filter(|state| *state != conn.path_state())
                        .map(|state| (conn.id().clone(), state))
                })
                .collect();
            written
        };

        let mut changed = 0;
        for (id, state) in written {
            let Some(conn) = self.connections.get_mut(&id) else {
                continue;
            };
            let before = conn.path_state();
            conn.restore_path_state(&state);
            let after = conn.path_state();
            if after != before {
                changed += 1;
                tracing::debug!(connection = %id, "path state changed by the engine");
                self.events.publish(
                    ChangeKind::PathChanged,
                    EntityKey::Connection(id),
                    ChangeDetail::Path(after),
                );
            }
        }
        changed
    }

    /// Remove an object together with its connections
    pub fn remove_object(&mut self, id: ObjectId) -> Option<Object> {
        let attached: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.involves(id))
            .map(|c| c.id().clone())
            .collect();

        {
            let mut storage = self.engine.lock();
            for conn in &attached {
                storage.disconnect(conn);
            }
            storage.remove_object(id);
        }

        for conn in attached {
            self.connections.shift_remove(&conn);
            self.retire(EntityKey::Connection(conn));
        }

        let object = self.objects.shift_remove(&id)?;
        self.retire(EntityKey::Object(id));
        Some(object)
    }

    fn retire(&mut self, key: EntityKey) {
        self.events.publish(ChangeKind::Deleted, key.clone(), ChangeDetail::None);
        self.events.forget(&key);
    }

    /// Anchor point of an iolet
    pub fn anchor(&self, iolet: &IoletRef) -> Option<Pos2> {
        self.objects
            .get(&iolet.object)?
            .iolet_anchor(iolet.index, iolet.direction)
    }

    fn refresh_connections_of(&mut self, object: ObjectId) {
        let ids: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.involves(object))
            .map(|c| c.id().clone())
            .collect();
        for id in ids {
            self.refresh_connection(&id);
        }
    }

    fn refresh_connection(&mut self, id: &ConnectionId) {
        let Some(conn) = self.connections.get(id) else {
            return;
        };
        let (Some(start), Some(end)) =
            (self.anchor(&conn.source()), self.anchor(&conn.destination()))
        else {
            return;
        };
        if let Some(conn) = self.connections.get_mut(id) {
            conn.set_anchors(start, end);
            let state = conn.path_state();
            self.events.publish(
                ChangeKind::PathChanged,
                EntityKey::Connection(id.clone()),
                ChangeDetail::Path(state),
            );
        }
    }

    // Connections

    fn validate(&self, outlet: IoletRef, inlet: IoletRef) -> Result<bool> {
        if outlet.direction != IoletDirection::Outlet {
            return Err(ConnectionError::WrongDirection(outlet));
        }
        if inlet.direction != IoletDirection::Inlet {
            return Err(ConnectionError::WrongDirection(inlet));
        }

        let source_obj = self
            .objects
            .get(&outlet.object)
            .ok_or(ConnectionError::ObjectNotFound(outlet.object))?;
        let target_obj = self
            .objects
            .get(&inlet.object)
            .ok_or(ConnectionError::ObjectNotFound(inlet.object))?;

        let source = source_obj
            .iolet(outlet.index, outlet.direction)
            .ok_or(ConnectionError::IoletNotFound(outlet))?;
        let target = target_obj
            .iolet(inlet.index, inlet.direction)
            .ok_or(ConnectionError::IoletNotFound(inlet))?;

        if outlet.object == inlet.object {
            return Err(ConnectionError::SelfLoop(outlet.object));
        }
        if !source.can_connect(target) {
            return Err(ConnectionError::IncompatibleIolets { outlet, inlet });
        }
        Ok(source.is_signal)
    }

    /// Check whether `outlet` may be connected to `inlet`
    pub fn can_connect(&self, outlet: IoletRef, inlet: IoletRef) -> bool {
        self.validate(outlet, inlet).is_ok()
            && !self.connections.contains_key(&ConnectionId::new(&outlet, &inlet))
    }

    fn build_connection(&self, outlet: IoletRef, inlet: IoletRef) -> Result<Connection> {
        let is_signal = self.validate(outlet, inlet)?;
        let id = ConnectionId::new(&outlet, &inlet);
        if self.connections.contains_key(&id) {
            return Err(ConnectionError::AlreadyConnected(id));
        }
        let start = self
            .anchor(&outlet)
            .ok_or(ConnectionError::IoletNotFound(outlet))?;
        let end = self.anchor(&inlet).ok_or(ConnectionError::IoletNotFound(inlet))?;
        Ok(Connection::new(outlet, inlet, is_signal, start, end))
    }

    fn insert_connection(&mut self, connection: Connection) -> ConnectionId {
        let id = connection.id().clone();
        let state = connection.path_state();
        self.connections.insert(id.clone(), connection);
        self.events.publish(
            ChangeKind::Created,
            EntityKey::Connection(id.clone()),
            ChangeDetail::Path(state),
        );
        id
    }

    /// Connect an outlet to an inlet, creating the engine record
    pub fn connect(&mut self, outlet: IoletRef, inlet: IoletRef) -> Result<ConnectionId> {
        let connection = self.build_connection(outlet, inlet)?;
        self.engine.lock().connect(connection.id());
        tracing::debug!(connection = %connection.id(), "connected");
        Ok(self.insert_connection(connection))
    }

    /// Adopt a connection the engine already has, restoring its persisted
    /// path state
    pub fn load_connection(&mut self, outlet: IoletRef, inlet: IoletRef) -> Result<ConnectionId> {
        let mut connection = self.build_connection(outlet, inlet)?;
        let state = self
            .engine
            .path_state(connection.id())
            .ok_or_else(|| ConnectionError::ConnectionNotFound(connection.id().clone()))?;
        connection.restore_path_state(&state);
        Ok(self.insert_connection(connection))
    }

    /// Delete a connection
    pub fn disconnect(&mut self, id: &ConnectionId) -> Result<Connection> {
        let connection = self
            .connections
            .shift_remove(id)
            .ok_or_else(|| ConnectionError::ConnectionNotFound(id.clone()))?;
        self.engine.lock().disconnect(id);
        self.retire(EntityKey::Connection(id.clone()));
        tracing::debug!(connection = %id, "disconnected");
        Ok(connection)
    }

    /// Get a connection by ID
    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Get a mutable connection by ID
    pub fn connection_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Get all connections
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Whether a connection exists
    pub fn contains_connection(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Get the number of connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of the obstacles a connection must route around: every
    /// object except its own endpoints and canvas decorations
    pub fn obstacles_for(&self, id: &ConnectionId) -> Vec<Obstacle> {
        let Some(conn) = self.connections.get(id) else {
            return Vec::new();
        };
        self.objects
            .values()
            .filter(|obj| obj.is_obstacle() && !conn.involves(obj.id))
            .map(|obj| Obstacle::new(obj.id, obj.bounds))
            .collect()
    }

    /// Reroute a segmented connection and queue the new state
    pub fn find_path(&mut self, id: &ConnectionId) -> Result<RouteOutcome> {
        let obstacles = self.obstacles_for(id);
        let routing = self.config.routing.clone();
        let conn = self
            .connections
            .get_mut(id)
            .ok_or_else(|| ConnectionError::ConnectionNotFound(id.clone()))?;
        let outcome = conn.find_path(&obstacles, &routing);
        self.commit_path(id)?;
        Ok(outcome)
    }

    /// Switch a connection between plain and segmented and queue the
    /// new state
    pub fn set_segmented(&mut self, id: &ConnectionId, segmented: bool) -> Result<()> {
        let obstacles = self.obstacles_for(id);
        let routing = self.config.routing.clone();
        let conn = self
            .connections
            .get_mut(id)
            .ok_or_else(|| ConnectionError::ConnectionNotFound(id.clone()))?;
        conn.set_segmented(segmented, &obstacles, &routing);
        self.commit_path(id)
    }

    /// Queue the connection's current path state for the engine
    pub fn commit_path(&mut self, id: &ConnectionId) -> Result<()> {
        let state = self
            .connections
            .get(id)
            .ok_or_else(|| ConnectionError::ConnectionNotFound(id.clone()))?
            .path_state();
        self.queue_state(id, state);
        Ok(())
    }

    /// Queue an already computed state
    pub fn queue_state(&mut self, id: &ConnectionId, state: PathState) {
        self.updater.push_path_state(id.clone(), state.clone());
        self.events.publish(
            ChangeKind::PathChanged,
            EntityKey::Connection(id.clone()),
            ChangeDetail::Path(state),
        );
    }

    /// Move one end of a connection to `target`. The end with the same
    /// direction as `target` is replaced. Returns the connection's new
    /// identity; on error nothing changes.
    pub fn reconnect(
        &mut self,
        id: &ConnectionId,
        target: IoletRef,
        dragged: bool,
    ) -> Result<ConnectionId> {
        match self.check_reconnect(id, target)? {
            Some(new_id) => {
                self.apply_reconnect(id, &new_id, target, dragged)?;
                Ok(new_id)
            }
            None => Ok(id.clone()),
        }
    }

    /// Move the same end of several connections to `target` at once.
    /// Every move is validated before any is made, so either all of them
    /// happen or none does. Returns `(old, new)` identities of the
    /// connections that actually changed.
    pub fn reconnect_all(
        &mut self,
        ids: &[ConnectionId],
        target: IoletRef,
        dragged: bool,
    ) -> Result<Vec<(ConnectionId, ConnectionId)>> {
        let mut moves = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(new_id) = self.check_reconnect(id, target)? {
                if moves.iter().any(|(_, other)| *other == new_id) {
                    return Err(ConnectionError::AlreadyConnected(new_id));
                }
                moves.push((id.clone(), new_id));
            }
        }
        for (id, new_id) in &moves {
            self.apply_reconnect(id, new_id, target, dragged)?;
        }
        Ok(moves)
    }

    /// Identity `id` would have after moving its end to `target`, or
    /// `None` when that end is already there
    fn check_reconnect(&self, id: &ConnectionId, target: IoletRef) -> Result<Option<ConnectionId>> {
        let conn = self
            .connections
            .get(id)
            .ok_or_else(|| ConnectionError::ConnectionNotFound(id.clone()))?;
        let (outlet, inlet) = match target.direction {
            IoletDirection::Outlet => (target, conn.destination()),
            IoletDirection::Inlet => (conn.source(), target),
        };
        if (outlet, inlet) == (conn.source(), conn.destination()) {
            return Ok(None);
        }

        self.validate(outlet, inlet)?;
        let new_id = ConnectionId::new(&outlet, &inlet);
        if self.connections.contains_key(&new_id) {
            return Err(ConnectionError::AlreadyConnected(new_id));
        }
        self.anchor(&target).ok_or(ConnectionError::IoletNotFound(target))?;
        Ok(Some(new_id))
    }

    fn apply_reconnect(
        &mut self,
        id: &ConnectionId,
        new_id: &ConnectionId,
        target: IoletRef,
        dragged: bool,
    ) -> Result<()> {
        let anchor = self.anchor(&target).ok_or(ConnectionError::IoletNotFound(target))?;
        let obstacles = self.obstacles_for(id);
        let routing = self.config.routing.clone();
        let Some(mut conn) = self.connections.shift_remove(id) else {
            return Err(ConnectionError::ConnectionNotFound(id.clone()));
        };
        conn.replace_endpoint(target, anchor, dragged, &obstacles, &routing);

        {
            let mut storage = self.engine.lock();
            storage.disconnect(id);
            storage.connect(new_id);
        }
        self.retire(EntityKey::Connection(id.clone()));
        tracing::debug!(from = %id, to = %new_id, "reconnected");

        let state = conn.path_state();
        self.insert_connection(conn);
        if !state.is_empty() {
            self.queue_state(new_id, state);
        }
        Ok(())
    }

    /// Selected connections whose `end` is attached to `iolet`
    pub fn selected_at(&self, iolet: IoletRef) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.selected)
            .filter(|c| match iolet.direction {
                IoletDirection::Outlet => c.source() == iolet,
                IoletDirection::Inlet => c.destination() == iolet,
            })
            .map(|c| c.id().clone())
            .collect()
    }

    // Hit-testing and selection

    /// Object under `point`, topmost first
    pub fn object_at(&self, point: Pos2) -> Option<ObjectId> {
        self.objects
            .values()
            .rev()
            .find(|obj| obj.bounds.contains(point))
            .map(|obj| obj.id)
    }

    /// Iolet under `point`, topmost object first
    pub fn iolet_at(&self, point: Pos2) -> Option<IoletRef> {
        self.objects
            .values()
            .rev()
            .find_map(|obj| obj.iolet_at(point, self.config.hit_tolerance))
    }

    /// Connection part under `point`, most recently added first
    pub fn hit_test_connections(&self, point: Pos2) -> Option<(ConnectionId, ConnectionHit)> {
        self.connections
            .values()
            .rev()
            .find_map(|conn| conn.hit_test(point, &self.config).map(|hit| (conn.id().clone(), hit)))
    }

    /// Connections passing through a selection rectangle
    pub fn connections_in_rect(&self, rect: Rect) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|conn| conn.intersects(rect, self.config.intersect_accuracy))
            .map(|conn| conn.id().clone())
            .collect()
    }

    /// Change a connection's selection state
    pub fn select_connection(&mut self, id: &ConnectionId, selected: bool) -> bool {
        let Some(conn) = self.connections.get_mut(id) else {
            return false;
        };
        if conn.selected != selected {
            conn.selected = selected;
            self.events.publish(
                ChangeKind::Selected,
                EntityKey::Connection(id.clone()),
                ChangeDetail::Selected(selected),
            );
        }
        true
    }

    /// Deselect every connection
    pub fn clear_selection(&mut self) {
        let selected: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.selected)
            .map(|c| c.id().clone())
            .collect();
        for id in selected {
            self.select_connection(&id, false);
        }
    }

    /// Selected connections
    pub fn selected_connections(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.selected)
            .map(|c| c.id().clone())
            .collect()
    }

    // Update queue and history

    /// Run the update queue if its timer is due at `now`
    pub fn poll(&mut self, now: Instant) -> Option<TickReport> {
        let connections = &self.connections;
        self.updater
            .poll(now, &self.engine, &mut self.history, |id| connections.contains_key(id))
    }

    /// Commit everything queued right away
    pub fn flush(&mut self) -> TickReport {
        let connections = &self.connections;
        self.updater
            .tick(&self.engine, &mut self.history, |id| connections.contains_key(id))
    }

    /// Undo the last committed batch
    pub fn undo(&mut self) -> std::result::Result<usize, HistoryError> {
        let batch = self.history.undo()?;
        self.replay(&batch, Replay::Undo)
    }

    /// Redo the last undone batch
    pub fn redo(&mut self) -> std::result::Result<usize, HistoryError> {
        let batch = self.history.redo()?;
        self.replay(&batch, Replay::Redo)
    }

    fn replay(
        &mut self,
        batch: &Batch,
        direction: Replay,
    ) -> std::result::Result<usize, HistoryError> {
        let states = batch
            .edits
            .iter()
            .map(|edit| Ok((edit.connection.clone(), edit.state(direction)?)))
            .collect::<std::result::Result<Vec<_>, HistoryError>>()?;

        {
            let mut storage = self.engine.lock();
            for (id, state) in &states {
                storage.set_path_state(id, state.clone());
            }
        }

        let mut restored = 0;
        for (id, state) in states {
            if let Some(conn) = self.connections.get_mut(&id) {
                conn.restore_path_state(&state);
                restored += 1;
                self.events.publish(
                    ChangeKind::PathChanged,
                    EntityKey::Connection(id),
                    ChangeDetail::Path(state),
                );
            }
        }
        tracing::debug!(batch = batch.id.value(), ?direction, restored, "replayed history batch");
        Ok(restored)
    }

    // GUI objects

    /// Click a GUI object. Returns the message sent out of its outlet.
    pub fn click_object(&mut self, id: ObjectId) -> Option<Message> {
        let obj = self.objects.get_mut(&id)?;
        let message = match &mut obj.kind {
            ObjectKind::Toggle(toggle) => Some(toggle.click()),
            ObjectKind::Message(msg) => msg.message(),
            ObjectKind::Canvas | ObjectKind::Text(_) => None,
        }?;
        self.send_from(id, message.clone());
        Some(message)
    }

    /// Deliver a message from the engine to a GUI object. A triggered
    /// message box sends its contents on.
    pub fn deliver_message(&mut self, id: ObjectId, message: &Message) -> bool {
        let Some(obj) = self.objects.get_mut(&id) else {
            return false;
        };
        let reply = match &mut obj.kind {
            ObjectKind::Toggle(toggle) => {
                toggle.receive(message);
                None
            }
            ObjectKind::Message(msg) => msg.receive(message),
            ObjectKind::Canvas | ObjectKind::Text(_) => return false,
        };
        self.events.publish(
            ChangeKind::Value,
            EntityKey::Object(id),
            ChangeDetail::Message(message.clone()),
        );
        if let Some(reply) = reply {
            self.send_from(id, reply);
        }
        true
    }

    fn send_from(&mut self, id: ObjectId, message: Message) {
        tracing::trace!(object = %id, %message, "sending");
        self.engine.send_message(IoletRef::outlet(id, 0), message.clone());
        self.events
            .publish(ChangeKind::Value, EntityKey::Object(id), ChangeDetail::Message(message));
    }
}
