// SPDX-License-Identifier: MIT OR Apache-2.0
//! Boundary to the patch engine.
//!
//! The engine owns the authoritative object graph and runs message and
//! audio processing on its own thread. The editor only touches it through
//! [`PatchStorage`], and only while holding the engine lock obtained from
//! [`Engine::lock`]. The guard releases the lock on every exit path.

use crate::connection::ConnectionId;
use crate::iolet::IoletRef;
use crate::object::ObjectId;
use crate::path::PathState;
use egui::Rect;
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single message element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Atom {
    /// Number
    Float(f32),
    /// Symbol
    Symbol(String),
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Symbol(s) => f.write_str(s),
        }
    }
}

/// A message sent out of an outlet: selector plus arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Selector symbol, e.g. `float`, `list`, `set`
    pub selector: String,
    /// Arguments
    pub args: Vec<Atom>,
}

impl Message {
    /// Create a message
    pub fn new(selector: impl Into<String>, args: Vec<Atom>) -> Self {
        Self {
            selector: selector.into(),
            args,
        }
    }

    /// `float <value>`
    pub fn float(value: f32) -> Self {
        Self::new("float", vec![Atom::Float(value)])
    }

    /// `bang`
    pub fn bang() -> Self {
        Self::new("bang", Vec::new())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.selector)?;
        for atom in &self.args {
            write!(f, " {atom}")?;
        }
        Ok(())
    }
}

/// Message emitted by the editor on behalf of a GUI object
#[derive(Debug, Clone, PartialEq)]
pub struct OutletMessage {
    /// Outlet the message leaves from
    pub outlet: IoletRef,
    /// The message
    pub message: Message,
}

/// Accessors the editor needs from the engine's object storage.
///
/// Implementations are not expected to synchronize internally; [`Engine`]
/// serializes all access.
pub trait PatchStorage: Send {
    /// Current placement of an object
    fn object_bounds(&self, object: ObjectId) -> Option<Rect>;

    /// Place an object; creates the record when missing
    fn set_object_bounds(&mut self, object: ObjectId, bounds: Rect);

    /// Delete an object record
    fn remove_object(&mut self, object: ObjectId);

    /// Create a connection record with an empty path state
    fn connect(&mut self, connection: &ConnectionId);

    /// Delete a connection record; returns whether it existed
    fn disconnect(&mut self, connection: &ConnectionId) -> bool;

    /// Persisted path state of a connection
    fn path_state(&self, connection: &ConnectionId) -> Option<PathState>;

    /// Overwrite a connection's path state. Returns the previous state, or
    /// `None` without writing when the record does not exist.
    fn set_path_state(&mut self, connection: &ConnectionId, state: PathState) -> Option<PathState>;

    /// Deliver a message out of an object's outlet
    fn send_message(&mut self, outlet: IoletRef, message: Message);

    /// Take the messages the processing side has not consumed yet
    fn drain_messages(&mut self) -> Vec<OutletMessage>;
}

/// In-process patch storage
#[derive(Debug, Default)]
pub struct MemoryPatch {
    objects: IndexMap<ObjectId, Rect>,
    connections: IndexMap<ConnectionId, PathState>,
    outbox: Vec<OutletMessage>,
}

impl MemoryPatch {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }
}

impl PatchStorage for MemoryPatch {
    fn object_bounds(&self, object: ObjectId) -> Option<Rect> {
        self.objects.get(&object).copied()
    }

    fn set_object_bounds(&mut self, object: ObjectId, bounds: Rect) {
        self.objects.insert(object, bounds);
    }

    fn remove_object(&mut self, object: ObjectId) {
        self.objects.shift_remove(&object);
    }

    fn connect(&mut self, connection: &ConnectionId) {
        self.connections.entry(connection.clone()).or_default();
    }

    fn disconnect(&mut self, connection: &ConnectionId) -> bool {
        self.connections.shift_remove(connection).is_some()
    }

    fn path_state(&self, connection: &ConnectionId) -> Option<PathState> {
        self.connections.get(connection).cloned()
    }

    fn set_path_state(&mut self, connection: &ConnectionId, state: PathState) -> Option<PathState> {
        self.connections
            .get_mut(connection)
            .map(|slot| std::mem::replace(slot, state))
    }

    fn send_message(&mut self, outlet: IoletRef, message: Message) {
        self.outbox.push(OutletMessage { outlet, message });
    }

    fn drain_messages(&mut self) -> Vec<OutletMessage> {
        std::mem::take(&mut self.outbox)
    }
}

/// Scoped hold on the engine lock
pub type EngineGuard<'a> = MutexGuard<'a, Box<dyn PatchStorage>>;

/// Shared handle to the engine's storage and its global lock
pub struct Engine {
    storage: Mutex<Box<dyn PatchStorage>>,
}

impl Engine {
    /// Wrap a storage implementation
    pub fn new(storage: impl PatchStorage + 'static) -> Self {
        Self {
            storage: Mutex::new(Box::new(storage)),
        }
    }

    /// Engine backed by [`MemoryPatch`]
    pub fn in_memory() -> Self {
        Self::new(MemoryPatch::new())
    }

    /// Acquire the engine lock
    pub fn lock(&self) -> EngineGuard<'_> {
        self.storage.lock()
    }

    /// Acquire the engine lock unless another thread holds it
    pub fn try_lock(&self) -> Option<EngineGuard<'_>> {
        self.storage.try_lock()
    }

    /// Read an object's placement under the lock
    pub fn object_bounds(&self, object: ObjectId) -> Option<Rect> {
        self.lock().object_bounds(object)
    }

    /// Read a connection's persisted path state under the lock
    pub fn path_state(&self, connection: &ConnectionId) -> Option<PathState> {
        self.lock().path_state(connection)
    }

    /// Send a message under the lock
    pub fn send_message(&self, outlet: IoletRef, message: Message) {
        self.lock().send_message(outlet, message);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("locked", &self.storage.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::{pos2, vec2};
    use std::sync::Arc;

    fn conn_id() -> ConnectionId {
        ConnectionId::new(
            &IoletRef::outlet(ObjectId::new(), 0),
            &IoletRef::inlet(ObjectId::new(), 0),
        )
    }

    #[test]
    fn test_path_state_requires_record() {
        let engine = Engine::in_memory();
        let id = conn_id();

        assert_eq!(engine.lock().set_path_state(&id, "1 2, 3 4".into()), None);
        assert_eq!(engine.path_state(&id), None);

        engine.lock().connect(&id);
        assert_eq!(engine.path_state(&id), Some(PathState::default()));
        assert_eq!(
            engine.lock().set_path_state(&id, "1 2, 3 4".into()),
            Some(PathState::default())
        );
        assert_eq!(engine.path_state(&id), Some("1 2, 3 4".into()));

        assert!(engine.lock().disconnect(&id));
        assert!(!engine.lock().disconnect(&id));
    }

    #[test]
    fn test_object_bounds() {
        let engine = Engine::in_memory();
        let id = ObjectId::new();
        let bounds = Rect::from_min_size(pos2(10.0, 20.0), vec2(30.0, 18.0));

        engine.lock().set_object_bounds(id, bounds);
        assert_eq!(engine.object_bounds(id), Some(bounds));
        engine.lock().remove_object(id);
        assert_eq!(engine.object_bounds(id), None);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let engine = Engine::in_memory();
        let guard = engine.lock();
        assert!(engine.try_lock().is_none());
        drop(guard);
        assert!(engine.try_lock().is_some());
    }

    #[test]
    fn test_messages_cross_threads() {
        let engine = Arc::new(Engine::in_memory());
        let outlet = IoletRef::outlet(ObjectId::new(), 0);

        let sender = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..10 {
                    engine.send_message(outlet, Message::float(i as f32));
                }
            })
        };
        sender.join().unwrap();

        let received = engine.lock().drain_messages();
        assert_eq!(received.len(), 10);
        assert_eq!(received[3].message, Message::float(3.0));
        assert_eq!(received[0].message.to_string(), "float 0");
    }
}
