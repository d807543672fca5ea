// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection routing and synchronization core for Patchwork Editor.
//!
//! This crate holds the editor-side model of a patch: objects with their
//! inlets and outlets, and the connections between them. It provides:
//! - Orthogonal, obstacle-avoiding routing on a fixed lattice
//! - Connection path editing (segment and waypoint drags, splits)
//! - Persisted path states and their textual form
//! - A coalescing queue that writes path edits into the engine under the
//!   engine lock, one undo step per batch
//! - Pointer interaction and change notifications
//!
//! ## Threading
//!
//! The engine runs on its own thread and owns the authoritative patch. The
//! [`Canvas`] is driven from the UI thread; every engine access goes through
//! [`Engine::lock`].

pub mod canvas;
pub mod config;
pub mod connection;
pub mod engine;
pub mod events;
pub mod geometry;
pub mod gui_objects;
pub mod history;
pub mod interaction;
pub mod iolet;
pub mod object;
pub mod path;
pub mod pathfinder;
pub mod updater;

pub use canvas::{Canvas, ConnectionError};
pub use config::{ConfigError, EditorConfig, RoutingConfig};
pub use connection::{Connection, ConnectionHit, ConnectionId};
pub use engine::{Atom, Engine, MemoryPatch, Message, PatchStorage};
pub use events::{
    ChangeDetail, ChangeKind, ChangeListener, ChangePayload, ChangeRegistry, EntityKey,
};
pub use geometry::{Line, Obstacle};
pub use history::{History, HistoryError};
pub use interaction::{InteractionController, InteractionMode, InteractionOutcome, PointerEvent};
pub use iolet::{Iolet, IoletDirection, IoletRef};
pub use object::{Object, ObjectId, ObjectKind};
pub use path::{PathPlan, PathState, PathStateError};
pub use pathfinder::{find_route, Route, RouteOutcome};
pub use updater::{PathUpdateHandle, PathUpdater, TickReport};
