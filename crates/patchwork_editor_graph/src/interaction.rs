// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pointer interaction on the canvas.
//!
//! Turns raw pointer events into editing intents: create a connection,
//! drag a connection end to another iolet, drag a segment or waypoint of a
//! segmented connection, box-select connections. Gestures that edit a path
//! save its state when they start and either queue the final state or
//! restore the saved one when they end.

use crate::canvas::{Canvas, ConnectionError};
use crate::connection::{ConnectionHit, ConnectionId};
use crate::engine::Message;
use crate::iolet::{IoletDirection, IoletRef};
use crate::object::ObjectId;
use egui::{Modifiers, Pos2, Rect};

/// Raw pointer input in canvas coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    /// Primary button pressed
    Down {
        /// Pointer position
        pos: Pos2,
        /// Held modifier keys
        modifiers: Modifiers,
    },
    /// Pointer moved with the button held
    Drag {
        /// Pointer position
        pos: Pos2,
    },
    /// Primary button released
    Up {
        /// Pointer position
        pos: Pos2,
    },
    /// Gesture aborted (escape, focus loss)
    Cancel,
}

/// Dragging one end of existing connections
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointDrag {
    /// Connection whose handle was grabbed
    pub connection: ConnectionId,
    /// Every selected connection attached to the grabbed iolet, the grabbed
    /// one first. They all move together.
    pub connections: Vec<ConnectionId>,
    /// Which end moves: `Outlet` for the source end
    pub end: IoletDirection,
    /// Current pointer position
    pub current_pos: Pos2,
}

/// Dragging a new connection out of an iolet
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDrag {
    /// Iolet the drag started on
    pub from: IoletRef,
    /// Current pointer position
    pub current_pos: Pos2,
}

/// Box selection state
#[derive(Debug, Clone, PartialEq)]
pub struct BoxSelection {
    /// Start position
    pub start: Pos2,
    /// Current position
    pub current: Pos2,
}

impl BoxSelection {
    /// Normalized selection rectangle
    pub fn rect(&self) -> Rect {
        Rect::from_two_pos(self.start, self.current)
    }
}

/// Canvas interaction mode
#[derive(Debug, Clone, Default, PartialEq)]
pub enum InteractionMode {
    /// Nothing in progress
    #[default]
    Idle,
    /// Reconnecting one end of one or more connections
    DraggingEndpoint(EndpointDrag),
    /// Moving a segment or waypoint of a segmented connection
    DraggingSegment {
        /// Connection being edited
        connection: ConnectionId,
        /// Pointer position where the drag started
        origin: Pos2,
    },
    /// Creating a connection
    CreatingConnection(ConnectionDrag),
    /// Box selection
    BoxSelect(BoxSelection),
}

/// Result of handling one pointer event
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionOutcome {
    /// Nothing changed
    Nothing,
    /// A gesture started
    Started,
    /// A GUI object was clicked
    Clicked {
        /// Clicked object
        object: ObjectId,
        /// Message it sent, if any
        message: Option<Message>,
    },
    /// Selection changed
    Selected(Vec<ConnectionId>),
    /// New connection created
    Connected(ConnectionId),
    /// Connection ends moved to another iolet, as `(before, after)`
    /// identities
    Reconnected(Vec<(ConnectionId, ConnectionId)>),
    /// Edited path queued for the engine
    PathCommitted(ConnectionId),
    /// Gesture undone; paths restored
    Reverted(Vec<ConnectionId>),
    /// Edit refused
    Rejected(ConnectionError),
}

/// Pointer interaction state machine
#[derive(Debug, Default)]
pub struct InteractionController {
    mode: InteractionMode,
}

impl InteractionController {
    /// Create an idle controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mode
    pub fn mode(&self) -> &InteractionMode {
        &self.mode
    }

    /// Feed one pointer event
    pub fn handle(&mut self, canvas: &mut Canvas, event: PointerEvent) -> InteractionOutcome {
        let mode = std::mem::take(&mut self.mode);
        match (mode, event) {
            (InteractionMode::Idle, PointerEvent::Down { pos, modifiers }) => {
                self.press(canvas, pos, modifiers)
            }
            (InteractionMode::Idle, _) => InteractionOutcome::Nothing,

            (InteractionMode::DraggingEndpoint(mut drag), PointerEvent::Drag { pos }) => {
                drag.current_pos = pos;
                self.mode = InteractionMode::DraggingEndpoint(drag);
                InteractionOutcome::Nothing
            }
            (InteractionMode::DraggingEndpoint(drag), PointerEvent::Up { pos }) => {
                Self::drop_endpoint(canvas, drag, pos)
            }
            (InteractionMode::DraggingEndpoint(drag), _) => Self::revert(canvas, drag.connections),

            (
                InteractionMode::DraggingSegment { connection, origin },
                PointerEvent::Drag { pos },
            ) => {
                if let Some(conn) = canvas.connection_mut(&connection) {
                    conn.drag_by(pos - origin);
                }
                self.mode = InteractionMode::DraggingSegment { connection, origin };
                InteractionOutcome::Nothing
            }
            // Segment drags always commit, even when cancelled
            (InteractionMode::DraggingSegment { connection, .. }, _) => {
                Self::finish_segment(canvas, connection)
            }

            (InteractionMode::CreatingConnection(mut drag), PointerEvent::Drag { pos }) => {
                drag.current_pos = pos;
                self.mode = InteractionMode::CreatingConnection(drag);
                InteractionOutcome::Nothing
            }
            (InteractionMode::CreatingConnection(drag), PointerEvent::Up { pos }) => {
                Self::complete_connection(canvas, drag.from, pos)
            }
            (InteractionMode::CreatingConnection(_), _) => InteractionOutcome::Nothing,

            (InteractionMode::BoxSelect(mut selection), PointerEvent::Drag { pos }) => {
                selection.current = pos;
                self.mode = InteractionMode::BoxSelect(selection);
                InteractionOutcome::Nothing
            }
            (InteractionMode::BoxSelect(mut selection), PointerEvent::Up { pos }) => {
                selection.current = pos;
                let hits = canvas.connections_in_rect(selection.rect());
                for id in &hits {
                    canvas.select_connection(id, true);
                }
                InteractionOutcome::Selected(hits)
            }
            (InteractionMode::BoxSelect(_), _) => InteractionOutcome::Nothing,
        }
    }

    fn press(
        &mut self,
        canvas: &mut Canvas,
        pos: Pos2,
        modifiers: Modifiers,
    ) -> InteractionOutcome {
        let hit = canvas.hit_test_connections(pos);

        // Reconnection handles only belong to selected connections
        if let Some((id, handle @ (ConnectionHit::StartHandle | ConnectionHit::EndHandle))) = &hit {
            let grabbed = canvas
                .connection(id)
                .filter(|c| c.selected)
                .map(|c| match handle {
                    ConnectionHit::StartHandle => c.source(),
                    _ => c.destination(),
                });
            if let Some(iolet) = grabbed {
                let mut connections = vec![id.clone()];
                let shared = canvas.selected_at(iolet).into_iter();
                connections.extend(shared.filter(|other| other != id));
                for other in &connections {
                    if let Some(conn) = canvas.connection_mut(other) {
                        conn.push_path_state();
                    }
                }
                self.mode = InteractionMode::DraggingEndpoint(EndpointDrag {
                    connection: id.clone(),
                    connections,
                    end: iolet.direction,
                    current_pos: pos,
                });
                return InteractionOutcome::Started;
            }
        }

        if let Some(iolet) = canvas.iolet_at(pos) {
            self.mode = InteractionMode::CreatingConnection(ConnectionDrag {
                from: iolet,
                current_pos: pos,
            });
            return InteractionOutcome::Started;
        }

        if let Some((id, hit)) = hit {
            if !modifiers.shift {
                canvas.clear_selection();
            }
            canvas.select_connection(&id, true);
            if let ConnectionHit::Segment(idx) = hit {
                if self.begin_segment(canvas, &id, idx, pos, modifiers) {
                    return InteractionOutcome::Started;
                }
            }
            return InteractionOutcome::Selected(vec![id]);
        }

        if let Some(object) = canvas.object_at(pos) {
            let message = canvas.click_object(object);
            return InteractionOutcome::Clicked { object, message };
        }

        if !modifiers.shift {
            canvas.clear_selection();
        }
        self.mode = InteractionMode::BoxSelect(BoxSelection {
            start: pos,
            current: pos,
        });
        InteractionOutcome::Started
    }

    fn begin_segment(
        &mut self,
        canvas: &mut Canvas,
        id: &ConnectionId,
        idx: usize,
        pos: Pos2,
        modifiers: Modifiers,
    ) -> bool {
        let radius = canvas.config().handle_size / 2.0;
        let Some(conn) = canvas.connection_mut(id) else {
            return false;
        };
        if !conn.is_segmented() {
            return false;
        }

        conn.push_path_state();
        let started = if modifiers.alt {
            conn.split_segment(pos)
                .and_then(|half| conn.begin_segment_drag(half))
                .is_some()
        } else if let Some(waypoint) = conn.waypoint_at(pos, radius) {
            conn.begin_waypoint_drag(waypoint)
        } else {
            conn.begin_segment_drag(idx).is_some()
        };

        if started {
            self.mode = InteractionMode::DraggingSegment {
                connection: id.clone(),
                origin: pos,
            };
        } else {
            conn.pop_path_state();
        }
        started
    }

    fn finish_segment(canvas: &mut Canvas, id: ConnectionId) -> InteractionOutcome {
        let Some(conn) = canvas.connection_mut(&id) else {
            return InteractionOutcome::Nothing;
        };
        conn.end_drag();
        match conn.finish_gesture() {
            Some(state) => {
                canvas.queue_state(&id, state);
                InteractionOutcome::PathCommitted(id)
            }
            None => InteractionOutcome::Nothing,
        }
    }

    fn drop_endpoint(canvas: &mut Canvas, drag: EndpointDrag, pos: Pos2) -> InteractionOutcome {
        let target = canvas.iolet_at(pos).filter(|iolet| iolet.direction == drag.end);
        let Some(target) = target else {
            return Self::revert(canvas, drag.connections);
        };

        match canvas.reconnect_all(&drag.connections, target, true) {
            Ok(moved) if moved.is_empty() => Self::revert(canvas, drag.connections),
            Ok(moved) => {
                // Moved connections already queued their rerouted states
                for (old, new) in &moved {
                    if let Some(conn) = canvas.connection_mut(new) {
                        conn.finish_gesture();
                    }
                    tracing::trace!(from = %old, to = %new, "endpoint dropped");
                }
                InteractionOutcome::Reconnected(moved)
            }
            Err(err) => {
                tracing::debug!(connection = %drag.connection, "reconnect rejected: {err}");
                for id in &drag.connections {
                    if let Some(conn) = canvas.connection_mut(id) {
                        conn.pop_path_state();
                    }
                }
                InteractionOutcome::Rejected(err)
            }
        }
    }

    fn revert(canvas: &mut Canvas, ids: Vec<ConnectionId>) -> InteractionOutcome {
        let restored: Vec<ConnectionId> = ids
            .into_iter()
            .filter(|id| match canvas.connection_mut(id) {
                Some(conn) => {
                    conn.pop_path_state();
                    true
                }
                None => false,
            })
            .collect();
        if restored.is_empty() {
            InteractionOutcome::Nothing
        } else {
            InteractionOutcome::Reverted(restored)
        }
    }

    fn complete_connection(canvas: &mut Canvas, from: IoletRef, pos: Pos2) -> InteractionOutcome {
        let Some(target) = canvas.iolet_at(pos) else {
            return InteractionOutcome::Nothing;
        };
        let (outlet, inlet) = match from.direction {
            IoletDirection::Outlet => (from, target),
            IoletDirection::Inlet => (target, from),
        };
        match canvas.connect(outlet, inlet) {
            Ok(id) => InteractionOutcome::Connected(id),
            Err(err) => InteractionOutcome::Rejected(err),
        }
    }

    /// Flip the selected connections between plain and segmented
    pub fn toggle_segmented(&self, canvas: &mut Canvas) -> Vec<ConnectionId> {
        let selected = canvas.selected_connections();
        for id in &selected {
            let segmented = canvas.connection(id).is_some_and(|c| c.is_segmented());
            if let Err(err) = canvas.set_segmented(id, !segmented) {
                tracing::warn!("toggle segmented failed: {err}");
            }
        }
        selected
    }

    /// Reroute the selected segmented connections
    pub fn auto_route(&self, canvas: &mut Canvas) -> Vec<ConnectionId> {
        let targets: Vec<ConnectionId> = canvas
            .selected_connections()
            .into_iter()
            .filter(|id| canvas.connection(id).is_some_and(|c| c.is_segmented()))
            .collect();
        for id in &targets {
            if let Err(err) = canvas.find_path(id) {
                tracing::warn!("auto route failed: {err}");
            }
        }
        targets
    }

    /// Delete the selected connections
    pub fn delete_selected(&self, canvas: &mut Canvas) -> usize {
        canvas
            .selected_connections()
            .iter()
            .filter(|id| canvas.disconnect(id).is_ok())
            .count()
    }

    /// Rubber-band line to draw while creating or reconnecting
    pub fn preview_path(&self, canvas: &Canvas) -> Option<[Pos2; 2]> {
        match &self.mode {
            InteractionMode::CreatingConnection(drag) => {
                let anchor = canvas.anchor(&drag.from)?;
                Some(match drag.from.direction {
                    IoletDirection::Outlet => [anchor, drag.current_pos],
                    IoletDirection::Inlet => [drag.current_pos, anchor],
                })
            }
            InteractionMode::DraggingEndpoint(drag) => {
                let (start, end) = canvas.connection(&drag.connection)?.anchors();
                Some(match drag.end {
                    IoletDirection::Outlet => [drag.current_pos, end],
                    IoletDirection::Inlet => [start, drag.current_pos],
                })
            }
            _ => None,
        }
    }
}
