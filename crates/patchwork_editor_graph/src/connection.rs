// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection (edge) between an outlet and an inlet.
//!
//! A connection owns its [`PathPlan`] and the renderable copy derived from
//! it. Plain connections are a straight line between the two anchors.
//! Segmented connections keep an orthogonal plan whose waypoints survive
//! endpoint moves and are only recomputed on an explicit [`Connection::find_path`].

use crate::config::{EditorConfig, RoutingConfig};
use crate::geometry::{segments, Line, Obstacle, ALIGN_EPSILON};
use crate::iolet::{IoletDirection, IoletRef};
use crate::object::ObjectId;
use crate::path::{direct_plan, reanchor, simplify, PathPlan, PathState};
use crate::pathfinder::{find_route, RouteOutcome};
use egui::{pos2, vec2, Pos2, Rect, Vec2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a connection, derived from its endpoints:
/// `"{source}:{outlet}>{destination}:{inlet}"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Identity of the connection from `outlet` to `inlet`
    pub fn new(outlet: &IoletRef, inlet: &IoletRef) -> Self {
        Self(format!(
            "{}:{}>{}:{}",
            outlet.object, outlet.index, inlet.object, inlet.index
        ))
    }

    /// The identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Part of a connection under the pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHit {
    /// Reconnection handle at the outlet end
    StartHandle,
    /// Reconnection handle at the inlet end
    EndHandle,
    /// A segment, by index into the drawn path
    Segment(usize),
}

/// What a drag gesture moves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragTarget {
    /// A whole segment, moved perpendicular to itself
    Segment(usize),
    /// A single interior waypoint
    Waypoint(usize),
}

#[derive(Debug, Clone)]
struct SegmentDrag {
    target: DragTarget,
    origin: PathPlan,
}

/// A connection on the canvas
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    source: IoletRef,
    destination: IoletRef,
    /// Carries audio
    pub is_signal: bool,
    /// Selected in the editor
    pub selected: bool,
    segmented: bool,
    plan: PathPlan,
    to_draw: PathPlan,
    start: Pos2,
    end: Pos2,
    saved_state: Option<PathState>,
    drag: Option<SegmentDrag>,
}

impl Connection {
    /// Create a plain connection between two anchors
    pub fn new(
        source: IoletRef,
        destination: IoletRef,
        is_signal: bool,
        start: Pos2,
        end: Pos2,
    ) -> Self {
        let plan = direct_plan(start, end);
        Self {
            id: ConnectionId::new(&source, &destination),
            source,
            destination,
            is_signal,
            selected: false,
            segmented: false,
            to_draw: plan.clone(),
            plan,
            start,
            end,
            saved_state: None,
            drag: None,
        }
    }

    /// Stable identity
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Outlet end
    pub fn source(&self) -> IoletRef {
        self.source
    }

    /// Inlet end
    pub fn destination(&self) -> IoletRef {
        self.destination
    }

    /// Whether the connection touches `object`
    pub fn involves(&self, object: ObjectId) -> bool {
        self.source.object == object || self.destination.object == object
    }

    /// Whether the connection is drawn as an orthogonal polyline
    pub fn is_segmented(&self) -> bool {
        self.segmented
    }

    /// Stored plan
    pub fn plan(&self) -> &[Pos2] {
        &self.plan
    }

    /// Path to render
    pub fn to_draw(&self) -> &[Pos2] {
        &self.to_draw
    }

    /// Current outlet and inlet anchor points
    pub fn anchors(&self) -> (Pos2, Pos2) {
        (self.start, self.end)
    }

    /// Move the anchors and refresh the drawn path
    pub fn set_anchors(&mut self, start: Pos2, end: Pos2) {
        self.start = start;
        self.end = end;
        self.update_path();
    }

    /// Recompute the drawn path from the plan and the current anchors.
    ///
    /// Never runs the pathfinder: waypoints of a segmented plan are kept and
    /// only the points next to the anchors slide to stay orthogonal.
    pub fn update_path(&mut self) {
        self.plan = if self.segmented {
            reanchor(&self.plan, self.start, self.end)
        } else {
            direct_plan(self.start, self.end)
        };
        self.to_draw = self.plan.clone();
    }

    /// Discard the plan and route around `obstacles`
    pub fn find_path(&mut self, obstacles: &[Obstacle], config: &RoutingConfig) -> RouteOutcome {
        let route = find_route(self.start, self.end, obstacles, config);
        self.plan = if route.points.len() >= 2 {
            route.points
        } else {
            direct_plan(self.start, self.end)
        };
        self.to_draw = self.plan.clone();
        tracing::debug!(
            connection = %self.id,
            outcome = ?route.outcome,
            points = self.plan.len(),
            "routed connection"
        );
        route.outcome
    }

    /// Switch between plain and segmented drawing. Switching on routes the
    /// connection; switching off collapses it to a straight line.
    pub fn set_segmented(
        &mut self,
        segmented: bool,
        obstacles: &[Obstacle],
        config: &RoutingConfig,
    ) {
        self.segmented = segmented;
        if segmented {
            self.find_path(obstacles, config);
        } else {
            self.update_path();
        }
    }

    /// Serialized plan; empty for plain connections
    pub fn path_state(&self) -> PathState {
        if self.segmented {
            PathState::from_plan(&self.plan)
        } else {
            PathState::default()
        }
    }

    /// Adopt a persisted state. An empty state makes the connection plain;
    /// a malformed one is logged and replaced by a straight line.
    pub fn restore_path_state(&mut self, state: &PathState) {
        if state.is_empty() {
            self.segmented = false;
        } else {
            match state.parse() {
                Ok(plan) => {
                    self.segmented = true;
                    self.plan = plan;
                }
                Err(err) => {
                    tracing::warn!(
                        connection = %self.id,
                        state = %state,
                        "malformed path state: {err}"
                    );
                    self.segmented = false;
                }
            }
        }
        self.update_path();
    }

    /// Remember the current state at the start of a gesture
    pub fn push_path_state(&mut self) {
        self.saved_state = Some(self.path_state());
    }

    /// Revert to the state remembered by [`Self::push_path_state`]
    pub fn pop_path_state(&mut self) {
        self.drag = None;
        if let Some(state) = self.saved_state.take() {
            self.restore_path_state(&state);
        }
    }

    /// End a gesture. Returns the state to commit, or `None` when the
    /// gesture left the path unchanged.
    pub fn finish_gesture(&mut self) -> Option<PathState> {
        let saved = self.saved_state.take();
        let current = self.path_state();
        match saved {
            Some(before) if before == current => None,
            _ => Some(current),
        }
    }

    /// Index of the segment of `plan` nearest to `point`. Ties keep the
    /// lowest index.
    pub fn closest_line_idx(point: Pos2, plan: &[Pos2]) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (idx, line) in segments(plan).enumerate() {
            let dist = line.distance_to(point);
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((idx, dist));
            }
        }
        best.map(|(idx, _)| idx)
    }

    fn handle_rect(center: Pos2, size: f32) -> Rect {
        Rect::from_center_size(center, vec2(size, size))
    }

    /// What part of the connection lies under `point`. The reconnection
    /// handles take priority over segments.
    pub fn hit_test(&self, point: Pos2, config: &EditorConfig) -> Option<ConnectionHit> {
        if Self::handle_rect(self.start, config.handle_size).contains(point) {
            return Some(ConnectionHit::StartHandle);
        }
        if Self::handle_rect(self.end, config.handle_size).contains(point) {
            return Some(ConnectionHit::EndHandle);
        }

        let idx = Self::closest_line_idx(point, &self.to_draw)?;
        let line = Line::new(self.to_draw[idx], self.to_draw[idx + 1]);
        (line.distance_to(point) <= config.hit_tolerance).then_some(ConnectionHit::Segment(idx))
    }

    /// Interior waypoint within `radius` of `point`
    pub fn waypoint_at(&self, point: Pos2, radius: f32) -> Option<usize> {
        if !self.segmented || self.plan.len() < 3 {
            return None;
        }
        (1..self.plan.len() - 1).find(|&i| self.plan[i].distance(point) <= radius)
    }

    /// Whether the drawn path passes within `accuracy` of `rect`
    pub fn intersects(&self, rect: Rect, accuracy: f32) -> bool {
        let area = rect.expand(accuracy);
        segments(&self.to_draw).any(|line| line.intersects_rect(&area))
    }

    /// Start moving one segment of a segmented plan. Segments touching an
    /// anchor get a stub point so the anchor itself never moves. Returns
    /// the index of the segment actually being dragged.
    pub fn begin_segment_drag(&mut self, idx: usize) -> Option<usize> {
        if !self.segmented || idx + 1 >= self.plan.len() {
            return None;
        }

        let mut idx = idx;
        if idx == 0 {
            self.plan.insert(0, self.plan[0]);
            idx = 1;
        }
        if idx + 2 == self.plan.len() {
            let last = self.plan[self.plan.len() - 1];
            self.plan.push(last);
        }

        self.drag = Some(SegmentDrag {
            target: DragTarget::Segment(idx),
            origin: self.plan.clone(),
        });
        self.to_draw = self.plan.clone();
        Some(idx)
    }

    /// Start moving an interior waypoint
    pub fn begin_waypoint_drag(&mut self, idx: usize) -> bool {
        if !self.segmented || idx == 0 || idx + 1 >= self.plan.len() {
            return false;
        }
        self.drag = Some(SegmentDrag {
            target: DragTarget::Waypoint(idx),
            origin: self.plan.clone(),
        });
        true
    }

    /// Whether a gesture saved the state or a drag is in progress
    pub fn in_gesture(&self) -> bool {
        self.saved_state.is_some() || self.drag.is_some()
    }

    /// Move the dragged segment or waypoint by `delta` from where the
    /// gesture started
    pub fn drag_by(&mut self, delta: Vec2) {
        let Some(drag) = &self.drag else {
            return;
        };
        let mut plan = drag.origin.clone();
        match drag.target {
            DragTarget::Segment(idx) => {
                let line = Line::new(plan[idx], plan[idx + 1]);
                let offset = if line.is_horizontal() {
                    vec2(0.0, delta.y)
                } else {
                    vec2(delta.x, 0.0)
                };
                plan[idx] += offset;
                plan[idx + 1] += offset;
            }
            DragTarget::Waypoint(idx) => {
                let to = plan[idx] + delta;
                move_waypoint(&mut plan, idx, to);
            }
        }
        self.plan = plan;
        self.to_draw = self.plan.clone();
    }

    /// Finish a segment or waypoint drag and tidy the plan
    pub fn end_drag(&mut self) {
        if self.drag.take().is_some() {
            simplify(&mut self.plan);
            self.to_draw = self.plan.clone();
        }
    }

    /// Insert a waypoint pair on the segment nearest to `point`. Returns
    /// the index of the second half, ready to be dragged.
    pub fn split_segment(&mut self, point: Pos2) -> Option<usize> {
        if !self.segmented {
            return None;
        }
        let idx = Self::closest_line_idx(point, &self.plan)?;
        let at = Line::new(self.plan[idx], self.plan[idx + 1]).nearest_point(point);
        self.plan.insert(idx + 1, at);
        self.plan.insert(idx + 1, at);
        self.to_draw = self.plan.clone();
        Some(idx + 2)
    }

    /// Attach one end to a different iolet, which must have the same
    /// direction as the end it replaces. With `dragged` a segmented
    /// connection is rerouted, otherwise its waypoints are kept.
    pub fn replace_endpoint(
        &mut self,
        iolet: IoletRef,
        anchor: Pos2,
        dragged: bool,
        obstacles: &[Obstacle],
        config: &RoutingConfig,
    ) {
        match iolet.direction {
            IoletDirection::Outlet => {
                self.source = iolet;
                self.start = anchor;
            }
            IoletDirection::Inlet => {
                self.destination = iolet;
                self.end = anchor;
            }
        }
        self.id = ConnectionId::new(&self.source, &self.destination);

        if dragged && self.segmented {
            self.find_path(obstacles, config);
        } else {
            self.update_path();
        }
    }
}

/// Move waypoint `idx` to `to`, then restore orthogonality: a neighboring
/// waypoint slides along with it, an anchor neighbor gets a corner point.
fn move_waypoint(plan: &mut PathPlan, idx: usize, to: Pos2) {
    let before = plan[idx - 1];
    let after = plan[idx + 1];
    let prev_horizontal = Line::new(before, plan[idx]).is_horizontal();
    let next_horizontal = Line::new(plan[idx], after).is_horizontal();
    let last = plan.len() - 1;
    plan[idx] = to;

    // Trailing side first so the leading insertion does not shift it
    if idx + 1 == last {
        let corner = if next_horizontal { pos2(to.x, after.y) } else { pos2(after.x, to.y) };
        if !same_point(corner, to) {
            plan.insert(idx + 1, corner);
        }
    } else if next_horizontal {
        plan[idx + 1].y = to.y;
    } else {
        plan[idx + 1].x = to.x;
    }

    if idx == 1 {
        let corner = if prev_horizontal { pos2(to.x, before.y) } else { pos2(before.x, to.y) };
        if !same_point(corner, to) {
            plan.insert(idx, corner);
        }
    } else if prev_horizontal {
        plan[idx - 1].y = to.y;
    } else {
        plan[idx - 1].x = to.x;
    }
}

fn same_point(a: Pos2, b: Pos2) -> bool {
    a.distance(b) <= ALIGN_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::is_orthogonal;

    fn connection(start: Pos2, end: Pos2) -> Connection {
        Connection::new(
            IoletRef::outlet(ObjectId::new(), 0),
            IoletRef::inlet(ObjectId::new(), 1),
            false,
            start,
            end,
        )
    }

    fn segmented(plan: &[Pos2]) -> Connection {
        let mut conn = connection(plan[0], plan[plan.len() - 1]);
        conn.restore_path_state(&PathState::from_plan(plan));
        conn
    }

    #[test]
    fn test_id_format() {
        let conn = connection(pos2(0.0, 0.0), pos2(0.0, 10.0));
        let expected = format!("{}:0>{}:1", conn.source().object, conn.destination().object);
        assert_eq!(conn.id().as_str(), expected);
    }

    #[test]
    fn test_plain_connection_follows_anchors() {
        let mut conn = connection(pos2(0.0, 0.0), pos2(30.0, 40.0));
        conn.set_anchors(pos2(5.0, 5.0), pos2(70.0, 90.0));
        assert_eq!(conn.to_draw(), &[pos2(5.0, 5.0), pos2(70.0, 90.0)]);
        assert!(conn.path_state().is_empty());
    }

    #[test]
    fn test_state_round_trip_keeps_waypoints() {
        let plan = vec![pos2(0.0, 0.0), pos2(0.0, 20.0), pos2(60.0, 20.0), pos2(60.0, 80.0)];
        let conn = segmented(&plan);
        assert!(conn.is_segmented());
        assert_eq!(conn.plan(), plan.as_slice());

        let mut copy = connection(plan[0], plan[3]);
        copy.restore_path_state(&conn.path_state());
        assert_eq!(copy.plan(), conn.plan());
    }

    #[test]
    fn test_malformed_state_falls_back_to_direct() {
        let mut conn = connection(pos2(0.0, 0.0), pos2(30.0, 40.0));
        conn.restore_path_state(&PathState::from("0 0, 10"));
        assert!(!conn.is_segmented());
        assert_eq!(conn.to_draw(), &[pos2(0.0, 0.0), pos2(30.0, 40.0)]);
    }

    #[test]
    fn test_update_path_stays_orthogonal() {
        let mut conn = segmented(&[
            pos2(0.0, 0.0),
            pos2(0.0, 20.0),
            pos2(60.0, 20.0),
            pos2(60.0, 80.0),
        ]);
        conn.set_anchors(pos2(-15.0, 5.0), pos2(75.0, 60.0));
        assert!(is_orthogonal(conn.to_draw()));
        assert_eq!(conn.to_draw()[0], pos2(-15.0, 5.0));
        assert_eq!(conn.to_draw()[conn.to_draw().len() - 1], pos2(75.0, 60.0));
        // The waypoint pair in the middle keeps its height
        assert_eq!(conn.plan()[1].y, 20.0);
    }

    #[test]
    fn test_find_path_avoids_obstacle() {
        let mut conn = connection(pos2(0.0, 0.0), pos2(100.0, 0.0));
        let obstacles = [Obstacle::new(
            ObjectId::new(),
            Rect::from_min_max(pos2(40.0, -20.0), pos2(60.0, 20.0)),
        )];
        conn.set_segmented(true, &obstacles, &RoutingConfig::default());

        let plan = conn.plan();
        assert!(plan.len() >= 4);
        assert!(is_orthogonal(plan));
        assert!(crate::geometry::polyline_is_clear(plan, &obstacles));

        conn.set_segmented(false, &obstacles, &RoutingConfig::default());
        assert_eq!(conn.plan().len(), 2);
    }

    #[test]
    fn test_closest_line_idx_ties_pick_lowest() {
        let plan = [pos2(0.0, 50.0), pos2(50.0, 50.0), pos2(50.0, 100.0)];
        // Equidistant from both segments; the shared corner belongs to the first
        assert_eq!(Connection::closest_line_idx(pos2(50.0, 49.0), &plan), Some(0));
        assert_eq!(Connection::closest_line_idx(pos2(55.0, 90.0), &plan), Some(1));
        assert_eq!(Connection::closest_line_idx(pos2(0.0, 0.0), &plan[..1]), None);
    }

    #[test]
    fn test_waypoint_drag_keeps_anchors() {
        let plan = [pos2(0.0, 50.0), pos2(50.0, 50.0), pos2(50.0, 100.0)];
        let mut conn = segmented(&plan);

        assert_eq!(Connection::closest_line_idx(pos2(50.0, 49.0), conn.plan()), Some(0));
        assert!(conn.begin_waypoint_drag(1));
        conn.drag_by(vec2(0.0, 30.0));
        conn.end_drag();
        conn.update_path();

        let drawn = conn.to_draw();
        assert_eq!(drawn[0], pos2(0.0, 50.0));
        assert_eq!(drawn[drawn.len() - 1], pos2(50.0, 100.0));
        assert!(is_orthogonal(drawn));
    }

    #[test]
    fn test_waypoint_drag_between_waypoints() {
        let plan = [
            pos2(0.0, 0.0),
            pos2(0.0, 20.0),
            pos2(40.0, 20.0),
            pos2(40.0, 60.0),
            pos2(80.0, 60.0),
            pos2(80.0, 100.0),
        ];
        let mut conn = segmented(&plan);
        assert!(conn.begin_waypoint_drag(2));
        conn.drag_by(vec2(10.0, 5.0));
        conn.end_drag();

        assert_eq!(conn.plan()[1], pos2(0.0, 25.0));
        assert_eq!(conn.plan()[2], pos2(50.0, 25.0));
        assert_eq!(conn.plan()[3], pos2(50.0, 60.0));
        assert!(is_orthogonal(conn.plan()));
    }

    #[test]
    fn test_segment_drag_inserts_stubs_at_anchors() {
        let mut conn = segmented(&[pos2(0.0, 0.0), pos2(0.0, 100.0)]);
        let idx = conn.begin_segment_drag(0).unwrap();
        assert_eq!(idx, 1);
        conn.drag_by(vec2(30.0, 12.0));
        conn.end_drag();

        assert_eq!(
            conn.plan(),
            &[pos2(0.0, 0.0), pos2(30.0, 0.0), pos2(30.0, 100.0), pos2(0.0, 100.0)]
        );
    }

    #[test]
    fn test_segment_drag_middle_segment() {
        let mut conn = segmented(&[
            pos2(0.0, 0.0),
            pos2(0.0, 50.0),
            pos2(40.0, 50.0),
            pos2(40.0, 100.0),
        ]);
        assert_eq!(conn.begin_segment_drag(1), Some(1));
        conn.drag_by(vec2(99.0, -20.0));
        conn.end_drag();
        assert_eq!(
            conn.plan(),
            &[pos2(0.0, 0.0), pos2(0.0, 30.0), pos2(40.0, 30.0), pos2(40.0, 100.0)]
        );
    }

    #[test]
    fn test_split_then_drag_makes_jog() {
        let mut conn = segmented(&[
            pos2(0.0, 0.0),
            pos2(0.0, 40.0),
            pos2(100.0, 40.0),
            pos2(100.0, 80.0),
        ]);
        let idx = conn.split_segment(pos2(50.0, 42.0)).unwrap();
        assert_eq!(idx, 3);
        conn.begin_segment_drag(idx);
        conn.drag_by(vec2(0.0, 10.0));
        conn.end_drag();

        assert_eq!(
            conn.plan(),
            &[
                pos2(0.0, 0.0),
                pos2(0.0, 40.0),
                pos2(50.0, 40.0),
                pos2(50.0, 50.0),
                pos2(100.0, 50.0),
                pos2(100.0, 80.0),
            ]
        );
    }

    #[test]
    fn test_gesture_commit_and_cancel() {
        let mut conn = segmented(&[
            pos2(0.0, 0.0),
            pos2(0.0, 50.0),
            pos2(40.0, 50.0),
            pos2(40.0, 100.0),
        ]);
        let before = conn.path_state();

        conn.push_path_state();
        conn.begin_segment_drag(1);
        conn.drag_by(vec2(0.0, 10.0));
        conn.pop_path_state();
        assert_eq!(conn.path_state(), before);

        conn.push_path_state();
        assert_eq!(conn.finish_gesture(), None);

        conn.push_path_state();
        conn.begin_segment_drag(1);
        conn.drag_by(vec2(0.0, 10.0));
        conn.end_drag();
        let committed = conn.finish_gesture().unwrap();
        assert_eq!(committed.as_str(), "0 0, 0 60, 40 60, 40 100");
    }

    #[test]
    fn test_hit_test() {
        let config = EditorConfig::default();
        let conn = segmented(&[
            pos2(0.0, 0.0),
            pos2(0.0, 50.0),
            pos2(40.0, 50.0),
            pos2(40.0, 100.0),
        ]);

        assert_eq!(conn.hit_test(pos2(1.0, 2.0), &config), Some(ConnectionHit::StartHandle));
        assert_eq!(conn.hit_test(pos2(40.0, 98.0), &config), Some(ConnectionHit::EndHandle));
        assert_eq!(conn.hit_test(pos2(20.0, 52.0), &config), Some(ConnectionHit::Segment(1)));
        assert_eq!(conn.hit_test(pos2(20.0, 60.0), &config), None);
    }

    #[test]
    fn test_intersects_rect() {
        let conn = connection(pos2(0.0, 0.0), pos2(0.0, 100.0));
        let near = Rect::from_min_max(pos2(3.0, 40.0), pos2(20.0, 60.0));
        assert!(conn.intersects(near, 4.0));
        assert!(!conn.intersects(near, 1.0));
    }

    #[test]
    fn test_replace_endpoint_rekeys() {
        let mut conn = segmented(&[
            pos2(0.0, 0.0),
            pos2(0.0, 50.0),
            pos2(40.0, 50.0),
            pos2(40.0, 100.0),
        ]);
        let old_id = conn.id().clone();
        let target = IoletRef::inlet(ObjectId::new(), 0);

        conn.replace_endpoint(target, pos2(60.0, 100.0), false, &[], &RoutingConfig::default());

        assert_ne!(conn.id(), &old_id);
        assert_eq!(conn.destination(), target);
        assert_eq!(conn.plan()[1], pos2(0.0, 50.0));
        assert_eq!(conn.plan()[3], pos2(60.0, 100.0));
    }
}
