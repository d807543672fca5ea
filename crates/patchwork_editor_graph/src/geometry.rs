// SPDX-License-Identifier: MIT OR Apache-2.0
//! Geometric predicates over segments, polylines and obstacle rectangles.
//!
//! Everything here is stateless: obstacles are passed in as a snapshot for
//! each query and never cached.

use crate::object::ObjectId;
use egui::{Pos2, Rect};

/// Tolerance used when deciding whether two coordinates are aligned
pub const ALIGN_EPSILON: f32 = 1e-3;

/// A straight segment in canvas space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Line {
    /// First point
    pub start: Pos2,
    /// Second point
    pub end: Pos2,
}

impl Line {
    /// Create a new segment
    pub fn new(start: Pos2, end: Pos2) -> Self {
        Self { start, end }
    }

    /// Euclidean length
    pub fn length(&self) -> f32 {
        self.start.distance(self.end)
    }

    /// Whether both points share the same y coordinate
    pub fn is_horizontal(&self) -> bool {
        (self.start.y - self.end.y).abs() <= ALIGN_EPSILON
    }

    /// Whether both points share the same x coordinate
    pub fn is_vertical(&self) -> bool {
        (self.start.x - self.end.x).abs() <= ALIGN_EPSILON
    }

    /// Whether the segment is axis-aligned
    pub fn is_orthogonal(&self) -> bool {
        self.is_horizontal() || self.is_vertical()
    }

    /// Closest point on the segment to `point`
    pub fn nearest_point(&self, point: Pos2) -> Pos2 {
        let dir = self.end - self.start;
        let len_sq = dir.length_sq();
        if len_sq <= f32::EPSILON {
            return self.start;
        }
        let t = ((point - self.start).dot(dir) / len_sq).clamp(0.0, 1.0);
        self.start + dir * t
    }

    /// Distance from `point` to the nearest point on the segment
    pub fn distance_to(&self, point: Pos2) -> f32 {
        self.nearest_point(point).distance(point)
    }

    /// Whether the segment touches or crosses the closed rectangle.
    ///
    /// Liang-Barsky clipping against the four slabs of the rectangle.
    pub fn intersects_rect(&self, rect: &Rect) -> bool {
        let dx = self.end.x - self.start.x;
        let dy = self.end.y - self.start.y;
        let mut t0 = 0.0_f32;
        let mut t1 = 1.0_f32;

        let slabs = [
            (-dx, self.start.x - rect.min.x),
            (dx, rect.max.x - self.start.x),
            (-dy, self.start.y - rect.min.y),
            (dy, rect.max.y - self.start.y),
        ];

        for (p, q) in slabs {
            if p == 0.0 {
                // Parallel to this slab: reject if outside it
                if q < 0.0 {
                    return false;
                }
                continue;
            }
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return false;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return false;
                }
                t1 = t1.min(r);
            }
        }

        t0 <= t1
    }
}

/// Bounding box of an object that a route must avoid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    /// Owning object
    pub id: ObjectId,
    /// Bounds in canvas space
    pub bounds: Rect,
}

impl Obstacle {
    /// Create a new obstacle
    pub fn new(id: ObjectId, bounds: Rect) -> Self {
        Self { id, bounds }
    }
}

/// Test a single candidate segment against a set of obstacles
pub fn straight_line_intersects_object(line: Line, obstacles: &[Obstacle]) -> bool {
    obstacles.iter().any(|o| line.intersects_rect(&o.bounds))
}

/// Whether no segment of the polyline touches any obstacle
pub fn polyline_is_clear(points: &[Pos2], obstacles: &[Obstacle]) -> bool {
    segments(points).all(|line| !straight_line_intersects_object(line, obstacles))
}

/// Iterate the consecutive segments of a polyline
pub fn segments(points: &[Pos2]) -> impl Iterator<Item = Line> + '_ {
    points.windows(2).map(|w| Line::new(w[0], w[1]))
}

/// Total Euclidean length of a polyline
pub fn polyline_length(points: &[Pos2]) -> f32 {
    segments(points).map(|l| l.length()).sum()
}

/// Manhattan distance between two points
pub fn manhattan(a: Pos2, b: Pos2) -> f32 {
    (a.x - b.x).abs() + (a.y - b.y).abs()
}

/// Whether every segment of the polyline is horizontal or vertical
pub fn is_orthogonal(points: &[Pos2]) -> bool {
    segments(points).all(|l| l.is_orthogonal())
}
