// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lattice pathfinding for segmented connections.
//!
//! Routes are orthogonal polylines whose waypoints sit on a lattice anchored
//! at the start point with a fixed step. The search is an iterative
//! depth-first branch-and-bound over (lattice cell, heading) states:
//!
//! - the working path lives on an explicit stack of frames;
//! - a visited map keeps the cheapest cost seen per state and prunes any
//!   revisit that is not strictly cheaper;
//! - a Manhattan lower bound prunes branches that cannot beat the best route;
//! - stack depth and the number of expanded nodes are both capped, after
//!   which the best route found so far is returned.
//!
//! Cost is path length plus a penalty per change of direction. Of two routes
//! with equal cost the first one found wins. Expansion order is fixed: the
//! headings that reduce the remaining distance come first, the axis with the
//! larger remaining distance before the other, and all remaining ties follow
//! the base order Down, Right, Left, Up.

use crate::config::RoutingConfig;
use crate::geometry::{
    manhattan, polyline_is_clear, straight_line_intersects_object, Line, Obstacle, ALIGN_EPSILON,
};
use crate::path::{orthogonal_plan, simplify, PathPlan};
use egui::{pos2, Pos2, Rect};
use std::collections::{HashMap, HashSet};

/// How a route was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Start and end coincide; there is nothing to draw
    Degenerate,
    /// Straight line or Z-shape with nothing in the way
    Direct,
    /// Found by the lattice search
    Lattice {
        /// Number of lattice nodes expanded
        explored: usize,
    },
    /// Search found nothing; unobstructed Z-shape returned instead
    Fallback {
        /// Number of lattice nodes expanded
        explored: usize,
    },
}

/// Result of a routing request
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Route points, start first
    pub points: PathPlan,
    /// How the route was found
    pub outcome: RouteOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Heading {
    Down,
    Right,
    Left,
    Up,
}

const BASE_ORDER: [Heading; 4] = [Heading::Down, Heading::Right, Heading::Left, Heading::Up];

impl Heading {
    fn delta(self) -> (i32, i32) {
        match self {
            Self::Down => (0, 1),
            Self::Right => (1, 0),
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
        }
    }

    fn is_vertical(self) -> bool {
        matches!(self, Self::Down | Self::Up)
    }

    fn between(from: Pos2, to: Pos2) -> Option<Self> {
        let dx = to.x - from.x;
        let dy = to.y - from.y;
        if dx.abs() <= ALIGN_EPSILON && dy.abs() <= ALIGN_EPSILON {
            None
        } else if dx.abs() >= dy.abs() {
            Some(if dx > 0.0 { Self::Right } else { Self::Left })
        } else {
            Some(if dy > 0.0 { Self::Down } else { Self::Up })
        }
    }
}

type Cell = (i32, i32);

#[derive(Debug)]
struct Frame {
    cell: Cell,
    heading: Option<Heading>,
    cost: f32,
    order: [Heading; 4],
    next: usize,
}

/// Compute a route from `start` to `end` avoiding `obstacles`.
///
/// Never fails: when no clear lattice route exists within the search bounds
/// the orthogonal Z-shape is returned even if it crosses an obstacle.
pub fn find_route(start: Pos2, end: Pos2, obstacles: &[Obstacle], config: &RoutingConfig) -> Route {
    if start.distance(end) <= ALIGN_EPSILON {
        return Route {
            points: vec![start],
            outcome: RouteOutcome::Degenerate,
        };
    }

    let direct = Line::new(start, end);
    if direct.is_orthogonal() && !straight_line_intersects_object(direct, obstacles) {
        return Route {
            points: vec![start, end],
            outcome: RouteOutcome::Direct,
        };
    }

    // The Z-shape already has Manhattan length, nothing orthogonal is shorter
    let z_route = orthogonal_plan(start, end);
    if polyline_is_clear(&z_route, obstacles) {
        return Route {
            points: z_route,
            outcome: RouteOutcome::Direct,
        };
    }

    let mut search = LatticeSearch::new(start, end, obstacles, config);
    let found = search.run();
    let explored = search.explored;

    match found {
        Some(points) => {
            tracing::debug!(explored, points = points.len(), "lattice route found");
            Route {
                points,
                outcome: RouteOutcome::Lattice { explored },
            }
        }
        None => {
            tracing::debug!(explored, "no clear lattice route, using fallback");
            Route {
                points: z_route,
                outcome: RouteOutcome::Fallback { explored },
            }
        }
    }
}

struct LatticeSearch<'a> {
    start: Pos2,
    end: Pos2,
    obstacles: &'a [Obstacle],
    step: f32,
    turn_penalty: f32,
    min_cell: Cell,
    max_cell: Cell,
    max_depth: usize,
    max_explored: usize,
    explored: usize,
    best: Option<(f32, PathPlan)>,
}

impl<'a> LatticeSearch<'a> {
    fn new(start: Pos2, end: Pos2, obstacles: &'a [Obstacle], config: &RoutingConfig) -> Self {
        let step = if config.increment.is_finite() && config.increment >= 1.0 {
            config.increment
        } else {
            1.0
        };
        let margin = step * config.margin_cells.max(1) as f32;

        // Only obstacles near the endpoints widen the search region
        let mut region = Rect::from_two_pos(start, end);
        let reach = region.expand(margin);
        for obstacle in obstacles {
            if obstacle.bounds.intersects(reach) {
                region = region.union(obstacle.bounds);
            }
        }
        let region = region.expand(margin);

        let to_cell =
            |v: f32, origin: f32, round: fn(f32) -> f32| round((v - origin) / step) as i32;
        let min_cell = (
            to_cell(region.min.x, start.x, f32::floor),
            to_cell(region.min.y, start.y, f32::floor),
        );
        let max_cell = (
            to_cell(region.max.x, start.x, f32::ceil),
            to_cell(region.max.y, start.y, f32::ceil),
        );

        let span_cells = ((region.width() + region.height()) / step).ceil() as usize;

        Self {
            start,
            end,
            obstacles,
            step,
            turn_penalty: config.turn_penalty.max(0.0),
            min_cell,
            max_cell,
            max_depth: span_cells * 2 + 4,
            max_explored: config.max_explored,
            explored: 0,
            best: None,
        }
    }

    fn point(&self, cell: Cell) -> Pos2 {
        pos2(
            self.start.x + cell.0 as f32 * self.step,
            self.start.y + cell.1 as f32 * self.step,
        )
    }

    fn in_bounds(&self, cell: Cell) -> bool {
        (self.min_cell.0..=self.max_cell.0).contains(&cell.0)
            && (self.min_cell.1..=self.max_cell.1).contains(&cell.1)
    }

    fn best_cost(&self) -> f32 {
        self.best.as_ref().map_or(f32::INFINITY, |(cost, _)| *cost)
    }

    fn blocked(&self, from: Pos2, to: Pos2) -> bool {
        straight_line_intersects_object(Line::new(from, to), self.obstacles)
    }

    /// Preferred expansion order from `point`
    fn order_from(&self, point: Pos2) -> [Heading; 4] {
        let dx = self.end.x - point.x;
        let dy = self.end.y - point.y;
        let vertical_major = dy.abs() >= dx.abs();

        let rank = |h: &Heading| -> u8 {
            let toward = match h {
                Heading::Right => dx > ALIGN_EPSILON,
                Heading::Left => dx < -ALIGN_EPSILON,
                Heading::Down => dy > ALIGN_EPSILON,
                Heading::Up => dy < -ALIGN_EPSILON,
            };
            match (toward, h.is_vertical() == vertical_major) {
                (true, true) => 0,
                (true, false) => 1,
                (false, _) => 2,
            }
        };

        let mut order = BASE_ORDER;
        order.sort_by_key(rank);
        order
    }

    /// Final one- or two-segment leg from a lattice point into the end
    /// point, with its cost. `None` when too far away or blocked.
    fn tail(&self, from: Pos2, heading: Option<Heading>) -> Option<(Vec<Pos2>, f32)> {
        let dx = (self.end.x - from.x).abs();
        let dy = (self.end.y - from.y).abs();
        let reach = self.step + ALIGN_EPSILON;
        if dx > reach || dy > reach {
            return None;
        }

        let legs = if dx <= ALIGN_EPSILON || dy <= ALIGN_EPSILON {
            vec![self.end]
        } else {
            let corner = match heading {
                Some(h) if h.is_vertical() => pos2(from.x, self.end.y),
                _ => pos2(self.end.x, from.y),
            };
            vec![corner, self.end]
        };

        let mut prev = from;
        let mut current = heading;
        let mut cost = 0.0;
        for &p in &legs {
            if self.blocked(prev, p) {
                return None;
            }
            let leg_heading = Heading::between(prev, p);
            if let (Some(a), Some(b)) = (current, leg_heading) {
                if a != b {
                    cost += self.turn_penalty;
                }
            }
            cost += prev.distance(p);
            current = leg_heading.or(current);
            prev = p;
        }
        Some((legs, cost))
    }

    fn offer(&mut self, stack: &[Frame], extra: Option<Pos2>, tail: Vec<Pos2>, cost: f32) {
        // Strictly cheaper only: the first route found wins ties
        if cost >= self.best_cost() {
            return;
        }
        let mut points: PathPlan = stack.iter().map(|f| self.point(f.cell)).collect();
        points.extend(extra);
        points.extend(tail);
        simplify(&mut points);
        self.best = Some((cost, points));
    }

    fn run(&mut self) -> Option<PathPlan> {
        let origin: Cell = (0, 0);
        let mut stack = vec![Frame {
            cell: origin,
            heading: None,
            cost: 0.0,
            order: self.order_from(self.start),
            next: 0,
        }];
        let mut on_path: HashSet<Cell> = HashSet::from([origin]);
        let mut visited: HashMap<(Cell, Heading), f32> = HashMap::new();

        if let Some((tail, cost)) = self.tail(self.start, None) {
            self.offer(&stack, None, tail, cost);
        }

        while let Some(frame) = stack.last_mut() {
            if self.explored >= self.max_explored {
                tracing::debug!(explored = self.explored, "lattice search budget exhausted");
                break;
            }

            if frame.next >= frame.order.len() {
                on_path.remove(&frame.cell);
                stack.pop();
                continue;
            }

            let heading = frame.order[frame.next];
            frame.next += 1;
            let (cell, prev_heading, cost) = (frame.cell, frame.heading, frame.cost);

            let (dx, dy) = heading.delta();
            let next_cell = (cell.0 + dx, cell.1 + dy);
            if !self.in_bounds(next_cell) || on_path.contains(&next_cell) {
                continue;
            }
            if stack.len() >= self.max_depth {
                continue;
            }

            let turn = prev_heading.is_some_and(|h| h != heading);
            let next_cost = cost + self.step + if turn { self.turn_penalty } else { 0.0 };
            let next_point = self.point(next_cell);
            if next_cost + manhattan(next_point, self.end) >= self.best_cost() {
                continue;
            }
            if visited
                .get(&(next_cell, heading))
                .is_some_and(|&seen| seen <= next_cost)
            {
                continue;
            }
            if self.blocked(self.point(cell), next_point) {
                continue;
            }

            self.explored += 1;
            visited.insert((next_cell, heading), next_cost);

            if let Some((tail, tail_cost)) = self.tail(next_point, Some(heading)) {
                self.offer(&stack, Some(next_point), tail, next_cost + tail_cost);
                continue;
            }

            on_path.insert(next_cell);
            let order = self.order_from(next_point);
            stack.push(Frame {
                cell: next_cell,
                heading: Some(heading),
                cost: next_cost,
                order,
                next: 0,
            });
        }

        self.best.take().map(|(_, points)| points)
    }
}
