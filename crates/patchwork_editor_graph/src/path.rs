// SPDX-License-Identifier: MIT OR Apache-2.0
//! Path plans and their persisted textual form.
//!
//! A [`PathPlan`] is the ordered list of points a connection is drawn
//! through: the source anchor, any waypoints, then the destination anchor.
//! [`PathState`] is the opaque token stored on the engine's connection
//! record, a list of `x y` pairs separated by commas:
//!
//! ```text
//! 50 20, 50 45, 120 45, 120 70
//! ```
//!
//! An empty state marks a plain (non-segmented) connection.

use crate::geometry::{is_orthogonal, Line, ALIGN_EPSILON};
use egui::{pos2, Pos2};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Ordered points of a connection route
pub type PathPlan = Vec<Pos2>;

/// Error when decoding a persisted path state
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathStateError {
    /// A token was not a number
    #[error("Invalid coordinate: {0:?}")]
    InvalidNumber(String),

    /// Coordinates do not pair up
    #[error("Odd number of coordinates: {0}")]
    OddCoordinateCount(usize),

    /// Less than two points
    #[error("Path needs at least two points, got {0}")]
    TooFewPoints(usize),
}

/// Serialized path plan as stored on the engine side
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathState(String);

impl PathState {
    /// Encode a plan
    pub fn from_plan(plan: &[Pos2]) -> Self {
        let text = plan
            .iter()
            .map(|p| format!("{} {}", p.x, p.y))
            .collect::<Vec<_>>()
            .join(", ");
        Self(text)
    }

    /// The raw token
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Empty states belong to plain connections
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Decode into a plan. Accepts any mix of whitespace and commas as
    /// separators.
    pub fn parse(&self) -> Result<PathPlan, PathStateError> {
        let coords = self
            .0
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|tok| !tok.is_empty())
            .map(|tok| {
                tok.parse::<f32>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| PathStateError::InvalidNumber(tok.to_string()))
            })
            .collect::<Result<Vec<f32>, _>>()?;

        if coords.len() % 2 != 0 {
            return Err(PathStateError::OddCoordinateCount(coords.len()));
        }

        let plan: PathPlan = coords.chunks(2).map(|c| pos2(c[0], c[1])).collect();
        if plan.len() < 2 {
            return Err(PathStateError::TooFewPoints(plan.len()));
        }
        Ok(plan)
    }
}

impl From<String> for PathState {
    fn from(text: String) -> Self {
        Self(text)
    }
}

impl From<&str> for PathState {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl fmt::Display for PathState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn same_point(a: Pos2, b: Pos2) -> bool {
    (a.x - b.x).abs() <= ALIGN_EPSILON && (a.y - b.y).abs() <= ALIGN_EPSILON
}

fn axis_collinear(a: Pos2, b: Pos2, c: Pos2) -> bool {
    (Line::new(a, b).is_horizontal() && Line::new(b, c).is_horizontal())
        || (Line::new(a, b).is_vertical() && Line::new(b, c).is_vertical())
}

/// Drop repeated waypoints and waypoints in the middle of a straight
/// horizontal or vertical run. Anchors are never removed.
pub fn simplify(plan: &mut PathPlan) {
    if plan.len() <= 2 {
        return;
    }

    let first = plan[0];
    let last = plan[plan.len() - 1];
    let mut out: PathPlan = Vec::with_capacity(plan.len());
    out.push(first);
    for &p in &plan[1..plan.len() - 1] {
        if !out.last().is_some_and(|&prev| same_point(prev, p)) {
            out.push(p);
        }
    }
    while out.len() > 1 && out.last().is_some_and(|&prev| same_point(prev, last)) {
        out.pop();
    }
    out.push(last);

    let mut i = 1;
    while i + 1 < out.len() {
        if axis_collinear(out[i - 1], out[i], out[i + 1]) {
            out.remove(i);
        } else {
            i += 1;
        }
    }

    *plan = out;
}

/// Two-point straight route
pub fn direct_plan(start: Pos2, end: Pos2) -> PathPlan {
    vec![start, end]
}

/// Vertical-first orthogonal route: down from the outlet, across at the
/// midpoint height, then down into the inlet.
pub fn orthogonal_plan(start: Pos2, end: Pos2) -> PathPlan {
    let mid_y = (start.y + end.y) / 2.0;
    let mut plan = vec![start, pos2(start.x, mid_y), pos2(end.x, mid_y), end];
    simplify(&mut plan);
    plan
}

/// Move the anchors of an orthogonal plan to `start` and `end`, sliding the
/// waypoint next to each anchor along its segment so every segment stays
/// horizontal or vertical. Other waypoints are kept as they are.
///
/// Plans that are too short or already broken are replaced by
/// [`orthogonal_plan`].
pub fn reanchor(plan: &[Pos2], start: Pos2, end: Pos2) -> PathPlan {
    let mut plan = plan.to_vec();
    simplify(&mut plan);

    let n = plan.len();
    if n < 3 || !is_orthogonal(&plan[1..n - 1]) {
        return orthogonal_plan(start, end);
    }

    if n == 3 {
        // The single waypoint takes one coordinate from each anchor
        plan[1] = if Line::new(plan[0], plan[1]).is_vertical() {
            pos2(start.x, end.y)
        } else {
            pos2(end.x, start.y)
        };
    } else {
        if Line::new(plan[1], plan[2]).is_horizontal() {
            plan[1].x = start.x;
        } else {
            plan[1].y = start.y;
        }
        if Line::new(plan[n - 3], plan[n - 2]).is_horizontal() {
            plan[n - 2].x = end.x;
        } else {
            plan[n - 2].y = end.y;
        }
    }

    plan[0] = start;
    plan[n - 1] = end;
    simplify(&mut plan);
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_format() {
        let plan = vec![pos2(50.0, 20.0), pos2(50.0, 45.5), pos2(120.0, 45.5)];
        let state = PathState::from_plan(&plan);
        assert_eq!(state.as_str(), "50 20, 50 45.5, 120 45.5");
        assert_eq!(state.parse().unwrap(), plan);
    }

    #[test]
    fn test_lenient_separators() {
        let state = PathState::from("  1,2   3 4,\n5 ,6 ");
        assert_eq!(
            state.parse().unwrap(),
            vec![pos2(1.0, 2.0), pos2(3.0, 4.0), pos2(5.0, 6.0)]
        );
    }

    #[test]
    fn test_malformed_states() {
        assert_eq!(
            PathState::from("1 2, 3").parse(),
            Err(PathStateError::OddCoordinateCount(3))
        );
        assert_eq!(
            PathState::from("1 2, x 4").parse(),
            Err(PathStateError::InvalidNumber("x".into()))
        );
        assert_eq!(PathState::from("1 2").parse(), Err(PathStateError::TooFewPoints(1)));
        assert!(PathState::from("nan 1, 2 3").parse().is_err());
        assert!(PathState::default().is_empty());
    }

    #[test]
    fn test_simplify() {
        let mut plan = vec![
            pos2(0.0, 0.0),
            pos2(0.0, 0.0),
            pos2(0.0, 10.0),
            pos2(0.0, 20.0),
            pos2(30.0, 20.0),
            pos2(30.0, 40.0),
            pos2(30.0, 40.0),
        ];
        simplify(&mut plan);
        assert_eq!(plan, vec![pos2(0.0, 0.0), pos2(0.0, 20.0), pos2(30.0, 20.0), pos2(30.0, 40.0)]);
    }

    #[test]
    fn test_simplify_keeps_anchors() {
        let mut plan = vec![pos2(0.0, 0.0), pos2(0.0, 10.0), pos2(0.0, 30.0)];
        simplify(&mut plan);
        assert_eq!(plan, vec![pos2(0.0, 0.0), pos2(0.0, 30.0)]);
    }

    #[test]
    fn test_orthogonal_plan() {
        let plan = orthogonal_plan(pos2(0.0, 0.0), pos2(40.0, 100.0));
        assert_eq!(
            plan,
            vec![pos2(0.0, 0.0), pos2(0.0, 50.0), pos2(40.0, 50.0), pos2(40.0, 100.0)]
        );

        let aligned = orthogonal_plan(pos2(10.0, 0.0), pos2(10.0, 100.0));
        assert_eq!(aligned, vec![pos2(10.0, 0.0), pos2(10.0, 100.0)]);
    }

    #[test]
    fn test_reanchor_unchanged() {
        let plan = vec![pos2(0.0, 0.0), pos2(0.0, 50.0), pos2(40.0, 50.0), pos2(40.0, 100.0)];
        assert_eq!(reanchor(&plan, pos2(0.0, 0.0), pos2(40.0, 100.0)), plan);
    }

    #[test]
    fn test_reanchor_moved_source() {
        let plan = vec![pos2(0.0, 0.0), pos2(0.0, 50.0), pos2(40.0, 50.0), pos2(40.0, 100.0)];
        let moved = reanchor(&plan, pos2(-10.0, 5.0), pos2(40.0, 100.0));
        assert_eq!(
            moved,
            vec![pos2(-10.0, 5.0), pos2(-10.0, 50.0), pos2(40.0, 50.0), pos2(40.0, 100.0)]
        );
        assert!(is_orthogonal(&moved));
    }

    #[test]
    fn test_reanchor_three_points() {
        let plan = vec![pos2(50.0, 0.0), pos2(50.0, 50.0), pos2(100.0, 50.0)];
        let moved = reanchor(&plan, pos2(60.0, 0.0), pos2(100.0, 70.0));
        assert_eq!(moved, vec![pos2(60.0, 0.0), pos2(60.0, 70.0), pos2(100.0, 70.0)]);
    }

    #[test]
    fn test_reanchor_broken_plan_falls_back() {
        let plan = vec![pos2(0.0, 0.0), pos2(5.0, 7.0), pos2(9.0, 30.0), pos2(40.0, 100.0)];
        let fixed = reanchor(&plan, pos2(0.0, 0.0), pos2(40.0, 100.0));
        assert_eq!(fixed, orthogonal_plan(pos2(0.0, 0.0), pos2(40.0, 100.0)));
    }
}
