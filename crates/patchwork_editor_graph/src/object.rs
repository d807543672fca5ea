// SPDX-License-Identifier: MIT OR Apache-2.0
//! Patch objects placed on the canvas.

use crate::gui_objects::{MessageBox, Toggle};
use crate::iolet::{Iolet, IoletDirection, IoletRef};
use egui::{pos2, vec2, Pos2, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Width of an iolet along the object's edge
pub const IOLET_WIDTH: f32 = 7.0;
/// Height of the iolet grab area
pub const IOLET_HEIGHT: f32 = 4.0;

/// Unique identifier for a patch object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    /// Create a new random object ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// What kind of object sits in the box
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKind {
    /// `[tgl]`
    Toggle(Toggle),
    /// Message box
    Message(MessageBox),
    /// `[cnv]` background decoration
    Canvas,
    /// Any other object, identified by its creation text
    Text(String),
}

impl ObjectKind {
    /// Short name used in logs
    pub fn name(&self) -> &str {
        match self {
            Self::Toggle(_) => "tgl",
            Self::Message(_) => "msg",
            Self::Canvas => "cnv",
            Self::Text(text) => text.split_whitespace().next().unwrap_or(""),
        }
    }
}

/// An object instance on the canvas
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    /// Unique instance ID
    pub id: ObjectId,
    /// Object kind and GUI state
    pub kind: ObjectKind,
    /// Bounds in canvas space
    pub bounds: Rect,
    /// Inlets, left to right
    pub inlets: Vec<Iolet>,
    /// Outlets, left to right
    pub outlets: Vec<Iolet>,
}

impl Object {
    /// Create an object with the default iolets for its kind
    pub fn new(kind: ObjectKind, bounds: Rect) -> Self {
        let (inlets, outlets) = match kind {
            ObjectKind::Toggle(_) | ObjectKind::Message(_) => {
                (vec![Iolet::inlet(0, false)], vec![Iolet::outlet(0, false)])
            }
            ObjectKind::Canvas | ObjectKind::Text(_) => (Vec::new(), Vec::new()),
        };
        Self {
            id: ObjectId::new(),
            kind,
            bounds,
            inlets,
            outlets,
        }
    }

    /// Create a text object with explicit iolets (`true` marks a signal iolet)
    pub fn text(text: impl Into<String>, bounds: Rect, inlets: &[bool], outlets: &[bool]) -> Self {
        Self::new(ObjectKind::Text(text.into()), bounds).with_iolets(inlets, outlets)
    }

    /// Replace the iolets (`true` marks a signal iolet)
    pub fn with_iolets(mut self, inlets: &[bool], outlets: &[bool]) -> Self {
        self.inlets = inlets
            .iter()
            .enumerate()
            .map(|(i, &sig)| Iolet::inlet(i, sig))
            .collect();
        self.outlets = outlets
            .iter()
            .enumerate()
            .map(|(i, &sig)| Iolet::outlet(i, sig))
            .collect();
        self
    }

    /// Decorations are ignored by routing
    pub fn is_obstacle(&self) -> bool {
        !matches!(self.kind, ObjectKind::Canvas)
    }

    fn iolets(&self, direction: IoletDirection) -> &[Iolet] {
        match direction {
            IoletDirection::Inlet => &self.inlets,
            IoletDirection::Outlet => &self.outlets,
        }
    }

    /// Get an iolet by index and direction
    pub fn iolet(&self, index: usize, direction: IoletDirection) -> Option<&Iolet> {
        self.iolets(direction).get(index)
    }

    /// Reference to one of this object's iolets
    pub fn iolet_ref(&self, iolet: &Iolet) -> IoletRef {
        IoletRef {
            object: self.id,
            index: iolet.index,
            direction: iolet.direction,
        }
    }

    /// Point where connections attach: top edge for inlets, bottom edge for
    /// outlets, spread evenly from the left to the right edge.
    pub fn iolet_anchor(&self, index: usize, direction: IoletDirection) -> Option<Pos2> {
        let count = self.iolets(direction).len();
        if index >= count {
            return None;
        }

        let span = (self.bounds.width() - IOLET_WIDTH).max(0.0);
        let offset = if count > 1 {
            span * index as f32 / (count - 1) as f32
        } else {
            0.0
        };
        let x = self.bounds.left() + offset + IOLET_WIDTH / 2.0;
        let y = match direction {
            IoletDirection::Inlet => self.bounds.top(),
            IoletDirection::Outlet => self.bounds.bottom(),
        };
        Some(pos2(x, y))
    }

    /// Grab area of an iolet, straddling the object's edge
    pub fn iolet_bounds(&self, index: usize, direction: IoletDirection) -> Option<Rect> {
        self.iolet_anchor(index, direction)
            .map(|anchor| Rect::from_center_size(anchor, vec2(IOLET_WIDTH, IOLET_HEIGHT * 2.0)))
    }

    /// Find the iolet under `point`, expanding grab areas by `tolerance`
    pub fn iolet_at(&self, point: Pos2, tolerance: f32) -> Option<IoletRef> {
        self.inlets
            .iter()
            .chain(self.outlets.iter())
            .find(|iolet| {
                self.iolet_bounds(iolet.index, iolet.direction)
                    .is_some_and(|r| r.expand(tolerance).contains(point))
            })
            .map(|iolet| self.iolet_ref(iolet))
    }
}
