// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inlet/outlet definitions for patch objects.

use crate::object::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Iolet direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IoletDirection {
    /// Receives messages or signal
    Inlet,
    /// Emits messages or signal
    Outlet,
}

impl IoletDirection {
    /// The direction a connection's other end must have
    pub fn opposite(self) -> Self {
        match self {
            Self::Inlet => Self::Outlet,
            Self::Outlet => Self::Inlet,
        }
    }
}

/// A port on a patch object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iolet {
    /// Position among the object's iolets of the same direction
    pub index: usize,
    /// Port direction
    pub direction: IoletDirection,
    /// Audio-rate port
    pub is_signal: bool,
}

impl Iolet {
    /// Create a new inlet
    pub fn inlet(index: usize, is_signal: bool) -> Self {
        Self {
            index,
            direction: IoletDirection::Inlet,
            is_signal,
        }
    }

    /// Create a new outlet
    pub fn outlet(index: usize, is_signal: bool) -> Self {
        Self {
            index,
            direction: IoletDirection::Outlet,
            is_signal,
        }
    }

    /// Check if a connection to another iolet is valid.
    ///
    /// Signal outlets only feed signal inlets; control outlets may feed any
    /// inlet since signal inlets also accept floats.
    pub fn can_connect(&self, other: &Iolet) -> bool {
        if self.direction == other.direction {
            return false;
        }

        let (outlet, inlet) = match self.direction {
            IoletDirection::Outlet => (self, other),
            IoletDirection::Inlet => (other, self),
        };

        !outlet.is_signal || inlet.is_signal
    }
}

/// Reference to an iolet by owning object, index and direction.
///
/// Holding an `IoletRef` never keeps the object alive; lookups through the
/// canvas return `None` once the object is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoletRef {
    /// Owning object
    pub object: ObjectId,
    /// Iolet index
    pub index: usize,
    /// Iolet direction
    pub direction: IoletDirection,
}

impl IoletRef {
    /// Reference an inlet
    pub fn inlet(object: ObjectId, index: usize) -> Self {
        Self {
            object,
            index,
            direction: IoletDirection::Inlet,
        }
    }

    /// Reference an outlet
    pub fn outlet(object: ObjectId, index: usize) -> Self {
        Self {
            object,
            index,
            direction: IoletDirection::Outlet,
        }
    }
}

impl fmt::Display for IoletRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            IoletDirection::Inlet => "in",
            IoletDirection::Outlet => "out",
        };
        write!(f, "{}:{}{}", self.object, dir, self.index)
    }
}
