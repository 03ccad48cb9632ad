//! Grid coordinates and Manhattan distance.
//!
//! One grid cell is one kilometre; all movement is axis-aligned.

use serde::{Deserialize, Serialize};

/// An integer grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

impl Location {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance in cells (km).
    pub fn distance_to(&self, other: &Location) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }

    /// The four axis-aligned neighbours, unchecked against any bounds.
    pub fn neighbors(&self) -> [Location; 4] {
        [
            Location::new(self.x + 1, self.y),
            Location::new(self.x - 1, self.y),
            Location::new(self.x, self.y + 1),
            Location::new(self.x, self.y - 1),
        ]
    }

    /// True when `other` is exactly one axis step away.
    pub fn is_adjacent(&self, other: &Location) -> bool {
        self.distance_to(other) == 1
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Total Manhattan length of a sequence of cells.
pub fn path_length(points: &[Location]) -> i32 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}
