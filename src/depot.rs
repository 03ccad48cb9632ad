//! GLP supply points.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::geometry::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DepotKind {
    /// Unbounded stock; never depletes.
    Central,
    /// Finite stock, restored to capacity at midnight.
    Intermediate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Depot {
    pub id: String,
    pub location: Location,
    pub kind: DepotKind,
    /// Capacity in m³. `None` for the central depot.
    pub capacity: Option<f64>,
    /// Current stock in m³. Ignored for the central depot.
    pub level: f64,
}

impl Depot {
    pub fn central(id: impl Into<String>, location: Location) -> Self {
        Self {
            id: id.into(),
            location,
            kind: DepotKind::Central,
            capacity: None,
            level: 0.0,
        }
    }

    pub fn intermediate(id: impl Into<String>, location: Location, capacity: f64) -> Self {
        Self {
            id: id.into(),
            location,
            kind: DepotKind::Intermediate,
            capacity: Some(capacity),
            level: capacity,
        }
    }

    pub fn is_central(&self) -> bool {
        self.kind == DepotKind::Central
    }

    /// Take `quantity` m³ out of the depot.
    ///
    /// Returns false (and leaves the level untouched) if the quantity is
    /// negative or exceeds the current stock.
    pub fn extract(&mut self, quantity: f64) -> bool {
        if quantity < 0.0 {
            return false;
        }
        match self.kind {
            DepotKind::Central => true,
            DepotKind::Intermediate => {
                if quantity > self.level {
                    return false;
                }
                self.level -= quantity;
                true
            }
        }
    }

    /// Restore an intermediate depot to full capacity.
    pub fn refill(&mut self) {
        if let Some(capacity) = self.capacity {
            self.level = capacity;
        }
    }

    /// Intermediate depots refill exactly at 00:00.
    pub fn is_refill_time(&self, now: NaiveDateTime) -> bool {
        self.kind == DepotKind::Intermediate && now.hour() == 0 && now.minute() == 0
    }

    /// Stock available for extraction. Infinite for the central depot.
    pub fn available(&self) -> f64 {
        match self.kind {
            DepotKind::Central => f64::INFINITY,
            DepotKind::Intermediate => self.level,
        }
    }
}
