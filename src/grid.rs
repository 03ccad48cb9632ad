//! City grid: bounds, time-windowed blockages and depot topology.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::depot::Depot;
use crate::geometry::Location;

/// A temporary closure of a set of cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blockage {
    pub id: Uuid,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub cells: Vec<Location>,
}

impl Blockage {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, cells: Vec<Location>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start,
            end,
            cells,
        }
    }

    /// Active iff `start <= t <= end`.
    pub fn is_active(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t <= self.end
    }

    pub fn blocks(&self, cell: &Location, t: NaiveDateTime) -> bool {
        self.is_active(t) && self.cells.contains(cell)
    }

    /// A step between adjacent cells is closed when either end is closed.
    ///
    /// Not consulted by the pathfinder, which only enforces cell closures.
    pub fn blocks_segment(&self, from: &Location, to: &Location, t: NaiveDateTime) -> bool {
        from.is_adjacent(to) && (self.blocks(from, t) || self.blocks(to, t))
    }

    /// Whether the blockage's calendar span intersects `[from, to]`.
    ///
    /// With no `to`, the blockage must cover the single day `from`.
    pub fn overlaps_dates(&self, from: NaiveDate, to: Option<NaiveDate>) -> bool {
        let first = self.start.date();
        let last = self.end.date();
        match to {
            None => first <= from && from <= last,
            Some(to) => !(last < from || first > to),
        }
    }
}

/// The city map.
///
/// Holds every loaded blockage; only the filtered subset is consulted by
/// [`Grid::is_blocked`].
#[derive(Debug, Clone)]
pub struct Grid {
    width: i32,
    height: i32,
    depots: Vec<Depot>,
    blockages: Vec<Blockage>,
    active: Vec<Blockage>,
    index: HashMap<Location, Vec<(NaiveDateTime, NaiveDateTime)>>,
}

impl Grid {
    pub fn new(width: i32, height: i32, depots: Vec<Depot>) -> Self {
        Self {
            width,
            height,
            depots,
            blockages: Vec::new(),
            active: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Bounds are inclusive on both ends.
    pub fn in_bounds(&self, location: &Location) -> bool {
        location.x >= 0 && location.x <= self.width && location.y >= 0 && location.y <= self.height
    }

    /// Replace the loaded blockages. All of them become active until a
    /// date filter narrows the set.
    pub fn set_blockages(&mut self, blockages: Vec<Blockage>) {
        self.blockages = blockages;
        self.activate(self.blockages.clone());
    }

    pub fn blockages(&self) -> &[Blockage] {
        &self.blockages
    }

    pub fn active_blockages(&self) -> &[Blockage] {
        &self.active
    }

    /// Loaded blockages whose date span intersects the range.
    pub fn blockages_for_dates(&self, from: NaiveDate, to: Option<NaiveDate>) -> Vec<Blockage> {
        self.blockages
            .iter()
            .filter(|b| b.overlaps_dates(from, to))
            .cloned()
            .collect()
    }

    /// Narrow the active set to the blockages touching the given dates.
    pub fn filter_for_dates(&mut self, from: NaiveDate, to: Option<NaiveDate>) {
        let filtered = self.blockages_for_dates(from, to);
        self.activate(filtered);
    }

    /// Loaded blockages still open at some point in `[now, now + horizon]`.
    pub fn blockages_active_within(&self, now: NaiveDateTime, horizon: Duration) -> Vec<Blockage> {
        let until = now + horizon;
        self.blockages
            .iter()
            .filter(|b| b.start <= until && b.end >= now)
            .cloned()
            .collect()
    }

    pub fn is_blocked(&self, location: &Location, t: NaiveDateTime) -> bool {
        self.index
            .get(location)
            .is_some_and(|windows| windows.iter().any(|(start, end)| *start <= t && t <= *end))
    }

    fn activate(&mut self, active: Vec<Blockage>) {
        let mut index: HashMap<Location, Vec<(NaiveDateTime, NaiveDateTime)>> = HashMap::new();
        for blockage in &active {
            for cell in &blockage.cells {
                index.entry(*cell).or_default().push((blockage.start, blockage.end));
            }
        }
        self.index = index;
        self.active = active;
    }

    pub fn depots(&self) -> &[Depot] {
        &self.depots
    }

    pub fn central_depot(&self) -> Option<&Depot> {
        self.depots.iter().find(|d| d.is_central())
    }

    /// Depot with the least Manhattan distance. First declared wins ties.
    pub fn nearest_depot(&self, location: &Location) -> Option<&Depot> {
        let mut best: Option<&Depot> = None;
        for depot in &self.depots {
            let closer = match best {
                Some(current) => {
                    location.distance_to(&depot.location) < location.distance_to(&current.location)
                }
                None => true,
            };
            if closer {
                best = Some(depot);
            }
        }
        best
    }

    pub fn intermediate_depots(&self) -> impl Iterator<Item = &Depot> {
        self.depots.iter().filter(|d| !d.is_central())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn at(d: u32, h: u32) -> NaiveDateTime {
        day(d).and_hms_opt(h, 0, 0).unwrap()
    }

    fn city() -> Grid {
        Grid::new(
            70,
            50,
            vec![
                Depot::central("CENTRAL", Location::new(12, 8)),
                Depot::intermediate("NORTE", Location::new(42, 42), 160.0),
                Depot::intermediate("ESTE", Location::new(63, 3), 160.0),
            ],
        )
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let grid = city();
        assert!(grid.in_bounds(&Location::new(0, 0)));
        assert!(grid.in_bounds(&Location::new(70, 50)));
        assert!(!grid.in_bounds(&Location::new(71, 50)));
        assert!(!grid.in_bounds(&Location::new(-1, 0)));
    }

    #[test]
    fn test_blockage_window_inclusive() {
        let blockage = Blockage::new(at(1, 8), at(1, 10), vec![Location::new(5, 5)]);
        assert!(blockage.blocks(&Location::new(5, 5), at(1, 8)));
        assert!(blockage.blocks(&Location::new(5, 5), at(1, 10)));
        assert!(!blockage.blocks(&Location::new(5, 5), at(1, 11)));
        assert!(!blockage.blocks(&Location::new(5, 6), at(1, 9)));
    }

    #[test]
    fn test_segment_blocked_when_either_end_closed() {
        let blockage = Blockage::new(at(1, 8), at(1, 10), vec![Location::new(5, 5)]);
        assert!(blockage.blocks_segment(&Location::new(5, 4), &Location::new(5, 5), at(1, 9)));
        assert!(!blockage.blocks_segment(&Location::new(5, 3), &Location::new(5, 5), at(1, 9)));
    }

    #[test]
    fn test_date_filter_narrows_index() {
        let mut grid = city();
        grid.set_blockages(vec![
            Blockage::new(at(1, 0), at(1, 23), vec![Location::new(1, 1)]),
            Blockage::new(at(3, 0), at(4, 12), vec![Location::new(2, 2)]),
        ]);
        assert!(grid.is_blocked(&Location::new(1, 1), at(1, 5)));

        grid.filter_for_dates(day(3), None);
        assert_eq!(grid.active_blockages().len(), 1);
        assert!(!grid.is_blocked(&Location::new(1, 1), at(1, 5)));
        assert!(grid.is_blocked(&Location::new(2, 2), at(4, 5)));

        assert_eq!(grid.blockages_for_dates(day(1), Some(day(4))).len(), 2);
        assert_eq!(grid.blockages_for_dates(day(2), None).len(), 0);
    }

    #[test]
    fn test_blockages_within_horizon() {
        let mut grid = city();
        grid.set_blockages(vec![
            Blockage::new(at(1, 0), at(1, 6), vec![Location::new(1, 1)]),
            Blockage::new(at(2, 6), at(2, 8), vec![Location::new(2, 2)]),
            Blockage::new(at(5, 0), at(5, 8), vec![Location::new(3, 3)]),
        ]);
        let open = grid.blockages_active_within(at(1, 12), Duration::hours(24));
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].cells, vec![Location::new(2, 2)]);
    }

    #[test]
    fn test_nearest_and_central_depot() {
        let grid = city();
        assert_eq!(grid.central_depot().map(|d| d.id.as_str()), Some("CENTRAL"));
        assert_eq!(grid.nearest_depot(&Location::new(60, 5)).map(|d| d.id.as_str()), Some("ESTE"));
        let nearest = grid.nearest_depot(&Location::new(40, 40));
        assert_eq!(nearest.map(|d| d.id.as_str()), Some("NORTE"));
        assert_eq!(grid.intermediate_depots().count(), 2);
    }
}
