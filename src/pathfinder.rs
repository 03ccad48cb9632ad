//! A* search over the city grid.
//!
//! Two entry points share one search:
//! - [`Pathfinder::find_path`] tests every cell against the departure time.
//! - [`Pathfinder::find_path_timed`] tests each cell against the time the
//!   vehicle would arrive there, and memoises results in the route cache.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use parking_lot::RwLock;
use tracing::debug;

use crate::cache::ShardedRouteCache;
use crate::geometry::Location;
use crate::grid::{Blockage, Grid};
use crate::traits::{CacheKey, RouteCache};

/// Time to cross one cell at `speed_kmh`, to the nearest nanosecond.
///
/// `None` for non-positive or non-finite speeds.
pub fn hop_duration(speed_kmh: f64) -> Option<Duration> {
    if !speed_kmh.is_finite() || speed_kmh <= 0.0 {
        return None;
    }
    Some(Duration::nanoseconds((3.6e12 / speed_kmh).round() as i64))
}

pub struct Pathfinder {
    grid: RwLock<Arc<Grid>>,
    cache: Arc<dyn RouteCache>,
}

impl std::fmt::Debug for Pathfinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pathfinder")
            .field("cached_paths", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Pathfinder {
    pub fn new(grid: Grid) -> Self {
        Self::with_cache(grid, Arc::new(ShardedRouteCache::new()))
    }

    pub fn with_cache(grid: Grid, cache: Arc<dyn RouteCache>) -> Self {
        Self {
            grid: RwLock::new(Arc::new(grid)),
            cache,
        }
    }

    /// Current grid snapshot. Cheap to clone; later blockage changes do not
    /// affect a snapshot already taken.
    pub fn grid(&self) -> Arc<Grid> {
        self.grid.read().clone()
    }

    pub fn cache(&self) -> &Arc<dyn RouteCache> {
        &self.cache
    }

    /// Replace the blockage set and invalidate every cached path.
    pub fn set_blockages(&self, blockages: Vec<Blockage>) {
        self.update_grid(|grid| grid.set_blockages(blockages));
    }

    /// Restrict enforcement to the blockages touching the given dates and
    /// invalidate every cached path.
    pub fn filter_blockages_for_dates(&self, from: NaiveDate, to: Option<NaiveDate>) {
        self.update_grid(|grid| grid.filter_for_dates(from, to));
    }

    fn update_grid(&self, change: impl FnOnce(&mut Grid)) {
        let mut guard = self.grid.write();
        let mut next = Grid::clone(&guard);
        change(&mut next);
        *guard = Arc::new(next);
        self.cache.clear();
        debug!(active = guard.active_blockages().len(), "blockages updated, route cache cleared");
    }

    /// Shortest path with every cell checked at `departure`.
    ///
    /// Returns an empty vector when no route exists.
    pub fn find_path(
        &self,
        origin: Location,
        destination: Location,
        departure: NaiveDateTime,
    ) -> Vec<Location> {
        let grid = self.grid();
        search(&grid, origin, destination, departure, None)
    }

    /// Shortest path with each cell checked at its own arrival time.
    ///
    /// Results are cached by endpoints and departure hour:minute; only
    /// non-empty paths are stored. The grid stays read-locked until the
    /// result is cached, so a blockage update cannot slip in between.
    pub fn find_path_timed(
        &self,
        origin: Location,
        destination: Location,
        departure: NaiveDateTime,
        speed_kmh: f64,
    ) -> Vec<Location> {
        let Some(hop) = hop_duration(speed_kmh) else {
            return Vec::new();
        };

        let key = CacheKey {
            origin,
            destination,
            hour: departure.hour(),
            minute: departure.minute(),
        };
        let grid = self.grid.read();
        if let Some(path) = self.cache.get(&key) {
            return path;
        }

        let path = search(&grid, origin, destination, departure, Some(hop));
        if !path.is_empty() {
            self.cache.insert(key, path.clone());
        }
        path
    }
}

#[derive(Debug, PartialEq, Eq)]
struct OpenNode {
    f: i32,
    seq: u64,
    g: i32,
    location: Location,
}

// Min-heap on f, FIFO among equal f.
impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other.f.cmp(&self.f).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn search(
    grid: &Grid,
    origin: Location,
    destination: Location,
    departure: NaiveDateTime,
    hop: Option<Duration>,
) -> Vec<Location> {
    if !grid.in_bounds(&origin) || !grid.in_bounds(&destination) {
        return Vec::new();
    }
    if grid.is_blocked(&origin, departure) || grid.is_blocked(&destination, departure) {
        return Vec::new();
    }
    if origin == destination {
        return vec![origin];
    }

    let mut open = BinaryHeap::new();
    let mut closed: HashSet<Location> = HashSet::new();
    let mut g_score: HashMap<Location, i32> = HashMap::new();
    let mut parents: HashMap<Location, Location> = HashMap::new();
    let mut seq = 0u64;

    g_score.insert(origin, 0);
    open.push(OpenNode {
        f: origin.distance_to(&destination),
        seq,
        g: 0,
        location: origin,
    });

    while let Some(node) = open.pop() {
        if node.location == destination {
            return reconstruct(&parents, destination);
        }
        if !closed.insert(node.location) {
            continue;
        }

        let g = node.g + 1;
        let arrival = match hop {
            Some(step) => departure + step * g,
            None => departure,
        };

        for next in node.location.neighbors() {
            if !grid.in_bounds(&next) || closed.contains(&next) || grid.is_blocked(&next, arrival) {
                continue;
            }
            if g_score.get(&next).is_none_or(|&known| g < known) {
                g_score.insert(next, g);
                parents.insert(next, node.location);
                seq += 1;
                open.push(OpenNode {
                    f: g + next.distance_to(&destination),
                    seq,
                    g,
                    location: next,
                });
            }
        }
    }

    Vec::new()
}

fn reconstruct(parents: &HashMap<Location, Location>, destination: Location) -> Vec<Location> {
    let mut path = vec![destination];
    let mut current = destination;
    while let Some(&previous) = parents.get(&current) {
        path.push(previous);
        current = previous;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn open_grid() -> Grid {
        Grid::new(10, 10, Vec::new())
    }

    #[test]
    fn test_hop_duration() {
        assert_eq!(hop_duration(50.0), Some(Duration::seconds(72)));
        assert_eq!(hop_duration(40.0), Some(Duration::seconds(90)));
        assert_eq!(hop_duration(70.0), Some(Duration::nanoseconds(51_428_571_429)));
        assert_eq!(hop_duration(f64::NAN), None);
        assert_eq!(hop_duration(0.0), None);
        assert_eq!(hop_duration(-5.0), None);
    }

    #[test]
    fn test_same_point_single_cell() {
        let finder = Pathfinder::new(open_grid());
        let p = Location::new(3, 3);
        assert_eq!(finder.find_path(p, p, at(8, 0)), vec![p]);
    }

    #[test]
    fn test_out_of_bounds_is_empty() {
        let finder = Pathfinder::new(open_grid());
        assert!(finder.find_path(Location::new(0, 0), Location::new(11, 0), at(8, 0)).is_empty());
    }

    #[test]
    fn test_path_is_contiguous() {
        let finder = Pathfinder::new(open_grid());
        let path = finder.find_path(Location::new(1, 2), Location::new(7, 9), at(8, 0));
        assert_eq!(path.first(), Some(&Location::new(1, 2)));
        assert_eq!(path.last(), Some(&Location::new(7, 9)));
        for pair in path.windows(2) {
            assert!(pair[0].is_adjacent(&pair[1]));
        }
    }

    #[test]
    fn test_blocked_destination_is_empty() {
        let mut grid = open_grid();
        grid.set_blockages(vec![Blockage::new(at(0, 0), at(23, 0), vec![Location::new(5, 5)])]);
        let finder = Pathfinder::new(grid);
        assert!(finder.find_path(Location::new(0, 0), Location::new(5, 5), at(8, 0)).is_empty());
    }

    #[test]
    fn test_timed_beats_late_blockage() {
        // Wall at x=2 closes 10 minutes after departure; the vehicle crosses it
        // after 2 hops (144 s).
        let wall: Vec<Location> = (0..=10).map(|y| Location::new(2, y)).collect();
        let mut grid = open_grid();
        grid.set_blockages(vec![Blockage::new(at(8, 10), at(12, 0), wall)]);
        let finder = Pathfinder::new(grid);

        let timed =
            finder.find_path_timed(Location::new(0, 0), Location::new(4, 0), at(8, 0), 50.0);
        assert_eq!(timed.len(), 5);

        let static_path = finder.find_path(Location::new(0, 0), Location::new(4, 0), at(8, 30));
        assert!(static_path.is_empty());
    }

    #[test]
    fn test_timed_results_are_cached_and_cleared() {
        let finder = Pathfinder::new(open_grid());
        let path = finder.find_path_timed(Location::new(0, 0), Location::new(3, 3), at(8, 0), 50.0);
        assert_eq!(path.len(), 7);
        assert_eq!(finder.cache().len(), 1);

        finder.set_blockages(Vec::new());
        assert!(finder.cache().is_empty());
    }

    #[test]
    fn test_empty_results_not_cached() {
        let mut grid = open_grid();
        grid.set_blockages(vec![Blockage::new(at(0, 0), at(23, 0), vec![Location::new(3, 3)])]);
        let finder = Pathfinder::new(grid);
        let path = finder.find_path_timed(Location::new(0, 0), Location::new(3, 3), at(8, 0), 50.0);
        assert!(path.is_empty());
        assert!(finder.cache().is_empty());
    }
}
