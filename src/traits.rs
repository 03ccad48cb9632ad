//! Seams between the planner core and its collaborators.
//!
//! Callers may supply their own implementations; the crate ships a
//! sharded in-memory cache and a no-op sink.

use crate::geometry::Location;
use crate::monitor::RouteStatus;
use crate::simulation::SimulationState;

/// Memoisation key for timed path queries: endpoints plus the departure
/// hour and minute. The calendar date is not part of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub origin: Location,
    pub destination: Location,
    pub hour: u32,
    pub minute: u32,
}

/// Shared store of computed paths.
///
/// Implementations must tolerate concurrent `get`/`insert` from many
/// threads; fitness evaluation hits the cache from the rayon pool.
pub trait RouteCache: Send + Sync {
    /// Returns an owned copy of the cached path.
    fn get(&self, key: &CacheKey) -> Option<Vec<Location>>;

    fn insert(&self, key: CacheKey, path: Vec<Location>);

    /// Drop every entry. Called whenever the blockage set changes.
    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receives live snapshots from the simulation engine.
pub trait StatusSink: Send + Sync {
    fn publish_simulation(&self, state: &SimulationState);

    fn publish_routes(&self, routes: &[RouteStatus]);
}

/// A sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn publish_simulation(&self, _state: &SimulationState) {}

    fn publish_routes(&self, _routes: &[RouteStatus]) {}
}
