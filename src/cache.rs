//! Lock-sharded route cache.

use dashmap::DashMap;

use crate::geometry::Location;
use crate::traits::{CacheKey, RouteCache};

/// [`RouteCache`] backed by a [`DashMap`].
///
/// Entries never expire on their own; the owner clears the whole map when
/// blockages change.
#[derive(Debug, Default)]
pub struct ShardedRouteCache {
    entries: DashMap<CacheKey, Vec<Location>>,
}

impl ShardedRouteCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RouteCache for ShardedRouteCache {
    fn get(&self, key: &CacheKey) -> Option<Vec<Location>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn insert(&self, key: CacheKey, path: Vec<Location>) {
        self.entries.insert(key, path);
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(hour: u32, minute: u32) -> CacheKey {
        CacheKey {
            origin: Location::new(0, 0),
            destination: Location::new(3, 0),
            hour,
            minute,
        }
    }

    #[test]
    fn test_get_returns_copy() {
        let cache = ShardedRouteCache::new();
        let path = vec![Location::new(0, 0), Location::new(1, 0)];
        cache.insert(key(8, 0), path.clone());

        let mut copy = cache.get(&key(8, 0)).unwrap();
        copy.push(Location::new(9, 9));
        assert_eq!(cache.get(&key(8, 0)).unwrap(), path);
    }

    #[test]
    fn test_key_includes_minute() {
        let cache = ShardedRouteCache::new();
        cache.insert(key(8, 0), vec![Location::new(0, 0)]);
        assert!(cache.get(&key(8, 1)).is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
