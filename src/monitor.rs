//! Live fleet and route state shared between the simulation driver and
//! status readers.
//!
//! Each entry is read and written atomically through its shard lock;
//! nothing is consistent across entries.

use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fleet::{Vehicle, VehicleState};
use crate::route::Route;
use crate::trace::{Phase, Position};

#[derive(Debug, Default)]
pub struct FleetRegistry {
    vehicles: DashMap<String, Vehicle>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vehicles(vehicles: impl IntoIterator<Item = Vehicle>) -> Self {
        let registry = Self::new();
        for vehicle in vehicles {
            registry.insert(vehicle);
        }
        registry
    }

    pub fn insert(&self, vehicle: Vehicle) {
        self.vehicles.insert(vehicle.code.clone(), vehicle);
    }

    pub fn get(&self, code: &str) -> Option<Vehicle> {
        self.vehicles.get(code).map(|v| v.value().clone())
    }

    pub fn contains(&self, code: &str) -> bool {
        self.vehicles.contains_key(code)
    }

    /// Mutate one vehicle under its shard lock.
    pub fn update<R>(&self, code: &str, change: impl FnOnce(&mut Vehicle) -> R) -> Option<R> {
        self.vehicles.get_mut(code).map(|mut v| change(v.value_mut()))
    }

    /// Apply `change` to every vehicle, one shard lock at a time.
    pub fn for_each_mut(&self, mut change: impl FnMut(&mut Vehicle)) {
        for mut entry in self.vehicles.iter_mut() {
            change(entry.value_mut());
        }
    }

    /// Copies of every vehicle, ordered by code.
    pub fn snapshot(&self) -> Vec<Vehicle> {
        let mut all: Vec<Vehicle> = self.vehicles.iter().map(|v| v.value().clone()).collect();
        all.sort_by(|a, b| a.code.cmp(&b.code));
        all
    }

    pub fn codes_in_state(&self, state: VehicleState) -> Vec<String> {
        let mut codes: Vec<String> = self
            .vehicles
            .iter()
            .filter(|v| v.state == state)
            .map(|v| v.key().clone())
            .collect();
        codes.sort();
        codes
    }

    pub fn count_available(&self) -> usize {
        self.vehicles.iter().filter(|v| v.is_available()).count()
    }

    pub fn clear(&self) {
        self.vehicles.clear();
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}

/// Point-in-time view of one route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStatus {
    pub route_id: Uuid,
    pub vehicle_code: String,
    pub position: Position,
    pub progress: f64,
    pub phase: Phase,
    pub delivered: usize,
    pub total: usize,
    pub fuel_used: f64,
    pub distance: i32,
    pub updated_at: NaiveDateTime,
}

impl RouteStatus {
    pub fn of(route: &Route, now: NaiveDateTime) -> Self {
        let trace = route.trace();
        let position = trace
            .and_then(|t| t.position_at(now))
            .unwrap_or_else(|| route.origin.into());
        Self {
            route_id: route.id,
            vehicle_code: route.vehicle_code.clone(),
            position,
            progress: trace.map_or(0.0, |t| t.progress_at(now)),
            phase: trace.map_or(Phase::Pending, |t| t.phase_at(now)),
            delivered: route.delivered_count(),
            total: route.orders().len(),
            fuel_used: route.fuel_used(),
            distance: route.distance(),
            updated_at: now,
        }
    }
}

/// Routes currently being driven.
#[derive(Debug, Default)]
pub struct RouteBoard {
    routes: DashMap<Uuid, Route>,
}

impl RouteBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, route: Route) {
        self.routes.insert(route.id, route);
    }

    pub fn remove(&self, id: &Uuid) -> Option<Route> {
        self.routes.remove(id).map(|(_, route)| route)
    }

    pub fn get(&self, id: &Uuid) -> Option<Route> {
        self.routes.get(id).map(|r| r.value().clone())
    }

    pub fn update<R>(&self, id: &Uuid, change: impl FnOnce(&mut Route) -> R) -> Option<R> {
        self.routes.get_mut(id).map(|mut r| change(r.value_mut()))
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.routes.iter().map(|r| *r.key()).collect()
    }

    pub fn route_for(&self, vehicle_code: &str) -> Option<Uuid> {
        self.routes
            .iter()
            .find(|r| r.vehicle_code == vehicle_code)
            .map(|r| *r.key())
    }

    pub fn statuses(&self, now: NaiveDateTime) -> Vec<RouteStatus> {
        let mut statuses: Vec<RouteStatus> =
            self.routes.iter().map(|r| RouteStatus::of(r.value(), now)).collect();
        statuses.sort_by(|a, b| a.vehicle_code.cmp(&b.vehicle_code));
        statuses
    }

    pub fn clear(&self) {
        self.routes.clear();
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::{default_fleet, IncidentKind};
    use crate::geometry::Location;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    #[test]
    fn test_registry_snapshot_is_detached() {
        let registry = FleetRegistry::from_vehicles(default_fleet(Location::new(12, 8)));
        let mut copy = registry.get("TA01").unwrap();
        copy.fuel = 0.0;
        assert_eq!(registry.get("TA01").unwrap().fuel, 25.0);
        assert_eq!(registry.snapshot().len(), 20);
        assert_eq!(registry.count_available(), 20);
    }

    #[test]
    fn test_registry_update_in_place() {
        let registry = FleetRegistry::from_vehicles(default_fleet(Location::new(12, 8)));
        let broke = registry.update("TB02", |v| {
            v.depart();
            v.register_breakdown(IncidentKind::TI1, now())
        });
        assert_eq!(broke, Some(true));
        assert_eq!(registry.codes_in_state(VehicleState::BrokenDown), vec!["TB02".to_string()]);
        assert_eq!(registry.update("NOPE", |_| ()), None);
    }

    #[test]
    fn test_route_board_status() {
        let board = RouteBoard::new();
        let route = Route::new("TC01", Location::new(12, 8), Location::new(12, 8));
        let id = route.id;
        board.insert(route);

        assert_eq!(board.route_for("TC01"), Some(id));
        let statuses = board.statuses(now());
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].phase, Phase::Pending);
        assert_eq!(statuses[0].position, Position { x: 12.0, y: 8.0 });

        assert!(board.remove(&id).is_some());
        assert!(board.is_empty());
    }
}
