//! A vehicle's plan: stops, refuelling, consumption and its movement trace.
//!
//! The route visits `origin -> stops... -> destination`. Distances and fuel
//! are kept in step with the stop list: every mutation recomputes them and
//! drops any previously built trace.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::fleet::{GLP_DENSITY, Vehicle, fuel_for_weight};
use crate::geometry::Location;
use crate::grid::Grid;
use crate::order::Order;
use crate::pathfinder::{Pathfinder, hop_duration};
use crate::trace::{MovementTrace, StepKind};

/// Time spent handing over GLP at a delivery stop.
pub const DELIVERY_DWELL_MINUTES: i64 = 15;

/// Orders with a window shorter than this pull refuelling to the central depot.
const URGENT_WINDOW_HOURS: i64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopKind {
    Delivery,
    /// Refill GLP at the central depot. The tank is topped up as well.
    GlpReload,
    Refuel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stop {
    pub location: Location,
    pub kind: StopKind,
}

impl Stop {
    pub fn delivery(location: Location) -> Self {
        Self { location, kind: StopKind::Delivery }
    }

    pub fn glp_reload(location: Location) -> Self {
        Self { location, kind: StopKind::GlpReload }
    }

    pub fn refuel(location: Location) -> Self {
        Self { location, kind: StopKind::Refuel }
    }

    /// Both reload and refuel stops fill the fuel tank.
    pub fn refills_fuel(&self) -> bool {
        matches!(self.kind, StopKind::GlpReload | StopKind::Refuel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteEventKind {
    Start,
    Delivery,
    FuelRefill,
    GlpReload,
    Finish,
    UnreachableStop,
    Breakdown,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEvent {
    pub kind: RouteEventKind,
    /// Simulated time of the event; `None` for events recorded while planning.
    pub at: Option<NaiveDateTime>,
    pub location: Location,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub vehicle_code: String,
    pub origin: Location,
    pub destination: Location,
    stops: Vec<Stop>,
    nodes: Vec<Location>,
    /// Lengths of `origin -> stops... -> destination`, one per leg.
    legs: Vec<i32>,
    orders: Vec<Order>,
    unserved: Vec<Order>,
    distance: i32,
    fuel_used: f64,
    events: Vec<RouteEvent>,
    trace: Option<MovementTrace>,
    pub departure: Option<NaiveDateTime>,
    pub completed: bool,
    pub cancelled: bool,
}

impl Route {
    pub fn new(vehicle_code: impl Into<String>, origin: Location, destination: Location) -> Self {
        let mut route = Self {
            id: Uuid::new_v4(),
            vehicle_code: vehicle_code.into(),
            origin,
            destination,
            stops: Vec::new(),
            nodes: Vec::new(),
            legs: Vec::new(),
            orders: Vec::new(),
            unserved: Vec::new(),
            distance: 0,
            fuel_used: 0.0,
            events: Vec::new(),
            trace: None,
            departure: None,
            completed: false,
            cancelled: false,
        };
        route.invalidate();
        route
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    /// Every grid cell traversed, once the trace has been built.
    pub fn nodes(&self) -> &[Location] {
        &self.nodes
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Orders dropped because their stop could not be reached.
    pub fn unserved(&self) -> &[Order] {
        &self.unserved
    }

    pub fn events(&self) -> &[RouteEvent] {
        &self.events
    }

    /// Total length in km.
    pub fn distance(&self) -> i32 {
        self.distance
    }

    pub fn fuel_used(&self) -> f64 {
        self.fuel_used
    }

    pub fn trace(&self) -> Option<&MovementTrace> {
        self.trace.as_ref()
    }

    pub fn total_glp(&self) -> f64 {
        self.orders.iter().map(|o| o.quantity).sum()
    }

    pub fn delivered_count(&self) -> usize {
        self.orders.iter().filter(|o| o.is_delivered()).count()
    }

    pub fn undelivered_orders(&self) -> Vec<Order> {
        self.orders.iter().filter(|o| !o.is_delivered()).cloned().collect()
    }

    pub fn has_urgent_order(&self) -> bool {
        self.orders.iter().any(|o| o.window_hours < URGENT_WINDOW_HOURS)
    }

    /// Assign an order. Returns false if an order with the same id is
    /// already on the route.
    pub fn add_order(&mut self, order: Order) -> bool {
        if self.orders.iter().any(|o| o.id == order.id) {
            return false;
        }
        let stop = Stop::delivery(order.location);
        if !self.stops.contains(&stop) {
            self.stops.push(stop);
        }
        self.orders.push(order);
        self.invalidate();
        true
    }

    /// Unassign an order. Its stop goes too unless another order shares it.
    pub fn remove_order(&mut self, order_id: &str) -> Option<Order> {
        let index = self.orders.iter().position(|o| o.id == order_id)?;
        let order = self.orders.remove(index);
        if !self.orders.iter().any(|o| o.location == order.location) {
            self.stops.retain(|s| !(s.kind == StopKind::Delivery && s.location == order.location));
        }
        self.invalidate();
        Some(order)
    }

    pub fn register_delivery(&mut self, order_id: &str, at: NaiveDateTime) -> bool {
        let Some(order) = self.orders.iter_mut().find(|o| o.id == order_id) else {
            return false;
        };
        if order.is_delivered() {
            return false;
        }
        order.mark_delivered(at);
        let (location, client) = (order.location, order.client_id.clone());
        self.record_event(
            RouteEventKind::Delivery,
            Some(at),
            location,
            format!("delivered order {order_id} to client {client}"),
        );
        true
    }

    pub fn record_event(
        &mut self,
        kind: RouteEventKind,
        at: Option<NaiveDateTime>,
        location: Location,
        description: impl Into<String>,
    ) {
        self.events.push(RouteEvent {
            kind,
            at,
            location,
            description: description.into(),
        });
    }

    /// Abandon the route. Undelivered orders stay on it for the caller to
    /// collect.
    pub fn cancel(&mut self, at: NaiveDateTime, location: Location, reason: &str) {
        self.cancelled = true;
        self.record_event(RouteEventKind::Cancelled, Some(at), location, reason);
    }

    /// Reorder stops by nearest neighbour from the origin.
    pub fn sequence(&mut self) {
        if self.stops.len() > 1 {
            let mut pending = std::mem::take(&mut self.stops);
            let mut current = self.origin;
            while !pending.is_empty() {
                let mut best = 0;
                for (i, stop) in pending.iter().enumerate() {
                    let closer = current.distance_to(&stop.location)
                        < current.distance_to(&pending[best].location);
                    if closer {
                        best = i;
                    }
                }
                let stop = pending.remove(best);
                current = stop.location;
                self.stops.push(stop);
            }
        }
        self.invalidate();
    }

    /// Re-sequence the deliveries, then insert a GLP reload if the load
    /// exceeds the tank and refuelling detours wherever the fuel left would
    /// not cover the next hop plus the way from there to its nearest depot.
    pub fn refine_with_refueling(&mut self, grid: &Grid, vehicle: &Vehicle) {
        self.stops.retain(|s| s.kind == StopKind::Delivery);
        self.sequence();

        let capacity = vehicle.glp_capacity();
        let needs_reload = self.total_glp() > capacity;
        let central = grid.central_depot().map(|d| d.location);

        if let Some(central) = central {
            let mid = self.stops.len() / 2;
            if needs_reload && mid > 0 && !self.stops.iter().any(|s| s.location == central) {
                self.stops.insert(mid, Stop::glp_reload(central));
                self.record_event(
                    RouteEventKind::GlpReload,
                    None,
                    central,
                    "GLP reload at central depot",
                );
            }
        }

        let prefer_central = needs_reload || self.has_urgent_order();
        let tank = vehicle.fuel_capacity();
        let mut fuel = vehicle.fuel;
        let mut payload = Payload::start(self, vehicle);
        let mut current = self.origin;
        let mut planned: Vec<Stop> = Vec::with_capacity(self.stops.len());
        let mut refills: Vec<(Location, String)> = Vec::new();

        let targets: Vec<Option<Stop>> = self
            .stops
            .iter()
            .copied()
            .map(Some)
            .chain(std::iter::once(None))
            .collect();
        for target in targets {
            let next = target.map_or(self.destination, |s| s.location);
            let weight = payload.weight();
            let reserve = grid.nearest_depot(&next).map_or(0, |d| next.distance_to(&d.location));
            let needed = fuel_for_weight((current.distance_to(&next) + reserve) as f64, weight);

            if fuel < needed {
                let to_central = central.filter(|c| {
                    prefer_central && fuel >= fuel_for_weight(current.distance_to(c) as f64, weight)
                });
                let depot = match to_central {
                    Some(c) => grid.central_depot().filter(|d| d.location == c),
                    None => grid.nearest_depot(&current),
                };
                if let Some(depot) = depot {
                    fuel -= fuel_for_weight(current.distance_to(&depot.location) as f64, weight);
                    planned.push(Stop::refuel(depot.location));
                    refills.push((depot.location, format!("refuel at {}", depot.id)));
                    fuel = tank;
                    current = depot.location;
                }
            }

            fuel -= fuel_for_weight(current.distance_to(&next) as f64, weight);
            if let Some(stop) = target {
                payload.visit(&stop, self);
                if stop.refills_fuel() {
                    fuel = tank;
                }
                planned.push(stop);
                current = next;
            }
        }

        for (location, description) in refills {
            self.record_event(RouteEventKind::FuelRefill, None, location, description);
        }
        self.stops = planned;
        self.invalidate();
        self.calculate_consumption(vehicle);
        debug!(
            route = %self.id,
            vehicle = %self.vehicle_code,
            stops = self.stops.len(),
            distance = self.distance,
            fuel = self.fuel_used,
            "route refined"
        );
    }

    /// Fuel for the whole route, leg by leg, with the weight falling as
    /// GLP is handed over. Stores and returns the total in gallons.
    pub fn calculate_consumption(&mut self, vehicle: &Vehicle) -> f64 {
        let total = self.leg_costs(vehicle).iter().sum();
        self.fuel_used = total;
        total
    }

    /// Fuel left on arrival at the end of each leg, refilling at depot stops.
    pub fn replay_fuel(&self, vehicle: &Vehicle) -> Vec<f64> {
        let costs = self.leg_costs(vehicle);
        let mut fuel = vehicle.fuel;
        let mut levels = Vec::with_capacity(costs.len());
        for (i, cost) in costs.iter().enumerate() {
            fuel -= cost;
            levels.push(fuel);
            if self.stops.get(i).is_some_and(Stop::refills_fuel) {
                fuel = vehicle.fuel_capacity();
            }
        }
        levels
    }

    fn leg_costs(&self, vehicle: &Vehicle) -> Vec<f64> {
        let mut payload = Payload::start(self, vehicle);
        let mut costs = Vec::with_capacity(self.legs.len());
        for (i, leg) in self.legs.iter().enumerate() {
            costs.push(fuel_for_weight(*leg as f64, payload.weight()));
            if let Some(stop) = self.stops.get(i) {
                payload.visit(stop, self);
            }
        }
        costs
    }

    /// Expand the stops into grid paths with the timed pathfinder and stamp
    /// the movement trace. Built once; mutations drop it.
    ///
    /// Fuel is tracked over the real path lengths. A leg is taken only if
    /// the tank covers it and, unless the stop refills, a depot is still
    /// reachable afterwards; otherwise a refuel detour is tried first.
    /// Stops that cannot be reached either way are removed and their
    /// orders moved to [`Route::unserved`].
    pub fn build_movement_trace(
        &mut self,
        pathfinder: &Pathfinder,
        vehicle: &Vehicle,
        start: NaiveDateTime,
    ) -> Option<&MovementTrace> {
        if self.trace.is_some() {
            return self.trace.as_ref();
        }
        let speed = vehicle.speed_kmh();
        let hop = hop_duration(speed)?;
        let dwell = Duration::minutes(DELIVERY_DWELL_MINUTES);
        let tank = vehicle.fuel_capacity();
        let grid = pathfinder.grid();

        let mut walk = Walk {
            trace: MovementTrace::new(self.id, self.vehicle_code.clone(), self.origin, start),
            nodes: vec![self.origin],
            legs: Vec::with_capacity(self.stops.len() + 1),
            kept: Vec::with_capacity(self.stops.len()),
            current: self.origin,
            t: start,
            hop,
            fuel: vehicle.fuel,
        };
        let mut payload = Payload::start(self, vehicle);

        for stop in std::mem::take(&mut self.stops) {
            let weight = payload.weight();
            let mut path = route_path(pathfinder, walk.current, stop.location, walk.t, speed);
            if path.is_empty() {
                warn!(route = %self.id, stop = %stop.location, "stop unreachable, dropping it");
                self.drop_stop(stop, walk.t, "unreachable");
                continue;
            }

            let fits = |walk: &Walk, path: &[Location]| {
                let left = walk.fuel - leg_fuel(path, weight);
                let arrival = walk.t + hop * (path.len() as i32 - 1);
                left >= 0.0
                    && (stop.refills_fuel()
                        || depot_path(&grid, pathfinder, stop.location, arrival, speed)
                            .is_some_and(|(_, back)| leg_fuel(&back, weight) <= left))
            };

            if !fits(&walk, &path)
                && self.refuel_detour(&mut walk, &grid, pathfinder, speed, weight, tank)
            {
                path = route_path(pathfinder, walk.current, stop.location, walk.t, speed);
            }
            if path.is_empty() || !fits(&walk, &path) {
                warn!(
                    route = %self.id,
                    stop = %stop.location,
                    fuel = walk.fuel,
                    "stop out of fuel range, dropping it"
                );
                self.drop_stop(stop, walk.t, "out of fuel range");
                continue;
            }

            walk.follow(&path, leg_fuel(&path, weight));
            match stop.kind {
                StopKind::Delivery => {
                    let ids: Vec<String> = self
                        .orders
                        .iter()
                        .filter(|o| o.location == stop.location && !o.is_delivered())
                        .map(|o| o.id.clone())
                        .collect();
                    walk.trace.push(stop.location, walk.t, StepKind::Delivery, ids, dwell);
                    walk.t += dwell;
                }
                StopKind::GlpReload => walk.stamp(StepKind::GlpReload),
                StopKind::Refuel => walk.stamp(StepKind::Refuel),
            }
            payload.visit(&stop, self);
            if stop.refills_fuel() {
                walk.fuel = tank;
            }
            walk.kept.push(stop);
        }

        let weight = payload.weight();
        let mut home = route_path(pathfinder, walk.current, self.destination, walk.t, speed);
        if !home.is_empty()
            && leg_fuel(&home, weight) > walk.fuel
            && self.refuel_detour(&mut walk, &grid, pathfinder, speed, weight, tank)
        {
            home = route_path(pathfinder, walk.current, self.destination, walk.t, speed);
        }
        if home.is_empty() || leg_fuel(&home, weight) > walk.fuel {
            warn!(
                route = %self.id,
                vehicle = %self.vehicle_code,
                "destination not reachable, route ends early"
            );
            self.record_event(
                RouteEventKind::UnreachableStop,
                Some(walk.t),
                self.destination,
                "destination unreachable",
            );
            walk.legs.push(0);
        } else {
            walk.follow(&home, leg_fuel(&home, weight));
        }
        walk.stamp(StepKind::Finish);

        let Walk { trace, nodes, legs, kept, current, t, .. } = walk;
        self.record_event(RouteEventKind::Start, Some(start), self.origin, "route start");
        self.record_event(RouteEventKind::Finish, Some(t), current, "estimated route end");

        self.stops = kept;
        self.nodes = nodes;
        self.legs = legs;
        self.distance = self.legs.iter().sum();
        self.departure = Some(start);
        self.calculate_consumption(vehicle);
        self.trace = Some(trace);
        self.trace.as_ref()
    }

    /// Detour to the closest depot the tank still reaches and fill up there.
    /// `false` if the tank is already full or no depot is in range.
    fn refuel_detour(
        &mut self,
        walk: &mut Walk,
        grid: &Grid,
        pathfinder: &Pathfinder,
        speed: f64,
        weight: f64,
        tank: f64,
    ) -> bool {
        if walk.fuel >= tank {
            return false;
        }
        let Some((depot, path)) = depot_path(grid, pathfinder, walk.current, walk.t, speed) else {
            return false;
        };
        let cost = leg_fuel(&path, weight);
        if cost > walk.fuel {
            return false;
        }
        walk.follow(&path, cost);
        walk.stamp(StepKind::Refuel);
        walk.kept.push(Stop::refuel(walk.current));
        walk.fuel = tank;
        debug!(route = %self.id, depot = %depot, "refuel detour on traced path");
        self.record_event(
            RouteEventKind::FuelRefill,
            Some(walk.t),
            walk.current,
            format!("refuel at {depot}"),
        );
        true
    }

    fn drop_stop(&mut self, stop: Stop, at: NaiveDateTime, reason: &str) {
        self.record_event(
            RouteEventKind::UnreachableStop,
            Some(at),
            stop.location,
            format!("{:?} stop {reason}", stop.kind),
        );
        if stop.kind == StopKind::Delivery {
            let (lost, kept): (Vec<Order>, Vec<Order>) = std::mem::take(&mut self.orders)
                .into_iter()
                .partition(|o| o.location == stop.location);
            self.orders = kept;
            self.unserved.extend(lost);
        }
    }

    /// Drop derived state after the stop list changed.
    fn invalidate(&mut self) {
        dedup_adjacent(&mut self.stops);
        let mut points = Vec::with_capacity(self.stops.len() + 2);
        points.push(self.origin);
        points.extend(self.stops.iter().map(|s| s.location));
        points.push(self.destination);
        self.legs = points.windows(2).map(|w| w[0].distance_to(&w[1])).collect();
        self.distance = self.legs.iter().sum();
        self.nodes.clear();
        self.trace = None;
    }
}

/// Trace under construction: steps, grid nodes, one leg per kept stop.
struct Walk {
    trace: MovementTrace,
    nodes: Vec<Location>,
    legs: Vec<i32>,
    kept: Vec<Stop>,
    current: Location,
    t: NaiveDateTime,
    hop: Duration,
    fuel: f64,
}

impl Walk {
    /// Move cell by cell along `path`, burning `cost` gallons.
    fn follow(&mut self, path: &[Location], cost: f64) {
        for cell in path.iter().skip(1) {
            self.t += self.hop;
            self.trace.push(*cell, self.t, StepKind::Move, Vec::new(), Duration::zero());
        }
        self.nodes.extend(path.iter().skip(1));
        self.legs.push(path.len().saturating_sub(1) as i32);
        self.fuel -= cost;
        if let Some(last) = path.last() {
            self.current = *last;
        }
    }

    fn stamp(&mut self, kind: StepKind) {
        self.trace.push(self.current, self.t, kind, Vec::new(), Duration::zero());
    }
}

fn route_path(
    pathfinder: &Pathfinder,
    from: Location,
    to: Location,
    t: NaiveDateTime,
    speed: f64,
) -> Vec<Location> {
    if from == to {
        return vec![from];
    }
    pathfinder.find_path_timed(from, to, t, speed)
}

fn leg_fuel(path: &[Location], weight: f64) -> f64 {
    fuel_for_weight(path.len().saturating_sub(1) as f64, weight)
}

/// Shortest reachable path from `from` to any depot, with the depot's id.
fn depot_path(
    grid: &Grid,
    pathfinder: &Pathfinder,
    from: Location,
    t: NaiveDateTime,
    speed: f64,
) -> Option<(String, Vec<Location>)> {
    grid.depots()
        .iter()
        .map(|d| (d.id.clone(), route_path(pathfinder, from, d.location, t, speed)))
        .filter(|(_, path)| !path.is_empty())
        .min_by_key(|(_, path)| path.len())
}

/// Collapse consecutive stops at one cell. Two depot stops merge into a
/// GLP reload, which also refuels.
fn dedup_adjacent(stops: &mut Vec<Stop>) {
    let mut merged: Vec<Stop> = Vec::with_capacity(stops.len());
    for stop in stops.drain(..) {
        if let Some(last) = merged.last_mut() {
            if last.location == stop.location {
                if last.kind == stop.kind {
                    continue;
                }
                if last.kind != StopKind::Delivery && stop.kind != StopKind::Delivery {
                    last.kind = StopKind::GlpReload;
                    continue;
                }
            }
        }
        merged.push(stop);
    }
    *stops = merged;
}

/// GLP on board while walking the stop list.
///
/// The vehicle leaves with as much of the route's GLP as fits (or what it
/// already carries, if more), hands it over stop by stop and tops up to
/// the remaining demand at reload stops.
struct Payload {
    tare: f64,
    capacity: f64,
    load: f64,
    remaining: f64,
}

impl Payload {
    fn start(route: &Route, vehicle: &Vehicle) -> Self {
        let capacity = vehicle.glp_capacity();
        let remaining: f64 = route
            .orders
            .iter()
            .filter(|o| !o.is_delivered())
            .map(|o| o.quantity)
            .sum();
        Self {
            tare: vehicle.class.tare(),
            capacity,
            load: vehicle.glp.max(remaining.min(capacity)),
            remaining,
        }
    }

    fn weight(&self) -> f64 {
        self.tare + self.load * GLP_DENSITY
    }

    fn visit(&mut self, stop: &Stop, route: &Route) {
        match stop.kind {
            StopKind::Delivery => {
                let handed: f64 = route
                    .orders
                    .iter()
                    .filter(|o| o.location == stop.location && !o.is_delivered())
                    .map(|o| o.quantity)
                    .sum();
                self.load = (self.load - handed).max(0.0);
                self.remaining = (self.remaining - handed).max(0.0);
            }
            StopKind::GlpReload => self.load = self.load.max(self.remaining.min(self.capacity)),
            StopKind::Refuel => {}
        }
    }
}
