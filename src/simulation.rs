//! Discrete-time simulation of the fleet.
//!
//! One tick advances the simulated clock by a minute. A driver thread paced
//! by a [`Ticker`] runs ticks at `1000 ms / speed`; callers that need
//! determinism start with [`SimulationEngine::start_stepped`] and call
//! [`SimulationEngine::step`] themselves.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration as WallDuration, Instant};

use chrono::{Duration, NaiveDateTime, Timelike};
use parking_lot::{Condvar, Mutex};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PlannerConfig;
use crate::depot::Depot;
use crate::error::{PlannerError, Result};
use crate::fleet::{IncidentKind, Vehicle, VehicleState};
use crate::geometry::Location;
use crate::grid::Blockage;
use crate::monitor::{FleetRegistry, RouteBoard, RouteStatus};
use crate::optimizer::GeneticOptimizer;
use crate::order::{Order, preprocess};
use crate::pathfinder::Pathfinder;
use crate::route::Route;
use crate::traits::{NullSink, StatusSink};

/// Pending orders above which a collapse is declared.
const COLLAPSE_PENDING_ORDERS: usize = 50;
/// Available vehicles below which a collapse is declared.
const COLLAPSE_AVAILABLE_VEHICLES: usize = 3;
const COLLAPSE_ORDERS_PER_BATCH: usize = 3;

// ============================================================================
// Scenarios
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scenario {
    DayToDay,
    Weekly,
    Collapse,
}

impl Scenario {
    /// Minutes past the hour divisible by this trigger a replan.
    pub const fn optimization_interval(self) -> u32 {
        match self {
            Scenario::DayToDay => 60,
            Scenario::Weekly => 30,
            Scenario::Collapse => 20,
        }
    }

    /// Hours between maintenance calendar checks, on the hour.
    pub const fn maintenance_interval_hours(self) -> Option<u32> {
        match self {
            Scenario::DayToDay => Some(1),
            Scenario::Weekly => Some(6),
            Scenario::Collapse => None,
        }
    }

    /// Per-minute chance of a random breakdown.
    pub const fn breakdown_probability(self) -> f64 {
        match self {
            Scenario::DayToDay => 0.0,
            Scenario::Weekly => 0.05,
            Scenario::Collapse => 0.10,
        }
    }

    /// Minutes past the hour divisible by this inject new demand.
    pub const fn demand_interval(self) -> Option<u32> {
        match self {
            Scenario::Collapse => Some(15),
            _ => None,
        }
    }

    fn optimizes_at(self, now: NaiveDateTime) -> bool {
        now.minute() % self.optimization_interval() == 0
    }

    fn checks_maintenance_at(self, now: NaiveDateTime) -> bool {
        self.maintenance_interval_hours()
            .is_some_and(|h| now.minute() == 0 && now.hour() % h == 0)
    }

    fn demands_at(self, now: NaiveDateTime) -> bool {
        self.demand_interval().is_some_and(|m| now.minute() % m == 0)
    }
}

impl FromStr for Scenario {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAY_TO_DAY" => Ok(Scenario::DayToDay),
            "WEEKLY" => Ok(Scenario::Weekly),
            "COLLAPSE" => Ok(Scenario::Collapse),
            other => Err(PlannerError::InvalidConfiguration(format!("unknown scenario {other}"))),
        }
    }
}

// ============================================================================
// Requests and snapshots
// ============================================================================

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub scenario: Scenario,
    pub start: NaiveDateTime,
    /// Stop once the clock passes `start + duration_days`. Unbounded if absent.
    pub duration_days: Option<u32>,
    pub speed: f64,
    pub breakdowns_enabled: bool,
    pub maintenance_enabled: bool,
    /// Fleet to simulate; the configured reference fleet when absent.
    pub fleet: Option<Vec<Vehicle>>,
    pub orders: Vec<Order>,
    pub blockages: Vec<Blockage>,
    pub seed: Option<u64>,
}

impl StartRequest {
    pub fn new(scenario: Scenario, start: NaiveDateTime) -> Self {
        Self {
            scenario,
            start,
            duration_days: None,
            speed: 1.0,
            breakdowns_enabled: false,
            maintenance_enabled: false,
            fleet: None,
            orders: Vec::new(),
            blockages: Vec::new(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    pub delivered_orders: usize,
    pub total_fuel: f64,
    pub total_distance: f64,
    pub routes_dispatched: usize,
    pub routes_completed: usize,
    pub routes_cancelled: usize,
    pub breakdowns: usize,
    pub generated_orders: usize,
    pub optimizations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationState {
    pub id: Option<Uuid>,
    pub scenario: Option<Scenario>,
    pub running: bool,
    pub paused: bool,
    pub now: Option<NaiveDateTime>,
    pub speed: f64,
    pub breakdowns_enabled: bool,
    pub maintenance_enabled: bool,
    /// Elapsed share of the configured duration, 0 to 100.
    pub progress: f64,
    pub ticks: u64,
    pub pending_orders: usize,
    pub active_routes: usize,
    pub available_vehicles: usize,
    pub vehicles: Vec<Vehicle>,
    pub stats: SimulationStats,
    pub termination: Option<String>,
    pub fault: Option<String>,
}

// ============================================================================
// Ticker
// ============================================================================

struct TickerState {
    interval: WallDuration,
    cancelled: bool,
}

/// Real-time pacing for the driver. Waits can be cut short by [`Ticker::cancel`].
pub struct Ticker {
    state: Mutex<TickerState>,
    signal: Condvar,
}

impl Ticker {
    pub fn new(interval: WallDuration) -> Self {
        Self {
            state: Mutex::new(TickerState {
                interval,
                cancelled: false,
            }),
            signal: Condvar::new(),
        }
    }

    /// Interval for `1000 ms / speed`.
    pub fn interval_for(speed: f64) -> WallDuration {
        WallDuration::from_secs_f64(1.0 / speed)
    }

    pub fn set_interval(&self, interval: WallDuration) {
        self.state.lock().interval = interval;
        self.signal.notify_all();
    }

    /// Sleep one interval. Returns false if cancelled before or during the wait.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        let deadline = Instant::now() + state.interval;
        while !state.cancelled {
            if self.signal.wait_until(&mut state, deadline).timed_out() {
                return !state.cancelled;
            }
        }
        false
    }

    pub fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.signal.notify_all();
    }

    pub fn reset(&self, interval: WallDuration) {
        let mut state = self.state.lock();
        state.cancelled = false;
        state.interval = interval;
    }
}

// ============================================================================
// Engine
// ============================================================================

struct Clock {
    id: Option<Uuid>,
    scenario: Option<Scenario>,
    start: NaiveDateTime,
    now: NaiveDateTime,
    end: Option<NaiveDateTime>,
    speed: f64,
    breakdowns_enabled: bool,
    maintenance_enabled: bool,
    pending: Vec<Order>,
    injected: Vec<(String, IncidentKind)>,
    stats: SimulationStats,
    rng: SmallRng,
    ticks: u64,
    demand_seq: u64,
    termination: Option<String>,
    fault: Option<String>,
}

impl Clock {
    fn idle() -> Self {
        Self {
            id: None,
            scenario: None,
            start: NaiveDateTime::default(),
            now: NaiveDateTime::default(),
            end: None,
            speed: 1.0,
            breakdowns_enabled: false,
            maintenance_enabled: false,
            pending: Vec::new(),
            injected: Vec::new(),
            stats: SimulationStats::default(),
            rng: SmallRng::seed_from_u64(0),
            ticks: 0,
            demand_seq: 0,
            termination: None,
            fault: None,
        }
    }

    fn progress(&self) -> f64 {
        let Some(end) = self.end else {
            return 0.0;
        };
        let total = (end - self.start).num_minutes();
        if total <= 0 {
            return 100.0;
        }
        let elapsed = (self.now - self.start).num_minutes();
        (elapsed as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
    }
}

struct Shared {
    config: PlannerConfig,
    pathfinder: Pathfinder,
    optimizer: GeneticOptimizer,
    fleet: FleetRegistry,
    routes: RouteBoard,
    depots: Mutex<Vec<Depot>>,
    clock: Mutex<Clock>,
    tick_lock: Mutex<()>,
    running: AtomicBool,
    paused: AtomicBool,
    ticker: Ticker,
    sink: Arc<dyn StatusSink>,
}

enum RouteOutcome {
    Moving { vehicle: String, cell: Location, delivered: usize },
    Completed { vehicle: String, at: Location, delivered: usize, fuel: f64, distance: i32 },
    Cancelled { vehicle: String, returned: Vec<Order> },
}

pub struct SimulationEngine {
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SimulationEngine {
    pub fn new(config: PlannerConfig) -> Result<Self> {
        Self::with_sink(config, Arc::new(NullSink))
    }

    pub fn with_sink(config: PlannerConfig, sink: Arc<dyn StatusSink>) -> Result<Self> {
        config.validate()?;
        let optimizer = GeneticOptimizer::new(config.genetic.clone())?;
        let shared = Shared {
            pathfinder: config.build_pathfinder(),
            depots: Mutex::new(config.depots.clone()),
            config,
            optimizer,
            fleet: FleetRegistry::new(),
            routes: RouteBoard::new(),
            clock: Mutex::new(Clock::idle()),
            tick_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            ticker: Ticker::new(Ticker::interval_for(1.0)),
            sink,
        };
        Ok(Self {
            shared: Arc::new(shared),
            driver: Mutex::new(None),
        })
    }

    pub fn fleet(&self) -> &FleetRegistry {
        &self.shared.fleet
    }

    pub fn routes(&self) -> &RouteBoard {
        &self.shared.routes
    }

    pub fn pathfinder(&self) -> &Pathfinder {
        &self.shared.pathfinder
    }

    /// Start a simulation driven by a background thread.
    pub fn start(&self, request: StartRequest) -> Result<Uuid> {
        let id = self.load(request)?;
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("simulation-driver".into())
            .spawn(move || shared.drive())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                PlannerError::Simulation(format!("failed to spawn driver: {e}"))
            })?;
        *self.driver.lock() = Some(handle);
        Ok(id)
    }

    /// Start a simulation without a driver; ticks only happen on [`Self::step`].
    pub fn start_stepped(&self, request: StartRequest) -> Result<Uuid> {
        self.load(request)
    }

    fn load(&self, request: StartRequest) -> Result<Uuid> {
        if !request.speed.is_finite() || request.speed <= 0.0 {
            return Err(PlannerError::InvalidSpeed(request.speed));
        }
        if self.shared.running.load(Ordering::SeqCst) {
            return Err(PlannerError::AlreadyRunning);
        }
        self.join_driver();

        let shared = &self.shared;
        let _tick = shared.tick_lock.lock();
        let mut clock = shared.clock.lock();

        let fleet = request.fleet.unwrap_or_else(|| shared.config.build_fleet());
        shared.routes.clear();
        shared.fleet.clear();
        for vehicle in &fleet {
            shared.fleet.insert(vehicle.clone());
        }

        *shared.depots.lock() = shared.config.depots.clone();
        shared.pathfinder.set_blockages(request.blockages);
        shared.pathfinder.filter_blockages_for_dates(request.start.date(), None);

        let id = Uuid::new_v4();
        let mut pending = Vec::new();
        split_into(&mut pending, request.orders, &fleet);

        *clock = Clock {
            id: Some(id),
            scenario: Some(request.scenario),
            start: request.start,
            now: request.start,
            end: request.duration_days.map(|d| request.start + Duration::days(i64::from(d))),
            speed: request.speed,
            breakdowns_enabled: request.breakdowns_enabled,
            maintenance_enabled: request.maintenance_enabled,
            pending,
            injected: Vec::new(),
            stats: SimulationStats::default(),
            rng: match request.seed {
                Some(seed) => SmallRng::seed_from_u64(seed),
                None => SmallRng::from_entropy(),
            },
            ticks: 0,
            demand_seq: 0,
            termination: None,
            fault: None,
        };

        shared.ticker.reset(Ticker::interval_for(request.speed));
        shared.paused.store(false, Ordering::SeqCst);
        shared.running.store(true, Ordering::SeqCst);
        info!(
            simulation = %id,
            scenario = ?request.scenario,
            start = %request.start,
            days = ?request.duration_days,
            speed = request.speed,
            vehicles = fleet.len(),
            orders = clock.pending.len(),
            "simulation started"
        );
        Ok(id)
    }

    /// Run one tick. Returns whether the simulation is still running.
    pub fn step(&self) -> Result<bool> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(PlannerError::NotRunning);
        }
        self.shared.guarded_tick()
    }

    pub fn pause(&self) -> Result<()> {
        self.ensure_running()?;
        self.shared.paused.store(true, Ordering::SeqCst);
        info!("simulation paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.ensure_running()?;
        self.shared.paused.store(false, Ordering::SeqCst);
        info!("simulation resumed");
        Ok(())
    }

    /// Stop the simulation and wait for the driver to exit.
    pub fn stop(&self) -> Result<SimulationState> {
        self.ensure_running()?;
        self.shared.halt("stopped by request");
        self.join_driver();
        Ok(self.query_state())
    }

    pub fn set_speed(&self, speed: f64) -> Result<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(PlannerError::InvalidSpeed(speed));
        }
        self.shared.clock.lock().speed = speed;
        self.shared.ticker.set_interval(Ticker::interval_for(speed));
        info!(speed, "simulation speed changed");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn query_state(&self) -> SimulationState {
        let clock = self.shared.clock.lock();
        self.shared.snapshot(&clock)
    }

    /// Queue a breakdown for `vehicle_code`, applied on the next tick.
    pub fn inject_breakdown(&self, vehicle_code: &str, kind: IncidentKind) -> Result<()> {
        self.ensure_running()?;
        let mut clock = self.shared.clock.lock();
        if !clock.breakdowns_enabled {
            return Err(PlannerError::BreakdownsDisabled);
        }
        if !self.shared.fleet.contains(vehicle_code) {
            return Err(PlannerError::UnknownVehicle(vehicle_code.to_string()));
        }
        clock.injected.push((vehicle_code.to_string(), kind));
        Ok(())
    }

    /// Feed new demand into the pending book.
    pub fn add_orders(&self, orders: Vec<Order>) -> Result<usize> {
        self.ensure_running()?;
        let fleet = self.shared.fleet.snapshot();
        let mut clock = self.shared.clock.lock();
        let before = clock.pending.len();
        split_into(&mut clock.pending, orders, &fleet);
        Ok(clock.pending.len() - before)
    }

    pub fn route_statuses(&self) -> Vec<RouteStatus> {
        let now = self.shared.clock.lock().now;
        self.shared.routes.statuses(now)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shared.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PlannerError::NotRunning)
        }
    }

    fn join_driver(&self) {
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("simulation driver exited with a panic");
            }
        }
    }
}

impl Drop for SimulationEngine {
    fn drop(&mut self) {
        if self.shared.running.load(Ordering::SeqCst) {
            self.shared.halt("engine dropped");
        }
        self.join_driver();
    }
}

impl Shared {
    fn drive(&self) {
        debug!("simulation driver started");
        while self.running.load(Ordering::SeqCst) {
            if !self.ticker.wait() {
                break;
            }
            if self.paused.load(Ordering::SeqCst) || !self.running.load(Ordering::SeqCst) {
                continue;
            }
            match self.guarded_tick() {
                Ok(true) => {}
                Ok(false) | Err(_) => break,
            }
        }
        debug!("simulation driver exited");
    }

    /// Tick with faults converted into a stopped engine.
    fn guarded_tick(&self) -> Result<bool> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.tick()));
        let fault = match outcome {
            Ok(Ok(still_running)) => return Ok(still_running),
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "tick panicked".to_string()),
        };
        error!(fault = %fault, "simulation tick failed, stopping");
        self.clock.lock().fault = Some(fault.clone());
        self.halt("fault");
        Err(PlannerError::Simulation(fault))
    }

    fn halt(&self, reason: &str) {
        self.running.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.ticker.cancel();
        let mut clock = self.clock.lock();
        if clock.termination.is_none() {
            clock.termination = Some(reason.to_string());
        }
        info!(reason, now = %clock.now, "simulation stopped");
    }

    fn tick(&self) -> Result<bool> {
        let _tick = self.tick_lock.lock();
        let mut clock = self.clock.lock();
        if !self.running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(scenario) = clock.scenario else {
            return Err(PlannerError::Simulation("no scenario loaded".into()));
        };

        clock.now += Duration::minutes(1);
        clock.ticks += 1;
        let now = clock.now;

        if let Some(reason) = self.termination_reason(&clock, scenario) {
            info!(reason = %reason, now = %now, stats = ?clock.stats, "simulation terminated");
            clock.termination = Some(reason);
            drop(clock);
            self.halt("terminated");
            self.publish();
            return Ok(false);
        }

        if now.hour() == 0 && now.minute() == 0 {
            self.start_new_day(now);
        }

        let check_maintenance = clock.maintenance_enabled && scenario.checks_maintenance_at(now);
        self.fleet.for_each_mut(|v| {
            if check_maintenance {
                v.advance(now);
            } else {
                v.recover(now);
            }
        });

        if clock.breakdowns_enabled {
            self.apply_breakdowns(&mut clock, scenario, now);
        }

        self.advance_routes(&mut clock, now);

        if scenario.demands_at(now) {
            self.generate_demand(&mut clock, now);
        }

        let batch = if scenario.optimizes_at(now) && !clock.pending.is_empty() {
            self.planning_batch(&mut clock)
        } else {
            None
        };
        drop(clock);

        if let Some((available, orders)) = batch {
            self.replan(&available, &orders, now)?;
        }

        let interval = self.config.simulation.status_interval_minutes;
        let publish = (now.hour() * 60 + now.minute()) % interval == 0;
        if publish {
            self.publish();
        }
        Ok(true)
    }

    fn termination_reason(&self, clock: &Clock, scenario: Scenario) -> Option<String> {
        if clock.end.is_some_and(|end| clock.now > end) {
            return Some("duration elapsed".to_string());
        }
        if scenario == Scenario::Collapse {
            let pending = clock.pending.len();
            let available = self.fleet.count_available();
            if pending > COLLAPSE_PENDING_ORDERS && available < COLLAPSE_AVAILABLE_VEHICLES {
                return Some(format!(
                    "collapse: {pending} pending orders, {available} available vehicles"
                ));
            }
        }
        None
    }

    fn start_new_day(&self, now: NaiveDateTime) {
        for depot in self.depots.lock().iter_mut() {
            if depot.is_refill_time(now) {
                depot.refill();
            }
        }
        self.pathfinder.filter_blockages_for_dates(now.date(), None);
        debug!(day = %now.date(), "depots refilled, blockages refiltered");
    }

    fn apply_breakdowns(&self, clock: &mut Clock, scenario: Scenario, now: NaiveDateTime) {
        let mut strikes: Vec<(String, IncidentKind)> = std::mem::take(&mut clock.injected);

        let chance = scenario.breakdown_probability();
        if chance > 0.0 && clock.rng.gen_bool(chance) {
            let en_route = self.fleet.codes_in_state(VehicleState::EnRoute);
            if !en_route.is_empty() {
                let code = en_route[clock.rng.gen_range(0..en_route.len())].clone();
                let roll: f64 = clock.rng.gen_range(0.0..1.0);
                let kind = if roll < 0.6 {
                    IncidentKind::TI1
                } else if roll < 0.9 {
                    IncidentKind::TI2
                } else {
                    IncidentKind::TI3
                };
                strikes.push((code, kind));
            }
        }

        for (code, kind) in strikes {
            match self.fleet.update(&code, |v| v.register_breakdown(kind, now)) {
                Some(true) => clock.stats.breakdowns += 1,
                Some(false) => {
                    warn!(vehicle = %code, ?kind, "breakdown ignored, vehicle not in service")
                }
                None => warn!(vehicle = %code, "breakdown for unknown vehicle"),
            }
        }
    }

    fn advance_routes(&self, clock: &mut Clock, now: NaiveDateTime) {
        for id in self.routes.ids() {
            let outcome = self.routes.update(&id, |route| {
                let vehicle = self.fleet.get(&route.vehicle_code);
                let state = vehicle.as_ref().map(|v| v.state);
                if state != Some(VehicleState::EnRoute) {
                    let location = vehicle.map_or(route.origin, |v| v.location);
                    let reason = match state {
                        Some(s) => format!("vehicle {s:?}"),
                        None => "vehicle missing".to_string(),
                    };
                    route.cancel(now, location, &reason);
                    return RouteOutcome::Cancelled {
                        vehicle: route.vehicle_code.clone(),
                        returned: route.undelivered_orders(),
                    };
                }

                let (due, cell, finished, end) = match route.trace() {
                    Some(trace) => (
                        trace
                            .deliveries_until(now)
                            .into_iter()
                            .map(str::to_string)
                            .collect::<Vec<_>>(),
                        trace.step_at(now).map_or(route.origin, |s| s.location),
                        trace.is_finished_at(now),
                        trace.final_location().unwrap_or(route.destination),
                    ),
                    None => (Vec::new(), route.origin, true, route.origin),
                };
                let delivered =
                    due.iter().filter(|id| route.register_delivery(id.as_str(), now)).count();

                if finished {
                    route.completed = true;
                    RouteOutcome::Completed {
                        vehicle: route.vehicle_code.clone(),
                        at: end,
                        delivered,
                        fuel: route.fuel_used(),
                        distance: route.distance(),
                    }
                } else {
                    RouteOutcome::Moving {
                        vehicle: route.vehicle_code.clone(),
                        cell,
                        delivered,
                    }
                }
            });

            match outcome {
                Some(RouteOutcome::Moving { vehicle, cell, delivered }) => {
                    clock.stats.delivered_orders += delivered;
                    self.fleet.update(&vehicle, |v| v.location = cell);
                }
                Some(RouteOutcome::Completed { vehicle, at, delivered, fuel, distance }) => {
                    clock.stats.delivered_orders += delivered;
                    clock.stats.total_fuel += fuel;
                    clock.stats.total_distance += f64::from(distance);
                    clock.stats.routes_completed += 1;
                    self.routes.remove(&id);
                    self.fleet.update(&vehicle, |v| {
                        v.arrive(at);
                        v.refuel_full();
                        v.glp = 0.0;
                    });
                    info!(route = %id, vehicle = %vehicle, now = %now, "route completed");
                }
                Some(RouteOutcome::Cancelled { vehicle, returned }) => {
                    clock.stats.routes_cancelled += 1;
                    self.routes.remove(&id);
                    info!(
                        route = %id,
                        vehicle = %vehicle,
                        returned = returned.len(),
                        "route cancelled"
                    );
                    clock.pending.extend(returned);
                }
                None => {}
            }
        }
    }

    fn generate_demand(&self, clock: &mut Clock, now: NaiveDateTime) {
        let width = self.config.map.width;
        let height = self.config.map.height;
        let mut fresh = Vec::with_capacity(COLLAPSE_ORDERS_PER_BATCH);
        for _ in 0..COLLAPSE_ORDERS_PER_BATCH {
            clock.demand_seq += 1;
            let seq = clock.demand_seq;
            let location =
                Location::new(clock.rng.gen_range(0..width), clock.rng.gen_range(0..height));
            let quantity = clock.rng.gen_range(5.0..25.0);
            let window = clock.rng.gen_range(4..12);
            fresh.push(Order::new(
                format!("SIM-{seq}"),
                format!("c-sim-{seq}"),
                location,
                quantity,
                now,
                window,
            ));
        }
        clock.stats.generated_orders += fresh.len();
        let fleet = self.fleet.snapshot();
        split_into(&mut clock.pending, fresh, &fleet);
        debug!(pending = clock.pending.len(), "generated additional demand");
    }

    /// Free vehicles and the pending orders re-split against them, or
    /// `None` when nothing is free.
    fn planning_batch(&self, clock: &mut Clock) -> Option<(Vec<Vehicle>, Vec<Order>)> {
        let fleet = self.fleet.snapshot();
        let available: Vec<Vehicle> = fleet.iter().filter(|v| v.is_available()).cloned().collect();
        if available.is_empty() {
            return None;
        }
        // Re-split against what is actually free so ids stay stable.
        clock.pending = preprocess(&clock.pending, &available);
        Some((available, clock.pending.clone()))
    }

    /// Optimise with the clock unlocked, then take it back to dispatch.
    /// Only `tick_lock` is held meanwhile, so queries are not blocked.
    fn replan(&self, available: &[Vehicle], orders: &[Order], now: NaiveDateTime) -> Result<()> {
        let result = self.optimizer.optimize(available, orders, &self.pathfinder, now);

        let mut clock = self.clock.lock();
        clock.stats.optimizations += 1;
        if !self.running.load(Ordering::SeqCst) {
            debug!(routes = result.routes.len(), "stopped while optimising, plan discarded");
            return Ok(());
        }
        for route in result.routes {
            self.dispatch(&mut clock, route, now)?;
        }
        Ok(())
    }

    fn dispatch(&self, clock: &mut Clock, route: Route, now: NaiveDateTime) -> Result<()> {
        let load = route.total_glp();
        let code = route.vehicle_code.clone();
        let departed = self
            .fleet
            .update(&code, |v| {
                if !v.is_available() {
                    return false;
                }
                v.glp = load.min(v.glp_capacity());
                v.depart();
                true
            })
            .ok_or_else(|| {
                PlannerError::Simulation(format!("route planned for unknown vehicle {code}"))
            })?;
        if !departed {
            return Ok(());
        }

        if let Some(depot) = draw_glp(&mut self.depots.lock(), route.origin, load) {
            debug!(route = %route.id, depot = %depot, load, "GLP drawn for departure");
        }

        let ids: Vec<&str> = route.orders().iter().map(|o| o.id.as_str()).collect();
        clock.pending.retain(|o| !ids.contains(&o.id.as_str()));
        clock.stats.routes_dispatched += 1;
        info!(
            route = %route.id,
            vehicle = %code,
            orders = ids.len(),
            distance = route.distance(),
            fuel = route.fuel_used(),
            now = %now,
            "route dispatched"
        );
        self.routes.insert(route);
        Ok(())
    }

    fn snapshot(&self, clock: &Clock) -> SimulationState {
        let vehicles = self.fleet.snapshot();
        SimulationState {
            id: clock.id,
            scenario: clock.scenario,
            running: self.running.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            now: clock.scenario.map(|_| clock.now),
            speed: clock.speed,
            breakdowns_enabled: clock.breakdowns_enabled,
            maintenance_enabled: clock.maintenance_enabled,
            progress: clock.progress(),
            ticks: clock.ticks,
            pending_orders: clock.pending.len(),
            active_routes: self.routes.len(),
            available_vehicles: vehicles.iter().filter(|v| v.is_available()).count(),
            vehicles,
            stats: clock.stats.clone(),
            termination: clock.termination.clone(),
            fault: clock.fault.clone(),
        }
    }

    fn publish(&self) {
        let (state, now) = {
            let clock = self.clock.lock();
            (self.snapshot(&clock), clock.now)
        };
        self.sink.publish_simulation(&state);
        self.sink.publish_routes(&self.routes.statuses(now));
    }
}

/// Split incoming orders so each fits a vehicle of `fleet`, then append them.
fn split_into(book: &mut Vec<Order>, incoming: Vec<Order>, fleet: &[Vehicle]) {
    book.extend(preprocess(&incoming, fleet));
}

/// Take `load` m³ for a departure at `origin`: from the depot standing
/// there if it holds enough, otherwise from the central plant. Returns the
/// id of the depot drawn from.
fn draw_glp(depots: &mut [Depot], origin: Location, load: f64) -> Option<String> {
    let i = depots
        .iter()
        .position(|d| d.location == origin && d.available() >= load)
        .or_else(|| depots.iter().position(Depot::is_central))?;
    let depot = &mut depots[i];
    let drawn = load.min(depot.available());
    if !depot.extract(drawn) {
        warn!(depot = %depot.id, drawn, available = depot.available(), "depot refused extraction");
        return None;
    }
    Some(depot.id.clone())
}
