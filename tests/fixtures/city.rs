//! Reference city: a 70 × 50 block grid with one central plant and two
//! intermediate tanks, plus a handful of named customer sites.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};

use glp_fleet_planner::config::PlannerConfig;
use glp_fleet_planner::depot::Depot;
use glp_fleet_planner::fleet::{Vehicle, VehicleClass};
use glp_fleet_planner::geometry::Location;
use glp_fleet_planner::grid::{Blockage, Grid};
use glp_fleet_planner::optimizer::GeneticOptions;
use glp_fleet_planner::order::Order;

pub const WIDTH: i32 = 70;
pub const HEIGHT: i32 = 50;

pub const CENTRAL: Location = Location::new(12, 8);
pub const NORTE: Location = Location::new(42, 42);
pub const ESTE: Location = Location::new(63, 3);

/// A named customer site.
#[derive(Debug, Clone)]
pub struct Site {
    pub name: &'static str,
    pub location: Location,
}

impl Site {
    pub const fn new(name: &'static str, x: i32, y: i32) -> Self {
        Self {
            name,
            location: Location::new(x, y),
        }
    }
}

// ============================================================================
// Customer sites
// ============================================================================

pub const SITES: &[Site] = &[
    Site::new("bakery", 15, 10),
    Site::new("hospital", 20, 12),
    Site::new("laundry", 8, 20),
    Site::new("school", 25, 5),
    Site::new("restaurant", 30, 18),
    Site::new("hotel", 18, 25),
    Site::new("factory", 40, 30),
    Site::new("market", 5, 3),
];

// ============================================================================
// Builders
// ============================================================================

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

pub fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    day(d).and_hms_opt(h, m, 0).unwrap()
}

pub fn depots() -> Vec<Depot> {
    vec![
        Depot::central("CENTRAL", CENTRAL),
        Depot::intermediate("NORTE", NORTE, 160.0),
        Depot::intermediate("ESTE", ESTE, 160.0),
    ]
}

pub fn city_grid() -> Grid {
    Grid::new(WIDTH, HEIGHT, depots())
}

pub fn small_fleet() -> Vec<Vehicle> {
    vec![
        Vehicle::new("TA01", VehicleClass::TA, CENTRAL),
        Vehicle::new("TC01", VehicleClass::TC, CENTRAL),
        Vehicle::new("TD01", VehicleClass::TD, CENTRAL),
    ]
}

pub fn order_at(
    id: &str,
    site: &Site,
    quantity: f64,
    received: NaiveDateTime,
    window_hours: i64,
) -> Order {
    Order::new(id, format!("client-{}", site.name), site.location, quantity, received, window_hours)
}

/// One order per site, received at `received`.
pub fn site_orders(received: NaiveDateTime) -> Vec<Order> {
    SITES
        .iter()
        .enumerate()
        .map(|(i, site)| {
            let id = format!("O{:02}", i + 1);
            order_at(&id, site, 4.0 + i as f64, received, 6 + i as i64)
        })
        .collect()
}

/// Vertical wall at column `x` covering every row, active over `[from, to]`.
pub fn wall(x: i32, from: NaiveDateTime, to: NaiveDateTime) -> Blockage {
    Blockage::new(from, to, (0..=HEIGHT).map(|y| Location::new(x, y)).collect())
}

/// A fast, seeded genetic configuration for tests.
pub fn quick_genetic(seed: u64) -> GeneticOptions {
    GeneticOptions {
        population_size: 30,
        generations: 25,
        elitism: 3,
        seed: Some(seed),
        ..GeneticOptions::default()
    }
}

pub fn quick_config(seed: u64) -> PlannerConfig {
    PlannerConfig {
        depots: depots(),
        genetic: quick_genetic(seed),
        ..PlannerConfig::default()
    }
}
