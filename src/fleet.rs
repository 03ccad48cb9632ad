//! Vehicles: capacity classes, fuel/GLP physics and the state machine.
//!
//! Weights are in tonnes, GLP in m³, fuel in gallons, distances in km
//! (one grid cell).

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PlannerError;
use crate::geometry::Location;

/// Tonnes per m³ of GLP.
pub const GLP_DENSITY: f64 = 0.5;

/// Divisor of the consumption formula `km × tonnes / 180`.
pub const CONSUMPTION_FACTOR: f64 = 180.0;

/// Fuel tank size shared by every class, in gallons.
pub const FUEL_TANK_GALLONS: f64 = 25.0;

/// Average speed shared by every class, in km/h.
pub const AVERAGE_SPEED_KMH: f64 = 50.0;

const MAINTENANCE_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleClass {
    TA,
    TB,
    TC,
    TD,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 4] = [
        VehicleClass::TA,
        VehicleClass::TB,
        VehicleClass::TC,
        VehicleClass::TD,
    ];

    /// GLP tank capacity in m³.
    pub const fn glp_capacity(self) -> f64 {
        match self {
            VehicleClass::TA => 25.0,
            VehicleClass::TB => 15.0,
            VehicleClass::TC => 10.0,
            VehicleClass::TD => 5.0,
        }
    }

    /// Empty weight in tonnes.
    pub const fn tare(self) -> f64 {
        match self {
            VehicleClass::TA => 2.5,
            VehicleClass::TB => 2.0,
            VehicleClass::TC => 1.5,
            VehicleClass::TD => 1.0,
        }
    }

    /// Breakdown-risk coefficient; smaller vehicles are more fragile.
    pub const fn risk(self) -> f64 {
        match self {
            VehicleClass::TA => 0.5,
            VehicleClass::TB => 0.6,
            VehicleClass::TC => 0.7,
            VehicleClass::TD => 0.8,
        }
    }

    pub const fn code(self) -> &'static str {
        match self {
            VehicleClass::TA => "TA",
            VehicleClass::TB => "TB",
            VehicleClass::TC => "TC",
            VehicleClass::TD => "TD",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for VehicleClass {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TA" => Ok(VehicleClass::TA),
            "TB" => Ok(VehicleClass::TB),
            "TC" => Ok(VehicleClass::TC),
            "TD" => Ok(VehicleClass::TD),
            _ => Err(PlannerError::UnknownVehicleClass(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleState {
    Available,
    EnRoute,
    BrokenDown,
    /// In the shop after a breakdown.
    Unavailable,
    InMaintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncidentKind {
    TI1,
    TI2,
    TI3,
}

impl IncidentKind {
    /// Hours the vehicle stays immobilised where it broke down.
    pub const fn immobilized_hours(self) -> i64 {
        match self {
            IncidentKind::TI1 | IncidentKind::TI2 => 2,
            IncidentKind::TI3 => 4,
        }
    }
}

impl FromStr for IncidentKind {
    type Err = PlannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TI1" => Ok(IncidentKind::TI1),
            "TI2" => Ok(IncidentKind::TI2),
            "TI3" => Ok(IncidentKind::TI3),
            _ => Err(PlannerError::UnknownIncidentKind(s.to_string())),
        }
    }
}

/// Fixed eight-hour daily windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shift {
    /// 00:00–08:00
    T1,
    /// 08:00–16:00
    T2,
    /// 16:00–24:00
    T3,
}

impl Shift {
    pub fn at(time: NaiveDateTime) -> Shift {
        match time.hour() {
            0..8 => Shift::T1,
            8..16 => Shift::T2,
            _ => Shift::T3,
        }
    }
}

fn day_start(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub kind: IncidentKind,
    pub occurred_at: NaiveDateTime,
    pub immobilized_until: NaiveDateTime,
    pub available_again: NaiveDateTime,
}

impl Breakdown {
    pub fn new(kind: IncidentKind, at: NaiveDateTime) -> Self {
        let immobilized_until = at + Duration::hours(kind.immobilized_hours());
        let today = at.date();
        let available_again = match kind {
            IncidentKind::TI1 => immobilized_until,
            IncidentKind::TI2 => match Shift::at(at) {
                Shift::T1 => day_start(today) + Duration::hours(16),
                Shift::T2 => day_start(today + Duration::days(1)),
                Shift::T3 => day_start(today + Duration::days(1)) + Duration::hours(8),
            },
            IncidentKind::TI3 => day_start(today + Duration::days(3)),
        };
        Self {
            kind,
            occurred_at: at,
            immobilized_until,
            available_again,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub code: String,
    pub class: VehicleClass,
    pub location: Location,
    /// Gallons in the fuel tank.
    pub fuel: f64,
    /// m³ of GLP on board.
    pub glp: f64,
    pub state: VehicleState,
    pub breakdown: Option<Breakdown>,
    pub maintenance_started: Option<NaiveDateTime>,
    pub next_maintenance: Option<NaiveDate>,
}

impl Vehicle {
    /// A parked vehicle with a full fuel tank and no GLP.
    pub fn new(code: impl Into<String>, class: VehicleClass, location: Location) -> Self {
        Self {
            code: code.into(),
            class,
            location,
            fuel: FUEL_TANK_GALLONS,
            glp: 0.0,
            state: VehicleState::Available,
            breakdown: None,
            maintenance_started: None,
            next_maintenance: None,
        }
    }

    pub fn glp_capacity(&self) -> f64 {
        self.class.glp_capacity()
    }

    pub fn fuel_capacity(&self) -> f64 {
        FUEL_TANK_GALLONS
    }

    pub fn speed_kmh(&self) -> f64 {
        AVERAGE_SPEED_KMH
    }

    pub fn is_available(&self) -> bool {
        self.state == VehicleState::Available
    }

    /// Tare plus the weight of the GLP on board.
    pub fn total_weight(&self) -> f64 {
        self.class.tare() + self.glp * GLP_DENSITY
    }

    /// Gallons needed to cover `distance_km` at the current weight.
    pub fn fuel_for(&self, distance_km: f64) -> f64 {
        fuel_for_weight(distance_km, self.total_weight())
    }

    /// Kilometres coverable with the fuel on board at the current weight.
    pub fn max_range(&self) -> f64 {
        self.fuel * CONSUMPTION_FACTOR / self.total_weight()
    }

    pub fn load_glp(&mut self, quantity: f64) -> bool {
        if quantity < 0.0 || self.glp + quantity > self.glp_capacity() {
            return false;
        }
        self.glp += quantity;
        true
    }

    pub fn unload_glp(&mut self, quantity: f64) -> bool {
        if quantity < 0.0 || quantity > self.glp {
            return false;
        }
        self.glp -= quantity;
        true
    }

    pub fn refuel(&mut self, gallons: f64) -> bool {
        if gallons < 0.0 || self.fuel + gallons > self.fuel_capacity() {
            return false;
        }
        self.fuel += gallons;
        true
    }

    pub fn refuel_full(&mut self) {
        self.fuel = self.fuel_capacity();
    }

    /// Burn the fuel for `distance_km`. Fails without burning anything if
    /// the tank holds too little.
    pub fn consume_fuel(&mut self, distance_km: f64) -> bool {
        let needed = self.fuel_for(distance_km);
        if needed > self.fuel {
            return false;
        }
        self.fuel -= needed;
        true
    }

    /// Driving time between two cells at the average speed, to the minute.
    pub fn travel_time(&self, from: &Location, to: &Location) -> Duration {
        let hours = from.distance_to(to) as f64 / self.speed_kmh();
        Duration::minutes((hours * 60.0).round() as i64)
    }

    pub fn schedule_maintenance(&mut self, date: NaiveDate) {
        self.next_maintenance = Some(date);
    }

    pub fn depart(&mut self) {
        if self.state == VehicleState::Available {
            self.state = VehicleState::EnRoute;
        }
    }

    /// Finish a trip at `location`.
    pub fn arrive(&mut self, location: Location) {
        self.location = location;
        if self.state == VehicleState::EnRoute {
            self.state = VehicleState::Available;
        }
    }

    /// Put the vehicle out of service. Ignored for vehicles already broken
    /// down, in the shop or in maintenance.
    pub fn register_breakdown(&mut self, kind: IncidentKind, at: NaiveDateTime) -> bool {
        if !matches!(self.state, VehicleState::Available | VehicleState::EnRoute) {
            return false;
        }
        let breakdown = Breakdown::new(kind, at);
        info!(
            vehicle = %self.code,
            ?kind,
            location = %self.location,
            immobilized_until = %breakdown.immobilized_until,
            available_again = %breakdown.available_again,
            "vehicle broke down"
        );
        self.breakdown = Some(breakdown);
        self.state = VehicleState::BrokenDown;
        true
    }

    /// Per-tick state update, including maintenance entry.
    pub fn advance(&mut self, now: NaiveDateTime) {
        self.step(now, true);
    }

    /// Per-tick state update without checking the maintenance calendar.
    pub fn recover(&mut self, now: NaiveDateTime) {
        self.step(now, false);
    }

    fn step(&mut self, now: NaiveDateTime, allow_maintenance: bool) {
        let previous = self.state;

        if self.state == VehicleState::InMaintenance {
            let done = self
                .maintenance_started
                .is_none_or(|start| now >= start + Duration::hours(MAINTENANCE_HOURS));
            if done {
                self.maintenance_started = None;
                self.state = VehicleState::Available;
                self.refuel_full();
                info!(vehicle = %self.code, %now, "maintenance finished");
            }
            return;
        }

        if allow_maintenance
            && self.next_maintenance == Some(now.date())
            && matches!(self.state, VehicleState::Available | VehicleState::EnRoute)
        {
            self.state = VehicleState::InMaintenance;
            self.maintenance_started = Some(now);
            info!(vehicle = %self.code, %now, "vehicle entered maintenance");
            return;
        }

        if let Some(breakdown) = self.breakdown {
            if now >= breakdown.immobilized_until {
                if now < breakdown.available_again {
                    self.state = VehicleState::Unavailable;
                } else {
                    self.breakdown = None;
                    self.state = VehicleState::Available;
                }
            }
        }

        if previous != self.state {
            info!(
                vehicle = %self.code,
                from = ?previous,
                to = ?self.state,
                %now,
                "vehicle state changed"
            );
        }
    }
}

/// `km × tonnes / 180`.
pub fn fuel_for_weight(distance_km: f64, weight: f64) -> f64 {
    distance_km * weight / CONSUMPTION_FACTOR
}

/// The reference fleet: 2 TA, 4 TB, 4 TC and 10 TD, all parked at `home`.
pub fn default_fleet(home: Location) -> Vec<Vehicle> {
    let counts = [
        (VehicleClass::TA, 2),
        (VehicleClass::TB, 4),
        (VehicleClass::TC, 4),
        (VehicleClass::TD, 10),
    ];
    let mut fleet = Vec::new();
    for (class, count) in counts {
        for n in 1..=count {
            fleet.push(Vehicle::new(format!("{}{:02}", class.code(), n), class, home));
        }
    }
    fleet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 5, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn truck(class: VehicleClass) -> Vehicle {
        Vehicle::new("T01", class, Location::new(12, 8))
    }

    #[test]
    fn test_class_parsing() {
        assert_eq!("tb".parse::<VehicleClass>().unwrap(), VehicleClass::TB);
        assert!(matches!("TX".parse::<VehicleClass>(), Err(PlannerError::UnknownVehicleClass(_))));
        assert_eq!("TI2".parse::<IncidentKind>().unwrap(), IncidentKind::TI2);
        assert!(matches!("TI9".parse::<IncidentKind>(), Err(PlannerError::UnknownIncidentKind(_))));
    }

    #[test]
    fn test_weight_and_consumption() {
        let mut v = truck(VehicleClass::TA);
        assert!(v.load_glp(10.0));
        assert_eq!(v.total_weight(), 7.5);
        assert!((v.fuel_for(36.0) - 1.5).abs() < 1e-9);
        assert!((v.max_range() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_violations_return_false() {
        let mut v = truck(VehicleClass::TD);
        assert!(!v.load_glp(6.0));
        assert!(v.load_glp(5.0));
        assert!(!v.unload_glp(5.5));
        assert!(!v.refuel(1.0));
        assert!(!v.consume_fuel(100_000.0));
        assert_eq!(v.fuel, FUEL_TANK_GALLONS);
    }

    #[test]
    fn test_shift_boundaries() {
        assert_eq!(Shift::at(at(1, 0, 0)), Shift::T1);
        assert_eq!(Shift::at(at(1, 7, 59)), Shift::T1);
        assert_eq!(Shift::at(at(1, 8, 0)), Shift::T2);
        assert_eq!(Shift::at(at(1, 16, 0)), Shift::T3);
    }

    #[test]
    fn test_ti2_recovery_by_shift() {
        assert_eq!(Breakdown::new(IncidentKind::TI2, at(1, 7, 0)).available_again, at(1, 16, 0));
        assert_eq!(Breakdown::new(IncidentKind::TI2, at(1, 9, 0)).available_again, at(2, 0, 0));
        assert_eq!(Breakdown::new(IncidentKind::TI2, at(1, 20, 0)).available_again, at(2, 8, 0));
    }

    #[test]
    fn test_ti1_back_in_service_after_two_hours() {
        let breakdown = Breakdown::new(IncidentKind::TI1, at(1, 10, 0));
        assert_eq!(breakdown.immobilized_until, at(1, 12, 0));
        assert_eq!(breakdown.available_again, at(1, 12, 0));
    }

    #[test]
    fn test_ti3_back_on_third_day() {
        let breakdown = Breakdown::new(IncidentKind::TI3, at(1, 9, 0));
        assert_eq!(breakdown.immobilized_until, at(1, 13, 0));
        assert_eq!(breakdown.available_again, at(4, 0, 0));

        let late = Breakdown::new(IncidentKind::TI3, at(1, 23, 30));
        assert_eq!(late.available_again, at(4, 0, 0));
    }

    #[test]
    fn test_ti3_vehicle_unavailable_until_third_midnight() {
        let mut v = truck(VehicleClass::TA);
        v.depart();
        assert!(v.register_breakdown(IncidentKind::TI3, at(1, 9, 0)));

        v.advance(at(1, 12, 59));
        assert_eq!(v.state, VehicleState::BrokenDown);
        v.advance(at(1, 13, 0));
        assert_eq!(v.state, VehicleState::Unavailable);
        v.advance(at(3, 23, 59));
        assert_eq!(v.state, VehicleState::Unavailable);
        v.advance(at(4, 0, 0));
        assert_eq!(v.state, VehicleState::Available);
    }

    #[test]
    fn test_breakdown_walks_through_shop() {
        let mut v = truck(VehicleClass::TB);
        v.depart();
        assert!(v.register_breakdown(IncidentKind::TI2, at(1, 9, 0)));
        assert!(!v.register_breakdown(IncidentKind::TI1, at(1, 9, 5)));

        v.advance(at(1, 10, 0));
        assert_eq!(v.state, VehicleState::BrokenDown);
        v.advance(at(1, 11, 0));
        assert_eq!(v.state, VehicleState::Unavailable);
        v.advance(at(2, 0, 0));
        assert_eq!(v.state, VehicleState::Available);
        assert!(v.breakdown.is_none());
    }

    #[test]
    fn test_maintenance_lasts_a_day_and_refuels() {
        let mut v = truck(VehicleClass::TC);
        v.fuel = 3.0;
        v.schedule_maintenance(at(3, 0, 0).date());

        v.recover(at(3, 6, 0));
        assert_eq!(v.state, VehicleState::Available);

        v.advance(at(3, 6, 0));
        assert_eq!(v.state, VehicleState::InMaintenance);
        v.advance(at(4, 5, 59));
        assert_eq!(v.state, VehicleState::InMaintenance);
        v.advance(at(4, 6, 0));
        assert_eq!(v.state, VehicleState::Available);
        assert_eq!(v.fuel, FUEL_TANK_GALLONS);
    }

    #[test]
    fn test_travel_time() {
        let v = truck(VehicleClass::TA);
        let time = v.travel_time(&Location::new(0, 0), &Location::new(25, 25));
        assert_eq!(time, Duration::minutes(60));
    }

    #[test]
    fn test_default_fleet_composition() {
        let fleet = default_fleet(Location::new(12, 8));
        assert_eq!(fleet.len(), 20);
        assert_eq!(fleet[0].code, "TA01");
        assert_eq!(fleet[19].code, "TD10");
        assert_eq!(fleet.iter().filter(|v| v.class == VehicleClass::TB).count(), 4);
        assert!(fleet.iter().all(|v| v.fuel == FUEL_TANK_GALLONS && v.glp == 0.0));
    }
}
