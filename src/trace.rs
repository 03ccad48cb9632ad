//! Timestamped replay of a finalised route.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Start,
    Move,
    Delivery,
    GlpReload,
    Refuel,
    Finish,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub location: Location,
    /// Arrival time at `location`.
    pub at: NaiveDateTime,
    pub kind: StepKind,
    /// Orders handed over at a delivery step.
    pub order_ids: Vec<String>,
    /// Time spent at the cell before the next step.
    pub dwell: Duration,
}

impl TraceStep {
    pub fn departs_at(&self) -> NaiveDateTime {
        self.at + self.dwell
    }
}

/// What the vehicle is doing at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Pending,
    Starting,
    Moving,
    Delivering,
    Reloading,
    Refueling,
    Completed,
}

/// Fractional grid position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl From<Location> for Position {
    fn from(location: Location) -> Self {
        Self {
            x: location.x as f64,
            y: location.y as f64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementTrace {
    pub route_id: Uuid,
    pub vehicle_code: String,
    steps: Vec<TraceStep>,
}

impl MovementTrace {
    /// A trace holding only the start step.
    pub fn new(
        route_id: Uuid,
        vehicle_code: impl Into<String>,
        origin: Location,
        start: NaiveDateTime,
    ) -> Self {
        let mut trace = Self {
            route_id,
            vehicle_code: vehicle_code.into(),
            steps: Vec::new(),
        };
        trace.push(origin, start, StepKind::Start, Vec::new(), Duration::zero());
        trace
    }

    /// Append a step. Times are clamped so they never run backwards.
    pub fn push(
        &mut self,
        location: Location,
        at: NaiveDateTime,
        kind: StepKind,
        order_ids: Vec<String>,
        dwell: Duration,
    ) {
        let at = match self.steps.last() {
            Some(last) if at < last.departs_at() => last.departs_at(),
            _ => at,
        };
        self.steps.push(TraceStep {
            location,
            at,
            kind,
            order_ids,
            dwell,
        });
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        self.steps.first().map(|s| s.at)
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        self.steps.last().map(|s| s.departs_at())
    }

    pub fn final_location(&self) -> Option<Location> {
        self.steps.last().map(|s| s.location)
    }

    pub fn is_finished_at(&self, t: NaiveDateTime) -> bool {
        self.end().is_some_and(|end| t >= end)
    }

    /// Index of the latest step reached at `t`.
    fn index_at(&self, t: NaiveDateTime) -> Option<usize> {
        let reached = self.steps.partition_point(|s| s.at <= t);
        reached.checked_sub(1)
    }

    /// Latest step reached at `t`, or `None` before the start.
    pub fn step_at(&self, t: NaiveDateTime) -> Option<&TraceStep> {
        self.index_at(t).map(|i| &self.steps[i])
    }

    /// Position at `t`, interpolated between consecutive cells.
    pub fn position_at(&self, t: NaiveDateTime) -> Option<Position> {
        let first = self.steps.first()?;
        let Some(i) = self.index_at(t) else {
            return Some(first.location.into());
        };
        let current = &self.steps[i];
        let Some(next) = self.steps.get(i + 1) else {
            return Some(current.location.into());
        };

        let leaves = current.departs_at();
        if t <= leaves || next.at <= leaves {
            return Some(current.location.into());
        }
        let span = (next.at - leaves).num_milliseconds() as f64;
        let ratio = ((t - leaves).num_milliseconds() as f64 / span).clamp(0.0, 1.0);
        Some(Position {
            x: current.location.x as f64 + (next.location.x - current.location.x) as f64 * ratio,
            y: current.location.y as f64 + (next.location.y - current.location.y) as f64 * ratio,
        })
    }

    /// Elapsed share of the trace's duration at `t`, 0 to 100.
    pub fn progress_at(&self, t: NaiveDateTime) -> f64 {
        let (Some(start), Some(end)) = (self.start(), self.end()) else {
            return 0.0;
        };
        if t <= start {
            return 0.0;
        }
        if t >= end {
            return 100.0;
        }
        let total = (end - start).num_milliseconds() as f64;
        (t - start).num_milliseconds() as f64 / total * 100.0
    }

    pub fn phase_at(&self, t: NaiveDateTime) -> Phase {
        let Some(step) = self.step_at(t) else {
            return Phase::Pending;
        };
        let dwelling = t < step.departs_at();
        match step.kind {
            StepKind::Finish => Phase::Completed,
            StepKind::Start => Phase::Starting,
            StepKind::Delivery if dwelling => Phase::Delivering,
            StepKind::GlpReload if dwelling => Phase::Reloading,
            StepKind::Refuel if dwelling => Phase::Refueling,
            _ => Phase::Moving,
        }
    }

    /// Order ids whose hand-over finished by `t`, in delivery order.
    pub fn deliveries_until(&self, t: NaiveDateTime) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::Delivery && s.departs_at() <= t)
            .flat_map(|s| s.order_ids.iter().map(String::as_str))
            .collect()
    }

    /// Every arrival time, for animation.
    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.steps.iter().map(|s| s.at).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    // (0,0) -> (1,0) -> deliver at (2,0) for 15 min -> finish
    fn sample() -> MovementTrace {
        let mut trace = MovementTrace::new(Uuid::new_v4(), "TA01", Location::new(0, 0), at(8, 0));
        trace.push(Location::new(1, 0), at(8, 1), StepKind::Move, Vec::new(), Duration::zero());
        trace.push(Location::new(2, 0), at(8, 2), StepKind::Move, Vec::new(), Duration::zero());
        trace.push(
            Location::new(2, 0),
            at(8, 2),
            StepKind::Delivery,
            vec!["P1".to_string()],
            Duration::minutes(15),
        );
        trace.push(Location::new(2, 0), at(8, 17), StepKind::Finish, Vec::new(), Duration::zero());
        trace
    }

    #[test]
    fn test_times_never_decrease() {
        let mut trace = sample();
        trace.push(Location::new(3, 0), at(7, 0), StepKind::Move, Vec::new(), Duration::zero());
        let times = trace.timestamps();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_interpolated_position() {
        let trace = sample();
        let mid = at(8, 0) + Duration::seconds(30);
        let p = trace.position_at(mid).unwrap();
        assert!((p.x - 0.5).abs() < 1e-9);
        assert_eq!(p.y, 0.0);
        assert_eq!(trace.position_at(at(7, 0)), Some(Position { x: 0.0, y: 0.0 }));
        assert_eq!(trace.position_at(at(9, 0)), Some(Position { x: 2.0, y: 0.0 }));
    }

    #[test]
    fn test_phase_and_deliveries() {
        let trace = sample();
        assert_eq!(trace.phase_at(at(7, 59)), Phase::Pending);
        assert_eq!(trace.phase_at(at(8, 0)), Phase::Starting);
        assert_eq!(trace.phase_at(at(8, 1)), Phase::Moving);
        assert_eq!(trace.phase_at(at(8, 10)), Phase::Delivering);
        assert!(trace.deliveries_until(at(8, 10)).is_empty());
        assert_eq!(trace.deliveries_until(at(8, 17)), vec!["P1"]);
        assert_eq!(trace.phase_at(at(8, 17)), Phase::Completed);
    }

    #[test]
    fn test_progress_bounds() {
        let trace = sample();
        assert_eq!(trace.progress_at(at(7, 0)), 0.0);
        assert_eq!(trace.progress_at(at(9, 0)), 100.0);
        let half = trace.progress_at(at(8, 8) + Duration::seconds(30));
        assert!((half - 50.0).abs() < 1e-6);
        assert!(trace.is_finished_at(at(8, 17)));
    }
}
