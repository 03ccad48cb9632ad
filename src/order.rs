//! Delivery orders and the preprocessing pass that makes every order fit
//! in a single vehicle.

use std::cmp::Ordering;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fleet::{Vehicle, VehicleClass};
use crate::geometry::Location;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_id: String,
    pub location: Location,
    /// m³ of GLP requested.
    pub quantity: f64,
    pub received_at: NaiveDateTime,
    /// Hours between receipt and deadline.
    pub window_hours: i64,
    pub delivered_at: Option<NaiveDateTime>,
}

impl Order {
    pub fn new(
        id: impl Into<String>,
        client_id: impl Into<String>,
        location: Location,
        quantity: f64,
        received_at: NaiveDateTime,
        window_hours: i64,
    ) -> Self {
        Self {
            id: id.into(),
            client_id: client_id.into(),
            location,
            quantity: quantity.max(0.0),
            received_at,
            window_hours,
            delivered_at: None,
        }
    }

    pub fn deadline(&self) -> NaiveDateTime {
        self.received_at + Duration::hours(self.window_hours)
    }

    pub fn time_remaining(&self, now: NaiveDateTime) -> Duration {
        self.deadline() - now
    }

    pub fn is_late(&self, now: NaiveDateTime) -> bool {
        now > self.deadline()
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }

    pub fn mark_delivered(&mut self, at: NaiveDateTime) {
        self.delivered_at = Some(at);
    }

    /// Copy of this order carrying `quantity` under a derived id.
    fn part(&self, n: usize, quantity: f64) -> Order {
        Order {
            id: format!("{}_parte{}", self.id, n),
            quantity,
            ..self.clone()
        }
    }
}

/// Sort by delivery window then quantity, and split any order larger than
/// the biggest vehicle in `fleet`.
///
/// With an empty fleet the largest class capacity is assumed.
pub fn preprocess(orders: &[Order], fleet: &[Vehicle]) -> Vec<Order> {
    let capacities = distinct_capacities(fleet);
    let largest = capacities.last().copied().unwrap_or(VehicleClass::TA.glp_capacity());

    let mut sorted: Vec<&Order> = orders.iter().collect();
    sorted.sort_by(|a, b| {
        a.window_hours
            .cmp(&b.window_hours)
            .then_with(|| a.quantity.partial_cmp(&b.quantity).unwrap_or(Ordering::Equal))
    });

    let mut result = Vec::with_capacity(sorted.len());
    for order in sorted {
        if order.quantity > largest {
            let parts = split(order, &capacities);
            debug!(
                order = %order.id,
                quantity = order.quantity,
                parts = parts.len(),
                "split oversized order"
            );
            result.extend(parts);
        } else {
            result.push(order.clone());
        }
    }
    result
}

/// Break `order` into parts that each fit one of `capacities`
/// (ascending, distinct).
///
/// Each part takes the smallest capacity that holds what is left, or the
/// largest capacity when none does.
pub fn split(order: &Order, capacities: &[f64]) -> Vec<Order> {
    let Some(&largest) = capacities.last() else {
        return vec![order.clone()];
    };
    if largest <= 0.0 {
        return vec![order.clone()];
    }

    let mut parts = Vec::new();
    let mut remaining = order.quantity;
    while remaining > 0.0 {
        let capacity = capacities
            .iter()
            .copied()
            .find(|&c| c >= remaining)
            .unwrap_or(largest);
        let amount = remaining.min(capacity);
        parts.push(order.part(parts.len() + 1, amount));
        remaining -= amount;
    }
    parts
}

/// Distinct GLP capacities in `fleet`, ascending. Falls back to the
/// largest class when the fleet is empty.
pub fn distinct_capacities(fleet: &[Vehicle]) -> Vec<f64> {
    let mut capacities: Vec<f64> = fleet.iter().map(|v| v.glp_capacity()).collect();
    if capacities.is_empty() {
        capacities.push(VehicleClass::TA.glp_capacity());
    }
    capacities.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    capacities.dedup();
    capacities
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn received() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    fn order(id: &str, quantity: f64, window: i64) -> Order {
        Order::new(id, "C-1", Location::new(20, 20), quantity, received(), window)
    }

    #[test]
    fn test_deadline_and_lateness() {
        let o = order("P1", 5.0, 4);
        assert_eq!(o.deadline(), received() + Duration::hours(4));
        assert!(!o.is_late(received() + Duration::hours(4)));
        assert!(o.is_late(received() + Duration::hours(5)));
        assert_eq!(o.time_remaining(received() + Duration::hours(1)), Duration::hours(3));
    }

    #[test]
    fn test_sorted_by_window_then_quantity() {
        let orders = vec![order("A", 9.0, 12), order("B", 3.0, 4), order("C", 1.0, 12)];
        let ids: Vec<String> = preprocess(&orders, &[]).into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);
    }

    #[test]
    fn test_split_prefers_smallest_fitting_capacity() {
        let capacities = [5.0, 10.0, 15.0, 25.0];
        let parts = split(&order("P", 32.0, 6), &capacities);
        let quantities: Vec<f64> = parts.iter().map(|p| p.quantity).collect();
        assert_eq!(quantities, vec![25.0, 7.0]);
        assert_eq!(parts[0].id, "P_parte1");
        assert_eq!(parts[1].id, "P_parte2");
        assert_eq!(parts[1].client_id, "C-1");
    }

    #[test]
    fn test_orders_within_capacity_are_untouched() {
        let fleet = vec![Vehicle::new("TD01", VehicleClass::TD, Location::new(0, 0))];
        let result = preprocess(&[order("P", 5.0, 6)], &fleet);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "P");

        let result = preprocess(&[order("Q", 12.0, 6)], &fleet);
        assert_eq!(result.len(), 3);
        assert_eq!(result.iter().map(|o| o.quantity).sum::<f64>(), 12.0);
    }
}
