mod fixtures;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use glp_fleet_planner::config::PlannerConfig;
use glp_fleet_planner::geometry::Location;
use glp_fleet_planner::optimizer::GeneticOptimizer;
use glp_fleet_planner::order::Order;

use fixtures::*;

#[test]
fn smoke_reference_fleet_plans_a_busy_morning() {
    let config = PlannerConfig {
        genetic: quick_genetic(17),
        ..PlannerConfig::default()
    };
    let fleet = config.build_fleet();
    let pathfinder = config.build_pathfinder();
    let now = at(4, 7, 30);

    let mut rng = SmallRng::seed_from_u64(17);
    let orders: Vec<Order> = (0..30)
        .map(|i| {
            let location = Location::new(rng.gen_range(0..WIDTH), rng.gen_range(0..HEIGHT));
            let quantity = rng.gen_range(1.0..30.0);
            let window = rng.gen_range(4..24);
            Order::new(format!("M{i:02}"), format!("c{i}"), location, quantity, now, window)
        })
        .collect();

    let optimizer = GeneticOptimizer::new(config.genetic.clone()).unwrap();
    let result = optimizer.optimize(&fleet, &orders, &pathfinder, now);

    assert!(!result.routes.is_empty());
    assert!(result.fitness.is_finite());
    assert!(result.generations <= config.genetic.generations);
    for route in &result.routes {
        assert!(route.trace().is_some());
        assert!(route.distance() >= 0);
        assert!(fleet.iter().any(|v| v.code == route.vehicle_code));
    }
}
