//! Genetic assignment of orders to vehicles.
//!
//! A chromosome holds one gene per preprocessed order: the index of the
//! vehicle serving it, or `None` when the order is left unassigned.
//! Fitness is minimised.

use std::collections::HashMap;
use std::time::{Duration as WallDuration, Instant};

use chrono::{Duration, NaiveDateTime};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PlannerError, Result};
use crate::fleet::{AVERAGE_SPEED_KMH, Vehicle};
use crate::geometry::Location;
use crate::order::{Order, preprocess};
use crate::pathfinder::Pathfinder;
use crate::route::Route;

pub type Chromosome = Vec<Option<usize>>;

// Fitness weights.
const W_FUEL: f64 = 0.10;
const W_DISTANCE: f64 = 0.05;
const W_DELAY: f64 = 0.15;
const W_UNASSIGNED: f64 = 0.60;
const W_OVERLOAD: f64 = 0.05;
const W_RISK: f64 = 0.05;
const PENALTY: f64 = 1000.0;

/// Generation after which the convergence check kicks in.
const CONVERGENCE_WARMUP: usize = 20;
/// Rank compared against the best individual by the convergence check.
const CONVERGENCE_RANK: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticOptions {
    pub population_size: usize,
    pub generations: usize,
    /// Chance that an offspring gets one gene mutated.
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    /// Individuals copied unchanged into the next generation.
    pub elitism: usize,
    pub tournament_size: usize,
    /// Fixed RNG seed; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for GeneticOptions {
    fn default() -> Self {
        Self {
            population_size: 150,
            generations: 100,
            mutation_rate: 0.08,
            crossover_rate: 0.8,
            elitism: 10,
            tournament_size: 3,
            seed: None,
        }
    }
}

impl GeneticOptions {
    pub fn validate(&self) -> Result<()> {
        if self.population_size == 0 {
            return Err(PlannerError::InvalidConfiguration(
                "population size must be positive".into(),
            ));
        }
        if self.elitism > self.population_size {
            return Err(PlannerError::InvalidConfiguration(format!(
                "elitism {} exceeds population size {}",
                self.elitism, self.population_size
            )));
        }
        if self.tournament_size == 0 {
            return Err(PlannerError::InvalidConfiguration(
                "tournament size must be positive".into(),
            ));
        }
        let rates = [
            ("mutation rate", self.mutation_rate),
            ("crossover rate", self.crossover_rate),
        ];
        for (name, p) in rates {
            if !(0.0..=1.0).contains(&p) {
                return Err(PlannerError::InvalidConfiguration(format!(
                    "{name} {p} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub routes: Vec<Route>,
    pub assigned: Vec<String>,
    pub unassigned: Vec<String>,
    pub fitness: f64,
    /// Best fitness of the initial population, then of each generation.
    pub history: Vec<f64>,
    pub generations: usize,
    pub converged: bool,
    pub elapsed: WallDuration,
}

impl OptimizationResult {
    fn empty(unassigned: Vec<String>, elapsed: WallDuration) -> Self {
        Self {
            routes: Vec::new(),
            assigned: Vec::new(),
            unassigned,
            fitness: 0.0,
            history: Vec::new(),
            generations: 0,
            converged: false,
            elapsed,
        }
    }
}

#[derive(Debug, Clone)]
struct Individual {
    genes: Chromosome,
    fitness: f64,
    evaluated: bool,
}

impl Individual {
    fn new(genes: Chromosome) -> Self {
        Self {
            genes,
            fitness: f64::INFINITY,
            evaluated: false,
        }
    }
}

/// Read-only view of one optimisation run, shared across the rayon pool.
struct Problem<'a> {
    vehicles: Vec<&'a Vehicle>,
    orders: Vec<Order>,
    central: Option<Location>,
    now: NaiveDateTime,
}

impl Problem<'_> {
    /// Group orders by vehicle in gene order and sequence each route.
    fn decode(&self, genes: &[Option<usize>]) -> Vec<(usize, Route)> {
        let mut routes: Vec<(usize, Route)> = Vec::new();
        let mut slot: HashMap<usize, usize> = HashMap::new();

        for (order, gene) in self.orders.iter().zip(genes) {
            let Some(v) = *gene else { continue };
            let Some(vehicle) = self.vehicles.get(v) else { continue };
            let index = *slot.entry(v).or_insert_with(|| {
                let destination = self.central.unwrap_or(vehicle.location);
                routes.push((v, Route::new(vehicle.code.clone(), vehicle.location, destination)));
                routes.len() - 1
            });
            routes[index].1.add_order(order.clone());
        }

        for (_, route) in &mut routes {
            route.sequence();
        }
        routes
    }

    fn fitness(&self, genes: &[Option<usize>]) -> f64 {
        let mut fuel = 0.0;
        let mut distance = 0.0;
        let mut delay_minutes = 0.0;
        let mut overload = 0.0;
        let mut risk = 0.0;

        for (v, mut route) in self.decode(genes) {
            let vehicle = self.vehicles[v];
            fuel += route.calculate_consumption(vehicle);
            distance += route.distance() as f64;

            let glp = route.total_glp();
            if glp > vehicle.glp_capacity() {
                overload += glp - vehicle.glp_capacity();
            }

            // Straight from the vehicle's current cell, ignoring the route.
            for order in route.orders() {
                let km = vehicle.location.distance_to(&order.location) as f64;
                let eta = self.now + Duration::minutes((km / AVERAGE_SPEED_KMH * 60.0) as i64);
                if eta > order.deadline() {
                    delay_minutes += (eta - order.deadline()).num_minutes() as f64;
                }
            }

            risk += route.distance() as f64 * vehicle.class.risk() / 100.0;
        }

        let unassigned = genes.iter().filter(|g| g.is_none()).count() as f64;

        W_FUEL * fuel
            + W_DISTANCE * distance
            + W_DELAY * delay_minutes
            + W_UNASSIGNED * (unassigned * PENALTY)
            + W_OVERLOAD * (overload * PENALTY)
            + W_RISK * risk
    }

    fn random_gene(&self, rng: &mut SmallRng) -> Option<usize> {
        let pick = rng.gen_range(0..=self.vehicles.len());
        (pick < self.vehicles.len()).then_some(pick)
    }

    fn evaluate(&self, population: &mut [Individual]) {
        population.par_iter_mut().filter(|i| !i.evaluated).for_each(|individual| {
            individual.fitness = self.fitness(&individual.genes);
            individual.evaluated = true;
        });
        population.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
    }
}

#[derive(Debug, Clone, Default)]
pub struct GeneticOptimizer {
    options: GeneticOptions,
}

impl GeneticOptimizer {
    pub fn new(options: GeneticOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &GeneticOptions {
        &self.options
    }

    /// Assign `orders` to the available vehicles in `fleet` and build
    /// refined, traced routes for the best assignment found.
    ///
    /// No available vehicles or no orders yields an empty result.
    pub fn optimize(
        &self,
        fleet: &[Vehicle],
        orders: &[Order],
        pathfinder: &Pathfinder,
        now: NaiveDateTime,
    ) -> OptimizationResult {
        let started = Instant::now();
        let vehicles: Vec<&Vehicle> = fleet.iter().filter(|v| v.is_available()).collect();
        let available: Vec<Vehicle> = vehicles.iter().map(|v| (*v).clone()).collect();
        let orders = preprocess(orders, &available);

        if vehicles.is_empty() || orders.is_empty() {
            debug!(vehicles = vehicles.len(), orders = orders.len(), "nothing to optimise");
            let unassigned = orders.into_iter().map(|o| o.id).collect();
            return OptimizationResult::empty(unassigned, started.elapsed());
        }

        let grid = pathfinder.grid();
        let upcoming = grid.blockages_active_within(now, Duration::hours(24)).len();
        info!(
            vehicles = vehicles.len(),
            orders = orders.len(),
            blockages = upcoming,
            "starting genetic optimisation"
        );

        let problem = Problem {
            vehicles,
            orders,
            central: grid.central_depot().map(|d| d.location),
            now,
        };
        let (best, history, generations, converged) = self.evolve(&problem);

        let by_code: HashMap<&str, &Vehicle> =
            problem.vehicles.iter().map(|v| (v.code.as_str(), *v)).collect();
        let mut routes: Vec<Route> =
            problem.decode(&best.genes).into_iter().map(|(_, r)| r).collect();
        routes.par_iter_mut().for_each(|route| {
            if let Some(vehicle) = by_code.get(route.vehicle_code.as_str()) {
                route.refine_with_refueling(&grid, vehicle);
                route.build_movement_trace(pathfinder, vehicle, now);
            }
        });

        let mut unassigned: Vec<String> = problem
            .orders
            .iter()
            .zip(&best.genes)
            .filter(|(_, g)| g.is_none())
            .map(|(o, _)| o.id.clone())
            .collect();
        unassigned.extend(routes.iter().flat_map(|r| r.unserved().iter().map(|o| o.id.clone())));
        let assigned: Vec<String> = routes
            .iter()
            .flat_map(|r| r.orders().iter().map(|o| o.id.clone()))
            .collect();
        routes.retain(|r| !r.orders().is_empty());

        let elapsed = started.elapsed();
        info!(
            fitness = best.fitness,
            generations,
            converged,
            assigned = assigned.len(),
            unassigned = unassigned.len(),
            routes = routes.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "genetic optimisation finished"
        );

        OptimizationResult {
            routes,
            assigned,
            unassigned,
            fitness: best.fitness,
            history,
            generations,
            converged,
            elapsed,
        }
    }

    fn evolve(&self, problem: &Problem<'_>) -> (Individual, Vec<f64>, usize, bool) {
        let opts = &self.options;
        let mut rng = match opts.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        let genes_len = problem.orders.len();

        let mut population: Vec<Individual> = (0..opts.population_size)
            .map(|_| {
                Individual::new((0..genes_len).map(|_| problem.random_gene(&mut rng)).collect())
            })
            .collect();
        problem.evaluate(&mut population);

        let mut best = population[0].clone();
        let mut history = vec![best.fitness];
        let mut generations = 0;
        let mut converged = false;

        for generation in 0..opts.generations {
            let selected =
                tournament(&population, opts.population_size, opts.tournament_size, &mut rng);

            let mut next: Vec<Individual> = population.iter().take(opts.elitism).cloned().collect();
            while next.len() < opts.population_size {
                let a = &selected[rng.gen_range(0..selected.len())];
                let b = &selected[rng.gen_range(0..selected.len())];
                let children = if rng.gen_bool(opts.crossover_rate) {
                    crossover(&a.genes, &b.genes, &mut rng)
                } else {
                    [a.genes.clone(), b.genes.clone()]
                };
                for mut genes in children {
                    if rng.gen_bool(opts.mutation_rate) {
                        let at = rng.gen_range(0..genes.len());
                        genes[at] = problem.random_gene(&mut rng);
                    }
                    if next.len() < opts.population_size {
                        next.push(Individual::new(genes));
                    }
                }
            }

            problem.evaluate(&mut next);
            population = next;
            generations = generation + 1;
            history.push(population[0].fitness);

            if population[0].fitness < best.fitness {
                best = population[0].clone();
                debug!(generation, fitness = best.fitness, "new best fitness");
            }

            if generation > CONVERGENCE_WARMUP
                && population.len() > CONVERGENCE_RANK
                && population[0].fitness == population[CONVERGENCE_RANK].fitness
            {
                info!(generation, fitness = best.fitness, "population converged");
                converged = true;
                break;
            }
        }

        (best, history, generations, converged)
    }
}

/// Winners of `rounds` tournaments of `size` random entrants each.
fn tournament<'p>(
    population: &'p [Individual],
    rounds: usize,
    size: usize,
    rng: &mut SmallRng,
) -> Vec<&'p Individual> {
    (0..rounds)
        .map(|_| {
            let mut winner = &population[rng.gen_range(0..population.len())];
            for _ in 1..size {
                let challenger = &population[rng.gen_range(0..population.len())];
                if challenger.fitness < winner.fitness {
                    winner = challenger;
                }
            }
            winner
        })
        .collect()
}

/// Single cut point; the first child takes `a` before the cut and `b` after.
fn crossover(a: &[Option<usize>], b: &[Option<usize>], rng: &mut SmallRng) -> [Chromosome; 2] {
    let cut = rng.gen_range(0..a.len());
    let first = a[..cut].iter().chain(&b[cut..]).copied().collect();
    let second = b[..cut].iter().chain(&a[cut..]).copied().collect();
    [first, second]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depot::Depot;
    use crate::fleet::VehicleClass;
    use crate::grid::Grid;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    fn problem<'a>(vehicles: Vec<&'a Vehicle>, orders: Vec<Order>) -> Problem<'a> {
        Problem {
            vehicles,
            orders,
            central: Some(Location::new(12, 8)),
            now: now(),
        }
    }

    fn order(id: &str, x: i32, quantity: f64, window: i64) -> Order {
        Order::new(id, "C", Location::new(x, 8), quantity, now(), window)
    }

    #[test]
    fn test_options_validation() {
        assert!(GeneticOptions::default().validate().is_ok());
        let bad = GeneticOptions { elitism: 200, ..Default::default() };
        assert!(matches!(bad.validate(), Err(PlannerError::InvalidConfiguration(_))));
        let bad = GeneticOptions { mutation_rate: 1.5, ..Default::default() };
        assert!(GeneticOptimizer::new(bad).is_err());
    }

    #[test]
    fn test_decode_skips_unassigned_and_out_of_range() {
        let v = Vehicle::new("TA01", VehicleClass::TA, Location::new(12, 8));
        let orders = vec![order("A", 20, 1.0, 8), order("B", 30, 1.0, 8), order("C", 40, 1.0, 8)];
        let p = problem(vec![&v], orders);
        let routes = p.decode(&[Some(0), None, Some(7)]);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].1.orders().len(), 1);
        assert_eq!(routes[0].1.destination, Location::new(12, 8));
    }

    #[test]
    fn test_fitness_terms() {
        let v = Vehicle::new("TD01", VehicleClass::TD, Location::new(12, 8));
        // 10 km out, 10 km back; 6 m³ on a 5 m³ truck.
        let p = problem(vec![&v], vec![order("A", 22, 6.0, 8)]);
        let fuel = 10.0 * (1.0 + 5.0 * 0.5) / 180.0 + 10.0 * 1.0 / 180.0;
        let expected = 0.10 * fuel + 0.05 * 20.0 + 0.05 * 1.0 * 1000.0 + 0.05 * 20.0 * 0.8 / 100.0;
        assert!((p.fitness(&[Some(0)]) - expected).abs() < 1e-9);

        assert!((p.fitness(&[None]) - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_delay_counts_minutes_past_deadline() {
        let v = Vehicle::new("TA01", VehicleClass::TA, Location::new(0, 8));
        // 50 km away with zero-hour window: 60 minutes late.
        let p = problem(vec![&v], vec![order("A", 50, 1.0, 0)]);
        let with_delay = p.fitness(&[Some(0)]);

        let on_time = problem(vec![&v], vec![order("A", 50, 1.0, 2)]);
        assert!((with_delay - on_time.fitness(&[Some(0)]) - 0.15 * 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_crossover_swaps_tails() {
        let mut rng = SmallRng::seed_from_u64(7);
        let a = vec![Some(0); 6];
        let b = vec![None; 6];
        let [c1, c2] = crossover(&a, &b, &mut rng);
        let cut = c1.iter().take_while(|g| g.is_some()).count();
        assert!(c1[cut..].iter().all(Option::is_none));
        assert!(c2[..cut].iter().all(Option::is_none));
        assert!(c2[cut..].iter().all(|g| *g == Some(0)));
    }

    #[test]
    fn test_empty_inputs_give_empty_result() {
        let depots = vec![Depot::central("CENTRAL", Location::new(12, 8))];
        let pathfinder = Pathfinder::new(Grid::new(70, 50, depots));
        let optimizer = GeneticOptimizer::default();
        let result = optimizer.optimize(&[], &[order("A", 20, 1.0, 8)], &pathfinder, now());
        assert!(result.routes.is_empty());
        assert_eq!(result.unassigned, vec!["A".to_string()]);

        let fleet = vec![Vehicle::new("TA01", VehicleClass::TA, Location::new(12, 8))];
        let result = optimizer.optimize(&fleet, &[], &pathfinder, now());
        assert!(result.routes.is_empty());
        assert!(result.unassigned.is_empty());
    }
}
