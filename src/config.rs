//! Planner configuration.
//!
//! Every section has defaults matching the reference city, so an empty
//! JSON object is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::depot::Depot;
use crate::error::{PlannerError, Result};
use crate::fleet::{Vehicle, default_fleet};
use crate::geometry::Location;
use crate::grid::Grid;
use crate::optimizer::GeneticOptions;
use crate::pathfinder::Pathfinder;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub width: i32,
    pub height: i32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self { width: 70, height: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Simulated minutes between pushes to the status sink.
    pub status_interval_minutes: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            status_interval_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub map: MapConfig,
    pub depots: Vec<Depot>,
    pub genetic: GeneticOptions,
    pub simulation: SimulationConfig,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            map: MapConfig::default(),
            depots: vec![
                Depot::central("CENTRAL", Location::new(12, 8)),
                Depot::intermediate("NORTE", Location::new(42, 42), 160.0),
                Depot::intermediate("ESTE", Location::new(63, 3), 160.0),
            ],
            genetic: GeneticOptions::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl PlannerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PlannerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.map.width <= 0 || self.map.height <= 0 {
            return Err(PlannerError::InvalidConfiguration(format!(
                "map must be non-empty, got {}x{}",
                self.map.width, self.map.height
            )));
        }
        if self.depots.iter().filter(|d| d.is_central()).count() != 1 {
            return Err(PlannerError::InvalidConfiguration(
                "exactly one central depot is required".into(),
            ));
        }
        if let Some(depot) = self.depots.iter().find(|d| !self.grid_contains(&d.location)) {
            return Err(PlannerError::InvalidConfiguration(format!(
                "depot {} at {} lies outside the map",
                depot.id, depot.location
            )));
        }
        if self.simulation.status_interval_minutes == 0 {
            return Err(PlannerError::InvalidConfiguration(
                "status interval must be at least one minute".into(),
            ));
        }
        self.genetic.validate()
    }

    fn grid_contains(&self, location: &Location) -> bool {
        (0..=self.map.width).contains(&location.x) && (0..=self.map.height).contains(&location.y)
    }

    pub fn central_location(&self) -> Location {
        self.depots
            .iter()
            .find(|d| d.is_central())
            .map_or(Location::new(0, 0), |d| d.location)
    }

    pub fn build_grid(&self) -> Grid {
        Grid::new(self.map.width, self.map.height, self.depots.clone())
    }

    pub fn build_pathfinder(&self) -> Pathfinder {
        Pathfinder::new(self.build_grid())
    }

    /// The reference fleet parked at the central depot.
    pub fn build_fleet(&self) -> Vec<Vehicle> {
        default_fleet(self.central_location())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config = PlannerConfig::from_json("{}").unwrap();
        assert_eq!(config.map.width, 70);
        assert_eq!(config.depots.len(), 3);
        assert_eq!(config.genetic.population_size, 150);
        assert_eq!(config.simulation.status_interval_minutes, 10);
        assert_eq!(config.central_location(), Location::new(12, 8));
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{"genetic": {"population_size": 30, "seed": 9}}"#;
        let config = PlannerConfig::from_json(json).unwrap();
        assert_eq!(config.genetic.population_size, 30);
        assert_eq!(config.genetic.seed, Some(9));
        assert_eq!(config.genetic.generations, 100);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(PlannerConfig::from_json("{not json"), Err(PlannerError::Parse(_))));
        assert!(matches!(
            PlannerConfig::from_json(r#"{"map": {"width": 0}}"#),
            Err(PlannerError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            PlannerConfig::from_json(r#"{"depots": []}"#),
            Err(PlannerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_builds_grid_and_fleet() {
        let config = PlannerConfig::default();
        let grid = config.build_grid();
        assert_eq!(grid.depots().len(), 3);
        assert!(grid.in_bounds(&Location::new(70, 50)));
        assert_eq!(config.build_fleet().len(), 20);
    }
}
