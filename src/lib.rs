//! glp-fleet-planner core
//!
//! Grid routing, genetic route assignment and a minute-resolution
//! simulation for a fleet of GLP tanker trucks.

pub mod error;
pub mod geometry;
pub mod depot;
pub mod grid;
pub mod traits;
pub mod cache;
pub mod pathfinder;
pub mod fleet;
pub mod order;
pub mod trace;
pub mod route;
pub mod optimizer;
pub mod monitor;
pub mod config;
pub mod simulation;

pub use error::{PlannerError, Result};
