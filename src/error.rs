//! Error types for the planner core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("unknown vehicle class: {0}")]
    UnknownVehicleClass(String),
    #[error("unknown incident kind: {0}")]
    UnknownIncidentKind(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("a simulation is already running")]
    AlreadyRunning,
    #[error("no active simulation")]
    NotRunning,
    #[error("speed multiplier must be positive, got {0}")]
    InvalidSpeed(f64),
    #[error("unknown vehicle: {0}")]
    UnknownVehicle(String),
    #[error("breakdown injection is disabled for this simulation")]
    BreakdownsDisabled,
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("simulation fault: {0}")]
    Simulation(String),
}

pub type Result<T> = std::result::Result<T, PlannerError>;
