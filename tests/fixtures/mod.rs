//! Test fixtures for glp-fleet-planner.
//!
//! Provides a reference city layout plus builders for fleets, orders and
//! blockages.

pub mod city;

pub use city::*;
