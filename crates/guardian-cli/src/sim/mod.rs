//! Flight simulation for manual end-to-end checks.

pub mod paths;
pub mod scenarios;

pub use paths::{FlightPath, LinearPath};
pub use scenarios::{Scenario, SimAircraft};
