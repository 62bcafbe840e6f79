//! Surplus solar charging engine.
//!
//! The engine decides, on every control cycle, which vehicle may draw surplus production,
//! at what current, and how long the service should sleep before looking again.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod optimizer;
pub mod telemetry;
