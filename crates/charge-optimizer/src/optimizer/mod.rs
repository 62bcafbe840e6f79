//! The scheduling engine: who charges, at what current, and when to sleep.

pub mod allocation;
pub mod commands;
pub mod decision;
pub mod domain;
pub mod monitor;
pub mod orchestrator;
pub mod priority;

#[cfg(test)]
mod tests;

pub use allocation::{Allocation, AllocationRule, AmperageAllocator};
pub use commands::{apply_charge_rate, stop_all, ChargeCommand};
pub use decision::{production_shift_reason, ChargeRateDecider, ChargeRateDecision};
pub use domain::{
    ChargeState, ChargingState, FleetError, SharedFleet, Vehicle, VehicleFleet, MAX_CHARGE_AMPS,
    MIN_CHARGE_AMPS,
};
pub use monitor::{MonitorDecision, MonitorScheduler, MonitorState, PausePlan};
pub use orchestrator::{
    production_pass, CycleOutcome, CycleScope, EngineContext, OrchestrationLoop,
    ProductionTracker,
};
pub use priority::{PriorityOutcome, PriorityScorer, ScoreComponent, VehicleScore};
