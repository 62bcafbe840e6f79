use serde::Serialize;
use tracing::info;

use super::allocation::AmperageAllocator;
use super::domain::{ChargingState, Vehicle, MIN_CHARGE_AMPS};

/// Amperage a stopped charger is parked at between sessions.
pub const IDLE_CHARGE_AMPS: u32 = MIN_CHARGE_AMPS;

/// Result of the hysteresis filter plus every rule that fired, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeRateDecision {
    pub change: bool,
    pub reasons: Vec<String>,
}

/// Hysteresis filter in front of the charge command path.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChargeRateDecider;

impl ChargeRateDecider {
    pub fn new() -> Self {
        Self
    }

    /// Decides whether `desired_amps` warrants a command. A positive decision marks the
    /// vehicle stale so the next refresh re-reads ground truth.
    pub fn decide(&self, vehicle: &mut Vehicle, desired_amps: u32) -> ChargeRateDecision {
        let Some(state) = vehicle.charge_state() else {
            return ChargeRateDecision {
                change: false,
                reasons: vec!["no charge state reported yet".to_string()],
            };
        };

        let mut change = true;
        let mut reasons = Vec::new();

        if state.charging_state == ChargingState::Charging && state.charge_amps == desired_amps {
            change = false;
            reasons.push(format!("already charging at {desired_amps}A"));
        }

        if state.at_limit() {
            change = false;
            reasons.push(format!(
                "battery {}% at charge limit {}%",
                state.battery_level, state.charge_limit_soc
            ));
        }

        if desired_amps < MIN_CHARGE_AMPS && state.charging_state == ChargingState::Stopped {
            change = false;
            reasons.push(format!(
                "desired {desired_amps}A below minimum and charging already stopped"
            ));
        }

        // Unplugged or unrecognised chargers are never commanded, unlike the idle
        // normalisation below which still covers Complete.
        if !state.charging_state.is_chargeable() && !matches!(state.charging_state, ChargingState::Complete)
        {
            change = false;
            reasons.push(format!("charger is {}", state.charging_state));
        }

        if matches!(
            state.charging_state,
            ChargingState::Stopped | ChargingState::Complete
        ) && state.charge_amps != IDLE_CHARGE_AMPS
        {
            change = true;
            reasons.push(format!(
                "{} with setpoint {}A instead of {IDLE_CHARGE_AMPS}A",
                state.charging_state, state.charge_amps
            ));
        }

        if change && reasons.is_empty() {
            reasons.push("rate change required".to_string());
        }

        if state.charging_state == ChargingState::Charging && !vehicle.is_priority() {
            change = true;
            reasons.clear();
            reasons.push("charging without priority".to_string());
        }

        if change {
            vehicle.mark_stale();
        }

        info!(
            vehicle = vehicle.name(),
            desired_amps,
            change,
            reason = %reasons.join("; "),
            "charge rate decision"
        );

        ChargeRateDecision { change, reasons }
    }
}

/// Checks whether net production moved far enough from `settled_production`, the
/// reading the vehicle's rate was last settled at, that its cached state should be
/// re-read before allocating. Only the priority vehicle is affected by production;
/// revoking a charging vehicle is left to [`ChargeRateDecider`].
pub fn production_shift_reason(
    vehicle: &Vehicle,
    settled_production: f64,
    production: f64,
    allocator: &AmperageAllocator<'_>,
) -> Option<&'static str> {
    let state = vehicle.charge_state()?;
    if !vehicle.is_priority() {
        return None;
    }

    let shift = (settled_production - production).abs();
    let voltage = f64::from(state.charger_voltage);
    match state.charging_state {
        ChargingState::Stopped if shift > f64::from(MIN_CHARGE_AMPS) * voltage => {
            Some("significant change in net production")
        }
        ChargingState::Stopped
            if shift > voltage
                && allocator.desired_amps(vehicle, production) >= MIN_CHARGE_AMPS =>
        {
            Some("production now supports starting a charge")
        }
        ChargingState::Charging if shift > voltage => {
            Some("production moved enough to change the rate")
        }
        _ => None,
    }
}
