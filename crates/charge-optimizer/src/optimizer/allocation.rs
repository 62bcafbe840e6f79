use serde::Serialize;

use super::domain::{ChargingState, Vehicle, MAX_CHARGE_AMPS, MIN_CHARGE_AMPS};
use crate::config::EngineSettings;

/// Reported voltages under this are treated as missing telemetry.
pub const MIN_PLAUSIBLE_VOLTAGE: u32 = 100;

/// Which allocation rule produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AllocationRule {
    NotPriority,
    NotChargeable,
    NoChargeState,
    BatteryOverride,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Allocation {
    pub desired_amps: u32,
    pub rule: AllocationRule,
    /// Headroom in watts, only set when production drove the result.
    pub watts_available: Option<f64>,
}

impl Allocation {
    fn fixed(desired_amps: u32, rule: AllocationRule) -> Self {
        Self {
            desired_amps: normalize(desired_amps),
            rule,
            watts_available: None,
        }
    }
}

/// Anything under the minimum sustainable rate means "stopped".
fn normalize(amps: u32) -> u32 {
    let amps = amps.min(MAX_CHARGE_AMPS);
    if amps < MIN_CHARGE_AMPS {
        0
    } else {
        amps
    }
}

/// Converts net production into a current for the priority vehicle.
#[derive(Debug, Clone, Copy)]
pub struct AmperageAllocator<'a> {
    settings: &'a EngineSettings,
}

impl<'a> AmperageAllocator<'a> {
    pub fn new(settings: &'a EngineSettings) -> Self {
        Self { settings }
    }

    pub fn allocate(&self, vehicle: &Vehicle, net_production: f64) -> Allocation {
        if !vehicle.is_priority() {
            return Allocation::fixed(0, AllocationRule::NotPriority);
        }
        let Some(state) = vehicle.charge_state() else {
            return Allocation::fixed(0, AllocationRule::NoChargeState);
        };

        let (current_amps, current_voltage) = match state.charging_state {
            ChargingState::Charging => {
                let voltage = if state.charger_voltage < MIN_PLAUSIBLE_VOLTAGE {
                    self.settings.default_charger_voltage
                } else {
                    state.charger_voltage
                };
                (state.charge_amps, voltage)
            }
            ChargingState::Stopped => {
                if state.battery_level <= self.settings.charge_override_percentage {
                    return Allocation::fixed(
                        self.settings.charge_override_amps,
                        AllocationRule::BatteryOverride,
                    );
                }
                (0, self.settings.default_charger_voltage)
            }
            _ => return Allocation::fixed(0, AllocationRule::NotChargeable),
        };

        let voltage = f64::from(current_voltage.max(1));
        let watts_available =
            net_production - self.settings.watt_buffer + f64::from(current_amps) * voltage;
        if !watts_available.is_finite() {
            return Allocation {
                desired_amps: 0,
                rule: AllocationRule::Production,
                watts_available: None,
            };
        }
        let raw = (watts_available / voltage).trunc();
        let desired = if raw <= 0.0 {
            0
        } else {
            raw.min(f64::from(MAX_CHARGE_AMPS)) as u32
        };

        Allocation {
            desired_amps: normalize(desired),
            rule: AllocationRule::Production,
            watts_available: Some(watts_available),
        }
    }

    pub fn desired_amps(&self, vehicle: &Vehicle, net_production: f64) -> u32 {
        self.allocate(vehicle, net_production).desired_amps
    }
}
