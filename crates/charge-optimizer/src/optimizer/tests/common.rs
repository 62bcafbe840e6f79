use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::collaborators::{
    CollaboratorError, Forecast, HourlyIrradiance, PowerProduction, VehicleControl,
};
use crate::config::{EngineSettings, RefreshIntervals, SettingsHandle};
use crate::optimizer::{ChargeState, ChargingState, EngineContext, Vehicle, VehicleFleet};

pub(super) fn charge_state(
    charging_state: ChargingState,
    battery_level: u8,
    charge_limit_soc: u8,
    charge_amps: u32,
    charger_voltage: u32,
) -> ChargeState {
    ChargeState {
        charging_state,
        battery_level,
        charge_limit_soc,
        charge_amps,
        charger_voltage,
    }
}

/// A reported vehicle holding priority.
pub(super) fn priority_vehicle(state: ChargeState) -> Vehicle {
    let mut fleet =
        VehicleFleet::new(vec![Vehicle::new("123456", "test vehicle").with_charge_state(state)])
            .expect("fleet builds");
    fleet.set_priority(Some(0));
    fleet.into_vehicles().remove(0)
}

pub(super) fn plain_vehicle(state: ChargeState) -> Vehicle {
    Vehicle::new("123456", "test vehicle").with_charge_state(state)
}

pub(super) fn two_vehicle_fleet(first: ChargeState, second: ChargeState) -> VehicleFleet {
    VehicleFleet::new(vec![
        Vehicle::new("1", "test vehicle 1").with_charge_state(first),
        Vehicle::new("2", "test vehicle 2").with_charge_state(second),
    ])
    .expect("fleet builds")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Command {
    Start(String),
    Stop(String),
    SetAmps(String, u32),
    WakeUp(String),
}

/// Vehicle API double that serves canned states and records every command.
#[derive(Default)]
pub(super) struct RecordingVehicles {
    states: Mutex<HashMap<String, ChargeState>>,
    commands: Mutex<Vec<Command>>,
    fetches: Mutex<Vec<String>>,
}

impl RecordingVehicles {
    pub(super) fn with_states(states: &[(&str, ChargeState)]) -> Arc<Self> {
        let recorder = Self::default();
        {
            let mut map = recorder.states.lock().expect("states mutex poisoned");
            for (id, state) in states {
                map.insert((*id).to_string(), state.clone());
            }
        }
        Arc::new(recorder)
    }

    pub(super) fn set_state(&self, id: &str, state: ChargeState) {
        self.states
            .lock()
            .expect("states mutex poisoned")
            .insert(id.to_string(), state);
    }

    pub(super) fn commands(&self) -> Vec<Command> {
        self.commands.lock().expect("commands mutex poisoned").clone()
    }

    pub(super) fn fetch_count(&self, id: &str) -> usize {
        self.fetches
            .lock()
            .expect("fetches mutex poisoned")
            .iter()
            .filter(|fetched| fetched.as_str() == id)
            .count()
    }

    fn record(&self, command: Command) {
        self.commands
            .lock()
            .expect("commands mutex poisoned")
            .push(command);
    }
}

#[async_trait]
impl VehicleControl for RecordingVehicles {
    async fn charge_state(&self, vehicle_id: &str) -> Result<ChargeState, CollaboratorError> {
        self.fetches
            .lock()
            .expect("fetches mutex poisoned")
            .push(vehicle_id.to_string());
        self.states
            .lock()
            .expect("states mutex poisoned")
            .get(vehicle_id)
            .cloned()
            .ok_or_else(|| CollaboratorError::Transport(format!("unknown vehicle {vehicle_id}")))
    }

    async fn start_charge(&self, vehicle_id: &str) -> Result<(), CollaboratorError> {
        self.record(Command::Start(vehicle_id.to_string()));
        Ok(())
    }

    async fn stop_charge(&self, vehicle_id: &str) -> Result<(), CollaboratorError> {
        self.record(Command::Stop(vehicle_id.to_string()));
        Ok(())
    }

    async fn set_charging_amps(
        &self,
        vehicle_id: &str,
        amps: u32,
    ) -> Result<(), CollaboratorError> {
        self.record(Command::SetAmps(vehicle_id.to_string(), amps));
        Ok(())
    }

    async fn wake_up(&self, vehicle_id: &str) -> Result<(), CollaboratorError> {
        self.record(Command::WakeUp(vehicle_id.to_string()));
        Ok(())
    }
}

/// Meter double. `None` simulates an exhausted retry policy.
pub(super) struct FixedProduction {
    watts: Mutex<Option<f64>>,
}

impl FixedProduction {
    pub(super) fn new(watts: Option<f64>) -> Arc<Self> {
        Arc::new(Self {
            watts: Mutex::new(watts),
        })
    }

    pub(super) fn set(&self, watts: Option<f64>) {
        *self.watts.lock().expect("watts mutex poisoned") = watts;
    }
}

#[async_trait]
impl PowerProduction for FixedProduction {
    async fn net_power_production(&self) -> Result<f64, CollaboratorError> {
        self.watts
            .lock()
            .expect("watts mutex poisoned")
            .ok_or(CollaboratorError::Timeout)
    }
}

/// Forecast double. `None` fields answer with an error.
pub(super) struct ScriptedForecast {
    pub(super) next_hour: Option<f64>,
    pub(super) next_met: Option<DateTime<Utc>>,
    pub(super) hours: Vec<HourlyIrradiance>,
}

impl ScriptedForecast {
    pub(super) fn sunny() -> Arc<Self> {
        Arc::new(Self {
            next_hour: Some(800.0),
            next_met: None,
            hours: Vec::new(),
        })
    }
}

#[async_trait]
impl Forecast for ScriptedForecast {
    async fn irradiance_next_hour(&self) -> Result<f64, CollaboratorError> {
        self.next_hour.ok_or(CollaboratorError::Timeout)
    }

    async fn irradiance_by_hour(&self) -> Result<Vec<HourlyIrradiance>, CollaboratorError> {
        Ok(self.hours.clone())
    }

    async fn irradiance_threshold_next_met(
        &self,
        _threshold: f64,
    ) -> Result<DateTime<Utc>, CollaboratorError> {
        self.next_met.ok_or(CollaboratorError::Timeout)
    }
}

pub(super) fn intervals() -> RefreshIntervals {
    RefreshIntervals {
        vehicle_state: Duration::from_secs(15 * 60),
        priority: Duration::from_secs(30 * 60),
        production: Duration::from_secs(60),
        monitor: Duration::from_secs(60),
        stale_poll: Duration::from_secs(15),
        startup_poll: Duration::from_secs(1),
    }
}

pub(super) fn context(
    fleet: VehicleFleet,
    settings: EngineSettings,
    vehicles: Arc<RecordingVehicles>,
    production: Arc<FixedProduction>,
    forecast: Arc<ScriptedForecast>,
) -> EngineContext {
    EngineContext::new(
        fleet,
        SettingsHandle::new(settings),
        intervals(),
        vehicles,
        production,
        forecast,
    )
}
