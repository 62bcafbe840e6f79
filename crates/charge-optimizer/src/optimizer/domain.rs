use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::VehicleConfig;

/// Lowest current a charger sustains; anything below is treated as "stopped".
pub const MIN_CHARGE_AMPS: u32 = 5;
/// Highest current the engine will ever request.
pub const MAX_CHARGE_AMPS: u32 = 48;

/// Charging state reported by the vehicle. Unknown vendor strings are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChargingState {
    Charging,
    Stopped,
    Complete,
    Disconnected,
    Other(String),
}

impl ChargingState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "charging" => Self::Charging,
            "stopped" => Self::Stopped,
            "complete" => Self::Complete,
            "disconnected" => Self::Disconnected,
            _ => Self::Other(raw.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Charging => "Charging",
            Self::Stopped => "Stopped",
            Self::Complete => "Complete",
            Self::Disconnected => "Disconnected",
            Self::Other(raw) => raw,
        }
    }

    /// Only a charging or stopped vehicle can be handed current.
    pub fn is_chargeable(&self) -> bool {
        matches!(self, Self::Charging | Self::Stopped)
    }
}

impl fmt::Display for ChargingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Point-in-time charge telemetry for one vehicle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeState {
    pub charging_state: ChargingState,
    pub battery_level: u8,
    pub charge_limit_soc: u8,
    pub charge_amps: u32,
    pub charger_voltage: u32,
}

impl ChargeState {
    pub fn at_limit(&self) -> bool {
        self.battery_level >= self.charge_limit_soc
    }
}

/// A configured vehicle plus the engine's view of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    id: String,
    name: String,
    charge_state: Option<ChargeState>,
    is_priority: bool,
    refresh_charge_state: bool,
}

impl Vehicle {
    /// New vehicles have no charge state and are flagged for refresh.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            charge_state: None,
            is_priority: false,
            refresh_charge_state: true,
        }
    }

    pub fn with_charge_state(mut self, state: ChargeState) -> Self {
        self.apply_charge_state(state);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn charge_state(&self) -> Option<&ChargeState> {
        self.charge_state.as_ref()
    }

    pub fn is_priority(&self) -> bool {
        self.is_priority
    }

    /// True when the cached charge state may no longer match the vehicle.
    pub fn needs_refresh(&self) -> bool {
        self.refresh_charge_state
    }

    pub fn is_charging(&self) -> bool {
        matches!(
            self.charge_state.as_ref().map(|state| &state.charging_state),
            Some(ChargingState::Charging)
        )
    }

    pub fn mark_stale(&mut self) {
        self.refresh_charge_state = true;
    }

    fn apply_charge_state(&mut self, state: ChargeState) {
        self.charge_state = Some(state);
        self.refresh_charge_state = false;
    }
}

/// Error raised while assembling a fleet.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("at least one vehicle must be configured")]
    Empty,
}

/// Owned collection of vehicles. At most one vehicle holds priority at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleFleet {
    vehicles: Vec<Vehicle>,
}

/// Fleet shared between the refreshers of one process.
pub type SharedFleet = Arc<Mutex<VehicleFleet>>;

impl VehicleFleet {
    pub fn new(vehicles: Vec<Vehicle>) -> Result<Self, FleetError> {
        if vehicles.is_empty() {
            return Err(FleetError::Empty);
        }

        let mut fleet = Self { vehicles };
        let first_priority = fleet.priority_index();
        fleet.set_priority(first_priority);
        Ok(fleet)
    }

    pub fn from_config(configs: &[VehicleConfig]) -> Result<Self, FleetError> {
        Self::new(
            configs
                .iter()
                .map(|config| Vehicle::new(config.id.clone(), config.name.clone()))
                .collect(),
        )
    }

    pub fn into_shared(self) -> SharedFleet {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn into_vehicles(self) -> Vec<Vehicle> {
        self.vehicles
    }

    pub fn vehicle(&self, index: usize) -> Option<&Vehicle> {
        self.vehicles.get(index)
    }

    pub fn vehicle_mut(&mut self, index: usize) -> Option<&mut Vehicle> {
        self.vehicles.get_mut(index)
    }

    /// Replaces the cached charge state wholesale and clears the refresh flag.
    pub fn apply_charge_state(&mut self, index: usize, state: ChargeState) {
        if let Some(vehicle) = self.vehicles.get_mut(index) {
            vehicle.apply_charge_state(state);
        }
    }

    pub fn mark_stale(&mut self, index: usize) {
        if let Some(vehicle) = self.vehicles.get_mut(index) {
            vehicle.mark_stale();
        }
    }

    /// Grants priority to `winner` and revokes it everywhere else.
    pub fn set_priority(&mut self, winner: Option<usize>) {
        for (index, vehicle) in self.vehicles.iter_mut().enumerate() {
            vehicle.is_priority = Some(index) == winner;
        }
    }

    pub fn priority_index(&self) -> Option<usize> {
        self.vehicles.iter().position(Vehicle::is_priority)
    }

    pub fn priority_vehicle(&self) -> Option<&Vehicle> {
        self.vehicles.iter().find(|vehicle| vehicle.is_priority)
    }

    /// Whether every vehicle has reported a charge state at least once.
    pub fn all_reported(&self) -> bool {
        self.vehicles
            .iter()
            .all(|vehicle| vehicle.charge_state.is_some())
    }

    pub fn stale_indices(&self) -> Vec<usize> {
        self.vehicles
            .iter()
            .enumerate()
            .filter(|(_, vehicle)| vehicle.refresh_charge_state)
            .map(|(index, _)| index)
            .collect()
    }

    /// `(index, id)` pairs so callers can release the lock before calling out.
    pub fn ids(&self) -> Vec<(usize, String)> {
        self.vehicles
            .iter()
            .enumerate()
            .map(|(index, vehicle)| (index, vehicle.id.clone()))
            .collect()
    }
}
