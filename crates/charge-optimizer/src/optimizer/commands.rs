use tracing::{debug, info, warn};

use super::decision::IDLE_CHARGE_AMPS;
use super::domain::{SharedFleet, MIN_CHARGE_AMPS};
use crate::collaborators::{CollaboratorError, VehicleControl};

/// A charge-rate change the production refresher decided to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeCommand {
    pub index: usize,
    pub vehicle_id: String,
    pub vehicle_name: String,
    pub was_charging: bool,
    pub desired_amps: u32,
}

/// Sends the commands for one rate change.
///
/// Under the minimum rate the charger is stopped and parked at the idle setpoint;
/// otherwise the setpoint is applied and charging started if it was not running.
pub async fn apply_charge_rate(
    control: &dyn VehicleControl,
    command: &ChargeCommand,
) -> Result<(), CollaboratorError> {
    let vehicle = command.vehicle_name.as_str();
    let id = command.vehicle_id.as_str();

    if command.desired_amps < MIN_CHARGE_AMPS {
        control.stop_charge(id).await?;
        control.set_charging_amps(id, IDLE_CHARGE_AMPS).await?;
        info!(
            vehicle,
            desired_amps = command.desired_amps,
            "charging stopped, setpoint parked at {IDLE_CHARGE_AMPS}A"
        );
        return Ok(());
    }

    control.set_charging_amps(id, command.desired_amps).await?;
    if !command.was_charging {
        control.start_charge(id).await?;
        info!(vehicle, desired_amps = command.desired_amps, "charging started");
    } else {
        info!(vehicle, desired_amps = command.desired_amps, "charge rate adjusted");
    }
    Ok(())
}

/// Commands every vehicle to stop and flags it for refresh. Failures are logged only.
pub async fn stop_all(control: &dyn VehicleControl, fleet: &SharedFleet) {
    let targets = fleet.lock().expect("fleet mutex poisoned").ids();

    for (index, id) in targets {
        match control.stop_charge(&id).await {
            Ok(()) => debug!(vehicle_id = %id, "stop command acknowledged"),
            Err(CollaboratorError::Rejected(reason)) => {
                debug!(vehicle_id = %id, %reason, "stop not needed")
            }
            Err(err) => warn!(vehicle_id = %id, error = %err, "failed to stop vehicle before pause"),
        }
        fleet.lock().expect("fleet mutex poisoned").mark_stale(index);
    }
}
