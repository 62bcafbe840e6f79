use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use charge_optimizer::collaborators::{
    CollaboratorError, Forecast, HourlyIrradiance, PowerProduction, VehicleControl,
};
use charge_optimizer::config::{EngineSettings, RefreshIntervals, SettingsHandle};
use charge_optimizer::optimizer::{
    production_pass, AmperageAllocator, ChargeRateDecider, ChargeState, ChargingState,
    EngineContext, MonitorDecision, MonitorScheduler, MonitorState, PriorityScorer,
    ProductionTracker, Vehicle, VehicleFleet,
};

fn state(charging_state: ChargingState, battery_level: u8, charge_limit_soc: u8) -> ChargeState {
    ChargeState {
        charging_state,
        battery_level,
        charge_limit_soc,
        charge_amps: 5,
        charger_voltage: 240,
    }
}

fn prioritized(state: ChargeState) -> Vehicle {
    let mut fleet = VehicleFleet::new(vec![Vehicle::new("5YJ3", "Model 3").with_charge_state(state)])
        .expect("fleet builds");
    fleet.set_priority(Some(0));
    fleet.into_vehicles().remove(0)
}

#[test]
fn scenario_a_truncates_available_surplus() {
    let settings = EngineSettings {
        watt_buffer: 500.0,
        default_charger_voltage: 240,
        ..EngineSettings::default()
    };
    let vehicle = prioritized(state(ChargingState::Stopped, 60, 90));

    let desired = AmperageAllocator::new(&settings).desired_amps(&vehicle, 2000.0);

    assert_eq!(desired, 6);
}

#[test]
fn scenario_b_caps_at_forty_eight_amps() {
    let settings = EngineSettings::default();
    let vehicle = prioritized(state(ChargingState::Stopped, 60, 90));

    assert_eq!(
        AmperageAllocator::new(&settings).desired_amps(&vehicle, 220_000.0),
        48
    );
}

#[test]
fn scenario_c_complete_vehicle_gets_nothing() {
    let settings = EngineSettings::default();
    let vehicle = prioritized(state(ChargingState::Complete, 90, 90));

    for production in [-3000.0, 0.0, 2500.0, 50_000.0] {
        assert_eq!(
            AmperageAllocator::new(&settings).desired_amps(&vehicle, production),
            0
        );
    }
}

#[test]
fn scenario_d_low_battery_wins_priority() {
    let mut fleet = VehicleFleet::new(vec![
        Vehicle::new("1", "Commuter").with_charge_state(state(ChargingState::Stopped, 49, 80)),
        Vehicle::new("2", "Tourer").with_charge_state(state(ChargingState::Stopped, 60, 100)),
    ])
    .expect("fleet builds");

    let outcome = PriorityScorer::new().assign(&mut fleet);

    assert_eq!(outcome.winner, Some(0));
    assert_eq!(fleet.priority_vehicle().map(Vehicle::id), Some("1"));
    assert!(!fleet.vehicles()[1].is_priority());
}

#[test]
fn revoked_priority_stops_a_charging_vehicle() {
    let settings = EngineSettings::default();
    let mut fleet = VehicleFleet::new(vec![
        Vehicle::new("1", "Commuter").with_charge_state(state(ChargingState::Stopped, 30, 80)),
        Vehicle::new("2", "Tourer").with_charge_state(ChargeState {
            charge_amps: 16,
            ..state(ChargingState::Charging, 70, 80)
        }),
    ])
    .expect("fleet builds");
    fleet.set_priority(Some(1));

    PriorityScorer::new().assign(&mut fleet);
    let tourer = fleet.vehicle_mut(1).expect("second vehicle");
    let desired = AmperageAllocator::new(&settings).desired_amps(tourer, 10_000.0);
    let decision = ChargeRateDecider::new().decide(tourer, desired);

    assert_eq!(desired, 0);
    assert!(decision.change);
    assert!(tourer.needs_refresh());
}

#[derive(Default)]
struct StopRecorder {
    stopped: Mutex<Vec<String>>,
}

#[async_trait]
impl VehicleControl for StopRecorder {
    async fn charge_state(&self, vehicle_id: &str) -> Result<ChargeState, CollaboratorError> {
        Err(CollaboratorError::Transport(format!("{vehicle_id} not scripted")))
    }

    async fn start_charge(&self, _vehicle_id: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn stop_charge(&self, vehicle_id: &str) -> Result<(), CollaboratorError> {
        self.stopped
            .lock()
            .expect("recorder mutex poisoned")
            .push(vehicle_id.to_string());
        Ok(())
    }

    async fn set_charging_amps(
        &self,
        _vehicle_id: &str,
        _amps: u32,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn wake_up(&self, _vehicle_id: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

struct OvercastForecast {
    hours: Vec<HourlyIrradiance>,
}

#[async_trait]
impl Forecast for OvercastForecast {
    async fn irradiance_next_hour(&self) -> Result<f64, CollaboratorError> {
        Ok(self.hours[0].irradiance)
    }

    async fn irradiance_by_hour(&self) -> Result<Vec<HourlyIrradiance>, CollaboratorError> {
        Ok(self.hours.clone())
    }

    async fn irradiance_threshold_next_met(
        &self,
        threshold: f64,
    ) -> Result<DateTime<Utc>, CollaboratorError> {
        self.hours
            .iter()
            .find(|hour| hour.irradiance >= threshold)
            .map(|hour| hour.starts_at)
            .ok_or_else(|| CollaboratorError::Decode("threshold never met".to_string()))
    }
}

#[tokio::test]
async fn scenario_e_low_irradiance_pause_stops_everyone() {
    let now = Utc.with_ymd_and_hms(2024, 3, 12, 5, 30, 0).unwrap();
    let hours = (1..=4)
        .map(|offset| HourlyIrradiance {
            starts_at: now + chrono::Duration::minutes(30 + 60 * (offset - 1)),
            irradiance: if offset == 3 { 250.0 } else { 15.0 },
        })
        .collect();
    let vehicles = Arc::new(StopRecorder::default());
    let mut fleet = VehicleFleet::new(vec![
        Vehicle::new("1", "Commuter").with_charge_state(state(ChargingState::Charging, 40, 80)),
        Vehicle::new("2", "Tourer").with_charge_state(state(ChargingState::Stopped, 60, 100)),
    ])
    .expect("fleet builds");
    fleet.set_priority(Some(0));
    let fleet = fleet.into_shared();

    let mut monitor = MonitorScheduler::new(
        fleet.clone(),
        Arc::new(OvercastForecast { hours }),
        vehicles.clone(),
        Duration::from_secs(60),
    );

    let plan = match monitor.tick(&EngineSettings::default(), now).await {
        MonitorDecision::Pause(plan) => plan,
        MonitorDecision::Continue => panic!("expected the monitor to pause"),
    };

    assert_eq!(plan.state, MonitorState::PausedLowIrradiance);
    assert_eq!(plan.minutes(), 120);
    assert_eq!(
        *vehicles.stopped.lock().expect("recorder mutex poisoned"),
        vec!["1".to_string(), "2".to_string()]
    );
    assert!(fleet
        .lock()
        .expect("fleet mutex poisoned")
        .vehicles()
        .iter()
        .all(Vehicle::needs_refresh));
}

struct SteppedMeter {
    watts: Mutex<f64>,
}

#[async_trait]
impl PowerProduction for SteppedMeter {
    async fn net_power_production(&self) -> Result<f64, CollaboratorError> {
        Ok(*self.watts.lock().expect("meter mutex poisoned"))
    }
}

#[tokio::test]
async fn priority_moved_by_the_scorer_stops_the_old_vehicle_on_later_passes() {
    let vehicles = Arc::new(StopRecorder::default());
    let meter = Arc::new(SteppedMeter {
        watts: Mutex::new(2000.0),
    });
    let charging = || ChargeState {
        charge_amps: 7,
        ..state(ChargingState::Charging, 45, 80)
    };
    let fleet = VehicleFleet::new(vec![
        Vehicle::new("1", "Commuter").with_charge_state(charging()),
        Vehicle::new("2", "Tourer").with_charge_state(state(ChargingState::Stopped, 70, 80)),
    ])
    .expect("fleet builds");
    let context = EngineContext::new(
        fleet,
        SettingsHandle::new(EngineSettings::default()),
        RefreshIntervals::default(),
        vehicles.clone(),
        meter.clone(),
        Arc::new(OvercastForecast { hours: Vec::new() }),
    );
    context.assign_priority();
    let mut tracker = ProductionTracker::default();
    let settings = EngineSettings::default();

    production_pass(&context, &settings, &mut tracker).await;
    assert!(vehicles.stopped.lock().expect("recorder mutex poisoned").is_empty());

    {
        let mut fleet = context.fleet.lock().expect("fleet mutex poisoned");
        fleet.apply_charge_state(0, ChargeState {
            battery_level: 79,
            ..charging()
        });
        fleet.apply_charge_state(1, state(ChargingState::Stopped, 20, 80));
    }
    let outcome = context.assign_priority();
    assert_eq!(outcome.winner, Some(1));

    for watts in [2600.0, 2600.0] {
        *meter.watts.lock().expect("meter mutex poisoned") = watts;
        production_pass(&context, &settings, &mut tracker).await;
        context
            .fleet
            .lock()
            .expect("fleet mutex poisoned")
            .apply_charge_state(0, charging());
    }

    assert_eq!(
        *vehicles.stopped.lock().expect("recorder mutex poisoned"),
        vec!["1".to_string(), "1".to_string()]
    );
}
