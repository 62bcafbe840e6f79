use std::sync::Arc;

use charge_optimizer::collaborators::{HttpForecast, HttpPowerProduction, HttpVehicleControl};
use charge_optimizer::config::{EngineSettings, OptimizerConfig, SettingsHandle};
use charge_optimizer::error::AppError;
use charge_optimizer::optimizer::{EngineContext, VehicleFleet};

/// Wires the HTTP collaborators and the configured fleet into an [`EngineContext`].
pub(crate) fn build_context(config: &OptimizerConfig) -> Result<EngineContext, AppError> {
    let fleet = VehicleFleet::from_config(&config.vehicles)?;
    let vehicles = Arc::new(HttpVehicleControl::new(&config.collaborators)?);
    let production = Arc::new(HttpPowerProduction::new(&config.collaborators)?);
    let forecast = Arc::new(HttpForecast::new(&config.collaborators)?);
    let settings = SettingsHandle::with_loader(config.settings.clone(), EngineSettings::load);

    Ok(EngineContext::new(
        fleet,
        settings,
        config.intervals,
        vehicles,
        production,
        forecast,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(key: &str) -> Option<String> {
        let value = match key {
            "OPTIMIZER_VEHICLES" => "5YJ3A:Model 3,7SAY:Model Y",
            "VEHICLE_API_BASE_URL" => "http://127.0.0.1:9/api/1/",
            "POWER_METER_URL" => "http://127.0.0.1:9/production",
            "FORECAST_BASE_URL" => "http://127.0.0.1:9/forecast",
            _ => return None,
        };
        Some(value.to_string())
    }

    #[test]
    fn context_holds_configured_fleet_in_order() {
        let config = OptimizerConfig::from_lookup(lookup).expect("config parses");

        let context = build_context(&config).expect("context builds");

        let fleet = context.fleet.lock().expect("fleet mutex poisoned");
        let names: Vec<_> = fleet.vehicles().iter().map(|vehicle| vehicle.name()).collect();
        assert_eq!(names, vec!["Model 3", "Model Y"]);
        assert!(fleet.priority_vehicle().is_none());
        assert!(!fleet.all_reported());
    }
}
