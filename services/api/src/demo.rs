use charge_optimizer::config::EngineSettings;
use charge_optimizer::error::AppError;
use charge_optimizer::optimizer::{
    AmperageAllocator, ChargeRateDecider, ChargeState, ChargingState, PriorityScorer, Vehicle,
    VehicleFleet,
};
use chrono::Utc;
use clap::Args;
use serde::Serialize;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Net production in watts; negative means the site is importing
    #[arg(long, default_value_t = 3000.0, allow_hyphen_values = true)]
    pub(crate) production: f64,
    /// Override the configured watt buffer
    #[arg(long)]
    pub(crate) watt_buffer: Option<f64>,
    /// Print the pass as JSON instead of text
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Debug, Serialize)]
struct DemoReport {
    production_watts: f64,
    watt_buffer: f64,
    irradiance_threshold: f64,
    priority: Option<String>,
    vehicles: Vec<VehicleReport>,
}

#[derive(Debug, Serialize)]
struct VehicleReport {
    name: String,
    charging_state: String,
    battery_level: u8,
    charge_limit_soc: u8,
    priority_score: Option<f64>,
    score_components: Vec<String>,
    desired_amps: u32,
    allocation_rule: String,
    change: bool,
    reasons: Vec<String>,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let mut settings = EngineSettings::default();
    if let Some(buffer) = args.watt_buffer {
        settings.watt_buffer = buffer;
    }

    let report = demo_pass(&settings, args.production)?;

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => println!("Demo payload unavailable: {err}"),
        }
        return Ok(());
    }

    render(&report);
    Ok(())
}

fn sample_fleet() -> Result<VehicleFleet, AppError> {
    let fleet = VehicleFleet::new(vec![
        Vehicle::new("5YJ3E1EA", "Model 3").with_charge_state(ChargeState {
            charging_state: ChargingState::Stopped,
            battery_level: 42,
            charge_limit_soc: 80,
            charge_amps: 5,
            charger_voltage: 240,
        }),
        Vehicle::new("7SAYGDEE", "Model Y").with_charge_state(ChargeState {
            charging_state: ChargingState::Charging,
            battery_level: 71,
            charge_limit_soc: 90,
            charge_amps: 16,
            charger_voltage: 238,
        }),
    ])?;
    Ok(fleet)
}

fn demo_pass(settings: &EngineSettings, production: f64) -> Result<DemoReport, AppError> {
    let mut fleet = sample_fleet()?;
    let outcome = PriorityScorer::new().assign(&mut fleet);
    let allocator = AmperageAllocator::new(settings);
    let decider = ChargeRateDecider::new();

    let mut vehicles = Vec::with_capacity(fleet.len());
    for index in 0..fleet.len() {
        let Some(vehicle) = fleet.vehicle_mut(index) else {
            continue;
        };
        let score = outcome
            .scores
            .iter()
            .find(|score| score.vehicle_id == vehicle.id());
        let allocation = allocator.allocate(vehicle, production);
        let decision = decider.decide(vehicle, allocation.desired_amps);
        let Some(state) = vehicle.charge_state() else {
            continue;
        };

        vehicles.push(VehicleReport {
            name: vehicle.name().to_string(),
            charging_state: state.charging_state.to_string(),
            battery_level: state.battery_level,
            charge_limit_soc: state.charge_limit_soc,
            priority_score: score.map(|score| score.total),
            score_components: score
                .map(|score| {
                    score
                        .components
                        .iter()
                        .map(|component| {
                            format!(
                                "{:?}: {:+.3} ({})",
                                component.factor, component.score, component.notes
                            )
                        })
                        .collect()
                })
                .unwrap_or_default(),
            desired_amps: allocation.desired_amps,
            allocation_rule: format!("{:?}", allocation.rule),
            change: decision.change,
            reasons: decision.reasons,
        });
    }

    Ok(DemoReport {
        production_watts: production,
        watt_buffer: settings.watt_buffer,
        irradiance_threshold: settings.irradiance_threshold_at(Utc::now()),
        priority: fleet.priority_vehicle().map(|vehicle| vehicle.name().to_string()),
        vehicles,
    })
}

fn render(report: &DemoReport) {
    println!("Charge optimizer demo");
    println!(
        "- Net production {:.0} W | buffer {:.0} W | irradiance threshold {:.0} W/m²",
        report.production_watts, report.watt_buffer, report.irradiance_threshold
    );
    match &report.priority {
        Some(name) => println!("- Priority vehicle: {name}"),
        None => println!("- Priority vehicle: none"),
    }

    for vehicle in &report.vehicles {
        println!(
            "\n{} ({}, battery {}% of {}%)",
            vehicle.name, vehicle.charging_state, vehicle.battery_level, vehicle.charge_limit_soc
        );
        match vehicle.priority_score {
            Some(total) => println!("  Priority score {total:.3}"),
            None => println!("  Priority score unavailable"),
        }
        for component in &vehicle.score_components {
            println!("    - {component}");
        }
        println!(
            "  Desired current {} A via {}",
            vehicle.desired_amps, vehicle.allocation_rule
        );
        if vehicle.change {
            println!("  Command: change rate ({})", vehicle.reasons.join("; "));
        } else {
            println!("  Command: hold");
        }
    }
}
