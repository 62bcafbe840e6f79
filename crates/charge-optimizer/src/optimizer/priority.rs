use serde::Serialize;
use tracing::{debug, info};

use super::domain::{ChargingState, Vehicle, VehicleFleet};

/// A vehicle must score above this to be granted priority.
pub const PRIORITY_ACCEPTANCE_THRESHOLD: f64 = 0.011;
/// Small bonus for the current holder so ties do not flip-flop between cycles.
pub const INCUMBENT_BONUS: f64 = 0.001;
pub const DISCONNECTED_PENALTY: f64 = -10.0;
pub const COMPLETE_PENALTY: f64 = -1.0;
pub const LOW_BATTERY_BONUS: f64 = 1.0;
pub const LOW_BATTERY_LEVEL: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriorityFactor {
    Disconnected,
    ChargeComplete,
    Incumbent,
    LowBattery,
    DistanceToLimit,
}

/// One scoring term and the reason it applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreComponent {
    pub factor: PriorityFactor,
    pub score: f64,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleScore {
    pub vehicle_id: String,
    pub total: f64,
    pub components: Vec<ScoreComponent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityOutcome {
    /// Per-vehicle breakdown in fleet order. Vehicles without a charge state are skipped.
    pub scores: Vec<VehicleScore>,
    /// Fleet index of the new priority vehicle.
    pub winner: Option<usize>,
}

/// Scores a single vehicle. `None` when it has not reported a charge state yet.
pub fn score_vehicle(vehicle: &Vehicle) -> Option<VehicleScore> {
    let state = vehicle.charge_state()?;
    let mut components = Vec::new();

    match state.charging_state {
        ChargingState::Disconnected => components.push(ScoreComponent {
            factor: PriorityFactor::Disconnected,
            score: DISCONNECTED_PENALTY,
            notes: "not plugged in".to_string(),
        }),
        ChargingState::Complete => components.push(ScoreComponent {
            factor: PriorityFactor::ChargeComplete,
            score: COMPLETE_PENALTY,
            notes: "charge complete".to_string(),
        }),
        _ => {}
    }

    if vehicle.is_priority() {
        components.push(ScoreComponent {
            factor: PriorityFactor::Incumbent,
            score: INCUMBENT_BONUS,
            notes: "currently holds priority".to_string(),
        });
    }

    if state.battery_level < LOW_BATTERY_LEVEL {
        components.push(ScoreComponent {
            factor: PriorityFactor::LowBattery,
            score: LOW_BATTERY_BONUS,
            notes: format!("battery {}% below {LOW_BATTERY_LEVEL}%", state.battery_level),
        });
    }

    let gap = f64::from(state.charge_limit_soc) - f64::from(state.battery_level);
    components.push(ScoreComponent {
        factor: PriorityFactor::DistanceToLimit,
        score: gap / 100.0,
        notes: format!(
            "battery {}% against limit {}%",
            state.battery_level, state.charge_limit_soc
        ),
    });

    Some(VehicleScore {
        vehicle_id: vehicle.id().to_string(),
        total: components.iter().map(|component| component.score).sum(),
        components,
    })
}

/// Chooses the single vehicle that should receive surplus first.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityScorer;

impl PriorityScorer {
    pub fn new() -> Self {
        Self
    }

    /// Scores every vehicle and reassigns priority. The earliest vehicle wins a tie.
    pub fn assign(&self, fleet: &mut VehicleFleet) -> PriorityOutcome {
        let mut scores = Vec::with_capacity(fleet.len());
        let mut best: Option<(usize, f64)> = None;

        for (index, vehicle) in fleet.vehicles().iter().enumerate() {
            let Some(score) = score_vehicle(vehicle) else {
                debug!(vehicle = vehicle.name(), "no charge state yet, skipped for priority");
                continue;
            };
            debug!(
                vehicle = vehicle.name(),
                total = score.total,
                components = ?score.components,
                "priority score"
            );
            if best.map_or(true, |(_, top)| score.total > top) {
                best = Some((index, score.total));
            }
            scores.push(score);
        }

        let winner = best
            .filter(|(_, total)| *total > PRIORITY_ACCEPTANCE_THRESHOLD)
            .map(|(index, _)| index);

        let previous = fleet.priority_index();
        fleet.set_priority(winner);

        let name = winner
            .and_then(|index| fleet.vehicle(index))
            .map(|vehicle| vehicle.name().to_string());
        if previous != winner {
            info!(vehicle = ?name, "priority reassigned");
        } else {
            debug!(vehicle = ?name, "priority unchanged");
        }

        PriorityOutcome { scores, winner }
    }
}
