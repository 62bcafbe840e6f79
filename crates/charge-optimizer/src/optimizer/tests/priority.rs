use super::common::*;
use crate::optimizer::priority::{score_vehicle, PriorityFactor, PRIORITY_ACCEPTANCE_THRESHOLD};
use crate::optimizer::{ChargingState, PriorityScorer, VehicleFleet};

fn stopped(battery_level: u8, charge_limit_soc: u8) -> crate::optimizer::ChargeState {
    charge_state(ChargingState::Stopped, battery_level, charge_limit_soc, 5, 240)
}

fn winner_id(fleet: &VehicleFleet) -> Option<&str> {
    fleet.priority_vehicle().map(|vehicle| vehicle.id())
}

#[test]
fn first_vehicle_wins_across_reference_cases() {
    // (v1 battery, v1 limit, v1 incumbent, v2 battery, v2 limit)
    let cases = [
        (49, 80, false, 60, 100),
        (50, 80, false, 60, 70),
        (40, 100, false, 40, 80),
        (40, 80, true, 40, 80),
        (40, 50, false, 40, 40),
    ];

    for (b1, l1, incumbent, b2, l2) in cases {
        let mut fleet = two_vehicle_fleet(stopped(b1, l1), stopped(b2, l2));
        if incumbent {
            fleet.set_priority(Some(0));
        }

        PriorityScorer::new().assign(&mut fleet);

        assert_eq!(winner_id(&fleet), Some("1"), "case {b1}/{l1} vs {b2}/{l2}");
    }
}

#[test]
fn second_vehicle_wins_when_it_needs_charge_more() {
    for (b1, l1, b2, l2) in [(60, 100, 49, 55), (40, 50, 40, 60)] {
        let mut fleet = two_vehicle_fleet(stopped(b1, l1), stopped(b2, l2));

        PriorityScorer::new().assign(&mut fleet);

        assert_eq!(winner_id(&fleet), Some("2"), "case {b1}/{l1} vs {b2}/{l2}");
    }
}

#[test]
fn unplugged_or_complete_incumbent_loses_priority() {
    for state in [ChargingState::Disconnected, ChargingState::Complete] {
        let mut fleet = two_vehicle_fleet(
            charge_state(state.clone(), 50, 99, 5, 240),
            stopped(90, 92),
        );
        fleet.set_priority(Some(0));

        PriorityScorer::new().assign(&mut fleet);

        assert_eq!(winner_id(&fleet), Some("2"), "incumbent {state}");
    }
}

#[test]
fn low_battery_bonus_dominates_room_to_charge() {
    let mut fleet = two_vehicle_fleet(stopped(49, 80), stopped(60, 100));

    let outcome = PriorityScorer::new().assign(&mut fleet);

    assert_eq!(outcome.winner, Some(0));
    let first = &outcome.scores[0];
    assert!((first.total - 1.31).abs() < 1e-9);
    assert!(first
        .components
        .iter()
        .any(|component| component.factor == PriorityFactor::LowBattery));
    assert!((outcome.scores[1].total - 0.40).abs() < 1e-9);
}

#[test]
fn incumbency_alone_never_grants_priority() {
    let mut fleet = two_vehicle_fleet(stopped(80, 80), stopped(90, 90));
    fleet.set_priority(Some(0));

    let outcome = PriorityScorer::new().assign(&mut fleet);

    let incumbent = &outcome.scores[0];
    assert!(incumbent.total > 0.0 && incumbent.total <= PRIORITY_ACCEPTANCE_THRESHOLD);
    assert_eq!(outcome.winner, None);
    assert!(fleet.vehicles().iter().all(|vehicle| !vehicle.is_priority()));
}

#[test]
fn assignment_is_idempotent() {
    let mut fleet = two_vehicle_fleet(stopped(45, 80), stopped(45, 80));
    let scorer = PriorityScorer::new();

    let first = scorer.assign(&mut fleet);
    let snapshot = fleet.clone();
    let second = scorer.assign(&mut fleet);

    assert_eq!(first.winner, Some(0));
    assert_eq!(second.winner, Some(0));
    assert_eq!(fleet, snapshot);
}

#[test]
fn unreported_vehicle_is_not_scored() {
    let vehicle = crate::optimizer::Vehicle::new("9", "pending");
    assert!(score_vehicle(&vehicle).is_none());
}
