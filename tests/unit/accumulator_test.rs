//! Unit tests for the ride metrics accumulator.

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use deskbike::metrics::accumulator::{
    AccumulatorPhase, AccumulatorSettings, AccumulatorState, RideMetricsAccumulator,
    METERS_PER_CRANK_REVOLUTION,
};
use deskbike::metrics::snapshot::{Counter, RideTotals, UpdateOutcome};
use deskbike::sensors::csc::{RawReading, WheelRevolutionData};
use deskbike::storage::config::RiderConfig;

fn at(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Local> {
    Local
        .with_ymd_and_hms(2024, 5, day, hour, minute, second)
        .unwrap()
}

fn reading(crank: u16, event_time: u16, timestamp: DateTime<Local>) -> RawReading {
    RawReading {
        crank_revolutions: crank,
        last_crank_event_time: event_time,
        wheel: None,
        instantaneous_speed_kmh: None,
        battery_percent: None,
        timestamp,
    }
}

fn km(rotations: u64) -> f64 {
    rotations as f64 * METERS_PER_CRANK_REVOLUTION / 1000.0
}

/// Accumulator that already holds a baseline at (crank, event_time).
fn tracking(crank: u16, event_time: u16) -> RideMetricsAccumulator {
    let mut acc = RideMetricsAccumulator::new(AccumulatorSettings::default());
    let now = at(10, 12, 0, 0);
    acc.update(&reading(crank, event_time, now), &RiderConfig::default(), now);
    acc
}

#[test]
fn test_first_update_only_sets_baseline() {
    let mut acc = RideMetricsAccumulator::new(AccumulatorSettings::default());
    let now = at(10, 12, 0, 0);

    let snapshot = acc.update(&reading(1234, 500, now), &RiderConfig::default(), now);

    assert_eq!(snapshot.outcome, UpdateOutcome::Baseline);
    assert!(snapshot.delta.is_zero());
    assert!(snapshot.daily.is_zero());
    assert!(snapshot.total.is_zero());
    assert_eq!(acc.phase(), AccumulatorPhase::Tracking);
    assert_eq!(acc.state().last_reading.as_ref().unwrap().crank_revolutions, 1234);
}

#[test]
fn test_plain_delta() {
    let mut acc = tracking(100, 0);
    let now = at(10, 12, 0, 5);

    // 10 revolutions in 4 s
    let snapshot = acc.update(&reading(110, 4096, now), &RiderConfig::default(), now);

    assert_eq!(snapshot.outcome, UpdateOutcome::Accrued);
    assert_eq!(snapshot.delta.crank_rotations, 10);
    assert!((snapshot.delta.distance_km - km(10)).abs() < 1e-12);
    assert!((snapshot.delta.active_time_seconds - 4.0).abs() < 1e-9);
    assert_eq!(snapshot.total.crank_rotations, 10);
    assert_eq!(snapshot.daily.crank_rotations, 10);
    assert!((snapshot.cadence_rpm.unwrap() - 150.0).abs() < 0.01);
    assert!(snapshot.is_active);
    assert_eq!(snapshot.last_active, Some(now));
}

#[test]
fn test_distance_monotonic_in_crank_delta() {
    let mut previous = 0.0;
    for delta in [0u16, 1, 5, 20, 60, 99] {
        let mut acc = tracking(1000, 0);
        let now = at(10, 12, 0, 10);
        let snapshot = acc.update(
            &reading(1000 + delta, 10 * 1024, now),
            &RiderConfig::default(),
            now,
        );
        assert!(snapshot.total.distance_km >= previous);
        previous = snapshot.total.distance_km;
    }
}

#[test]
fn test_wraparound_counts_forward() {
    let mut acc = tracking(65530, 65000);
    let now = at(10, 12, 0, 3);

    let snapshot = acc.update(&reading(4, 1000, now), &RiderConfig::default(), now);

    assert_eq!(snapshot.outcome, UpdateOutcome::Accrued);
    assert_eq!(snapshot.delta.crank_rotations, 10);
    assert!((snapshot.total.distance_km - km(10)).abs() < 1e-12);
    // 65000 -> 1000 wraps to 1536 ticks = 1.5 s
    assert!((snapshot.delta.active_time_seconds - 1.5).abs() < 1e-9);
}

#[test]
fn test_counter_reset_rebases_without_accruing() {
    let mut acc = tracking(40000, 1000);
    let now = at(10, 12, 0, 1);

    let snapshot = acc.update(&reading(2, 2024, now), &RiderConfig::default(), now);

    assert_eq!(
        snapshot.outcome,
        UpdateOutcome::CounterReset {
            counter: Counter::CrankRevolutions,
            previous: 40000,
            current: 2,
        }
    );
    assert!(snapshot.outcome.is_warning());
    assert!(snapshot.total.is_zero());
    assert!(snapshot.daily.is_zero());
    assert_eq!(acc.state().last_reading.as_ref().unwrap().crank_revolutions, 2);

    // Next reading counts from the new baseline
    let later = at(10, 12, 0, 2);
    let snapshot = acc.update(&reading(5, 3048, later), &RiderConfig::default(), later);
    assert_eq!(snapshot.total.crank_rotations, 3);
}

#[test]
fn test_event_clock_wrap_during_pause_accrues() {
    let mut acc = tracking(100, 60000);
    let now = at(10, 12, 0, 10);

    // 10 s later the clock has wrapped to 4704
    let snapshot = acc.update(&reading(103, 4704, now), &RiderConfig::default(), now);

    assert_eq!(snapshot.outcome, UpdateOutcome::Accrued);
    assert_eq!(snapshot.total.crank_rotations, 3);
    assert!((snapshot.total.distance_km - km(3)).abs() < 1e-12);
    assert!((snapshot.delta.active_time_seconds - 5.0).abs() < 1e-9);
    assert!((snapshot.cadence_rpm.unwrap() - 18.0).abs() < 0.01);
}

#[test]
fn test_event_clock_far_backwards_rebases() {
    let mut acc = tracking(100, 20000);
    let now = at(10, 12, 0, 1);

    let snapshot = acc.update(&reading(102, 10, now), &RiderConfig::default(), now);

    assert!(matches!(
        snapshot.outcome,
        UpdateOutcome::CounterReset {
            counter: Counter::CrankEventTime,
            ..
        }
    ));
    assert!(snapshot.total.is_zero());
}

#[test]
fn test_crank_jump_discarded() {
    let mut acc = tracking(100, 0);
    let now = at(10, 12, 0, 1);

    // 3000 revolutions in one second is a glitch
    let snapshot = acc.update(&reading(3100, 1024, now), &RiderConfig::default(), now);

    assert_eq!(
        snapshot.outcome,
        UpdateOutcome::Implausible {
            revolutions: 3000,
            elapsed_ticks: 1024,
        }
    );
    assert!(snapshot.outcome.is_warning());
    assert!(snapshot.total.is_zero());
    assert!(snapshot.daily.is_zero());

    // Counting resumes from the glitched value
    let later = at(10, 12, 0, 2);
    let snapshot = acc.update(&reading(3102, 2048, later), &RiderConfig::default(), later);
    assert_eq!(snapshot.outcome, UpdateOutcome::Accrued);
    assert_eq!(snapshot.total.crank_rotations, 2);
}

#[test]
fn test_too_fast_step_discarded() {
    let mut acc = tracking(100, 0);
    let now = at(10, 12, 0, 1);

    // 50 revolutions in half a second is about 750 km/h
    let snapshot = acc.update(&reading(150, 512, now), &RiderConfig::default(), now);

    assert!(matches!(snapshot.outcome, UpdateOutcome::Implausible { .. }));
    assert!(snapshot.total.is_zero());
}

#[test]
fn test_glitch_limits_are_tunable() {
    let settings = AccumulatorSettings {
        max_revolutions_per_update: 5_000,
        max_speed_kmh: f64::INFINITY,
        ..Default::default()
    };
    let mut acc = RideMetricsAccumulator::new(settings);
    let start = at(10, 12, 0, 0);
    acc.update(&reading(100, 0, start), &RiderConfig::default(), start);

    let now = at(10, 12, 0, 1);
    let snapshot = acc.update(&reading(3100, 1024, now), &RiderConfig::default(), now);

    assert_eq!(snapshot.total.crank_rotations, 3000);
}

#[test]
fn test_zero_activity_accrues_nothing_but_time_passes() {
    let mut acc = tracking(500, 0);
    let now = at(10, 12, 0, 4);

    let snapshot = acc.update(&reading(500, 3072, now), &RiderConfig::default(), now);

    assert_eq!(snapshot.outcome, UpdateOutcome::Accrued);
    assert!(snapshot.delta.is_zero());
    assert_eq!(snapshot.delta.active_time_seconds, 0.0);
    assert_eq!(snapshot.delta.calories_kcal, 0.0);
    assert_eq!(snapshot.cadence_rpm, Some(0.0));
    assert_eq!(snapshot.speed_kmh, Some(0.0));
    assert!(!snapshot.is_active);
    assert!(snapshot.last_active.is_none());
}

#[test]
fn test_zero_event_time_delta_has_no_cadence() {
    let mut acc = tracking(500, 1024);
    let now = at(10, 12, 0, 1);

    let snapshot = acc.update(&reading(501, 1024, now), &RiderConfig::default(), now);

    assert_eq!(snapshot.delta.crank_rotations, 1);
    assert!(snapshot.cadence_rpm.is_none());
    assert_eq!(snapshot.delta.active_time_seconds, 0.0);
}

#[test]
fn test_supplied_speed_passed_through() {
    let mut acc = tracking(0, 0);
    let now = at(10, 12, 0, 1);

    let snapshot = acc.update(
        &reading(2, 1024, now).with_speed(Some(17.5)),
        &RiderConfig::default(),
        now,
    );

    assert_eq!(snapshot.speed_kmh, Some(17.5));
}

#[test]
fn test_implausible_supplied_speed_ignored() {
    let mut acc = tracking(0, 0);
    let now = at(10, 12, 0, 1);

    let snapshot = acc.update(
        &reading(2, 1024, now).with_speed(Some(250.0)),
        &RiderConfig::default(),
        now,
    );

    // Falls back to the crank: 2 revolutions in 1 s
    let expected = km(2) * 3600.0;
    assert!((f64::from(snapshot.speed_kmh.unwrap()) - expected).abs() < 0.01);
}

#[test]
fn test_wheel_speed_preferred_over_crank() {
    let wheel = |revolutions: u32, last_event_time: u16| WheelRevolutionData {
        revolutions,
        last_event_time,
    };
    let mut acc = RideMetricsAccumulator::new(AccumulatorSettings::default());
    let start = at(10, 12, 0, 0);
    let mut first = reading(0, 0, start);
    first.wheel = Some(wheel(4_294_967_290, 65000));
    acc.update(&first, &RiderConfig::default(), start);

    // 10 wheel revolutions across both wraps in 2 s: 37.728 km/h
    let now = at(10, 12, 0, 2);
    let mut second = reading(2, 2048, now);
    second.wheel = Some(wheel(4, 1512));
    let snapshot = acc.update(&second, &RiderConfig::default(), now);

    assert!((snapshot.speed_kmh.unwrap() - 37.728).abs() < 0.01);
    // Distance still follows the crank
    assert_eq!(snapshot.delta.crank_rotations, 2);
    assert!((snapshot.delta.distance_km - km(2)).abs() < 1e-12);
}

#[test]
fn test_stalled_wheel_falls_back_to_crank_speed() {
    let mut acc = RideMetricsAccumulator::new(AccumulatorSettings::default());
    let start = at(10, 12, 0, 0);
    let mut first = reading(0, 0, start);
    first.wheel = Some(WheelRevolutionData {
        revolutions: 500,
        last_event_time: 3000,
    });
    acc.update(&first, &RiderConfig::default(), start);

    let now = at(10, 12, 0, 1);
    let mut second = reading(0, 1024, now);
    second.wheel = first.wheel;
    let snapshot = acc.update(&second, &RiderConfig::default(), now);

    assert_eq!(snapshot.speed_kmh, Some(0.0));
}

#[test]
fn test_day_boundary_moves_interval_into_new_day() {
    let yesterday = at(10, 23, 59, 58);
    let state = AccumulatorState {
        daily: RideTotals {
            distance_km: 12.3,
            ..Default::default()
        },
        total: RideTotals {
            distance_km: 12.3,
            ..Default::default()
        },
        last_reading: Some(reading(1000, 10_000, yesterday)),
        last_day_marker: Some(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()),
        ..Default::default()
    };
    let mut acc = RideMetricsAccumulator::from_state(state, AccumulatorSettings::default());

    let after_midnight = at(11, 0, 0, 1);
    let snapshot = acc.update(
        &reading(1005, 12_048, after_midnight),
        &RiderConfig::default(),
        after_midnight,
    );

    let new_interval = km(5);
    assert!((snapshot.daily.distance_km - new_interval).abs() < 1e-9);
    assert!((snapshot.total.distance_km - (12.3 + new_interval)).abs() < 1e-9);

    let ended = snapshot.day_ended.unwrap();
    assert_eq!(ended.date, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
    assert!((ended.totals.distance_km - 12.3).abs() < 1e-9);
    assert_eq!(acc.history().len(), 1);
}

#[test]
fn test_calories_monotonic_in_weight_and_resistance() {
    let calories = |weight_kg: f64, resistance_percent: f64| {
        let mut acc = tracking(0, 0);
        let now = at(10, 12, 0, 4);
        let config = RiderConfig {
            weight_kg,
            resistance_percent,
        };
        acc.update(&reading(6, 4096, now), &config, now)
            .total
            .calories_kcal
    };

    assert!(calories(60.0, 100.0) < calories(90.0, 100.0));
    assert!(calories(70.0, 25.0) < calories(70.0, 75.0));
    assert!(calories(70.0, 0.0) <= calories(70.0, 1.0));
    assert!(calories(70.0, 50.0) > 0.0);
}

#[test]
fn test_totals_never_decrease_over_a_ride() {
    let mut acc = RideMetricsAccumulator::new(AccumulatorSettings::default());
    let config = RiderConfig::default();
    let mut previous = RideTotals::default();

    // Includes a wrap, a stall and a device reset
    let samples: [(u16, u16); 7] = [
        (65520, 60000),
        (65530, 62048),
        (4, 64096),
        (4, 1024),
        (12, 3072),
        (3, 4096),
        (9, 6144),
    ];

    for (i, (crank, event_time)) in samples.iter().enumerate() {
        let now = at(10, 12, 0, i as u32);
        let snapshot = acc.update(&reading(*crank, *event_time, now), &config, now);
        assert!(snapshot.total.distance_km >= previous.distance_km);
        assert!(snapshot.total.active_time_seconds >= previous.active_time_seconds);
        assert!(snapshot.total.crank_rotations >= previous.crank_rotations);
        assert!(snapshot.total.calories_kcal >= previous.calories_kcal);
        previous = snapshot.total;
    }

    assert_eq!(previous.crank_rotations, 10 + 10 + 8 + 6);
}

#[test]
fn test_reset_totals_keeps_daily() {
    let mut acc = tracking(0, 0);
    let now = at(10, 12, 0, 2);
    acc.update(&reading(8, 2048, now), &RiderConfig::default(), now);

    acc.reset_totals();

    assert!(acc.state().total.is_zero());
    assert_eq!(acc.state().daily.crank_rotations, 8);
    assert_eq!(acc.phase(), AccumulatorPhase::Tracking);
}

#[test]
fn test_reset_baseline_keeps_totals() {
    let mut acc = tracking(0, 0);
    let now = at(10, 12, 0, 2);
    acc.update(&reading(8, 2048, now), &RiderConfig::default(), now);

    acc.reset_baseline();
    assert_eq!(acc.phase(), AccumulatorPhase::Uninitialized);

    // Far-away counters after a reconnect do not count as riding
    let later = at(10, 12, 5, 0);
    let snapshot = acc.update(&reading(30000, 9000, later), &RiderConfig::default(), later);

    assert_eq!(snapshot.outcome, UpdateOutcome::Baseline);
    assert_eq!(snapshot.total.crank_rotations, 8);
}
