//! Unit tests for the calorie model.

use deskbike::metrics::calories::{CalorieInput, CalorieModel, MetSpeedCalories};

fn kcal(active_seconds: f64, speed_kmh: f64, weight_kg: f64, resistance_percent: f64) -> f64 {
    MetSpeedCalories.calories(&CalorieInput {
        active_seconds,
        speed_kmh,
        weight_kg,
        resistance_percent,
    })
}

#[test]
fn test_met_tiers() {
    assert_eq!(MetSpeedCalories::met_for_speed(0.0), 4.0);
    assert_eq!(MetSpeedCalories::met_for_speed(15.9), 4.0);
    assert_eq!(MetSpeedCalories::met_for_speed(16.0), 6.0);
    assert_eq!(MetSpeedCalories::met_for_speed(19.0), 8.0);
    assert_eq!(MetSpeedCalories::met_for_speed(22.5), 10.0);
    assert_eq!(MetSpeedCalories::met_for_speed(25.7), 12.0);
    assert_eq!(MetSpeedCalories::met_for_speed(40.0), 12.0);
}

#[test]
fn test_one_hour_light_riding() {
    // MET 4 x 70 kg x 1 h at full resistance
    assert!((kcal(3600.0, 12.0, 70.0, 100.0) - 280.0).abs() < 1e-9);
    // Half resistance halves the estimate
    assert!((kcal(3600.0, 12.0, 70.0, 50.0) - 140.0).abs() < 1e-9);
}

#[test]
fn test_no_activity_burns_nothing() {
    assert_eq!(kcal(0.0, 20.0, 70.0, 100.0), 0.0);
    assert_eq!(kcal(-5.0, 20.0, 70.0, 100.0), 0.0);
}

#[test]
fn test_out_of_range_resistance_clamped() {
    assert_eq!(kcal(60.0, 12.0, 70.0, 250.0), kcal(60.0, 12.0, 70.0, 100.0));
    assert_eq!(kcal(60.0, 12.0, 70.0, -10.0), 0.0);
}

#[test]
fn test_monotonic_in_weight_and_resistance() {
    let mut previous = 0.0;
    for weight in [40.0, 55.0, 70.0, 95.0, 150.0] {
        let value = kcal(30.0, 18.0, weight, 60.0);
        assert!(value >= previous);
        previous = value;
    }

    let mut previous = 0.0;
    for resistance in [0.0, 10.0, 50.0, 90.0, 100.0] {
        let value = kcal(30.0, 18.0, 70.0, resistance);
        assert!(value >= previous);
        previous = value;
    }
}
