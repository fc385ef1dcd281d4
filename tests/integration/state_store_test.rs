//! Integration tests for state persistence.

use chrono::{Local, NaiveDate, TimeZone};
use deskbike::metrics::accumulator::AccumulatorState;
use deskbike::metrics::rollover::DaySummary;
use deskbike::metrics::snapshot::RideTotals;
use deskbike::sensors::csc::RawReading;
use deskbike::storage::state_store::StateStore;

fn populated_state() -> AccumulatorState {
    let timestamp = Local.with_ymd_and_hms(2024, 5, 10, 18, 45, 12).unwrap();
    let daily = RideTotals {
        distance_km: 5.25,
        active_time_seconds: 1260.5,
        crank_rotations: 2505,
        calories_kcal: 48.75,
    };

    let mut state = AccumulatorState {
        daily,
        total: RideTotals {
            distance_km: 812.5,
            active_time_seconds: 196_000.0,
            crank_rotations: 387_643,
            calories_kcal: 7421.0,
        },
        last_reading: Some(RawReading {
            crank_revolutions: 59_201,
            last_crank_event_time: 31_337,
            wheel: None,
            instantaneous_speed_kmh: None,
            battery_percent: Some(64),
            timestamp,
        }),
        last_day_marker: Some(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()),
        last_active: Some(timestamp),
        ..Default::default()
    };
    state.history.push_back(DaySummary {
        date: NaiveDate::from_ymd_opt(2024, 5, 9).unwrap(),
        totals: daily,
    });
    state
}

#[test]
fn test_state_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));
    let state = populated_state();

    store.save(&state).unwrap();
    let loaded = store.load().unwrap().unwrap();

    assert_eq!(loaded, state);
}

#[test]
fn test_save_replaces_previous() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::new(dir.path().join("state.json"));

    store.save(&populated_state()).unwrap();
    store.save(&AccumulatorState::default()).unwrap();

    assert_eq!(store.load().unwrap(), Some(AccumulatorState::default()));
    // Only the state file remains, no temp files
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_corrupt_file_treated_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, "{\"daily\": {\"distance_km\": ").unwrap();

    let store = StateStore::new(&path);
    assert!(store.load().unwrap().is_none());
}

#[test]
fn test_partial_document_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(
        &path,
        r#"{"total": {"distance_km": 3.5, "active_time_seconds": 600.0, "crank_rotations": 1670, "calories_kcal": 20.0}}"#,
    )
    .unwrap();

    let state = StateStore::new(&path).load().unwrap().unwrap();

    assert_eq!(state.total.crank_rotations, 1670);
    assert!(state.daily.is_zero());
    assert!(state.last_reading.is_none());
    assert!(state.history.is_empty());
}
