//! Metric values produced by the accumulator.

use crate::metrics::rollover::DaySummary;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Cumulative ride counters for one bucket (a day, or all time).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RideTotals {
    /// Distance in kilometres
    pub distance_km: f64,
    /// Time spent pedalling in seconds
    pub active_time_seconds: f64,
    /// Crank rotations
    pub crank_rotations: u64,
    /// Energy in kilocalories
    pub calories_kcal: f64,
}

impl RideTotals {
    /// Add an interval's deltas.
    pub fn accrue(&mut self, delta: &RideTotals) {
        self.distance_km += delta.distance_km;
        self.active_time_seconds += delta.active_time_seconds;
        self.crank_rotations += delta.crank_rotations;
        self.calories_kcal += delta.calories_kcal;
    }

    /// True when nothing has been accumulated.
    pub fn is_zero(&self) -> bool {
        *self == RideTotals::default()
    }
}

/// Which device counter misbehaved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    CrankRevolutions,
    CrankEventTime,
}

impl std::fmt::Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Counter::CrankRevolutions => write!(f, "crank revolutions"),
            Counter::CrankEventTime => write!(f, "crank event time"),
        }
    }
}

/// What an update did with its reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateOutcome {
    /// No baseline yet; the reading became the baseline
    #[default]
    Baseline,
    /// Deltas were accrued
    Accrued,
    /// A device counter reset was detected; baseline rebased, nothing accrued
    CounterReset {
        counter: Counter,
        previous: u16,
        current: u16,
    },
    /// Crank step too large or too fast for pedalling; baseline rebased, nothing accrued
    Implausible {
        revolutions: u32,
        elapsed_ticks: u32,
    },
}

impl UpdateOutcome {
    /// True for outcomes worth surfacing as a warning.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            UpdateOutcome::CounterReset { .. } | UpdateOutcome::Implausible { .. }
        )
    }
}

/// Published view of the accumulator after one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Today's counters
    pub daily: RideTotals,
    /// All-time counters
    pub total: RideTotals,
    /// What was accrued by this update
    pub delta: RideTotals,
    /// Cadence in RPM over the last interval
    pub cadence_rpm: Option<f32>,
    /// Speed in km/h
    pub speed_kmh: Option<f32>,
    /// Battery level percentage (0-100)
    pub battery_percent: Option<u8>,
    /// Pedalling detected in the last interval
    pub is_active: bool,
    /// Last time pedalling was detected
    pub last_active: Option<DateTime<Local>>,
    /// What the update did
    pub outcome: UpdateOutcome,
    /// Summary of the day that ended during this update, if any
    pub day_ended: Option<DaySummary>,
    /// When the snapshot was produced
    pub updated_at: Option<DateTime<Local>>,
}

impl MetricsSnapshot {
    /// Same snapshot with live values zeroed, for when the rider stops.
    pub fn idle(&self) -> Self {
        Self {
            delta: RideTotals::default(),
            cadence_rpm: Some(0.0),
            speed_kmh: Some(0.0),
            is_active: false,
            outcome: UpdateOutcome::Accrued,
            day_ended: None,
            ..self.clone()
        }
    }
}
