//! Ride metrics accumulator.
//!
//! Turns the device's cumulative crank counters into daily and all-time
//! distance, active time, crank rotations and calories. Every update is
//! infallible: wraparound is absorbed, device counter resets and implausible
//! jumps rebase the baseline, and the first sample after startup or a
//! reconnect only establishes a baseline.

use crate::metrics::calories::{CalorieInput, CalorieModel, MetSpeedCalories};
use crate::metrics::counters::{
    diff_u16, CounterDelta, CounterResetPolicy, DEFAULT_EVENT_TIME_WRAP_TOLERANCE,
    DEFAULT_WRAP_TOLERANCE,
};
use crate::metrics::rollover::{self, DaySummary};
use crate::metrics::snapshot::{Counter, MetricsSnapshot, RideTotals, UpdateOutcome};
use crate::sensors::csc::{RawReading, EVENT_TIME_TICKS_PER_SECOND};
use crate::storage::config::RiderConfig;
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Distance covered per crank revolution, in metres.
///
/// A fixed property of the device: one crank turn drives one revolution of a
/// virtual 700x23c wheel.
pub const METERS_PER_CRANK_REVOLUTION: f64 = 2.096;

/// Circumference of the wheel reported in the optional wheel block, in metres.
pub const WHEEL_CIRCUMFERENCE_M: f64 = 2.096;

/// Wheel steps above this are treated as glitches.
const MAX_WHEEL_REVOLUTIONS_PER_UPDATE: u32 = 1_000;

/// Largest crank step accrued from one update.
pub const DEFAULT_MAX_REVOLUTIONS_PER_UPDATE: u32 = 99;

/// Fastest speed believed, in km/h.
pub const DEFAULT_MAX_SPEED_KMH: f64 = 100.0;

/// Longest interval credited as active time from a single update.
pub const DEFAULT_MAX_ACTIVE_INTERVAL_SECS: f64 = 5.0;

/// Day summaries kept in memory.
pub const DEFAULT_HISTORY_DAYS: usize = 30;

/// No pedalling for this long zeroes cadence and speed.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3;

fn crank_distance_km(revolutions: u32) -> f64 {
    f64::from(revolutions) * METERS_PER_CRANK_REVOLUTION / 1000.0
}

/// Tunables of the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorSettings {
    /// Largest backwards crank count step accepted as a wraparound
    pub wrap_tolerance: u32,
    /// Largest backwards event clock step accepted as a wraparound, in ticks
    pub event_time_wrap_tolerance: u32,
    /// Crank steps above this are discarded as glitches
    pub max_revolutions_per_update: u32,
    /// Intervals implying a faster speed are discarded, in km/h
    pub max_speed_kmh: f64,
    /// Cap on active time credited by one update, in seconds
    pub max_active_interval_secs: f64,
    /// Number of day summaries kept
    pub history_days: usize,
    /// Seconds without pedalling before live values drop to zero
    pub idle_timeout_secs: u64,
}

impl Default for AccumulatorSettings {
    fn default() -> Self {
        Self {
            wrap_tolerance: DEFAULT_WRAP_TOLERANCE,
            event_time_wrap_tolerance: DEFAULT_EVENT_TIME_WRAP_TOLERANCE,
            max_revolutions_per_update: DEFAULT_MAX_REVOLUTIONS_PER_UPDATE,
            max_speed_kmh: DEFAULT_MAX_SPEED_KMH,
            max_active_interval_secs: DEFAULT_MAX_ACTIVE_INTERVAL_SECS,
            history_days: DEFAULT_HISTORY_DAYS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
        }
    }
}

impl AccumulatorSettings {
    /// Reset classification of the crank count.
    pub fn crank_policy(&self) -> CounterResetPolicy {
        CounterResetPolicy {
            wrap_tolerance: self.wrap_tolerance,
        }
    }

    /// Reset classification of the crank event clock.
    pub fn event_time_policy(&self) -> CounterResetPolicy {
        CounterResetPolicy {
            wrap_tolerance: self.event_time_wrap_tolerance,
        }
    }

    fn is_plausible_speed(&self, speed_kmh: f64) -> bool {
        speed_kmh.is_finite() && (0.0..=self.max_speed_kmh).contains(&speed_kmh)
    }

    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Everything the accumulator owns. Persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorState {
    /// Today's counters
    pub daily: RideTotals,
    /// All-time counters
    pub total: RideTotals,
    /// Baseline for the next delta
    pub last_reading: Option<RawReading>,
    /// Local day the daily counters belong to
    pub last_day_marker: Option<NaiveDate>,
    /// Last time pedalling was detected
    pub last_active: Option<DateTime<Local>>,
    /// Recently ended days, oldest first
    pub history: VecDeque<DaySummary>,
}

/// Lifecycle of the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorPhase {
    /// No baseline; the next reading only establishes one
    Uninitialized,
    /// Baseline established; deltas accrue
    Tracking,
}

/// Deltas and live values of one interval.
#[derive(Debug, Clone, Copy)]
struct Interval {
    delta: RideTotals,
    cadence_rpm: Option<f32>,
    speed_kmh: Option<f32>,
    is_active: bool,
    outcome: UpdateOutcome,
}

impl Interval {
    fn empty(outcome: UpdateOutcome, speed_kmh: Option<f32>) -> Self {
        Self {
            delta: RideTotals::default(),
            cadence_rpm: None,
            speed_kmh,
            is_active: false,
            outcome,
        }
    }
}

/// Accumulates ride metrics from raw device readings.
pub struct RideMetricsAccumulator<C: CalorieModel = MetSpeedCalories> {
    /// Owned state
    state: AccumulatorState,
    /// Tunables
    settings: AccumulatorSettings,
    /// Calorie strategy
    calories: C,
}

impl RideMetricsAccumulator<MetSpeedCalories> {
    /// Create an empty accumulator with the default calorie model.
    pub fn new(settings: AccumulatorSettings) -> Self {
        Self::with_model(AccumulatorState::default(), settings, MetSpeedCalories)
    }

    /// Resume from a persisted state with the default calorie model.
    pub fn from_state(state: AccumulatorState, settings: AccumulatorSettings) -> Self {
        Self::with_model(state, settings, MetSpeedCalories)
    }
}

impl<C: CalorieModel> RideMetricsAccumulator<C> {
    /// Create an accumulator with a custom calorie model.
    pub fn with_model(state: AccumulatorState, settings: AccumulatorSettings, calories: C) -> Self {
        Self {
            state,
            settings,
            calories,
        }
    }

    /// Current state.
    pub fn state(&self) -> &AccumulatorState {
        &self.state
    }

    /// Active settings.
    pub fn settings(&self) -> &AccumulatorSettings {
        &self.settings
    }

    /// Lifecycle phase.
    pub fn phase(&self) -> AccumulatorPhase {
        if self.state.last_reading.is_some() {
            AccumulatorPhase::Tracking
        } else {
            AccumulatorPhase::Uninitialized
        }
    }

    /// Recently ended days, oldest first.
    pub fn history(&self) -> &VecDeque<DaySummary> {
        &self.state.history
    }

    /// Ingest one reading.
    ///
    /// The daily bucket is rolled over first, using the reading's timestamp,
    /// so the new interval lands in the fresh day.
    pub fn update(
        &mut self,
        reading: &RawReading,
        config: &RiderConfig,
        now: DateTime<Local>,
    ) -> MetricsSnapshot {
        let day_ended = self.check_and_roll(reading.timestamp);

        let Some(previous) = self.state.last_reading.clone() else {
            tracing::debug!(
                "Baseline established at {} crank revolutions",
                reading.crank_revolutions
            );
            self.state.last_reading = Some(reading.clone());
            let interval = Interval::empty(UpdateOutcome::Baseline, reading.instantaneous_speed_kmh);
            return self.snapshot(reading, interval, day_ended, now);
        };

        let delta_crank = match diff_u16(
            reading.crank_revolutions,
            previous.crank_revolutions,
            &self.settings.crank_policy(),
        ) {
            CounterDelta::Advanced(delta) => delta,
            CounterDelta::Reset => {
                let previous = previous.crank_revolutions;
                return self.rebase(reading, Counter::CrankRevolutions, previous, day_ended, now);
            }
        };

        let delta_ticks = match diff_u16(
            reading.last_crank_event_time,
            previous.last_crank_event_time,
            &self.settings.event_time_policy(),
        ) {
            CounterDelta::Advanced(delta) => delta,
            CounterDelta::Reset => {
                let previous = previous.last_crank_event_time;
                return self.rebase(reading, Counter::CrankEventTime, previous, day_ended, now);
            }
        };

        if !self.is_plausible_step(delta_crank, delta_ticks) {
            tracing::warn!(
                "Discarding implausible crank step of {} revolutions in {} ticks, rebasing",
                delta_crank,
                delta_ticks
            );
            let outcome = UpdateOutcome::Implausible {
                revolutions: delta_crank,
                elapsed_ticks: delta_ticks,
            };
            return self.discard(reading, outcome, day_ended, now);
        }

        let interval = self.measure(&previous, reading, delta_crank, delta_ticks, config);

        self.state.daily.accrue(&interval.delta);
        self.state.total.accrue(&interval.delta);
        self.state.last_reading = Some(reading.clone());
        if interval.is_active {
            self.state.last_active = Some(now);
        }

        tracing::debug!(
            "Accrued {} rotations, {:.4} km, {:.2} s, {:.3} kcal",
            interval.delta.crank_rotations,
            interval.delta.distance_km,
            interval.delta.active_time_seconds,
            interval.delta.calories_kcal
        );

        self.snapshot(reading, interval, day_ended, now)
    }

    /// A step is believable when it stays under both the revolution and the speed cap.
    fn is_plausible_step(&self, delta_crank: u32, delta_ticks: u32) -> bool {
        if delta_crank > self.settings.max_revolutions_per_update {
            return false;
        }
        if delta_ticks == 0 {
            return true;
        }
        let hours = f64::from(delta_ticks) / EVENT_TIME_TICKS_PER_SECOND / 3600.0;
        self.settings.is_plausible_speed(crank_distance_km(delta_crank) / hours)
    }

    /// Speed from the wheel blocks of two consecutive readings.
    fn wheel_speed_kmh(&self, previous: &RawReading, reading: &RawReading) -> Option<f32> {
        let (before, after) = (previous.wheel?, reading.wheel?);
        let revolutions = after.revolutions.wrapping_sub(before.revolutions);
        let ticks = after.last_event_time.wrapping_sub(before.last_event_time);
        if ticks == 0 || revolutions > MAX_WHEEL_REVOLUTIONS_PER_UPDATE {
            return None;
        }

        let seconds = f64::from(ticks) / EVENT_TIME_TICKS_PER_SECOND;
        let speed = f64::from(revolutions) * WHEEL_CIRCUMFERENCE_M / seconds * 3.6;
        if self.settings.is_plausible_speed(speed) {
            Some(speed as f32)
        } else {
            tracing::debug!("Ignoring wheel speed of {:.1} km/h", speed);
            None
        }
    }

    /// Compute the deltas of one interval.
    fn measure(
        &self,
        previous: &RawReading,
        reading: &RawReading,
        delta_crank: u32,
        delta_ticks: u32,
        config: &RiderConfig,
    ) -> Interval {
        let delta_time = f64::from(delta_ticks) / EVENT_TIME_TICKS_PER_SECOND;
        let is_active = delta_crank > 0;

        let distance_km = crank_distance_km(delta_crank);

        let cadence_rpm = if !is_active {
            Some(0.0)
        } else if delta_time > 0.0 {
            Some((f64::from(delta_crank) / delta_time * 60.0) as f32)
        } else {
            None
        };

        // Reported speed first, then the wheel block, then the crank
        let speed_kmh = reading
            .instantaneous_speed_kmh
            .filter(|&speed| self.settings.is_plausible_speed(f64::from(speed)))
            .or_else(|| self.wheel_speed_kmh(previous, reading))
            .or(if !is_active {
                Some(0.0)
            } else if delta_time > 0.0 {
                Some((distance_km / (delta_time / 3600.0)) as f32)
            } else {
                None
            });

        let active_time_seconds = if is_active {
            if delta_time > self.settings.max_active_interval_secs {
                tracing::debug!(
                    "Clamping active interval of {:.1} s to {:.1} s",
                    delta_time,
                    self.settings.max_active_interval_secs
                );
            }
            delta_time.min(self.settings.max_active_interval_secs).max(0.0)
        } else {
            0.0
        };

        let calories_kcal = if active_time_seconds > 0.0 {
            let kcal = self.calories.calories(&CalorieInput {
                active_seconds: active_time_seconds,
                speed_kmh: f64::from(speed_kmh.unwrap_or(0.0)),
                weight_kg: config.weight_kg,
                resistance_percent: config.resistance_percent,
            });
            if kcal.is_finite() && kcal > 0.0 {
                kcal
            } else {
                0.0
            }
        } else {
            0.0
        };

        Interval {
            delta: RideTotals {
                distance_km,
                active_time_seconds,
                crank_rotations: u64::from(delta_crank),
                calories_kcal,
            },
            cadence_rpm,
            speed_kmh,
            is_active,
            outcome: UpdateOutcome::Accrued,
        }
    }

    /// Discard the interval after a device counter reset and rebase.
    fn rebase(
        &mut self,
        reading: &RawReading,
        counter: Counter,
        previous: u16,
        day_ended: Option<DaySummary>,
        now: DateTime<Local>,
    ) -> MetricsSnapshot {
        let current = match counter {
            Counter::CrankRevolutions => reading.crank_revolutions,
            Counter::CrankEventTime => reading.last_crank_event_time,
        };

        tracing::warn!(
            "Device {} counter reset detected ({} -> {}), rebasing",
            counter,
            previous,
            current
        );

        let outcome = UpdateOutcome::CounterReset {
            counter,
            previous,
            current,
        };
        self.discard(reading, outcome, day_ended, now)
    }

    /// Take `reading` as the new baseline without accruing anything.
    fn discard(
        &mut self,
        reading: &RawReading,
        outcome: UpdateOutcome,
        day_ended: Option<DaySummary>,
        now: DateTime<Local>,
    ) -> MetricsSnapshot {
        self.state.last_reading = Some(reading.clone());
        let interval = Interval::empty(outcome, reading.instantaneous_speed_kmh);
        self.snapshot(reading, interval, day_ended, now)
    }

    fn snapshot(
        &self,
        reading: &RawReading,
        interval: Interval,
        day_ended: Option<DaySummary>,
        now: DateTime<Local>,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            daily: self.state.daily,
            total: self.state.total,
            delta: interval.delta,
            cadence_rpm: interval.cadence_rpm,
            speed_kmh: interval.speed_kmh,
            battery_percent: reading.battery_percent,
            is_active: interval.is_active,
            last_active: self.state.last_active,
            outcome: interval.outcome,
            day_ended,
            updated_at: Some(now),
        }
    }

    /// Snapshot of the counters without a reading, e.g. after a restore.
    pub fn current_snapshot(&self, now: DateTime<Local>) -> MetricsSnapshot {
        MetricsSnapshot {
            daily: self.state.daily,
            total: self.state.total,
            last_active: self.state.last_active,
            updated_at: Some(now),
            ..Default::default()
        }
    }

    /// Roll the daily counters over if `now` is on a later local day.
    pub fn check_and_roll(&mut self, now: DateTime<Local>) -> Option<DaySummary> {
        let summary = rollover::check_and_roll(&mut self.state, now)?;

        self.state.history.push_back(summary);
        while self.state.history.len() > self.settings.history_days {
            self.state.history.pop_front();
        }

        Some(summary)
    }

    /// Zero the all-time counters. Daily counters and baseline are kept.
    pub fn reset_totals(&mut self) {
        tracing::info!(
            "Resetting totals ({:.2} km, {} rotations)",
            self.state.total.distance_km,
            self.state.total.crank_rotations
        );
        self.state.total = RideTotals::default();
    }

    /// Forget the baseline so the next reading only re-establishes it.
    ///
    /// Used after a reconnect; counters are kept.
    pub fn reset_baseline(&mut self) {
        if self.state.last_reading.take().is_some() {
            tracing::debug!("Baseline cleared");
        }
    }
}
