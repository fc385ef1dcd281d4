//! Ride metrics.
//!
//! Counter arithmetic, calorie estimation, day rollover and the accumulator
//! that ties them together.

pub mod accumulator;
pub mod calories;
pub mod counters;
pub mod rollover;
pub mod snapshot;

pub use accumulator::{
    AccumulatorPhase, AccumulatorSettings, AccumulatorState, RideMetricsAccumulator,
    METERS_PER_CRANK_REVOLUTION,
};
pub use calories::{CalorieInput, CalorieModel, MetSpeedCalories};
pub use counters::{diff_u16, wrap_aware_diff, CounterDelta, CounterResetPolicy};
pub use rollover::DaySummary;
pub use snapshot::{Counter, MetricsSnapshot, RideTotals, UpdateOutcome};
