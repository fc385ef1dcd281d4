//! Local-day rollover of the daily counters.

use crate::metrics::accumulator::AccumulatorState;
use crate::metrics::snapshot::RideTotals;
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Daily counters of a day that has ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    /// Local calendar date the counters belong to
    pub date: NaiveDate,
    /// Counters as they stood at the end of the day
    pub totals: RideTotals,
}

/// Roll the daily counters over if `now` falls on a later local day.
///
/// The first call on a fresh state only records the day. Calling again with a
/// time on the same day is a no-op. A time on an earlier day (clock stepped
/// backwards) is ignored rather than wiping today's counters.
pub fn check_and_roll(state: &mut AccumulatorState, now: DateTime<Local>) -> Option<DaySummary> {
    let today = now.date_naive();

    let Some(marker) = state.last_day_marker else {
        state.last_day_marker = Some(today);
        return None;
    };

    if today <= marker {
        if today < marker {
            tracing::debug!(
                "Ignoring day rollover to {} (already at {}); clock moved backwards",
                today,
                marker
            );
        }
        return None;
    }

    let summary = DaySummary {
        date: marker,
        totals: state.daily,
    };

    tracing::info!(
        "Day ended {}: {:.2} km, {:.0} s active, {} rotations, {:.1} kcal",
        marker,
        summary.totals.distance_km,
        summary.totals.active_time_seconds,
        summary.totals.crank_rotations,
        summary.totals.calories_kcal
    );

    state.daily = RideTotals::default();
    state.last_day_marker = Some(today);

    Some(summary)
}
