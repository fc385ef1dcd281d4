//! Wrap-aware arithmetic for the device's cumulative counters.
//!
//! Crank revolutions and crank event time are 16-bit counters that wrap
//! silently. A backwards step is either a wrap (the counter passed 65535) or a
//! device reset (power cycle, battery swap). The two are told apart by how far
//! the counter would have travelled had it wrapped.

use serde::{Deserialize, Serialize};

/// Modulus of the 16-bit CSC counters.
pub const COUNTER_MODULUS: u32 = 65_536;

/// Largest wrapped step still accepted as a wraparound.
///
/// Anything further is treated as a device counter reset. Configurable as
/// `[accumulator] wrap_tolerance`.
pub const DEFAULT_WRAP_TOLERANCE: u32 = 4_096;

/// Largest wrapped step of the crank event clock accepted as a wraparound.
///
/// The clock ticks at 1/1024 s and wraps every 64 s, so any backwards step
/// short of half its range is a wrap. Configurable as
/// `[accumulator] event_time_wrap_tolerance`.
pub const DEFAULT_EVENT_TIME_WRAP_TOLERANCE: u32 = COUNTER_MODULUS / 2 - 1;

/// Result of comparing two readings of a cumulative counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDelta {
    /// Counter moved forward by this many units (possibly across a wrap)
    Advanced(u32),
    /// Counter went backwards too far to be a wrap
    Reset,
}

/// How backwards counter steps are classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterResetPolicy {
    /// Largest wrapped step accepted as a wraparound
    pub wrap_tolerance: u32,
}

impl Default for CounterResetPolicy {
    fn default() -> Self {
        Self {
            wrap_tolerance: DEFAULT_WRAP_TOLERANCE,
        }
    }
}

impl CounterResetPolicy {
    /// Policy for the crank event clock.
    pub fn event_time() -> Self {
        Self {
            wrap_tolerance: DEFAULT_EVENT_TIME_WRAP_TOLERANCE,
        }
    }
}

/// Difference `current - previous` for a counter that wraps at `modulus`.
///
/// Values are expected to be below `modulus`.
pub fn wrap_aware_diff(
    current: u32,
    previous: u32,
    modulus: u32,
    policy: &CounterResetPolicy,
) -> CounterDelta {
    if current >= previous {
        return CounterDelta::Advanced(current - previous);
    }

    let wrapped = modulus.saturating_sub(previous).saturating_add(current);
    if wrapped <= policy.wrap_tolerance {
        CounterDelta::Advanced(wrapped)
    } else {
        CounterDelta::Reset
    }
}

/// [`wrap_aware_diff`] for the 16-bit CSC counters.
pub fn diff_u16(current: u16, previous: u16, policy: &CounterResetPolicy) -> CounterDelta {
    wrap_aware_diff(
        u32::from(current),
        u32::from(previous),
        COUNTER_MODULUS,
        policy,
    )
}
