//! Calorie estimation.
//!
//! The accumulator only asks a [`CalorieModel`] for the energy of one active
//! interval, so the estimate can be swapped without touching the bookkeeping.

/// MET for light effort (< 16 km/h)
pub const MET_LIGHT: f64 = 4.0;
/// MET for moderate effort (16-19 km/h)
pub const MET_MODERATE: f64 = 6.0;
/// MET for vigorous effort (19-22.5 km/h)
pub const MET_VIGOROUS: f64 = 8.0;
/// MET for very vigorous effort (22.5-25.7 km/h)
pub const MET_VERY_VIGOROUS: f64 = 10.0;
/// MET for racing effort (> 25.7 km/h)
pub const MET_RACING: f64 = 12.0;

/// Activity over one interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalorieInput {
    /// Seconds spent pedalling in the interval
    pub active_seconds: f64,
    /// Speed over the interval in km/h
    pub speed_kmh: f64,
    /// Cyclist weight in kilograms
    pub weight_kg: f64,
    /// Resistance setting (0-100)
    pub resistance_percent: f64,
}

/// Strategy for turning an active interval into kilocalories.
pub trait CalorieModel: Send {
    /// Kilocalories burned over the interval. Never negative.
    fn calories(&self, input: &CalorieInput) -> f64;
}

/// MET table keyed by speed, scaled linearly by resistance.
///
/// `kcal = MET × weight × hours × resistance / 100`. This is a rough
/// approximation, not a validated physiological model.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetSpeedCalories;

impl MetSpeedCalories {
    /// MET value for a given speed.
    pub fn met_for_speed(speed_kmh: f64) -> f64 {
        if speed_kmh < 16.0 {
            MET_LIGHT
        } else if speed_kmh < 19.0 {
            MET_MODERATE
        } else if speed_kmh < 22.5 {
            MET_VIGOROUS
        } else if speed_kmh < 25.7 {
            MET_VERY_VIGOROUS
        } else {
            MET_RACING
        }
    }
}

impl CalorieModel for MetSpeedCalories {
    fn calories(&self, input: &CalorieInput) -> f64 {
        if input.active_seconds <= 0.0 || input.weight_kg <= 0.0 {
            return 0.0;
        }

        let hours = input.active_seconds / 3600.0;
        let met = Self::met_for_speed(input.speed_kmh);
        let resistance = input.resistance_percent.clamp(0.0, 100.0);

        met * input.weight_kg * hours * resistance / 100.0
    }
}
