//! Sensor publishing.
//!
//! Maps metric snapshots to named sensors with fixed rounding and formatting,
//! and hands them to a [`SensorPublisher`] backend.

pub mod mqtt;

use crate::metrics::snapshot::MetricsSnapshot;
use crate::sensors::types::{ConnectionState, DeviceInfo};
use crate::storage::config::RiderConfig;
use chrono::{DateTime, Local};
use thiserror::Error;

// Re-export main types
pub use mqtt::{MqttConfig, MqttPublisher};

/// Sensors exposed to the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKey {
    Cadence,
    Speed,
    Battery,
    DailyDistance,
    TotalDistance,
    DailyActiveTime,
    TotalActiveTime,
    DailyCalories,
    TotalCalories,
    DailyCrankRotations,
    TotalCrankRotations,
    IsActive,
    IsConnected,
    LastActive,
    ModelNumber,
    SerialNumber,
    FirmwareVersion,
    HardwareVersion,
    SoftwareVersion,
    RiderWeight,
    RiderResistance,
}

impl SensorKey {
    /// Every sensor, in publishing order.
    pub const ALL: [SensorKey; 21] = [
        SensorKey::Cadence,
        SensorKey::Speed,
        SensorKey::Battery,
        SensorKey::DailyDistance,
        SensorKey::TotalDistance,
        SensorKey::DailyActiveTime,
        SensorKey::TotalActiveTime,
        SensorKey::DailyCalories,
        SensorKey::TotalCalories,
        SensorKey::DailyCrankRotations,
        SensorKey::TotalCrankRotations,
        SensorKey::IsActive,
        SensorKey::IsConnected,
        SensorKey::LastActive,
        SensorKey::ModelNumber,
        SensorKey::SerialNumber,
        SensorKey::FirmwareVersion,
        SensorKey::HardwareVersion,
        SensorKey::SoftwareVersion,
        SensorKey::RiderWeight,
        SensorKey::RiderResistance,
    ];

    /// Stable identifier, also the MQTT topic suffix.
    pub fn key(&self) -> &'static str {
        match self {
            SensorKey::Cadence => "cadence",
            SensorKey::Speed => "speed",
            SensorKey::Battery => "battery",
            SensorKey::DailyDistance => "daily_distance",
            SensorKey::TotalDistance => "total_distance",
            SensorKey::DailyActiveTime => "daily_active_time",
            SensorKey::TotalActiveTime => "total_active_time",
            SensorKey::DailyCalories => "daily_calories",
            SensorKey::TotalCalories => "total_calories",
            SensorKey::DailyCrankRotations => "daily_crank_rotations",
            SensorKey::TotalCrankRotations => "total_crank_rotations",
            SensorKey::IsActive => "is_active",
            SensorKey::IsConnected => "is_connected",
            SensorKey::LastActive => "last_active",
            SensorKey::ModelNumber => "model_number",
            SensorKey::SerialNumber => "serial_number",
            SensorKey::FirmwareVersion => "firmware_version",
            SensorKey::HardwareVersion => "hardware_version",
            SensorKey::SoftwareVersion => "software_version",
            SensorKey::RiderWeight => "weight",
            SensorKey::RiderResistance => "resistance",
        }
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            SensorKey::Cadence => "Cadence",
            SensorKey::Speed => "Speed",
            SensorKey::Battery => "Battery",
            SensorKey::DailyDistance => "Daily Distance",
            SensorKey::TotalDistance => "Total Distance",
            SensorKey::DailyActiveTime => "Daily Active Time",
            SensorKey::TotalActiveTime => "Total Active Time",
            SensorKey::DailyCalories => "Daily Calories",
            SensorKey::TotalCalories => "Total Calories",
            SensorKey::DailyCrankRotations => "Daily Crank Rotations",
            SensorKey::TotalCrankRotations => "Total Crank Rotations",
            SensorKey::IsActive => "Active",
            SensorKey::IsConnected => "Connected",
            SensorKey::LastActive => "Last Active",
            SensorKey::ModelNumber => "Model Number",
            SensorKey::SerialNumber => "Serial Number",
            SensorKey::FirmwareVersion => "Firmware Version",
            SensorKey::HardwareVersion => "Hardware Version",
            SensorKey::SoftwareVersion => "Software Version",
            SensorKey::RiderWeight => "Weight",
            SensorKey::RiderResistance => "Resistance",
        }
    }

    /// Unit of measurement, if any.
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            SensorKey::Cadence => Some("rpm"),
            SensorKey::Speed => Some("km/h"),
            SensorKey::Battery | SensorKey::RiderResistance => Some("%"),
            SensorKey::RiderWeight => Some("kg"),
            SensorKey::DailyDistance | SensorKey::TotalDistance => Some("km"),
            SensorKey::DailyCalories | SensorKey::TotalCalories => Some("kcal"),
            SensorKey::DailyCrankRotations | SensorKey::TotalCrankRotations => Some("rotations"),
            _ => None,
        }
    }
}

impl std::fmt::Display for SensorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A sensor value, carrying its own formatting.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorValue {
    /// Decimal number shown with a fixed number of decimals
    Number { value: f64, decimals: usize },
    /// Whole number
    Integer(u64),
    /// On/off state
    Flag(bool),
    /// Free text, passed through as read
    Text(String),
    /// Point in time
    Timestamp(DateTime<Local>),
    /// Elapsed whole seconds, shown as `d.HH:MM:SS`
    Duration(u64),
    /// No value known
    Unavailable,
}

impl SensorValue {
    /// Decimal value with the given precision.
    pub fn number(value: f64, decimals: usize) -> Self {
        SensorValue::Number { value, decimals }
    }

    /// Payload text as published.
    pub fn render(&self) -> String {
        match self {
            SensorValue::Number { value, decimals } => format!("{:.*}", decimals, value),
            SensorValue::Integer(value) => value.to_string(),
            SensorValue::Flag(true) => "ON".to_string(),
            SensorValue::Flag(false) => "OFF".to_string(),
            SensorValue::Text(text) => text.clone(),
            SensorValue::Timestamp(at) => at.to_rfc3339(),
            SensorValue::Duration(seconds) => format_duration(*seconds),
            SensorValue::Unavailable => "unavailable".to_string(),
        }
    }

    fn optional_number(value: Option<f32>, decimals: usize) -> Self {
        value.map_or(SensorValue::Unavailable, |v| {
            SensorValue::number(f64::from(v), decimals)
        })
    }

    fn optional_text(value: Option<&String>) -> Self {
        value.map_or(SensorValue::Unavailable, |v| SensorValue::Text(v.clone()))
    }
}

impl std::fmt::Display for SensorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Format whole seconds as `d.HH:MM:SS`, leaving out the days when zero.
pub fn format_duration(total_seconds: u64) -> String {
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    let seconds = total_seconds % 60;

    if days > 0 {
        format!("{}.{:02}:{:02}:{:02}", days, hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    }
}

/// Active time in seconds as a duration sensor value.
pub fn active_time_value(seconds: f64) -> SensorValue {
    if seconds.is_finite() && seconds > 0.0 {
        SensorValue::Duration(seconds.floor() as u64)
    } else {
        SensorValue::Duration(0)
    }
}

/// One sensor value to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorUpdate {
    pub key: SensorKey,
    pub value: SensorValue,
}

impl SensorUpdate {
    pub fn new(key: SensorKey, value: SensorValue) -> Self {
        Self { key, value }
    }
}

/// Map everything known to the full list of sensor values.
pub fn sensor_updates(
    snapshot: &MetricsSnapshot,
    device: Option<&DeviceInfo>,
    connection: ConnectionState,
    rider: &RiderConfig,
) -> Vec<SensorUpdate> {
    SensorKey::ALL
        .iter()
        .map(|&key| {
            let value = match key {
                SensorKey::Cadence => SensorValue::optional_number(snapshot.cadence_rpm, 1),
                SensorKey::Speed => SensorValue::optional_number(snapshot.speed_kmh, 1),
                SensorKey::Battery => snapshot
                    .battery_percent
                    .map_or(SensorValue::Unavailable, |level| {
                        SensorValue::Integer(u64::from(level))
                    }),
                SensorKey::DailyDistance => SensorValue::number(snapshot.daily.distance_km, 2),
                SensorKey::TotalDistance => SensorValue::number(snapshot.total.distance_km, 1),
                SensorKey::DailyActiveTime => {
                    active_time_value(snapshot.daily.active_time_seconds)
                }
                SensorKey::TotalActiveTime => {
                    active_time_value(snapshot.total.active_time_seconds)
                }
                SensorKey::DailyCalories => SensorValue::number(snapshot.daily.calories_kcal, 1),
                SensorKey::TotalCalories => SensorValue::number(snapshot.total.calories_kcal, 1),
                SensorKey::DailyCrankRotations => {
                    SensorValue::Integer(snapshot.daily.crank_rotations)
                }
                SensorKey::TotalCrankRotations => {
                    SensorValue::Integer(snapshot.total.crank_rotations)
                }
                SensorKey::IsActive => SensorValue::Flag(snapshot.is_active),
                SensorKey::IsConnected => SensorValue::Flag(connection.is_connected()),
                SensorKey::LastActive => snapshot
                    .last_active
                    .map_or(SensorValue::Unavailable, SensorValue::Timestamp),
                SensorKey::ModelNumber => {
                    SensorValue::optional_text(device.and_then(|d| d.model_number.as_ref()))
                }
                SensorKey::SerialNumber => {
                    SensorValue::optional_text(device.and_then(|d| d.serial_number.as_ref()))
                }
                SensorKey::FirmwareVersion => {
                    SensorValue::optional_text(device.and_then(|d| d.firmware_version.as_ref()))
                }
                SensorKey::HardwareVersion => {
                    SensorValue::optional_text(device.and_then(|d| d.hardware_version.as_ref()))
                }
                SensorKey::SoftwareVersion => {
                    SensorValue::optional_text(device.and_then(|d| d.software_version.as_ref()))
                }
                SensorKey::RiderWeight => SensorValue::number(rider.weight_kg, 1),
                SensorKey::RiderResistance => SensorValue::number(rider.resistance_percent, 0),
            };
            SensorUpdate::new(key, value)
        })
        .collect()
}

/// Commands accepted from the host platform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BridgeCommand {
    /// Drop and re-establish the BLE connection
    Reconnect,
    /// Zero the all-time counters
    ResetTotals,
    /// Change the rider weight, in kilograms
    SetWeight(f64),
    /// Change the resistance setting, in percent
    SetResistance(f64),
}

impl BridgeCommand {
    /// Parse a command payload.
    pub fn parse(payload: &str) -> Option<Self> {
        match payload.trim().to_ascii_lowercase().as_str() {
            "reconnect" => Some(BridgeCommand::Reconnect),
            "reset_totals" => Some(BridgeCommand::ResetTotals),
            _ => None,
        }
    }

    /// Parse a rider weight payload such as `"82.5"`.
    pub fn parse_weight(payload: &str) -> Option<Self> {
        parse_number(payload).map(BridgeCommand::SetWeight)
    }

    /// Parse a resistance payload such as `"40"`.
    pub fn parse_resistance(payload: &str) -> Option<Self> {
        parse_number(payload).map(BridgeCommand::SetResistance)
    }
}

fn parse_number(payload: &str) -> Option<f64> {
    payload
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

impl std::fmt::Display for BridgeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeCommand::Reconnect => write!(f, "reconnect"),
            BridgeCommand::ResetTotals => write!(f, "reset_totals"),
            BridgeCommand::SetWeight(kg) => write!(f, "set weight {} kg", kg),
            BridgeCommand::SetResistance(percent) => write!(f, "set resistance {}%", percent),
        }
    }
}

/// Publishing errors.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

/// Backend that delivers sensor values to the host platform.
pub trait SensorPublisher: Send {
    /// Publish one value.
    fn publish(&mut self, update: &SensorUpdate) -> Result<(), PublishError>;

    /// Release the backend on shutdown.
    fn close(&mut self) {}
}

impl<P: SensorPublisher + ?Sized> SensorPublisher for Box<P> {
    fn publish(&mut self, update: &SensorUpdate) -> Result<(), PublishError> {
        (**self).publish(update)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Publisher that writes every value to the log.
#[derive(Debug, Default)]
pub struct LogPublisher;

impl SensorPublisher for LogPublisher {
    fn publish(&mut self, update: &SensorUpdate) -> Result<(), PublishError> {
        match update.key.unit() {
            Some(unit) => tracing::info!("{}: {} {}", update.key.name(), update.value, unit),
            None => tracing::info!("{}: {}", update.key.name(), update.value),
        }
        Ok(())
    }
}
