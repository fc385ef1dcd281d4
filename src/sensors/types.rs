//! Link types for the DeskBike BLE connection.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Connection state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Active connection
    Connected,
    /// Reconnect in progress
    Reconnecting,
}

impl ConnectionState {
    /// True only for an established connection.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting..."),
        }
    }
}

/// Device information strings, passed through as read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// BLE address
    pub address: String,
    /// Advertised or GATT device name
    pub name: Option<String>,
    /// Model number
    pub model_number: Option<String>,
    /// Serial number
    pub serial_number: Option<String>,
    /// Firmware revision
    pub firmware_version: Option<String>,
    /// Hardware revision
    pub hardware_version: Option<String>,
    /// Software revision
    pub software_version: Option<String>,
}

/// Events from the BLE link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Connection state changed
    ConnectionChanged(ConnectionState),
    /// Device information read after connecting
    DeviceInfo(DeviceInfo),
    /// Battery level read or notified
    Battery(u8),
    /// Raw CSC measurement notification
    Notification {
        payload: Vec<u8>,
        received_at: DateTime<Local>,
    },
    /// No notification within the presence timeout
    PresenceLost,
}

/// Commands to the BLE link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    /// Drop the connection and connect again immediately
    Reconnect,
    /// Disconnect and stop
    Shutdown,
}

/// Configuration for the BLE link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// BLE address of the DeskBike (first DeskBike seen when unset)
    pub address: Option<String>,
    /// Name prefix used when no address is configured
    pub name: String,
    /// Timeout for scanning and connecting in seconds
    pub connection_timeout_secs: u64,
    /// Timeout for single characteristic reads in seconds
    pub read_timeout_secs: u64,
    /// Seconds without notifications before the device counts as gone
    pub presence_timeout_secs: u64,
    /// Seconds between connection attempts
    pub retry_interval_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: None,
            name: "DeskBike".to_string(),
            connection_timeout_secs: 5,
            read_timeout_secs: 3,
            presence_timeout_secs: 180,
            retry_interval_secs: 60,
        }
    }
}

impl LinkConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Whether an advertised peripheral is the configured device.
    pub fn matches(&self, address: &str, local_name: Option<&str>) -> bool {
        match &self.address {
            Some(wanted) => wanted.eq_ignore_ascii_case(address),
            None => local_name.is_some_and(|name| name.starts_with(&self.name)),
        }
    }
}

/// Errors that can occur on the BLE link.
#[derive(Debug, Error)]
pub enum SensorError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Failed to start BLE scanning
    #[error("Failed to start scanning: {0}")]
    ScanFailed(String),

    /// Device not seen while scanning
    #[error("DeskBike not found: {0}")]
    DeviceNotFound(String),

    /// Connection to the device failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timed out
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// Failed to subscribe to notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Device does not expose the CSC service or measurement characteristic
    #[error("CSC measurement not supported by device")]
    Unsupported,

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}

impl From<btleplug::Error> for SensorError {
    fn from(e: btleplug::Error) -> Self {
        SensorError::BleError(e.to_string())
    }
}
