//! Rider settings and application configuration.

use crate::metrics::accumulator::AccumulatorSettings;
use crate::publish::mqtt::MqttConfig;
use crate::sensors::types::LinkConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default cyclist weight in kilograms.
pub const DEFAULT_WEIGHT_KG: f64 = 70.0;

/// Lightest rider weight accepted, in kilograms.
pub const MIN_WEIGHT_KG: f64 = 10.0;

/// Heaviest rider weight accepted, in kilograms.
pub const MAX_WEIGHT_KG: f64 = 150.0;

/// Default resistance setting in percent.
pub const DEFAULT_RESISTANCE_PERCENT: f64 = 100.0;

/// Default seconds between state saves while metrics change.
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 300;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "DESKBIKE_CONFIG";

/// Rider parameters used by the calorie estimate.
///
/// Always valid: missing or out-of-range values fall back to defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiderConfig {
    /// Cyclist weight in kilograms (> 0)
    pub weight_kg: f64,
    /// Resistance setting (0-100)
    pub resistance_percent: f64,
}

impl Default for RiderConfig {
    fn default() -> Self {
        Self {
            weight_kg: DEFAULT_WEIGHT_KG,
            resistance_percent: DEFAULT_RESISTANCE_PERCENT,
        }
    }
}

impl RiderConfig {
    /// Build from possibly missing settings, falling back to defaults.
    pub fn resolve(weight_kg: Option<f64>, resistance_percent: Option<f64>) -> Self {
        let weight_kg = match weight_kg {
            Some(weight) if Self::validate_weight(weight) => weight,
            Some(weight) => {
                tracing::warn!(
                    "Invalid rider weight {} kg, using default {} kg",
                    weight,
                    DEFAULT_WEIGHT_KG
                );
                DEFAULT_WEIGHT_KG
            }
            None => {
                tracing::warn!("Rider weight not configured, using default {} kg", DEFAULT_WEIGHT_KG);
                DEFAULT_WEIGHT_KG
            }
        };

        let resistance_percent = match resistance_percent {
            Some(resistance) if resistance.is_finite() => resistance.clamp(0.0, 100.0),
            Some(resistance) => {
                tracing::warn!(
                    "Invalid resistance {}, using default {}%",
                    resistance,
                    DEFAULT_RESISTANCE_PERCENT
                );
                DEFAULT_RESISTANCE_PERCENT
            }
            None => {
                tracing::warn!(
                    "Resistance not configured, using default {}%",
                    DEFAULT_RESISTANCE_PERCENT
                );
                DEFAULT_RESISTANCE_PERCENT
            }
        };

        Self {
            weight_kg,
            resistance_percent,
        }
    }

    /// Weight must lie between [`MIN_WEIGHT_KG`] and [`MAX_WEIGHT_KG`].
    pub fn validate_weight(weight_kg: f64) -> bool {
        (MIN_WEIGHT_KG..=MAX_WEIGHT_KG).contains(&weight_kg)
    }

    /// Same rider with a new weight, or `None` if the weight is out of range.
    pub fn with_weight(self, weight_kg: f64) -> Option<Self> {
        Self::validate_weight(weight_kg).then_some(Self { weight_kg, ..self })
    }

    /// Same rider with a new resistance, or `None` outside 0-100%.
    pub fn with_resistance(self, resistance_percent: f64) -> Option<Self> {
        (0.0..=100.0).contains(&resistance_percent).then_some(Self {
            resistance_percent,
            ..self
        })
    }
}

/// Rider section of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiderSettings {
    /// Cyclist weight in kilograms
    pub weight_kg: Option<f64>,
    /// Resistance setting (0-100)
    pub resistance_percent: Option<f64>,
}

impl RiderSettings {
    /// Resolve into a usable rider config.
    pub fn to_rider_config(&self) -> RiderConfig {
        RiderConfig::resolve(self.weight_kg, self.resistance_percent)
    }
}

impl From<&RiderConfig> for RiderSettings {
    fn from(rider: &RiderConfig) -> Self {
        Self {
            weight_kg: Some(rider.weight_kg),
            resistance_percent: Some(rider.resistance_percent),
        }
    }
}

/// Storage-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// State file location (defaults to the data directory)
    pub state_path: Option<PathBuf>,
    /// Seconds between saves while metrics change
    pub autosave_interval_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            state_path: None,
            autosave_interval_secs: DEFAULT_AUTOSAVE_INTERVAL_SECS,
        }
    }
}

impl StorageSettings {
    /// Resolved state file location.
    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| get_data_dir().join("state.json"))
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// BLE device settings
    pub device: LinkConfig,
    /// Rider settings
    pub rider: RiderSettings,
    /// Accumulator tunables
    pub accumulator: AccumulatorSettings,
    /// MQTT publishing
    pub mqtt: MqttConfig,
    /// State persistence
    pub storage: StorageSettings,
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "deskbike", "DeskBike")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| get_data_dir().join("config.toml"))
}

/// Load application configuration from a file. A missing file yields defaults.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        tracing::info!("No config file at {:?}, using defaults", path);
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Save application configuration to a file.
pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Write the rider section into the configuration file, keeping everything else.
pub fn save_rider(rider: &RiderConfig, path: &Path) -> Result<(), ConfigError> {
    let mut config = load_config_from(path)?;
    config.rider = RiderSettings::from(rider);
    save_config(&config, path)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
