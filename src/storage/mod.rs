//! Storage module for configuration and ride state.

pub mod config;
pub mod state_store;

pub use config::{
    get_config_path, get_data_dir, load_config_from, save_config, save_rider, AppConfig,
    ConfigError, RiderConfig, RiderSettings, StorageSettings,
};
pub use state_store::{StateStore, StoreError};
