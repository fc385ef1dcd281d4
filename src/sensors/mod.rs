//! DeskBike sensor link.
//!
//! Decodes CSC measurements and manages the BLE connection.

pub mod csc;
pub mod manager;
pub mod types;

pub use csc::{decode_csc_measurement, decode_reading, CscMeasurement, DecodeError, RawReading};
pub use manager::DeskBikeLink;
pub use types::{ConnectionState, DeviceInfo, LinkCommand, LinkConfig, LinkEvent, SensorError};
