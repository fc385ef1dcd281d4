//! CSC (Cycling Speed and Cadence) protocol implementation.
//!
//! The DeskBike reports pedalling through the standard CSC Measurement
//! characteristic (0x2A5B). Battery and the device information strings live in
//! their own characteristics and are read separately by the link.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Cycling Speed and Cadence Service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);

/// CSC Measurement Characteristic UUID (0x2A5B)
pub const CSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a5b_0000_1000_8000_0080_5f9b_34fb);

/// Battery Level UUID (0x2A19)
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_0080_5f9b_34fb);

/// Device Name UUID (0x2A00)
pub const DEVICE_NAME_UUID: Uuid = Uuid::from_u128(0x0000_2a00_0000_1000_8000_0080_5f9b_34fb);

/// Model Number String UUID (0x2A24)
pub const MODEL_NUMBER_UUID: Uuid = Uuid::from_u128(0x0000_2a24_0000_1000_8000_0080_5f9b_34fb);

/// Serial Number String UUID (0x2A25)
pub const SERIAL_NUMBER_UUID: Uuid = Uuid::from_u128(0x0000_2a25_0000_1000_8000_0080_5f9b_34fb);

/// Firmware Revision String UUID (0x2A26)
pub const FIRMWARE_REVISION_UUID: Uuid =
    Uuid::from_u128(0x0000_2a26_0000_1000_8000_0080_5f9b_34fb);

/// Hardware Revision String UUID (0x2A27)
pub const HARDWARE_REVISION_UUID: Uuid =
    Uuid::from_u128(0x0000_2a27_0000_1000_8000_0080_5f9b_34fb);

/// Software Revision String UUID (0x2A28)
pub const SOFTWARE_REVISION_UUID: Uuid =
    Uuid::from_u128(0x0000_2a28_0000_1000_8000_0080_5f9b_34fb);

/// Event times are reported in 1/1024 s.
pub const EVENT_TIME_TICKS_PER_SECOND: f64 = 1024.0;

const WHEEL_DATA_PRESENT: u8 = 0x01;
const CRANK_DATA_PRESENT: u8 = 0x02;
const RESERVED_FLAGS: u8 = !(WHEEL_DATA_PRESENT | CRANK_DATA_PRESENT);

const WHEEL_BLOCK_LEN: usize = 6;
const CRANK_BLOCK_LEN: usize = 4;

/// Cumulative wheel revolution data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelRevolutionData {
    /// Cumulative wheel revolutions (wraps at 2^32)
    pub revolutions: u32,
    /// Last wheel event time in 1/1024 s (wraps at 2^16)
    pub last_event_time: u16,
}

/// Cumulative crank revolution data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrankRevolutionData {
    /// Cumulative crank revolutions (wraps at 2^16)
    pub revolutions: u16,
    /// Last crank event time in 1/1024 s (wraps at 2^16)
    pub last_event_time: u16,
}

/// Parsed CSC Measurement notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CscMeasurement {
    /// Wheel revolution data (if present)
    pub wheel: Option<WheelRevolutionData>,
    /// Crank revolution data (if present)
    pub crank: Option<CrankRevolutionData>,
}

/// One decoded device reading, as fed to the accumulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// Cumulative crank revolutions (wraps at 2^16)
    pub crank_revolutions: u16,
    /// Last crank event time in 1/1024 s (wraps at 2^16)
    pub last_crank_event_time: u16,
    /// Wheel data, when the firmware sends it
    #[serde(default)]
    pub wheel: Option<WheelRevolutionData>,
    /// Instantaneous speed in km/h, when the transport supplies one
    #[serde(default)]
    pub instantaneous_speed_kmh: Option<f32>,
    /// Battery level percentage (0-100), when known
    #[serde(default)]
    pub battery_percent: Option<u8>,
    /// Capture time
    pub timestamp: DateTime<Local>,
}

impl RawReading {
    /// Attach the last known battery level.
    pub fn with_battery(mut self, battery_percent: Option<u8>) -> Self {
        self.battery_percent = battery_percent.map(|b| b.min(100));
        self
    }

    /// Attach an instantaneous speed reported out of band.
    pub fn with_speed(mut self, speed_kmh: Option<f32>) -> Self {
        self.instantaneous_speed_kmh = speed_kmh;
        self
    }
}

/// Errors produced while decoding a notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty CSC payload")]
    Empty,

    #[error("unrecognized CSC flags 0x{0:02x}")]
    ReservedFlags(u8),

    #[error("CSC payload length {actual} does not match flags (expected {expected})")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("CSC payload carries no crank revolution data")]
    MissingCrankData,
}

/// Parse a CSC Measurement notification.
///
/// The data format is:
/// - Byte 0: Flags (bit 0 wheel data present, bit 1 crank data present)
/// - Wheel data: u32 cumulative revolutions, u16 last event time
/// - Crank data: u16 cumulative revolutions, u16 last event time
///
/// The buffer must be exactly as long as the flags announce.
pub fn decode_csc_measurement(data: &[u8]) -> Result<CscMeasurement, DecodeError> {
    let flags = *data.first().ok_or(DecodeError::Empty)?;

    if flags & RESERVED_FLAGS != 0 {
        return Err(DecodeError::ReservedFlags(flags));
    }

    let wheel_present = flags & WHEEL_DATA_PRESENT != 0;
    let crank_present = flags & CRANK_DATA_PRESENT != 0;

    let mut expected = 1;
    if wheel_present {
        expected += WHEEL_BLOCK_LEN;
    }
    if crank_present {
        expected += CRANK_BLOCK_LEN;
    }

    if data.len() != expected {
        return Err(DecodeError::LengthMismatch {
            expected,
            actual: data.len(),
        });
    }

    let mut result = CscMeasurement::default();
    let mut offset = 1usize;

    if wheel_present {
        result.wheel = Some(WheelRevolutionData {
            revolutions: u32::from_le_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]),
            last_event_time: u16::from_le_bytes([data[offset + 4], data[offset + 5]]),
        });
        offset += WHEEL_BLOCK_LEN;
    }

    if crank_present {
        result.crank = Some(CrankRevolutionData {
            revolutions: u16::from_le_bytes([data[offset], data[offset + 1]]),
            last_event_time: u16::from_le_bytes([data[offset + 2], data[offset + 3]]),
        });
    }

    Ok(result)
}

/// Decode a notification into a reading captured at `timestamp`.
pub fn decode_reading(data: &[u8], timestamp: DateTime<Local>) -> Result<RawReading, DecodeError> {
    let measurement = decode_csc_measurement(data)?;
    let crank = measurement.crank.ok_or(DecodeError::MissingCrankData)?;

    Ok(RawReading {
        crank_revolutions: crank.revolutions,
        last_crank_event_time: crank.last_event_time,
        wheel: measurement.wheel,
        instantaneous_speed_kmh: None,
        battery_percent: None,
        timestamp,
    })
}

/// Parse a Battery Level read or notification.
pub fn decode_battery_level(data: &[u8]) -> Option<u8> {
    data.first().map(|level| (*level).min(100))
}

/// Parse a device information string, trimming padding the firmware leaves behind.
pub fn decode_info_string(data: &[u8]) -> String {
    String::from_utf8_lossy(data)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}
