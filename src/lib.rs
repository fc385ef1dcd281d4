//! DeskBike Bridge - ride metrics for the DeskBike desk bicycle
//!
//! Connects to a DeskBike over Bluetooth LE, turns its cumulative crank
//! counters into daily and all-time distance, active time, crank rotations and
//! calories, and publishes them as sensors to a smart-home platform.

pub mod coordinator;
pub mod metrics;
pub mod publish;
pub mod sensors;
pub mod storage;

// Re-export commonly used types
pub use coordinator::RideCoordinator;
pub use metrics::accumulator::RideMetricsAccumulator;
pub use publish::SensorPublisher;
pub use sensors::manager::DeskBikeLink;
pub use storage::config::{AppConfig, RiderConfig};
