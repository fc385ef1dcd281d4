//! Ride coordinator.
//!
//! Single owner of the accumulator. Receives link events, host commands and
//! periodic ticks, publishes sensor values that changed and saves state.

use crate::metrics::accumulator::RideMetricsAccumulator;
use crate::metrics::calories::{CalorieModel, MetSpeedCalories};
use crate::metrics::snapshot::MetricsSnapshot;
use crate::publish::{sensor_updates, BridgeCommand, SensorKey, SensorPublisher};
use crate::sensors::csc::decode_reading;
use crate::sensors::types::{ConnectionState, DeviceInfo, LinkCommand, LinkEvent};
use crate::storage::config::{save_rider, RiderConfig, DEFAULT_AUTOSAVE_INTERVAL_SECS};
use crate::storage::state_store::StateStore;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Whether at least `interval` passed between `since` and `now`.
fn elapsed(since: DateTime<Local>, now: DateTime<Local>, interval: Duration) -> bool {
    (now - since)
        .to_std()
        .is_ok_and(|elapsed| elapsed >= interval)
}

/// Drives the accumulator and publishes its results.
pub struct RideCoordinator<P: SensorPublisher, C: CalorieModel = MetSpeedCalories> {
    /// Metrics accumulator
    accumulator: RideMetricsAccumulator<C>,
    /// Rider parameters for calories
    rider: RiderConfig,
    /// Configuration file rider changes are written to
    config_path: Option<PathBuf>,
    /// Sensor backend
    publisher: P,
    /// State persistence
    store: Option<StateStore>,
    /// Seconds between saves while state is dirty
    autosave_interval: Duration,
    /// Commands back to the BLE link
    link: Option<UnboundedSender<LinkCommand>>,
    /// Device information from the last connect
    device_info: Option<DeviceInfo>,
    /// Link state
    connection: ConnectionState,
    /// Last known battery level
    battery_percent: Option<u8>,
    /// Latest snapshot
    snapshot: MetricsSnapshot,
    /// Payloads last published per sensor
    published: HashMap<SensorKey, String>,
    /// When state first changed since the last save
    dirty_since: Option<DateTime<Local>>,
}

impl<P: SensorPublisher, C: CalorieModel> RideCoordinator<P, C> {
    /// Create a coordinator without persistence or link.
    pub fn new(accumulator: RideMetricsAccumulator<C>, rider: RiderConfig, publisher: P) -> Self {
        Self {
            accumulator,
            rider,
            config_path: None,
            publisher,
            store: None,
            autosave_interval: Duration::from_secs(DEFAULT_AUTOSAVE_INTERVAL_SECS),
            link: None,
            device_info: None,
            connection: ConnectionState::Disconnected,
            battery_percent: None,
            snapshot: MetricsSnapshot::default(),
            published: HashMap::new(),
            dirty_since: None,
        }
    }

    /// Persist state to `store`, at most every `autosave_interval` while riding.
    pub fn with_store(mut self, store: StateStore, autosave_interval: Duration) -> Self {
        self.store = Some(store);
        self.autosave_interval = autosave_interval;
        self
    }

    /// Write rider changes received at runtime back to `path`.
    pub fn with_config_file(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Forward reconnect requests to the BLE link.
    pub fn with_link(mut self, link: UnboundedSender<LinkCommand>) -> Self {
        self.link = Some(link);
        self
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> &MetricsSnapshot {
        &self.snapshot
    }

    /// The accumulator.
    pub fn accumulator(&self) -> &RideMetricsAccumulator<C> {
        &self.accumulator
    }

    /// Link state.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Sensor backend.
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Sensor backend, mutably.
    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }

    /// True when state changed since the last save.
    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// Rider parameters in use.
    pub fn rider(&self) -> &RiderConfig {
        &self.rider
    }

    /// Replace the rider parameters used for new intervals.
    pub fn set_rider(&mut self, rider: RiderConfig) {
        tracing::info!(
            "Rider updated: {} kg, {}% resistance",
            rider.weight_kg,
            rider.resistance_percent
        );
        self.rider = rider;
    }

    /// Publish the restored counters and roll the day if it changed while offline.
    pub fn start(&mut self, now: DateTime<Local>) {
        if self.accumulator.check_and_roll(now).is_some() {
            self.mark_dirty(now);
            self.save();
        }
        self.snapshot = self.accumulator.current_snapshot(now);
        self.publish_changes();
    }

    /// Handle one event from the BLE link.
    pub fn handle_link_event(&mut self, event: LinkEvent, now: DateTime<Local>) {
        match event {
            LinkEvent::ConnectionChanged(state) => {
                tracing::info!("DeskBike {}", state);
                self.connection = state;
                match state {
                    ConnectionState::Connected => self.accumulator.reset_baseline(),
                    ConnectionState::Disconnected => {
                        self.accumulator.reset_baseline();
                        self.snapshot = self.snapshot.idle();
                        self.save();
                    }
                    _ => {}
                }
            }
            LinkEvent::DeviceInfo(info) => {
                tracing::info!(
                    "DeskBike {} model {:?} firmware {:?}",
                    info.address,
                    info.model_number,
                    info.firmware_version
                );
                self.device_info = Some(info);
            }
            LinkEvent::Battery(level) => {
                tracing::debug!("Battery level: {}%", level);
                self.battery_percent = Some(level);
                self.snapshot.battery_percent = Some(level);
            }
            LinkEvent::Notification {
                payload,
                received_at,
            } => {
                let reading = match decode_reading(&payload, received_at) {
                    Ok(reading) => reading.with_battery(self.battery_percent),
                    Err(e) => {
                        tracing::warn!("Dropping CSC notification {:02x?}: {}", payload, e);
                        return;
                    }
                };

                self.snapshot = self.accumulator.update(&reading, &self.rider, now);
                if !self.snapshot.delta.is_zero() {
                    self.mark_dirty(now);
                }
                if self.snapshot.day_ended.is_some() {
                    self.mark_dirty(now);
                    self.save();
                }
            }
            LinkEvent::PresenceLost => {
                tracing::info!("Rider absent, zeroing live values");
                self.snapshot = self.snapshot.idle();
            }
        }

        self.publish_changes();
    }

    /// Handle a command from the host platform.
    pub fn handle_command(&mut self, command: BridgeCommand, now: DateTime<Local>) {
        tracing::info!("Handling command: {}", command);

        match command {
            BridgeCommand::Reconnect => match &self.link {
                Some(link) => {
                    if link.send(LinkCommand::Reconnect).is_err() {
                        tracing::warn!("BLE link is gone, cannot reconnect");
                    }
                }
                None => tracing::warn!("No BLE link to reconnect"),
            },
            BridgeCommand::ResetTotals => {
                self.accumulator.reset_totals();
                self.snapshot.total = self.accumulator.state().total;
                self.mark_dirty(now);
                self.save();
                self.publish_changes();
            }
            BridgeCommand::SetWeight(weight_kg) => match self.rider.with_weight(weight_kg) {
                Some(rider) => self.change_rider(rider),
                None => tracing::warn!("Ignoring out of range rider weight {} kg", weight_kg),
            },
            BridgeCommand::SetResistance(percent) => match self.rider.with_resistance(percent) {
                Some(rider) => self.change_rider(rider),
                None => tracing::warn!("Ignoring out of range resistance {}%", percent),
            },
        }
    }

    /// Apply and persist a rider change from the host.
    fn change_rider(&mut self, rider: RiderConfig) {
        self.set_rider(rider);

        if let Some(path) = &self.config_path {
            if let Err(e) = save_rider(&self.rider, path) {
                tracing::error!("Failed to save rider settings to {:?}: {}", path, e);
            }
        }

        self.publish_changes();
    }

    /// Periodic housekeeping: idle detection, day rollover, autosave.
    pub fn on_tick(&mut self, now: DateTime<Local>) {
        let idle_timeout = self.accumulator.settings().idle_timeout();
        let idle = self.snapshot.is_active
            && self
                .snapshot
                .last_active
                .is_none_or(|at| elapsed(at, now, idle_timeout));
        if idle {
            tracing::debug!("No pedalling for {:?}, zeroing live values", idle_timeout);
            self.snapshot = self.snapshot.idle();
        }

        if let Some(summary) = self.accumulator.check_and_roll(now) {
            self.snapshot.daily = self.accumulator.state().daily;
            self.snapshot.day_ended = Some(summary);
            self.mark_dirty(now);
            self.save();
        }

        if let Some(since) = self.dirty_since {
            if elapsed(since, now, self.autosave_interval) {
                self.save();
            }
        }

        self.publish_changes();
    }

    /// Save the state now.
    pub fn save(&mut self) {
        let Some(store) = &self.store else {
            self.dirty_since = None;
            return;
        };

        match store.save(self.accumulator.state()) {
            Ok(()) => self.dirty_since = None,
            Err(e) => tracing::error!("Failed to save state to {:?}: {}", store.path(), e),
        }
    }

    /// Final save and publisher shutdown.
    pub fn shutdown(&mut self) {
        tracing::info!("Shutting down coordinator");
        self.save();
        self.publisher.close();
    }

    fn mark_dirty(&mut self, now: DateTime<Local>) {
        if self.dirty_since.is_none() {
            self.dirty_since = Some(now);
        }
    }

    /// Publish every sensor whose payload differs from the last one sent.
    fn publish_changes(&mut self) {
        let updates = sensor_updates(
            &self.snapshot,
            self.device_info.as_ref(),
            self.connection,
            &self.rider,
        );

        for update in updates {
            let payload = update.value.render();
            if self.published.get(&update.key) == Some(&payload) {
                continue;
            }

            match self.publisher.publish(&update) {
                Ok(()) => {
                    self.published.insert(update.key, payload);
                }
                Err(e) => {
                    tracing::warn!("Failed to publish {}: {}", update.key, e);
                }
            }
        }
    }
}
