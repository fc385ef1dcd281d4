//! BLE link to the DeskBike.
//!
//! Finds the device, reads its information and battery characteristics,
//! subscribes to CSC measurements and forwards everything as [`LinkEvent`]s.
//! Reconnects on its own every retry interval, immediately on
//! [`LinkCommand::Reconnect`], and drops the connection when the device goes
//! quiet for longer than the presence timeout.

use crate::sensors::csc::{
    decode_battery_level, decode_info_string, BATTERY_LEVEL_UUID, CSC_MEASUREMENT_UUID,
    CSC_SERVICE_UUID, DEVICE_NAME_UUID, FIRMWARE_REVISION_UUID, HARDWARE_REVISION_UUID,
    MODEL_NUMBER_UUID, SERIAL_NUMBER_UUID, SOFTWARE_REVISION_UUID,
};
use crate::sensors::types::{ConnectionState, DeviceInfo, LinkCommand, LinkConfig, LinkEvent, SensorError};
use btleplug::api::{CharPropFlags, Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use chrono::Local;
use crossbeam::channel::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How often the run loop checks liveness and presence.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Poll interval while waiting for the device to show up in a scan.
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound on a graceful disconnect.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns the BLE connection to one DeskBike.
pub struct DeskBikeLink {
    /// Configuration
    config: LinkConfig,
    /// BLE adapter
    adapter: Option<Adapter>,
    /// Channel for link events
    event_tx: Sender<LinkEvent>,
    /// Connected peripheral
    peripheral: Option<Peripheral>,
    /// Notification forwarding task
    notification_task: Option<JoinHandle<()>>,
    /// When the last CSC notification arrived
    last_notification: Arc<Mutex<Instant>>,
    /// Current connection state
    state: ConnectionState,
}

impl DeskBikeLink {
    /// Create a link that reports to `event_tx`.
    pub fn new(config: LinkConfig, event_tx: Sender<LinkEvent>) -> Self {
        Self {
            config,
            adapter: None,
            event_tx,
            peripheral: None,
            notification_task: None,
            last_notification: Arc::new(Mutex::new(Instant::now())),
            state: ConnectionState::Disconnected,
        }
    }

    /// Initialize the BLE adapter.
    ///
    /// This must be called before [`run`](Self::run).
    pub async fn initialize(&mut self) -> Result<(), SensorError> {
        tracing::info!("Initializing BLE link");

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(SensorError::AdapterNotFound)?;

        tracing::info!("BLE adapter initialized");
        self.adapter = Some(adapter);

        Ok(())
    }

    fn send_event(&self, event: LinkEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::debug!("Link event dropped, receiver gone");
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.send_event(LinkEvent::ConnectionChanged(state));
        }
    }

    /// Drive the link until shutdown.
    pub async fn run(mut self, mut commands: UnboundedReceiver<LinkCommand>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        let mut last_attempt: Option<Instant> = None;
        let mut force_attempt = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(LinkCommand::Reconnect) => {
                        tracing::info!("Reconnect requested");
                        self.disconnect().await;
                        force_attempt = true;
                    }
                    Some(LinkCommand::Shutdown) | None => {
                        self.disconnect().await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if self.state.is_connected() {
                        self.check_connection().await;
                    }
                }
            }

            if self.state.is_connected() {
                continue;
            }

            let due = force_attempt
                || last_attempt.is_none_or(|at| at.elapsed() >= self.config.retry_interval());
            if !due {
                continue;
            }

            if last_attempt.is_some() {
                self.set_state(ConnectionState::Reconnecting);
            }
            force_attempt = false;
            last_attempt = Some(Instant::now());

            if let Err(e) = self.connect().await {
                tracing::debug!("Connection attempt failed: {}", e);
                self.release().await;
                self.set_state(ConnectionState::Disconnected);
            }
        }

        tracing::info!("BLE link stopped");
    }

    /// Find the device and connect to it.
    pub async fn connect(&mut self) -> Result<(), SensorError> {
        if self.state != ConnectionState::Reconnecting {
            self.set_state(ConnectionState::Connecting);
        }

        let peripheral = self.find_peripheral().await?;
        let address = peripheral.address().to_string();
        tracing::info!("Connecting to DeskBike {}", address);

        tokio::time::timeout(self.config.connection_timeout(), peripheral.connect())
            .await
            .map_err(|_| SensorError::ConnectionTimeout)?
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        self.peripheral = Some(peripheral.clone());

        peripheral
            .discover_services()
            .await
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        let info = self.read_device_info(&peripheral).await;
        self.send_event(LinkEvent::DeviceInfo(info));

        if let Some(level) = self
            .read_characteristic(&peripheral, BATTERY_LEVEL_UUID)
            .await
            .and_then(|value| decode_battery_level(&value))
        {
            self.send_event(LinkEvent::Battery(level));
        }

        self.subscribe(&peripheral).await?;

        *self.last_notification.lock().await = Instant::now();
        let event_tx = self.event_tx.clone();
        let last_notification = self.last_notification.clone();
        self.notification_task = Some(tokio::spawn(async move {
            Self::forward_notifications(peripheral, event_tx, last_notification).await;
        }));

        self.set_state(ConnectionState::Connected);
        tracing::info!("Connected to DeskBike {}", address);

        Ok(())
    }

    /// Scan until the configured device shows up or the timeout passes.
    async fn find_peripheral(&self) -> Result<Peripheral, SensorError> {
        let adapter = self.adapter.as_ref().ok_or(SensorError::AdapterNotFound)?;

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| SensorError::ScanFailed(e.to_string()))?;

        let deadline = Instant::now() + self.config.connection_timeout();
        let found = loop {
            if let Some(peripheral) = self.match_peripheral(adapter).await? {
                break Some(peripheral);
            }
            if Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        };

        if let Err(e) = adapter.stop_scan().await {
            tracing::debug!("Error stopping scan: {}", e);
        }

        found.ok_or_else(|| {
            SensorError::DeviceNotFound(
                self.config
                    .address
                    .clone()
                    .unwrap_or_else(|| self.config.name.clone()),
            )
        })
    }

    async fn match_peripheral(&self, adapter: &Adapter) -> Result<Option<Peripheral>, SensorError> {
        for peripheral in adapter.peripherals().await? {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };

            let address = properties.address.to_string();
            if self.config.matches(&address, properties.local_name.as_deref()) {
                return Ok(Some(peripheral));
            }
        }

        Ok(None)
    }

    /// Subscribe to CSC measurements, and to battery level when it notifies.
    async fn subscribe(&self, peripheral: &Peripheral) -> Result<(), SensorError> {
        if !peripheral.services().iter().any(|s| s.uuid == CSC_SERVICE_UUID) {
            return Err(SensorError::Unsupported);
        }

        let characteristics = peripheral.characteristics();

        let measurement = characteristics
            .iter()
            .find(|c| c.uuid == CSC_MEASUREMENT_UUID)
            .ok_or(SensorError::Unsupported)?;

        peripheral
            .subscribe(measurement)
            .await
            .map_err(|e| SensorError::SubscriptionFailed(e.to_string()))?;
        tracing::debug!("Subscribed to characteristic: {}", CSC_MEASUREMENT_UUID);

        if let Some(battery) = characteristics
            .iter()
            .find(|c| c.uuid == BATTERY_LEVEL_UUID && c.properties.contains(CharPropFlags::NOTIFY))
        {
            if let Err(e) = peripheral.subscribe(battery).await {
                tracing::debug!("Battery notifications unavailable: {}", e);
            }
        }

        Ok(())
    }

    /// Forward notifications until the stream ends.
    async fn forward_notifications(
        peripheral: Peripheral,
        event_tx: Sender<LinkEvent>,
        last_notification: Arc<Mutex<Instant>>,
    ) {
        use futures::stream::StreamExt;

        let mut notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to get notification stream: {}", e);
                return;
            }
        };

        while let Some(notification) = notifications.next().await {
            let event = if notification.uuid == CSC_MEASUREMENT_UUID {
                *last_notification.lock().await = Instant::now();
                Some(LinkEvent::Notification {
                    payload: notification.value,
                    received_at: Local::now(),
                })
            } else if notification.uuid == BATTERY_LEVEL_UUID {
                decode_battery_level(&notification.value).map(LinkEvent::Battery)
            } else {
                None
            };

            if let Some(event) = event {
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        }

        tracing::debug!("Notification stream ended");
    }

    /// Detect dropped connections and an absent rider.
    async fn check_connection(&mut self) {
        let stream_ended = self
            .notification_task
            .as_ref()
            .is_none_or(|task| task.is_finished());

        let connected = match &self.peripheral {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        };

        if stream_ended || !connected {
            tracing::info!("DeskBike disconnected");
            self.disconnect().await;
            return;
        }

        let silent_for = self.last_notification.lock().await.elapsed();
        if silent_for >= self.config.presence_timeout() {
            tracing::info!(
                "No data from DeskBike for {} s, dropping connection",
                silent_for.as_secs()
            );
            self.send_event(LinkEvent::PresenceLost);
            self.disconnect().await;
        }
    }

    async fn read_device_info(&self, peripheral: &Peripheral) -> DeviceInfo {
        DeviceInfo {
            address: peripheral.address().to_string(),
            name: self.read_string(peripheral, DEVICE_NAME_UUID).await,
            model_number: self.read_string(peripheral, MODEL_NUMBER_UUID).await,
            serial_number: self.read_string(peripheral, SERIAL_NUMBER_UUID).await,
            firmware_version: self.read_string(peripheral, FIRMWARE_REVISION_UUID).await,
            hardware_version: self.read_string(peripheral, HARDWARE_REVISION_UUID).await,
            software_version: self.read_string(peripheral, SOFTWARE_REVISION_UUID).await,
        }
    }

    async fn read_string(&self, peripheral: &Peripheral, uuid: Uuid) -> Option<String> {
        self.read_characteristic(peripheral, uuid)
            .await
            .map(|value| decode_info_string(&value))
            .filter(|value| !value.is_empty())
    }

    async fn read_characteristic(&self, peripheral: &Peripheral, uuid: Uuid) -> Option<Vec<u8>> {
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)?;

        match tokio::time::timeout(self.config.read_timeout(), peripheral.read(&characteristic)).await
        {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::debug!("Error reading characteristic {}: {}", uuid, e);
                None
            }
            Err(_) => {
                tracing::debug!("Timed out reading characteristic {}", uuid);
                None
            }
        }
    }

    /// Tear down the connection and report it.
    pub async fn disconnect(&mut self) {
        self.release().await;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Tear down the connection without reporting.
    async fn release(&mut self) {
        if let Some(task) = self.notification_task.take() {
            task.abort();
        }

        if let Some(peripheral) = self.peripheral.take() {
            match tokio::time::timeout(DISCONNECT_TIMEOUT, peripheral.disconnect()).await {
                Ok(Ok(())) => tracing::debug!("Disconnected from DeskBike"),
                Ok(Err(e)) => tracing::debug!("Error disconnecting: {}", e),
                Err(_) => tracing::debug!("Timed out disconnecting"),
            }
        }
    }
}
