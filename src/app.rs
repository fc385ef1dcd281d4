//! Application wiring.
//!
//! The BLE link and the MQTT event loop run on the tokio runtime. Their events
//! reach the coordinator thread over crossbeam channels; the coordinator is the
//! only owner of the ride state.

use anyhow::{anyhow, Context};
use chrono::Local;
use crossbeam::channel::{self, Receiver};
use deskbike::metrics::calories::CalorieModel;
use deskbike::publish::{BridgeCommand, LogPublisher, MqttPublisher, SensorPublisher};
use deskbike::sensors::types::{LinkCommand, LinkEvent};
use deskbike::storage::config::{get_config_path, load_config_from};
use deskbike::storage::state_store::StateStore;
use deskbike::{DeskBikeLink, RideCoordinator, RideMetricsAccumulator};
use std::time::Duration;

/// Coordinator housekeeping interval.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Load configuration and state, start all tasks, and run until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let config_path = get_config_path();
    let config = load_config_from(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let rider = config.rider.to_rider_config();
    let store = StateStore::new(config.storage.state_path());
    let state = store
        .load()
        .context("Failed to load ride state")?
        .unwrap_or_default();
    let accumulator = RideMetricsAccumulator::from_state(state, config.accumulator);

    let (event_tx, event_rx) = channel::unbounded::<LinkEvent>();
    let (command_tx, command_rx) = channel::unbounded::<BridgeCommand>();
    let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
    let (link_tx, link_rx) = tokio::sync::mpsc::unbounded_channel::<LinkCommand>();

    let publisher: Box<dyn SensorPublisher> = if config.mqtt.enabled {
        let (publisher, eventloop) = MqttPublisher::connect(config.mqtt.clone());
        tokio::spawn(eventloop.run(command_tx.clone()));
        Box::new(publisher)
    } else {
        tracing::info!("MQTT disabled, publishing sensors to the log");
        tracing::warn!(
            "Commands and rider changes need MQTT; edit {:?} and restart to change the rider",
            config_path
        );
        Box::new(LogPublisher)
    };

    let mut link = DeskBikeLink::new(config.device.clone(), event_tx);
    link.initialize()
        .await
        .context("Failed to initialize Bluetooth")?;
    let link_task = tokio::spawn(link.run(link_rx));

    let coordinator = RideCoordinator::new(accumulator, rider, publisher)
        .with_store(
            store,
            Duration::from_secs(config.storage.autosave_interval_secs),
        )
        .with_link(link_tx.clone())
        .with_config_file(config_path);

    let worker = std::thread::Builder::new()
        .name("coordinator".to_string())
        .spawn(move || run_coordinator(coordinator, event_rx, command_rx, shutdown_rx))
        .context("Failed to start coordinator thread")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    if link_tx.send(LinkCommand::Shutdown).is_ok() {
        if let Err(e) = link_task.await {
            tracing::warn!("BLE link task ended abnormally: {}", e);
        }
    }

    // Coordinator may already be gone if the link channel closed first
    let _ = shutdown_tx.send(());

    worker
        .join()
        .map_err(|_| anyhow!("Coordinator thread panicked"))?;

    tracing::info!("DeskBike Bridge stopped");
    Ok(())
}

/// Coordinator thread: the single consumer of link events and commands.
fn run_coordinator<P: SensorPublisher, C: CalorieModel>(
    mut coordinator: RideCoordinator<P, C>,
    events: Receiver<LinkEvent>,
    commands: Receiver<BridgeCommand>,
    shutdown: Receiver<()>,
) {
    let ticker = channel::tick(TICK_INTERVAL);
    coordinator.start(Local::now());

    loop {
        channel::select! {
            recv(events) -> event => match event {
                Ok(event) => coordinator.handle_link_event(event, Local::now()),
                Err(_) => break,
            },
            recv(commands) -> command => match command {
                Ok(command) => coordinator.handle_command(command, Local::now()),
                Err(_) => break,
            },
            recv(ticker) -> _ => coordinator.on_tick(Local::now()),
            recv(shutdown) -> _ => break,
        }
    }

    // Events sent while the link shut down
    while let Ok(event) = events.try_recv() {
        coordinator.handle_link_event(event, Local::now());
    }

    coordinator.shutdown();
}
