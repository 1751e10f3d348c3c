//! thermostat-mqttd - supervisory MQTT client for Tasmota switches
//!
//! Tracks the power state of a static set of switchable devices, follows a
//! live temperature feed, lets an operator toggle devices from a console,
//! and drives one relay automatically with a two-threshold policy.

mod config;
mod device;
mod dispatch;
mod engine;
mod error;
mod mqtt;
mod policy;
mod router;
mod shell;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::device::DeviceRegistry;
use crate::engine::Engine;
use crate::error::Result;
use crate::mqtt::{run_connector, run_publisher, MqttClient, SessionSetup};
use crate::shell::{run_console, run_display};

#[tokio::main]
async fn main() {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if std::env::var("DEBUG")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
        {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    if config.debug {
        info!("Debug mode enabled");
    }

    let registry = Arc::new(DeviceRegistry::new(&config.devices));
    info!(
        "Supervising {} devices on {}:{}",
        registry.len(),
        config.mqtt.host,
        config.mqtt.port
    );

    // Create MQTT client
    let client_id = config.client_id();
    let (mqtt_client, eventloop) = MqttClient::new(&config.mqtt, &client_id)?;
    let mqtt_client = Arc::new(mqtt_client);

    // Topics to re-establish on every (re)connect
    let session = SessionSetup::for_devices(&config.temperature_topic, &registry);

    // Channel wiring: connector -> engine -> publisher
    let (event_tx, event_rx) = mpsc::channel(100);
    let (command_tx, command_rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();

    let (engine, handle) = Engine::new(&config, Arc::clone(&registry), event_rx, command_tx);

    let mut connector_task = tokio::spawn(run_connector(
        eventloop,
        mqtt_client.clone_client(),
        session,
        event_tx.clone(),
        shutdown.clone(),
    ));
    let engine_task = tokio::spawn(engine.run(shutdown.clone()));
    let publisher_task = tokio::spawn(run_publisher(
        Arc::clone(&mqtt_client),
        command_rx,
        event_tx,
        shutdown.clone(),
    ));
    tokio::spawn(run_display(handle.clone(), shutdown.clone()));
    tokio::spawn(run_console(handle, shutdown.clone()));

    info!("thermostat-mqttd started");

    // Wait for a task to die (which means something went wrong) or ctrl-c
    tokio::select! {
        _ = engine_task => {
            error!("Engine exited unexpectedly");
        }
        _ = &mut connector_task => {
            error!("Connector exited unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    // Graceful shutdown: queue the DISCONNECT first, then cancel; the
    // connector keeps polling until the packet reaches the broker, so wait
    // for it before letting the runtime drop
    mqtt_client.disconnect().await;
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(3), connector_task).await;
    let _ = tokio::time::timeout(Duration::from_secs(2), publisher_task).await;

    Ok(())
}
