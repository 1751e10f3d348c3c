//! State synchronization and control engine
//!
//! A single task owns every piece of mutable state: the device state
//! store, the last temperature reading, and the connection status. The
//! connector and the operator console only talk to it through channels,
//! and readers get snapshots through watch channels, so nothing ever
//! observes a partial update.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::device::{DeviceRegistry, DeviceStateStore, DeviceView, PowerState};
use crate::dispatch::{ControlIntent, Dispatcher, IntentOrigin, WireCommand};
use crate::mqtt::ConnectorEvent;
use crate::policy::ThermostatPolicy;
use crate::router::{RoutedEvent, Router};

/// Broker session lifecycle, as observed by the rest of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Reconnecting,
}

/// Connection state plus a human-readable status line for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub detail: String,
}

impl ConnectionStatus {
    fn new(state: ConnectionState, detail: impl Into<String>) -> Self {
        Self {
            state,
            detail: detail.into(),
        }
    }
}

/// Most recent temperature message
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureReading {
    /// Raw payload text, shown verbatim
    pub raw: String,
    /// Parsed value, when the text is numeric
    pub value: Option<f64>,
}

/// Read/command surface handed to the presentation layer
///
/// Watch receivers give consistent snapshots; intents are the only way to
/// influence engine state.
#[derive(Clone)]
pub struct EngineHandle {
    intent_tx: mpsc::Sender<ControlIntent>,
    pub connection: watch::Receiver<ConnectionStatus>,
    pub temperature: watch::Receiver<Option<TemperatureReading>>,
    pub devices: watch::Receiver<Vec<DeviceView>>,
}

impl EngineHandle {
    /// Queue a manual power command; returns false if the engine is gone
    pub async fn set_power(&self, device_id: &str, desired: PowerState) -> bool {
        self.intent_tx
            .send(ControlIntent {
                device_id: device_id.to_string(),
                desired,
                origin: IntentOrigin::Manual,
            })
            .await
            .is_ok()
    }
}

/// The message-driven core of the daemon
pub struct Engine {
    router: Router,
    store: DeviceStateStore,
    policy: Option<ThermostatPolicy>,
    dispatcher: Dispatcher,
    event_rx: mpsc::Receiver<ConnectorEvent>,
    intent_rx: mpsc::Receiver<ControlIntent>,
    intents_closed: bool,
    connection_tx: watch::Sender<ConnectionStatus>,
    temperature_tx: watch::Sender<Option<TemperatureReading>>,
    devices_tx: watch::Sender<Vec<DeviceView>>,
}

impl Engine {
    pub fn new(
        config: &Config,
        registry: Arc<DeviceRegistry>,
        event_rx: mpsc::Receiver<ConnectorEvent>,
        command_tx: mpsc::Sender<WireCommand>,
    ) -> (Self, EngineHandle) {
        let store = DeviceStateStore::new(&registry);
        let policy = config.thermostat.as_ref().map(ThermostatPolicy::new);
        if let Some(p) = &policy {
            info!("Automatic control enabled for {}", p.target_device());
        }

        let (intent_tx, intent_rx) = mpsc::channel(16);
        let (connection_tx, connection_rx) = watch::channel(ConnectionStatus::new(
            ConnectionState::Disconnected,
            "Disconnected",
        ));
        let (temperature_tx, temperature_rx) = watch::channel(None);
        let (devices_tx, devices_rx) = watch::channel(store.snapshot());

        let engine = Self {
            router: Router::new(config.temperature_topic.clone(), Arc::clone(&registry)),
            store,
            policy,
            dispatcher: Dispatcher::new(registry, command_tx),
            event_rx,
            intent_rx,
            intents_closed: false,
            connection_tx,
            temperature_tx,
            devices_tx,
        };
        let handle = EngineHandle {
            intent_tx,
            connection: connection_rx,
            temperature: temperature_rx,
            devices: devices_rx,
        };
        (engine, handle)
    }

    /// Process events and intents until shutdown
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Engine shutting down");
                    return;
                }
                event = self.event_rx.recv() => match event {
                    Some(event) => self.apply_event(event).await,
                    None => {
                        warn!("Connector event channel closed");
                        return;
                    }
                },
                intent = self.intent_rx.recv(), if !self.intents_closed => match intent {
                    Some(intent) => self.dispatch(intent).await,
                    None => self.intents_closed = true,
                },
            }
        }
    }

    async fn apply_event(&mut self, event: ConnectorEvent) {
        match event {
            ConnectorEvent::Connected => {
                self.connection_tx.send_replace(ConnectionStatus::new(
                    ConnectionState::Connected,
                    "Connected",
                ));
            }
            ConnectorEvent::Disconnected => {
                self.connection_tx.send_replace(ConnectionStatus::new(
                    ConnectionState::Disconnected,
                    "Disconnected",
                ));
            }
            ConnectorEvent::Reconnecting(detail) => {
                self.connection_tx.send_replace(ConnectionStatus::new(
                    ConnectionState::Reconnecting,
                    detail,
                ));
            }
            ConnectorEvent::PublishFailed(detail) => {
                warn!("Publish failed: {}", detail);
                self.set_status_detail(format!("Publish failed: {}", detail));
            }
            ConnectorEvent::Message { topic, payload } => {
                match self.router.route(&topic, &payload) {
                    Some(RoutedEvent::Temperature(raw)) => self.apply_temperature(raw).await,
                    Some(RoutedEvent::DeviceState { device_id, state }) => {
                        self.apply_device_state(&device_id, state);
                    }
                    None => {}
                }
            }
        }
    }

    /// Update the displayed reading, then let the policy look at it
    async fn apply_temperature(&mut self, raw: String) {
        let value = raw.parse::<f64>().ok();
        if value.is_none() {
            warn!("Invalid temperature value received: {:?}", raw);
        }
        self.temperature_tx
            .send_replace(Some(TemperatureReading {
                raw,
                value,
            }));

        let (Some(value), Some(policy)) = (value, &self.policy) else {
            return;
        };
        // Suppression is based on the last *reported* state, which may lag
        // the device until its next report arrives
        let target = policy.target_device().to_string();
        let desired = policy.evaluate(value, self.store.get(&target));
        if let Some(desired) = desired {
            self.dispatch(ControlIntent {
                device_id: target,
                desired,
                origin: IntentOrigin::Automatic,
            })
            .await;
        }
    }

    fn apply_device_state(&mut self, device_id: &str, state: PowerState) {
        if self.store.update(device_id, state) {
            info!("Device {} is now {}", device_id, state);
            self.devices_tx.send_replace(self.store.snapshot());
        } else {
            debug!("Device {} unchanged ({})", device_id, state);
        }
    }

    async fn dispatch(&mut self, intent: ControlIntent) {
        if let Err(e) = self.dispatcher.dispatch(&intent).await {
            error!("Dropping {:?} command for {}: {}", intent.origin, intent.device_id, e);
            self.set_status_detail(format!("Publish failed: {}", e));
        }
    }

    /// Replace the status line text; connection state is untouched
    fn set_status_detail(&self, detail: String) {
        let state = self.connection_tx.borrow().state;
        self.connection_tx
            .send_replace(ConnectionStatus::new(state, detail));
    }
}
