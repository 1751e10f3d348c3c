//! Command dispatcher
//!
//! Translates a control intent (manual or automatic) into an outbound
//! publish on the device's command topic. Both origins share this single
//! path, so actuation is logged and shaped in exactly one place.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::device::{DeviceRegistry, PowerState};
use crate::error::DispatchError;

/// Where a control intent came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOrigin {
    Manual,
    Automatic,
}

/// A request to change a device's power state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlIntent {
    pub device_id: String,
    pub desired: PowerState,
    pub origin: IntentOrigin,
}

/// A fully resolved outbound publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireCommand {
    pub topic: String,
    pub payload: String,
}

/// Turns intents into wire commands for the outbound publisher task
pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    command_tx: mpsc::Sender<WireCommand>,
}

impl Dispatcher {
    pub fn new(registry: Arc<DeviceRegistry>, command_tx: mpsc::Sender<WireCommand>) -> Self {
        Self {
            registry,
            command_tx,
        }
    }

    /// Resolve and enqueue one intent
    ///
    /// Fire-and-forget: no acknowledgement is awaited and nothing is
    /// retried. An unknown device id is a configuration error and a no-op.
    pub async fn dispatch(&self, intent: &ControlIntent) -> Result<(), DispatchError> {
        let device = self
            .registry
            .get(&intent.device_id)
            .ok_or_else(|| DispatchError::UnknownDevice(intent.device_id.clone()))?;

        let command = WireCommand {
            topic: device.power_command_topic(),
            payload: intent.desired.command_payload().to_string(),
        };

        info!(
            "Dispatching {:?} command: {} -> {}",
            intent.origin, command.payload, command.topic
        );

        self.command_tx
            .send(command)
            .await
            .map_err(|_| DispatchError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn registry() -> Arc<DeviceRegistry> {
        Arc::new(DeviceRegistry::new(&[DeviceConfig {
            id: "sonoff1".into(),
            topic_base: "sonoff1".into(),
        }]))
    }

    #[tokio::test]
    async fn test_dispatch_builds_power_command() {
        let (tx, mut rx) = mpsc::channel(4);
        let dispatcher = Dispatcher::new(registry(), tx);

        dispatcher
            .dispatch(&ControlIntent {
                device_id: "sonoff1".into(),
                desired: PowerState::On,
                origin: IntentOrigin::Manual,
            })
            .await
            .unwrap();

        let cmd = rx.recv().await.unwrap();
        assert_eq!(cmd.topic, "cmnd/sonoff1/POWER1");
        assert_eq!(cmd.payload, "ON");
    }

    #[tokio::test]
    async fn test_manual_and_automatic_share_one_path() {
        let (tx, mut rx) = mpsc::channel(4);
        let dispatcher = Dispatcher::new(registry(), tx);

        for origin in [IntentOrigin::Manual, IntentOrigin::Automatic] {
            dispatcher
                .dispatch(&ControlIntent {
                    device_id: "sonoff1".into(),
                    desired: PowerState::Off,
                    origin,
                })
                .await
                .unwrap();
        }

        assert_eq!(rx.recv().await.unwrap().payload, "OFF");
        assert_eq!(rx.recv().await.unwrap().payload, "OFF");
    }

    #[tokio::test]
    async fn test_unknown_device_is_rejected() {
        let (tx, _rx) = mpsc::channel(4);
        let dispatcher = Dispatcher::new(registry(), tx);

        let err = dispatcher
            .dispatch(&ControlIntent {
                device_id: "nope".into(),
                desired: PowerState::On,
                origin: IntentOrigin::Manual,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownDevice(_)));
    }
}
