//! Topic router for inbound messages
//!
//! Classifies a raw (topic, payload) pair into a temperature reading or a
//! device state report. Tasmota firmware reports power state in several
//! wire shapes (plain "ON"/"OFF" text, `{"POWER1":"ON"}` results, full
//! `tele/.../STATE` telemetry objects); all of them must be tolerated
//! without failing the pipeline, so every parse failure is a silent drop.

use std::sync::Arc;

use tracing::debug;

use crate::device::{DeviceRegistry, PowerState};

/// Tagged decode of a power payload, applied before any business logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPayload {
    TextOn,
    TextOff,
    StructuredPower(PowerState),
    Unrecognized,
}

/// A classified inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedEvent {
    /// Raw text from the temperature topic (not yet parsed as a number)
    Temperature(String),
    /// A device reported its relay state
    DeviceState {
        device_id: String,
        state: PowerState,
    },
}

/// Classifies inbound messages against the configured topic layout
pub struct Router {
    temperature_topic: String,
    registry: Arc<DeviceRegistry>,
}

impl Router {
    pub fn new(temperature_topic: impl Into<String>, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            temperature_topic: temperature_topic.into(),
            registry,
        }
    }

    /// Classify one inbound message; `None` means ignored
    pub fn route(&self, topic: &str, payload: &[u8]) -> Option<RoutedEvent> {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();

        // Temperature topic match is terminal
        if topic == self.temperature_topic {
            return Some(RoutedEvent::Temperature(text.to_string()));
        }

        // Only stat/{base}/... and tele/{base}/... carry device reports
        let mut parts = topic.split('/');
        let prefix = parts.next()?;
        let topic_base = parts.next()?;
        parts.next()?;
        if prefix != "stat" && prefix != "tele" {
            return None;
        }

        let device = self.registry.by_topic_base(topic_base)?;

        match decode_power_payload(text) {
            PowerPayload::TextOn => Some(RoutedEvent::DeviceState {
                device_id: device.id.clone(),
                state: PowerState::On,
            }),
            PowerPayload::TextOff => Some(RoutedEvent::DeviceState {
                device_id: device.id.clone(),
                state: PowerState::Off,
            }),
            PowerPayload::StructuredPower(state) => Some(RoutedEvent::DeviceState {
                device_id: device.id.clone(),
                state,
            }),
            PowerPayload::Unrecognized => {
                debug!("No power state in message on {}: {}", topic, text);
                None
            }
        }
    }
}

/// Decode a trimmed payload into its power-report shape
///
/// Plain "ON"/"OFF" text wins; otherwise a JSON object is checked for a
/// "POWER1" key, then "POWER" (first match wins). Anything else, including
/// malformed JSON, is Unrecognized — not an error.
pub fn decode_power_payload(text: &str) -> PowerPayload {
    match PowerState::from_text(text) {
        Some(PowerState::On) => return PowerPayload::TextOn,
        Some(PowerState::Off) => return PowerPayload::TextOff,
        _ => {}
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        return PowerPayload::Unrecognized;
    };
    for key in ["POWER1", "POWER"] {
        if let Some(field) = value.get(key) {
            return match field.as_str().and_then(PowerState::from_text) {
                Some(state) => PowerPayload::StructuredPower(state),
                None => PowerPayload::Unrecognized,
            };
        }
    }
    PowerPayload::Unrecognized
}
