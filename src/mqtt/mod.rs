//! MQTT module - client, connector, and outbound publisher

mod client;
mod connector;
mod publisher;

pub use client::MqttClient;
pub use connector::{run_connector, ConnectorEvent, SessionSetup};
pub use publisher::run_publisher;
