//! Error types for thermostat-mqttd

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to MQTT operations
#[derive(Error, Debug)]
pub enum MqttError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),
}

/// Errors raised when an intent cannot be turned into an outbound command
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no device configured with id {0:?}")]
    UnknownDevice(String),

    #[error("outbound command channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
