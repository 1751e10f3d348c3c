//! Configuration module for thermostat-mqttd
//!
//! Parses environment variables into a strongly-typed configuration struct.

use std::env;
use std::path::PathBuf;

/// Main configuration struct containing all settings
#[derive(Debug, Clone)]
pub struct Config {
    /// MQTT broker configuration
    pub mqtt: MqttConfig,
    /// Topic carrying the raw temperature reading
    pub temperature_topic: String,
    /// Configured devices, in display order
    pub devices: Vec<DeviceConfig>,
    /// Automatic thermostat settings (absent = manual control only)
    pub thermostat: Option<ThermostatConfig>,
    /// Enable verbose logging
    pub debug: bool,
}

/// A single switchable device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Stable identifier used by configuration and the operator console
    pub id: String,
    /// Topic segment used to build stat/tele/cmnd topic names
    pub topic_base: String,
}

/// Thresholds for the automatic relay policy
#[derive(Debug, Clone)]
pub struct ThermostatConfig {
    /// Device driven by the policy; must be a configured device id
    pub target_device: String,
    /// Below this temperature the relay is switched on
    pub low_threshold: f64,
    /// Above this temperature the relay is switched off
    pub high_threshold: f64,
}

/// MQTT-specific configuration
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker hostname/IP
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Username (empty = anonymous)
    pub user: Option<String>,
    /// Password
    pub password: Option<String>,
    /// Prefix for the MQTT client ID
    pub client_id_prefix: String,
    /// TLS configuration
    pub tls: Option<TlsConfig>,
}

/// TLS configuration for MQTT
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// CA certificate file path (unset = bundled webpki roots)
    pub ca_file: Option<PathBuf>,
    /// CA certificate directory path
    pub ca_path: Option<PathBuf>,
}

/// Configuration error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mqtt_host =
            env::var("MQTT_HOST").map_err(|_| ConfigError::MissingRequired("MQTT_HOST"))?;
        let temperature_topic =
            env::var("TEMP_TOPIC").map_err(|_| ConfigError::MissingRequired("TEMP_TOPIC"))?;

        let devices_str =
            env::var("DEVICES").map_err(|_| ConfigError::MissingRequired("DEVICES"))?;
        let devices = parse_devices(&devices_str)?;

        let thermostat = match env::var("TARGET_DEVICE").ok().filter(|s| !s.is_empty()) {
            Some(target) => {
                if !devices.iter().any(|d| d.id == target) {
                    return Err(ConfigError::InvalidValue("TARGET_DEVICE", target));
                }
                let low = parse_f64("TEMP_LOW", 10.0)?;
                let high = parse_f64("TEMP_HIGH", 15.0)?;
                if low >= high {
                    return Err(ConfigError::InvalidValue(
                        "TEMP_LOW",
                        format!("{} (must be below TEMP_HIGH {})", low, high),
                    ));
                }
                Some(ThermostatConfig {
                    target_device: target,
                    low_threshold: low,
                    high_threshold: high,
                })
            }
            None => None,
        };

        // Broker requires an encrypted session unless explicitly disabled
        let tls = if parse_bool("MQTT_TLS", true) {
            Some(TlsConfig {
                ca_file: env::var("MQTT_CAFILE").ok().map(PathBuf::from),
                ca_path: env::var("MQTT_CAPATH").ok().map(PathBuf::from),
            })
        } else {
            None
        };

        Ok(Config {
            mqtt: MqttConfig {
                host: mqtt_host,
                port: parse_u16("MQTT_PORT", 8883)?,
                user: env::var("MQTT_USER").ok().filter(|s| !s.is_empty()),
                password: env::var("MQTT_PASSWORD").ok().filter(|s| !s.is_empty()),
                client_id_prefix: env::var("MQTT_CLIENT_ID_PREFIX")
                    .unwrap_or_else(|_| "thermostat".to_string()),
                tls,
            },
            temperature_topic,
            devices,
            thermostat,
            debug: parse_bool("DEBUG", false),
        })
    }

    /// Generate a unique client ID for this session
    pub fn client_id(&self) -> String {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let pid = std::process::id();
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        format!(
            "{}-{}-{}-{}",
            self.mqtt.client_id_prefix, hostname, pid, timestamp
        )
    }
}

/// Parse the DEVICES table
///
/// Format: comma-separated `id:topic_base` pairs. A bare `id` uses the id
/// itself as topic base, matching the common Tasmota setup where the device
/// name and its "Topic" setting are identical.
fn parse_devices(raw: &str) -> Result<Vec<DeviceConfig>, ConfigError> {
    let mut devices = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (id, topic_base) = match entry.split_once(':') {
            Some((id, base)) => (id.trim(), base.trim()),
            None => (entry, entry),
        };
        if id.is_empty() || topic_base.is_empty() {
            return Err(ConfigError::InvalidValue("DEVICES", entry.to_string()));
        }
        if devices.iter().any(|d: &DeviceConfig| d.id == id) {
            return Err(ConfigError::InvalidValue(
                "DEVICES",
                format!("duplicate device id {:?}", id),
            ));
        }
        devices.push(DeviceConfig {
            id: id.to_string(),
            topic_base: topic_base.to_string(),
        });
    }
    if devices.is_empty() {
        return Err(ConfigError::InvalidValue("DEVICES", raw.to_string()));
    }
    Ok(devices)
}

fn parse_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn parse_u16(name: &'static str, default: u16) -> Result<u16, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|_| ConfigError::InvalidValue(name, v)),
        _ => Ok(default),
    }
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|_| ConfigError::InvalidValue(name, v)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_devices_pairs() {
        let devices = parse_devices("esp32:esp32, sonoff1:garage-relay").unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "esp32");
        assert_eq!(devices[0].topic_base, "esp32");
        assert_eq!(devices[1].id, "sonoff1");
        assert_eq!(devices[1].topic_base, "garage-relay");
    }

    #[test]
    fn test_parse_devices_bare_id_uses_id_as_base() {
        let devices = parse_devices("sonoff1").unwrap();
        assert_eq!(devices[0].id, "sonoff1");
        assert_eq!(devices[0].topic_base, "sonoff1");
    }

    #[test]
    fn test_parse_devices_preserves_order() {
        let devices = parse_devices("b,a,c").unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_parse_devices_rejects_duplicates() {
        assert!(parse_devices("sonoff1,sonoff1:other").is_err());
    }

    #[test]
    fn test_parse_devices_rejects_empty() {
        assert!(parse_devices("").is_err());
        assert!(parse_devices(" , ,").is_err());
        assert!(parse_devices("sonoff1:").is_err());
    }
}
