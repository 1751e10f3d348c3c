//! Device registry and power state tracking
//!
//! The device set is fixed at startup from configuration; only the engine
//! task writes to the state store, everyone else gets snapshots.

use std::fmt;

use crate::config::DeviceConfig;

/// Last known power state of a switchable device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
    /// No report received yet (or since the last restart)
    Unknown,
}

impl PowerState {
    /// Parse a trimmed "ON"/"OFF" text, case-insensitive
    pub fn from_text(text: &str) -> Option<Self> {
        if text.eq_ignore_ascii_case("ON") {
            Some(PowerState::On)
        } else if text.eq_ignore_ascii_case("OFF") {
            Some(PowerState::Off)
        } else {
            None
        }
    }

    /// Wire payload for cmnd publishes
    pub fn command_payload(&self) -> &'static str {
        match self {
            PowerState::On => "ON",
            PowerState::Off => "OFF",
            PowerState::Unknown => "",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "ON"),
            PowerState::Off => write!(f, "OFF"),
            PowerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// A configured device with its topic layout
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub topic_base: String,
}

impl Device {
    /// Topic for relay commands: `cmnd/{base}/POWER1`
    pub fn power_command_topic(&self) -> String {
        format!("cmnd/{}/POWER1", self.topic_base)
    }

    /// Topic for requesting a state report: `cmnd/{base}/state`
    pub fn state_query_topic(&self) -> String {
        format!("cmnd/{}/state", self.topic_base)
    }

    /// Subscription filter for command results: `stat/{base}/#`
    pub fn stat_filter(&self) -> String {
        format!("stat/{}/#", self.topic_base)
    }

    /// Subscription filter for telemetry: `tele/{base}/#`
    pub fn tele_filter(&self) -> String {
        format!("tele/{}/#", self.topic_base)
    }
}

/// Fixed mapping of device id to device, in configuration order
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new(configs: &[DeviceConfig]) -> Self {
        Self {
            devices: configs
                .iter()
                .map(|c| Device {
                    id: c.id.clone(),
                    topic_base: c.topic_base.clone(),
                })
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Resolve the device whose topic base matches an inbound topic segment
    pub fn by_topic_base(&self, topic_base: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.topic_base == topic_base)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

/// One row of the display snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceView {
    pub id: String,
    pub state: PowerState,
}

/// In-memory mapping of device id to last known power state
///
/// Single source of truth for the display and for the thermostat policy.
/// Written only from the engine task.
#[derive(Debug)]
pub struct DeviceStateStore {
    entries: Vec<DeviceView>,
}

impl DeviceStateStore {
    /// Create a store with every configured device in Unknown state
    pub fn new(registry: &DeviceRegistry) -> Self {
        Self {
            entries: registry
                .iter()
                .map(|d| DeviceView {
                    id: d.id.clone(),
                    state: PowerState::Unknown,
                })
                .collect(),
        }
    }

    /// Record a reported state; returns whether it differs from the
    /// previous one (consumers redraw only on change)
    pub fn update(&mut self, device_id: &str, state: PowerState) -> bool {
        match self.entries.iter_mut().find(|e| e.id == device_id) {
            Some(entry) if entry.state != state => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, device_id: &str) -> PowerState {
        self.entries
            .iter()
            .find(|e| e.id == device_id)
            .map(|e| e.state)
            .unwrap_or(PowerState::Unknown)
    }

    /// Consistent snapshot in configuration order
    pub fn snapshot(&self) -> Vec<DeviceView> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(&[
            DeviceConfig {
                id: "esp32".into(),
                topic_base: "esp32".into(),
            },
            DeviceConfig {
                id: "sonoff1".into(),
                topic_base: "sonoff1".into(),
            },
        ])
    }

    #[test]
    fn test_power_state_from_text() {
        assert_eq!(PowerState::from_text("ON"), Some(PowerState::On));
        assert_eq!(PowerState::from_text("off"), Some(PowerState::Off));
        assert_eq!(PowerState::from_text("On"), Some(PowerState::On));
        assert_eq!(PowerState::from_text("toggle"), None);
        assert_eq!(PowerState::from_text(""), None);
    }

    #[test]
    fn test_device_topics() {
        let reg = registry();
        let dev = reg.get("sonoff1").unwrap();
        assert_eq!(dev.power_command_topic(), "cmnd/sonoff1/POWER1");
        assert_eq!(dev.state_query_topic(), "cmnd/sonoff1/state");
        assert_eq!(dev.stat_filter(), "stat/sonoff1/#");
        assert_eq!(dev.tele_filter(), "tele/sonoff1/#");
    }

    #[test]
    fn test_registry_lookup_by_topic_base() {
        let reg = DeviceRegistry::new(&[DeviceConfig {
            id: "relay".into(),
            topic_base: "garage".into(),
        }]);
        assert_eq!(reg.by_topic_base("garage").unwrap().id, "relay");
        assert!(reg.by_topic_base("relay").is_none());
    }

    #[test]
    fn test_store_starts_unknown() {
        let store = DeviceStateStore::new(&registry());
        assert_eq!(store.get("sonoff1"), PowerState::Unknown);
        assert_eq!(store.get("esp32"), PowerState::Unknown);
    }

    #[test]
    fn test_store_update_reports_change() {
        let mut store = DeviceStateStore::new(&registry());
        assert!(store.update("sonoff1", PowerState::On));
        assert_eq!(store.get("sonoff1"), PowerState::On);

        // Same state again is idempotent
        let before = store.snapshot();
        assert!(!store.update("sonoff1", PowerState::On));
        assert_eq!(store.snapshot(), before);

        assert!(store.update("sonoff1", PowerState::Off));
        assert_eq!(store.get("sonoff1"), PowerState::Off);
    }

    #[test]
    fn test_store_ignores_unknown_device() {
        let mut store = DeviceStateStore::new(&registry());
        assert!(!store.update("nope", PowerState::On));
        assert_eq!(store.get("nope"), PowerState::Unknown);
    }

    #[test]
    fn test_snapshot_preserves_config_order() {
        let mut store = DeviceStateStore::new(&registry());
        store.update("sonoff1", PowerState::On);
        let snap = store.snapshot();
        assert_eq!(snap[0].id, "esp32");
        assert_eq!(snap[1].id, "sonoff1");
        assert_eq!(snap[1].state, PowerState::On);
    }
}
