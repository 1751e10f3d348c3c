//! Automatic relay control policy
//!
//! Two-threshold, hysteresis-free thermostat: below the low threshold the
//! target relay is switched on, above the high threshold it is switched
//! off, and the dead band in between leaves it alone. Commands are
//! suppressed when the last reported state already matches, so repeated
//! readings on the same side of a threshold actuate at most once.
//!
//! The suppression input is the last *observed* state, which lags the true
//! device state until the next report arrives. A command and a
//! contradicting report can therefore race; the policy does not reconcile
//! that beyond not resending a matching command once the report lands.

use tracing::info;

use crate::config::ThermostatConfig;
use crate::device::PowerState;

/// Threshold policy for one target device
#[derive(Debug, Clone)]
pub struct ThermostatPolicy {
    target_device: String,
    low_threshold: f64,
    high_threshold: f64,
}

impl ThermostatPolicy {
    pub fn new(config: &ThermostatConfig) -> Self {
        Self {
            target_device: config.target_device.clone(),
            low_threshold: config.low_threshold,
            high_threshold: config.high_threshold,
        }
    }

    /// Device this policy drives
    pub fn target_device(&self) -> &str {
        &self.target_device
    }

    /// Decide the desired state for a new temperature reading
    ///
    /// `current` is the target device's last reported state. Returns the
    /// state to command, or `None` when no actuation is needed.
    pub fn evaluate(&self, temperature: f64, current: PowerState) -> Option<PowerState> {
        if temperature < self.low_threshold && current != PowerState::On {
            info!(
                "Temperature {}°C below {}°C, switching {} ON",
                temperature, self.low_threshold, self.target_device
            );
            Some(PowerState::On)
        } else if temperature > self.high_threshold && current != PowerState::Off {
            info!(
                "Temperature {}°C above {}°C, switching {} OFF",
                temperature, self.high_threshold, self.target_device
            );
            Some(PowerState::Off)
        } else {
            None
        }
    }
}
