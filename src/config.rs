// Node Configuration Module
// Fixed timing, topic and pin constants for the sensor node, with build-time overrides

// Import logging macros for debug output
use log::{info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

// Import Embassy time type used by every component delay
use embassy_time::Duration;

// Telemetry and reconnection timing
pub const PUBLISH_INTERVAL_MS: u64 = 10_000; // Minimum spacing between telemetry publishes
pub const BROKER_BACKOFF_MS: u64 = 10_000; // Wait after a failed broker connect
pub const WIFI_POLL_MS: u64 = 500; // Link status poll while associating
pub const PUBLISH_THROTTLE_MS: u64 = 200; // Pause after each publish
pub const LOOP_PAUSE_MS: u64 = 10; // Yield between main loop iterations so the idle task runs

// Status indicator timing
pub const BUTTON_POLL_MS: u64 = 50; // Button sampling and fast toggle cadence while held
pub const RESET_HOLD_MS: u64 = 2_000; // Hold duration that triggers a factory reset
pub const BLINK_ACTIVE_MS: u64 = 30;
pub const BLINK_BROKER_MS: u64 = 500;
pub const BLINK_WIFI_MS: u64 = 1_000;
pub const BLINK_PAIRING_MS: u64 = 2_000;
pub const STEADY_REFRESH_MS: u64 = 100; // Re-render period for solid and dark states

// Broker identity and topics
pub const BROKER_CLIENT_ID: &str = "aeroEsp";
pub const INBOUND_TOPIC: &str = "aeroEsp/in";
pub const OUTBOUND_TOPIC: &str = "aeroEsp/out";

// Pairing link and storage
pub const PAIRING_DEVICE_NAME: &str = "AeroESP";
pub const STORAGE_NAMESPACE: &str = "credentials";

/// Runtime configuration shared by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub publish_interval: Duration,
    pub broker_backoff: Duration,
    pub wifi_poll: Duration,
    pub publish_throttle: Duration,
    pub loop_pause: Duration,
    pub button_poll: Duration,
    pub reset_hold: Duration,
    pub client_id: String,
    pub inbound_topic: String,
    pub outbound_topic: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            publish_interval: Duration::from_millis(PUBLISH_INTERVAL_MS),
            broker_backoff: Duration::from_millis(BROKER_BACKOFF_MS),
            wifi_poll: Duration::from_millis(WIFI_POLL_MS),
            publish_throttle: Duration::from_millis(PUBLISH_THROTTLE_MS),
            loop_pause: Duration::from_millis(LOOP_PAUSE_MS),
            button_poll: Duration::from_millis(BUTTON_POLL_MS),
            reset_hold: Duration::from_millis(RESET_HOLD_MS),
            client_id: BROKER_CLIENT_ID.to_string(),
            inbound_topic: INBOUND_TOPIC.to_string(),
            outbound_topic: OUTBOUND_TOPIC.to_string(),
        }
    }
}

impl NodeConfig {
    /// Defaults, overridden by `AERO_*` variables captured at compile time.
    pub fn from_build_env() -> Self {
        let mut config = Self::default();

        override_millis(
            &mut config.publish_interval,
            "AERO_PUBLISH_INTERVAL_MS",
            option_env!("AERO_PUBLISH_INTERVAL_MS"),
        );
        override_millis(
            &mut config.broker_backoff,
            "AERO_BROKER_BACKOFF_MS",
            option_env!("AERO_BROKER_BACKOFF_MS"),
        );
        override_millis(
            &mut config.reset_hold,
            "AERO_RESET_HOLD_MS",
            option_env!("AERO_RESET_HOLD_MS"),
        );
        if let Some(topic) = option_env!("AERO_OUTBOUND_TOPIC") {
            config.outbound_topic = topic.to_string();
        }
        if let Some(topic) = option_env!("AERO_INBOUND_TOPIC") {
            config.inbound_topic = topic.to_string();
        }

        config
    }

    /// Number of button polls the reset counter must exceed.
    pub fn reset_hold_ticks(&self) -> u32 {
        let poll = self.button_poll.as_millis().max(1);
        (self.reset_hold.as_millis() / poll) as u32
    }

    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("publish_interval", self.publish_interval),
            ("broker_backoff", self.broker_backoff),
            ("wifi_poll", self.wifi_poll),
            ("button_poll", self.button_poll),
        ];
        for (name, value) in intervals {
            if value.as_millis() == 0 {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }

        if self.reset_hold_ticks() == 0 {
            return Err(anyhow!("reset_hold must be at least one button poll"));
        }

        if self.client_id.is_empty() {
            return Err(anyhow!("Broker client id cannot be empty"));
        }
        if self.inbound_topic.is_empty() || self.outbound_topic.is_empty() {
            return Err(anyhow!("Broker topics cannot be empty"));
        }

        info!(
            "⚙️ Config: publish every {}ms, broker backoff {}ms, reset hold {} ticks",
            self.publish_interval.as_millis(),
            self.broker_backoff.as_millis(),
            self.reset_hold_ticks()
        );
        Ok(())
    }
}

fn override_millis(target: &mut Duration, name: &str, raw: Option<&str>) {
    let Some(raw) = raw else {
        return;
    };

    match raw.trim().parse::<u64>() {
        Ok(ms) => *target = Duration::from_millis(ms),
        Err(e) => warn!("⚠️ Ignoring {}='{}': {}", name, raw, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_firmware_constants() {
        let config = NodeConfig::default();
        assert_eq!(config.publish_interval.as_millis(), 10_000);
        assert_eq!(config.outbound_topic, "aeroEsp/out");
        assert_eq!(config.inbound_topic, "aeroEsp/in");
        assert_eq!(config.reset_hold_ticks(), 40);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_intervals_and_empty_topics() {
        let mut config = NodeConfig::default();
        config.broker_backoff = Duration::from_millis(0);
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.outbound_topic.clear();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.reset_hold = Duration::from_millis(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn override_keeps_default_on_garbage() {
        let mut value = Duration::from_millis(7);
        override_millis(&mut value, "TEST", Some("soon"));
        assert_eq!(value.as_millis(), 7);

        override_millis(&mut value, "TEST", Some(" 250 "));
        assert_eq!(value.as_millis(), 250);
    }
}
