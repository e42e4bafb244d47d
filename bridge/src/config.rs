//! Bridge configuration, read once from the environment at startup.

use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 9443;
const DEFAULT_FLUSH_DELAY_MS: u64 = 100;
const DEFAULT_LOW_PRIORITY_CAP: usize = 10;
const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Runtime settings for one bridge instance.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    /// Delay between queueing the first event and flushing the batch.
    pub flush_delay: Duration,
    /// Maximum low-priority events drained per flush.
    pub low_priority_cap: usize,
    /// Interval between liveness sweeps.
    pub heartbeat_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            flush_delay: Duration::from_millis(DEFAULT_FLUSH_DELAY_MS),
            low_priority_cap: DEFAULT_LOW_PRIORITY_CAP,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
        }
    }
}

impl BridgeConfig {
    /// Build a config from `BRIDGE_*` environment variables, falling back
    /// to defaults (and logging) on missing or unparseable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("BRIDGE_HOST").unwrap_or(defaults.host),
            port: env_parse("BRIDGE_PORT", defaults.port),
            flush_delay: Duration::from_millis(env_parse(
                "BRIDGE_FLUSH_MS",
                defaults.flush_delay.as_millis() as u64,
            )),
            low_priority_cap: env_parse("BRIDGE_LOW_PRIORITY_CAP", defaults.low_priority_cap),
            heartbeat_interval: Duration::from_secs(env_parse(
                "BRIDGE_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Ignoring unparseable {}={:?}", name, raw);
                fallback
            }
        },
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.port, 9443);
        assert_eq!(config.flush_delay, Duration::from_millis(100));
        assert_eq!(config.low_priority_cap, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }
}
