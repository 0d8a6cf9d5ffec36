use std::env;
use std::time::Duration;

pub const WATCHDOG_INTERVAL_ENV: &str = "BRIDGE_WATCHDOG_INTERVAL_MS";
pub const DISPATCH_POLL_TIMEOUT_ENV: &str = "BRIDGE_DISPATCH_POLL_TIMEOUT_MS";
pub const CORRELATION_PREFIX_ENV: &str = "BRIDGE_CORRELATION_PREFIX";

const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(3);
const DEFAULT_DISPATCH_POLL_TIMEOUT: Duration = Duration::from_millis(250);
const DEFAULT_CORRELATION_PREFIX: &str = "child-";

/// Runtime knobs for the child process, each overridable by environment
/// variable with a typed default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildConfig {
    pub watchdog_interval: Duration,
    pub dispatch_poll_timeout: Duration,
    pub correlation_prefix: String,
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            dispatch_poll_timeout: DEFAULT_DISPATCH_POLL_TIMEOUT,
            correlation_prefix: DEFAULT_CORRELATION_PREFIX.to_string(),
        }
    }
}

impl ChildConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = read_millis(WATCHDOG_INTERVAL_ENV) {
            config.watchdog_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = read_millis(DISPATCH_POLL_TIMEOUT_ENV) {
            config.dispatch_poll_timeout = Duration::from_millis(ms);
        }
        if let Some(prefix) = env::var(CORRELATION_PREFIX_ENV).ok().filter(|s| !s.is_empty()) {
            config.correlation_prefix = prefix;
        }

        config
    }
}

fn read_millis(var: &str) -> Option<u64> {
    env::var(var).ok()?.parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_watchdog_cadence() {
        let config = ChildConfig::default();
        assert_eq!(config.watchdog_interval, Duration::from_secs(3));
        assert_eq!(config.correlation_prefix, "child-");
    }
}
