//! Engine configuration.
//!
//! Values start from defaults and can be overridden from `FAULTLINE_*`
//! environment variables. Unparsable values are logged and ignored.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of evaluator workers, each owning a graph replica
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long the primary waits for every replica to acknowledge a delta
    #[serde(default = "default_ack_timeout_ms")]
    pub replication_ack_timeout_ms: u64,

    /// Low-priority events yield while a high-priority event completed
    /// within this window
    #[serde(default = "default_high_priority_cooldown_ms")]
    pub high_priority_cooldown_ms: u64,

    /// Sleep of the low-priority consumer between yields
    #[serde(default = "default_low_priority_retry_ms")]
    pub low_priority_retry_ms: u64,

    /// Age after which tombstoned vertices are pruned
    #[serde(default = "default_tombstone_retention_secs")]
    pub tombstone_retention_secs: u64,

    /// First retry delay of a failing datasource
    #[serde(default = "default_datasource_backoff_ms")]
    pub datasource_backoff_ms: u64,

    /// Upper bound of the datasource retry delay
    #[serde(default = "default_datasource_backoff_max_ms")]
    pub datasource_backoff_max_ms: u64,

    /// How long a datasource may keep failing before it is abandoned
    #[serde(default = "default_datasource_ttl_secs")]
    pub datasource_ttl_secs: u64,

    /// A graph snapshot is stored every this many persisted events; 0 disables
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_events: u64,

    /// Topic deduced alarms and external workflow triggers are published on
    #[serde(default = "default_notifications_topic")]
    pub notifications_topic: String,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_high_priority_cooldown_ms() -> u64 {
    300
}

fn default_low_priority_retry_ms() -> u64 {
    20
}

fn default_tombstone_retention_secs() -> u64 {
    // 1 hour
    3_600
}

fn default_datasource_backoff_ms() -> u64 {
    500
}

fn default_datasource_backoff_max_ms() -> u64 {
    30_000
}

fn default_datasource_ttl_secs() -> u64 {
    300
}

fn default_snapshot_interval() -> u64 {
    1_000
}

fn default_notifications_topic() -> String {
    "faultline.notifications".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            replication_ack_timeout_ms: default_ack_timeout_ms(),
            high_priority_cooldown_ms: default_high_priority_cooldown_ms(),
            low_priority_retry_ms: default_low_priority_retry_ms(),
            tombstone_retention_secs: default_tombstone_retention_secs(),
            datasource_backoff_ms: default_datasource_backoff_ms(),
            datasource_backoff_max_ms: default_datasource_backoff_max_ms(),
            datasource_ttl_secs: default_datasource_ttl_secs(),
            snapshot_interval_events: default_snapshot_interval(),
            notifications_topic: default_notifications_topic(),
        }
    }
}

fn override_from<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, name: &str, target: &mut T) {
    if let Some(raw) = lookup(name) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Invalid {} value: {}", name, raw),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment
    pub fn load() -> Self {
        Self::load_from(&|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn load_from(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        override_from(lookup, "FAULTLINE_WORKERS", &mut config.workers);
        override_from(
            lookup,
            "FAULTLINE_REPLICATION_ACK_TIMEOUT_MS",
            &mut config.replication_ack_timeout_ms,
        );
        override_from(
            lookup,
            "FAULTLINE_HIGH_PRIORITY_COOLDOWN_MS",
            &mut config.high_priority_cooldown_ms,
        );
        override_from(lookup, "FAULTLINE_LOW_PRIORITY_RETRY_MS", &mut config.low_priority_retry_ms);
        override_from(
            lookup,
            "FAULTLINE_TOMBSTONE_RETENTION_SECS",
            &mut config.tombstone_retention_secs,
        );
        override_from(lookup, "FAULTLINE_DATASOURCE_BACKOFF_MS", &mut config.datasource_backoff_ms);
        override_from(
            lookup,
            "FAULTLINE_DATASOURCE_BACKOFF_MAX_MS",
            &mut config.datasource_backoff_max_ms,
        );
        override_from(lookup, "FAULTLINE_DATASOURCE_TTL_SECS", &mut config.datasource_ttl_secs);
        override_from(
            lookup,
            "FAULTLINE_SNAPSHOT_INTERVAL_EVENTS",
            &mut config.snapshot_interval_events,
        );

        if let Some(topic) = lookup("FAULTLINE_NOTIFICATIONS_TOPIC") {
            config.notifications_topic = topic;
        }

        if config.workers == 0 {
            warn!("FAULTLINE_WORKERS must be at least 1, using 1");
            config.workers = 1;
        }

        config
    }

    /// Replication acknowledgement timeout
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.replication_ack_timeout_ms)
    }

    /// High-priority cooldown window
    pub fn high_priority_cooldown(&self) -> Duration {
        Duration::from_millis(self.high_priority_cooldown_ms)
    }

    /// Low-priority retry sleep
    pub fn low_priority_retry(&self) -> Duration {
        Duration::from_millis(self.low_priority_retry_ms)
    }

    /// Tombstone retention
    pub fn tombstone_retention(&self) -> Duration {
        Duration::from_secs(self.tombstone_retention_secs)
    }

    /// Initial datasource backoff
    pub fn datasource_backoff(&self) -> Duration {
        Duration::from_millis(self.datasource_backoff_ms)
    }

    /// Maximum datasource backoff
    pub fn datasource_backoff_max(&self) -> Duration {
        Duration::from_millis(self.datasource_backoff_max_ms)
    }

    /// Datasource time-to-live
    pub fn datasource_ttl(&self) -> Duration {
        Duration::from_secs(self.datasource_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::load_from(&lookup(&[]));
        assert!(config.workers >= 1);
        assert_eq!(config.high_priority_cooldown(), Duration::from_millis(300));
        assert_eq!(config.low_priority_retry(), Duration::from_millis(20));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::load_from(&lookup(&[
            ("FAULTLINE_WORKERS", "3"),
            ("FAULTLINE_REPLICATION_ACK_TIMEOUT_MS", "250"),
            ("FAULTLINE_NOTIFICATIONS_TOPIC", "alarms"),
        ]));
        assert_eq!(config.workers, 3);
        assert_eq!(config.ack_timeout(), Duration::from_millis(250));
        assert_eq!(config.notifications_topic, "alarms");
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let config = EngineConfig::load_from(&lookup(&[
            ("FAULTLINE_SNAPSHOT_INTERVAL_EVENTS", "often"),
            ("FAULTLINE_WORKERS", "0"),
        ]));
        assert_eq!(config.snapshot_interval_events, 1_000);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig = serde_json::from_str(r#"{"workers": 4}"#).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.datasource_ttl_secs, 300);
    }
}
