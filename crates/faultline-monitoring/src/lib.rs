//! Logging and metrics for the Faultline platform.

use serde::{Deserialize, Serialize};
use std::env;

pub mod logging;
pub mod metrics;

/// Configuration for initializing logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to the startup log line
    pub service_name: String,
    /// Log filter (e.g., "info,faultline_core=debug"); `RUST_LOG` wins
    pub log_filter: String,
    /// JSON output instead of the pretty format
    pub enable_json_logging: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "faultline".to_string(),
            log_filter: "info".to_string(),
            enable_json_logging: false,
        }
    }
}

impl MonitoringConfig {
    /// Defaults overridden by `FAULTLINE_SERVICE_NAME`, `FAULTLINE_LOG_FILTER`
    /// and `FAULTLINE_LOG_JSON`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(name) = env::var("FAULTLINE_SERVICE_NAME") {
            config.service_name = name;
        }
        if let Ok(filter) = env::var("FAULTLINE_LOG_FILTER") {
            config.log_filter = filter;
        }
        if let Ok(json) = env::var("FAULTLINE_LOG_JSON") {
            config.enable_json_logging = matches!(json.trim(), "1" | "true" | "yes");
        }
        config
    }
}

pub use crate::logging::init_logging;
pub use crate::metrics::EngineMetrics;
