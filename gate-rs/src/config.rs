use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub quota: QuotaConfig,
    pub capacity: CapacityConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub listen_addr: String,
}

/// Fixed-window rate limits per route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    pub produce_window_ms: u64,
    pub produce_max: u32,
    pub status_window_ms: u64,
    pub status_max: u32,
    /// Interval for the expired-window sweep task
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuotaConfig {
    /// Daily limit applied to categories without an explicit entry
    pub default_daily_limit: u32,
    pub category_limits: HashMap<String, u32>,
    /// Quota records older than this many days are removed by the cleanup job
    pub retention_days: i64,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CapacityConfig {
    /// Max stored items for tiers without an explicit entry; -1 = unlimited
    pub default_max_items: i64,
    pub tiers: HashMap<String, i64>,
    /// Blob locations probed for rows predating the recorded blob mapping
    pub legacy_blob_prefixes: Vec<String>,
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_url: String,
    pub blob_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::GateError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| crate::error::GateError::Config(e.to_string()))
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "0.0.0.0:8080".to_string(),
            },
            limits: LimitsConfig {
                produce_window_ms: 60_000,
                produce_max: 5,
                status_window_ms: 60_000,
                status_max: 120,
                sweep_interval_secs: 300,
            },
            quota: QuotaConfig {
                default_daily_limit: 50,
                category_limits: HashMap::new(),
                retention_days: 30,
                cleanup_interval_secs: 3600,
            },
            capacity: CapacityConfig {
                default_max_items: 10,
                tiers: HashMap::from([
                    ("free".to_string(), 10),
                    ("pro".to_string(), 100),
                    ("unlimited".to_string(), -1),
                ]),
                legacy_blob_prefixes: Vec::new(),
                reconcile_interval_secs: 600,
            },
            storage: StorageConfig {
                database_url: "sqlite://gate.db".to_string(),
                blob_path: "/tmp/gate-blobs".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.limits.produce_max, 5);
        assert_eq!(config.capacity.tiers.get("free"), Some(&10));
        assert_eq!(config.capacity.tiers.get("unlimited"), Some(&-1));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.server.listen_addr, config.server.listen_addr);
        assert_eq!(parsed.quota.default_daily_limit, 50);
    }
}
