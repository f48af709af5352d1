use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Daemon configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Stable identifier for this agent. Left empty, the daemon
    /// generates one at startup.
    pub id: String,
    /// Directory all file operations are rooted in.
    pub storage_root: String,
    /// Number of messages retained per history direction.
    pub history_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address of the pub/sub broker.
    pub broker_addr: String,
    /// Channel this agent subscribes and publishes to.
    pub channel: String,
    /// Maximum payload bytes per chunk frame.
    pub chunk_size: usize,
    /// How often in-flight reassembly progress is sampled.
    pub telemetry_interval_ms: u64,
    /// How long a partial message is kept before it is discarded.
    pub reassembly_timeout_secs: u64,
    /// Depth of the engine/codec message queues.
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            transport: TransportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            storage_root: "/var/lib/ferry/storage".to_string(),
            history_capacity: 64,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            broker_addr: "127.0.0.1:7337".to_string(),
            channel: "ferry".to_string(),
            chunk_size: 32 * 1024,
            telemetry_interval_ms: 500,
            reassembly_timeout_secs: 60,
            queue_capacity: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields the
    /// defaults so the daemon can run without any setup.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Write the configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.device.id.is_empty());
        assert_eq!(config.transport.broker_addr, "127.0.0.1:7337");
        assert_eq!(config.transport.channel, "ferry");
        assert_eq!(config.transport.chunk_size, 32 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.transport.channel, "ferry");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ferryd.toml");

        let mut config = Config::default();
        config.device.id = "agent-7".to_string();
        config.transport.broker_addr = "10.0.0.5:9000".to_string();
        config.transport.chunk_size = 1024;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.device.id, "agent-7");
        assert_eq!(loaded.transport.broker_addr, "10.0.0.5:9000");
        assert_eq!(loaded.transport.chunk_size, 1024);
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ferryd.toml");
        fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.transport.channel, "ferry");
        assert_eq!(config.device.history_capacity, 64);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ferryd.toml");
        fs::write(&path, "not valid toml [").unwrap();

        assert!(Config::load(&path).is_err());
    }
}
