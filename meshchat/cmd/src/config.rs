//! Configuration handling for the meshchat binary.
//!
//! Reads a YAML config file and applies `MESHCHAT_*` environment overrides.
//! The connection cap is deliberately a config input: host radio stacks
//! allow different numbers of simultaneous links.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use meshchat_link::LinkConfig;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Display name advertised to peers
    pub device_name: String,
    /// Maximum simultaneous radio links (7 on one platform family, 15 on another)
    pub max_connections: usize,
    /// Maximum bytes per radio write
    pub mtu: usize,
    /// Pacing delay between chunks of one payload, milliseconds
    pub chunk_delay_ms: u64,
    /// Window a connect attempt may take, seconds
    pub connect_timeout_secs: u64,
    /// Silence threshold before a device counts as stale, seconds
    pub stale_after_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_name: "meshchat-node".to_string(),
            max_connections: 7,
            mtu: 512,
            chunk_delay_ms: 10,
            connect_timeout_secs: 10,
            stale_after_secs: 300,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a file, then apply environment overrides
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<NodeConfig>(&content) {
                Ok(parsed) => {
                    config = parsed;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?} ({}), using defaults",
                        config_path.as_ref(),
                        e
                    );
                }
            }
        } else {
            warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            );
        }

        config.apply_environment_overrides();

        info!(
            "Final configuration: name={}, cap={}, mtu={}",
            config.device_name, config.max_connections, config.mtu
        );
        Ok(config)
    }

    /// Apply `MESHCHAT_*` environment variable overrides
    fn apply_environment_overrides(&mut self) {
        if let Ok(name) = std::env::var("MESHCHAT_DEVICE_NAME") {
            self.device_name = name;
            info!("Device name overridden by environment: {}", self.device_name);
        }

        if let Ok(cap) = std::env::var("MESHCHAT_MAX_CONNECTIONS") {
            if let Ok(cap) = cap.parse::<usize>() {
                self.max_connections = cap;
                info!("Connection cap overridden by environment: {}", cap);
            }
        }

        if let Ok(mtu) = std::env::var("MESHCHAT_MTU") {
            if let Ok(mtu) = mtu.parse::<usize>() {
                self.mtu = mtu;
                info!("MTU overridden by environment: {}", mtu);
            }
        }

        if let Ok(delay) = std::env::var("MESHCHAT_CHUNK_DELAY_MS") {
            if let Ok(delay) = delay.parse::<u64>() {
                self.chunk_delay_ms = delay;
            }
        }
    }

    /// Derive the connection manager configuration
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            max_connections: self.max_connections,
            mtu: self.mtu,
            chunk_delay: Duration::from_millis(self.chunk_delay_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..LinkConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.device_name, "meshchat-node");
        assert_eq!(config.max_connections, 7);
        assert_eq!(config.mtu, 512);
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
device_name: kitchen-tablet
max_connections: 15
mtu: 256
chunk_delay_ms: 5
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = NodeConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.device_name, "kitchen-tablet");
        assert_eq!(config.max_connections, 15);
        assert_eq!(config.mtu, 256);
        assert_eq!(config.chunk_delay_ms, 5);
        // Unspecified fields keep their defaults
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = NodeConfig::load_from_file("/nonexistent/meshchat.yaml").unwrap();
        assert_eq!(config.max_connections, NodeConfig::default().max_connections);
    }

    #[test]
    fn test_link_config_derivation() {
        let mut config = NodeConfig::default();
        config.max_connections = 2;
        config.chunk_delay_ms = 25;

        let link = config.link_config();
        assert_eq!(link.max_connections, 2);
        assert_eq!(link.chunk_delay, Duration::from_millis(25));
    }
}
