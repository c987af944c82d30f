//! Daemon configuration.

use std::path::{Path, PathBuf};

use ipnet::IpNet;
use mesh_ipam::parse_cidr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading the daemon configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        /// The config file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for this schema.
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_poll_interval_secs() -> u64 {
    5
}

/// Configuration for the IPAM daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// JSON file holding the cluster network settings.
    pub settings_path: PathBuf,
    /// JSON file listing existing tunnel records.
    pub tunnels_path: PathBuf,
    /// Address pools for remapping. Empty selects the private IPv4 ranges.
    #[serde(default)]
    pub pools: Vec<String>,
    /// How often the settings file is re-read.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            settings_path: PathBuf::from("/etc/mesh-ipamd/network.json"),
            tunnels_path: PathBuf::from("/var/lib/mesh-ipamd/tunnels.json"),
            pools: mesh_ipam::DEFAULT_POOLS
                .iter()
                .map(|pool| (*pool).to_string())
                .collect(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl DaemonConfig {
    /// Loads and validates the configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parses and validates the configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.settings_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "settings_path cannot be empty".to_string(),
            ));
        }

        if self.tunnels_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "tunnels_path cannot be empty".to_string(),
            ));
        }

        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_secs must be greater than 0".to_string(),
            ));
        }

        self.parsed_pools()?;
        Ok(())
    }

    /// The configured pools as networks.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first pool that does not parse.
    pub fn parsed_pools(&self) -> Result<Vec<IpNet>, ConfigError> {
        self.pools
            .iter()
            .map(|pool| {
                parse_cidr(pool).map_err(|e| ConfigError::Invalid(format!("pools: {e}")))
            })
            .collect()
    }

    /// Renders the configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    #[test]
    fn test_parse_minimal_config() {
        let json = r#"{
            "settings_path": "/etc/mesh/network.json",
            "tunnels_path": "/var/lib/mesh/tunnels.json"
        }"#;

        let config = DaemonConfig::from_json(json).expect("should parse minimal config");

        assert_eq!(config.settings_path, PathBuf::from("/etc/mesh/network.json"));
        assert!(config.pools.is_empty());
        assert_eq!(config.poll_interval_secs, 5);
        assert!(config.parsed_pools().expect("no pools").is_empty());
    }

    #[test]
    fn test_parse_pools() {
        let json = r#"{
            "settings_path": "a.json",
            "tunnels_path": "b.json",
            "pools": ["100.64.0.0/10", "fd00::/8"],
            "poll_interval_secs": 2
        }"#;

        let config = DaemonConfig::from_json(json).expect("should parse");
        let pools = config.parsed_pools().expect("valid pools");
        assert_eq!(pools.len(), 2);
        assert_eq!(pools[0].to_string(), "100.64.0.0/10");
        assert_eq!(config.poll_interval_secs, 2);
    }

    #[test]
    fn test_invalid_pool_rejected() {
        let json = r#"{
            "settings_path": "a.json",
            "tunnels_path": "b.json",
            "pools": ["10.0.0.0"]
        }"#;

        let err = DaemonConfig::from_json(json).expect_err("pool without prefix");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let json = r#"{
            "settings_path": "a.json",
            "tunnels_path": "b.json",
            "poll_interval_secs": 0
        }"#;

        let err = DaemonConfig::from_json(json).expect_err("zero interval");
        assert!(err.to_string().contains("poll_interval_secs"));
    }

    #[test]
    fn test_missing_field_rejected() {
        let err = DaemonConfig::from_json(r#"{"settings_path": "a.json"}"#)
            .expect_err("tunnels_path is required");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_default_config_round_trips() {
        let json = DaemonConfig::default()
            .to_json_pretty()
            .expect("should serialize");
        let parsed = DaemonConfig::from_json(&json).expect("default is valid");
        assert_eq!(parsed, DaemonConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let file = create_temp_config(r#"{"settings_path": "a.json", "tunnels_path": "b.json"}"#);
        let config = DaemonConfig::load(file.path()).expect("should load");
        assert_eq!(config.tunnels_path, PathBuf::from("b.json"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = DaemonConfig::load("/nonexistent/mesh-ipamd.json").expect_err("missing file");
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
