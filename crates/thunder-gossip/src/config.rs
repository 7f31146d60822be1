//! Gossip layer configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::announcement::FreshnessWindow;
use crate::connection::DEFAULT_OUTBOUND_CAPACITY;
use crate::error::{GossipError, GossipResult};
use crate::store::ReplacePolicy;

/// Configuration for the gossip engine and its connections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GossipConfig {
    /// IP address this node advertises in its self-announcement.
    pub advertised_address: String,
    /// Port this node advertises in its self-announcement.
    pub port: u16,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Announcements older than this many seconds are rejected. `None`, the default,
    /// disables the check.
    pub max_announcement_age_secs: Option<u64>,
    /// How many seconds into the future a timestamp may lie.
    pub max_clock_skew_secs: u64,
    /// What to do with a newer announcement for an already known node.
    pub replace_policy: ReplacePolicy,
    /// Maximum number of objects in one outbound batch.
    pub max_batch_items: usize,
    /// Whether fan-out skips the connection an announcement arrived on.
    pub exclude_origin: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            advertised_address: "127.0.0.1".to_string(),
            port: 10_000,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_announcement_age_secs: None,
            max_clock_skew_secs: 600,
            replace_policy: ReplacePolicy::KeepFirst,
            max_batch_items: 1_000,
            exclude_origin: true,
        }
    }
}

impl GossipConfig {
    /// Creates a config advertising `address:port`.
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            advertised_address: address.into(),
            port,
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: impl AsRef<Path>) -> GossipResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GossipError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or the values fail validation.
    pub fn from_json(content: &str) -> GossipResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| GossipError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> GossipResult<()> {
        if self.advertised_address.parse::<std::net::IpAddr>().is_err() {
            return Err(GossipError::Config(format!(
                "advertised_address {:?} is not an IP address",
                self.advertised_address
            )));
        }

        if self.port == 0 {
            return Err(GossipError::Config("port cannot be 0".to_string()));
        }

        if self.outbound_capacity == 0 {
            return Err(GossipError::Config(
                "outbound_capacity must be at least 1".to_string(),
            ));
        }

        if self.max_batch_items == 0 {
            return Err(GossipError::Config(
                "max_batch_items must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the timestamp acceptance window.
    #[must_use]
    pub fn freshness(&self) -> FreshnessWindow {
        FreshnessWindow {
            max_age: self.max_announcement_age_secs.map(Duration::from_secs),
            max_clock_skew: Duration::from_secs(self.max_clock_skew_secs),
        }
    }

    /// Sets the maximum announcement age.
    #[must_use]
    pub const fn with_max_age(mut self, secs: Option<u64>) -> Self {
        self.max_announcement_age_secs = secs;
        self
    }

    /// Sets the replace policy.
    #[must_use]
    pub const fn with_replace_policy(mut self, policy: ReplacePolicy) -> Self {
        self.replace_policy = policy;
        self
    }

    /// Sets the outbound queue capacity.
    #[must_use]
    pub const fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub const fn with_max_batch_items(mut self, max: usize) -> Self {
        self.max_batch_items = max;
        self
    }

    /// Sets whether fan-out skips the originating connection.
    #[must_use]
    pub const fn with_exclude_origin(mut self, exclude: bool) -> Self {
        self.exclude_origin = exclude;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn default_config_is_valid() {
        let config = GossipConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.exclude_origin);
        assert_eq!(config.replace_policy, ReplacePolicy::KeepFirst);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            GossipConfig::from_json(r#"{"advertised_address": "10.0.0.7", "port": 9735}"#)
                .unwrap();

        assert_eq!(config.advertised_address, "10.0.0.7");
        assert_eq!(config.port, 9735);
        assert_eq!(config.outbound_capacity, DEFAULT_OUTBOUND_CAPACITY);
    }

    #[test]
    fn replace_policy_parses_snake_case() {
        let config = GossipConfig::from_json(r#"{"replace_policy": "prefer_newer"}"#).unwrap();
        assert_eq!(config.replace_policy, ReplacePolicy::PreferNewer);
    }

    #[test_case(r#"{"advertised_address": "example.com"}"# ; "hostname instead of ip")]
    #[test_case(r#"{"port": 0}"# ; "zero port")]
    #[test_case(r#"{"outbound_capacity": 0}"# ; "zero capacity")]
    #[test_case(r#"{"max_batch_items": 0}"# ; "zero batch")]
    #[test_case(r#"{"port": "abc"}"# ; "wrong type")]
    fn invalid_config_is_rejected(json: &str) {
        assert!(matches!(
            GossipConfig::from_json(json),
            Err(GossipError::Config(_))
        ));
    }

    #[test]
    fn freshness_window_follows_config() {
        let window = GossipConfig::default().freshness();
        assert!(window.max_age.is_none());
        assert_eq!(window.max_clock_skew, Duration::from_secs(600));

        let window = GossipConfig::default().with_max_age(Some(3600)).freshness();
        assert_eq!(window.max_age, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gossip.json");
        let config = GossipConfig::new("192.168.1.10", 9000).with_max_batch_items(10);
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        assert_eq!(GossipConfig::from_file(&path).unwrap(), config);
        assert!(GossipConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
