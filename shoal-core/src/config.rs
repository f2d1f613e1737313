//! Centralized configuration for Shoal.
//!
//! All tunable parameters are defined here so tracker, peers and the CLI
//! agree on defaults. Every section supports environment overrides.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

/// Central configuration for all Shoal components.
#[derive(Debug, Clone, Default)]
pub struct ShoalConfig {
    pub network: NetworkConfig,
    pub peer: PeerConfig,
    pub storage: StorageConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Default)]
pub struct NetworkConfig {
    /// Upper bound on waiting for a reply (None = wait indefinitely).
    /// Request lanes always wait until termination.
    pub receive_timeout: Option<Duration>,
}

/// Rule a peer uses to answer availability queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
pub enum AvailabilityPolicy {
    /// Answer only from files this peer holds completely
    #[default]
    #[value(name = "complete")]
    CompleteFilesOnly,
    /// Also answer for segments already acquired of in-progress files
    #[value(name = "partial")]
    PartialSegments,
}

impl FromStr for AvailabilityPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "complete" => Ok(Self::CompleteFilesOnly),
            "partial" => Ok(Self::PartialSegments),
            _ => Err(format!("Invalid availability policy: {s}")),
        }
    }
}

/// Download and upload agent behavior.
#[derive(Debug, Clone, Default)]
pub struct PeerConfig {
    /// How the upload agent decides whether it can serve a segment
    pub availability: AvailabilityPolicy,
    /// Full negative sweeps over the candidates tolerated for one segment
    /// before the download is declared stalled (None = retry forever)
    pub max_probe_rounds: Option<u32>,
}

/// Locations of bootstrap manifests and persisted outputs.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding `in<node>.txt` manifests
    pub input_dir: PathBuf,
    /// Directory receiving `client<node>_<file>` outputs
    pub output_dir: PathBuf,
    /// Manifest file name prefix
    pub manifest_prefix: &'static str,
    /// Manifest file extension
    pub manifest_extension: &'static str,
    /// Output file name prefix
    pub output_prefix: &'static str,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            manifest_prefix: "in",
            manifest_extension: "txt",
            output_prefix: "client",
        }
    }
}

impl ShoalConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(timeout) = std::env::var("SHOAL_RECEIVE_TIMEOUT_MS") {
            if let Ok(millis) = timeout.parse::<u64>() {
                config.network.receive_timeout = Some(Duration::from_millis(millis));
            }
        }

        if let Ok(rounds) = std::env::var("SHOAL_MAX_PROBE_ROUNDS") {
            if let Ok(count) = rounds.parse::<u32>() {
                config.peer.max_probe_rounds = Some(count);
            }
        }

        if let Ok(policy) = std::env::var("SHOAL_AVAILABILITY") {
            if let Ok(parsed) = policy.parse() {
                config.peer.availability = parsed;
            }
        }

        if let Ok(dir) = std::env::var("SHOAL_INPUT_DIR") {
            config.storage.input_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("SHOAL_OUTPUT_DIR") {
            config.storage.output_dir = PathBuf::from(dir);
        }

        config
    }

    /// Creates a configuration for tests: bounded waits so a stalled swarm
    /// fails instead of hanging.
    pub fn testing() -> Self {
        let mut config = Self::default();
        config.network.receive_timeout = Some(Duration::from_secs(5));
        config.peer.max_probe_rounds = Some(1_000);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_block_indefinitely() {
        let config = ShoalConfig::default();
        assert_eq!(config.network.receive_timeout, None);
        assert_eq!(config.peer.max_probe_rounds, None);
        assert_eq!(config.peer.availability, AvailabilityPolicy::CompleteFilesOnly);
        assert_eq!(config.storage.manifest_prefix, "in");
        assert_eq!(config.storage.output_prefix, "client");
    }

    #[test]
    fn test_availability_policy_parsing() {
        assert_eq!(
            "partial".parse::<AvailabilityPolicy>(),
            Ok(AvailabilityPolicy::PartialSegments)
        );
        assert_eq!(
            "COMPLETE".parse::<AvailabilityPolicy>(),
            Ok(AvailabilityPolicy::CompleteFilesOnly)
        );
        assert!("sometimes".parse::<AvailabilityPolicy>().is_err());
    }

    #[test]
    fn test_testing_config_bounds_waits() {
        let config = ShoalConfig::testing();
        assert!(config.network.receive_timeout.is_some());
        assert!(config.peer.max_probe_rounds.is_some());
    }
}
