//! Tracker configuration.
//!
//! Configuration can be built in code or loaded from a YAML file:
//!
//! ```yaml
//! resyncIntervalSeconds: 30
//! fullResyncIntervalSeconds: 900
//! maxConcurrentDiscoveries: 8
//! ```
//!
//! Every field is optional and falls back to its default.

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;

/// Default short interval between full discovery queries.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default long interval between full rescans with ledger refresh.
pub const DEFAULT_FULL_RESYNC_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default limit on concurrent group-version requests during a full collection.
pub const DEFAULT_MAX_CONCURRENT_DISCOVERIES: usize = 8;

/// Default timeout for Kubernetes API requests.
pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}")]
	Read {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}")]
	Parse {
		path: String,
		#[source]
		source: serde_yaml_with_quirks::Error,
	},

	#[error("{0} must be greater than zero")]
	ZeroInterval(&'static str),

	#[error("maxConcurrentDiscoveries must be greater than zero")]
	ZeroConcurrency,
}

/// Timing and concurrency settings for a [`Tracker`](crate::Tracker).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
	/// Interval of the short full-discovery loop.
	pub resync_interval: Duration,
	/// Interval of the long loop that also refreshes the identity ledger.
	pub full_resync_interval: Duration,
	pub max_concurrent_discoveries: usize,
}

impl Default for TrackerConfig {
	fn default() -> Self {
		Self {
			resync_interval: DEFAULT_RESYNC_INTERVAL,
			full_resync_interval: DEFAULT_FULL_RESYNC_INTERVAL,
			max_concurrent_discoveries: DEFAULT_MAX_CONCURRENT_DISCOVERIES,
		}
	}
}

/// On-disk representation of [`TrackerConfig`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TrackerConfigFile {
	#[serde(default)]
	resync_interval_seconds: Option<u64>,
	#[serde(default)]
	full_resync_interval_seconds: Option<u64>,
	#[serde(default)]
	max_concurrent_discoveries: Option<usize>,
}

impl TrackerConfig {
	/// Load config from a YAML file, applying defaults for unset fields.
	pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
		let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.display().to_string(),
			source,
		})?;
		Self::from_yaml(&content).map_err(|e| match e {
			ConfigError::Parse { source, .. } => ConfigError::Parse {
				path: path.display().to_string(),
				source,
			},
			other => other,
		})
	}

	/// Parse config from YAML text.
	pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
		let file: TrackerConfigFile =
			serde_yaml_with_quirks::from_str(content).map_err(|source| ConfigError::Parse {
				path: "<inline>".to_string(),
				source,
			})?;

		let mut config = Self::default();
		if let Some(secs) = file.resync_interval_seconds {
			config.resync_interval = Duration::from_secs(secs);
		}
		if let Some(secs) = file.full_resync_interval_seconds {
			config.full_resync_interval = Duration::from_secs(secs);
		}
		if let Some(max) = file.max_concurrent_discoveries {
			config.max_concurrent_discoveries = max;
		}
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.resync_interval.is_zero() {
			return Err(ConfigError::ZeroInterval("resyncIntervalSeconds"));
		}
		if self.full_resync_interval.is_zero() {
			return Err(ConfigError::ZeroInterval("fullResyncIntervalSeconds"));
		}
		if self.max_concurrent_discoveries == 0 {
			return Err(ConfigError::ZeroConcurrency);
		}
		Ok(())
	}
}

/// Selects the cluster a tracker talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
	/// Kubeconfig context to use. The current context when unset.
	pub context: Option<String>,
	/// Read timeout for API requests.
	pub timeout: Duration,
}

impl Default for ClusterConfig {
	fn default() -> Self {
		Self {
			context: None,
			timeout: DEFAULT_API_TIMEOUT,
		}
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;
	use tempfile::TempDir;

	use super::*;

	#[test]
	fn test_defaults() {
		let config = TrackerConfig::default();
		assert_eq!(config.resync_interval, Duration::from_secs(30));
		assert_eq!(config.full_resync_interval, Duration::from_secs(900));
		assert_eq!(config.max_concurrent_discoveries, 8);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_parse_partial_yaml() {
		let config = TrackerConfig::from_yaml("resyncIntervalSeconds: 10\n").unwrap();
		assert_eq!(config.resync_interval, Duration::from_secs(10));
		assert_eq!(config.full_resync_interval, DEFAULT_FULL_RESYNC_INTERVAL);
	}

	#[test]
	fn test_parse_full_yaml() {
		let config = TrackerConfig::from_yaml(
			"resyncIntervalSeconds: 20\nfullResyncIntervalSeconds: 600\nmaxConcurrentDiscoveries: 2\n",
		)
		.unwrap();
		assert_eq!(
			config,
			TrackerConfig {
				resync_interval: Duration::from_secs(20),
				full_resync_interval: Duration::from_secs(600),
				max_concurrent_discoveries: 2,
			}
		);
	}

	#[test]
	fn test_zero_interval_rejected() {
		assert_matches!(
			TrackerConfig::from_yaml("resyncIntervalSeconds: 0\n"),
			Err(ConfigError::ZeroInterval("resyncIntervalSeconds"))
		);
		assert_matches!(
			TrackerConfig::from_yaml("maxConcurrentDiscoveries: 0\n"),
			Err(ConfigError::ZeroConcurrency)
		);
	}

	#[test]
	fn test_unknown_field_rejected() {
		assert_matches!(
			TrackerConfig::from_yaml("resyncInterval: 10\n"),
			Err(ConfigError::Parse { .. })
		);
	}

	#[test]
	fn test_load_from_file() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join("tracker.yaml");
		fs::write(&path, "fullResyncIntervalSeconds: 120\n").unwrap();

		let config = TrackerConfig::load_from_file(&path).unwrap();
		assert_eq!(config.full_resync_interval, Duration::from_secs(120));
	}

	#[test]
	fn test_load_missing_file() {
		let temp = TempDir::new().unwrap();
		let path = temp.path().join("missing.yaml");
		assert_matches!(
			TrackerConfig::load_from_file(&path),
			Err(ConfigError::Read { .. })
		);
	}
}
