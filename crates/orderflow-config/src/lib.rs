//! Configuration module for the orderflow pipeline.
//!
//! This module provides structures and utilities for managing pipeline
//! configuration. It supports loading configuration from TOML files with
//! environment-variable resolution and provides validation to ensure all
//! required configuration values are properly set.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		let message = err.message().to_string();
		ConfigError::Parse(message)
	}
}

/// Main configuration structure for the orderflow pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Configuration for the HTTP API server.
	#[serde(default)]
	pub server: ServerConfig,
	/// Configuration for the durable store and active cache.
	pub storage: StorageConfig,
	/// Configuration for the job queue and worker pool.
	#[serde(default)]
	pub queue: QueueConfig,
	/// Configuration for the liquidity router.
	pub router: RouterConfig,
}

/// Configuration for the HTTP API server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
	/// Host address to bind the server to.
	#[serde(default = "default_host")]
	pub host: String,
	/// Port to bind the server to.
	#[serde(default = "default_port")]
	pub port: u16,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: default_host(),
			port: default_port(),
		}
	}
}

fn default_host() -> String {
	"127.0.0.1".to_string()
}

fn default_port() -> u16 {
	3000
}

/// Configuration for the durable store and active cache.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Durable history backend to use ("memory" or "file").
	pub backend: String,
	/// Base directory for the file backend.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
	/// Time-to-live for active cache entries, in seconds.
	#[serde(default = "default_cache_ttl_secs")]
	pub cache_ttl_secs: u64,
	/// Interval in seconds for sweeping expired cache entries.
	#[serde(default = "default_cleanup_interval_secs")]
	pub cleanup_interval_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
	3600 // 1 hour, matching the cache's role as a liveness aid
}

fn default_cleanup_interval_secs() -> u64 {
	300
}

impl StorageConfig {
	pub fn cache_ttl(&self) -> Duration {
		Duration::from_secs(self.cache_ttl_secs)
	}

	pub fn cleanup_interval(&self) -> Duration {
		Duration::from_secs(self.cleanup_interval_secs)
	}
}

/// Configuration for the job queue and worker pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
	/// Number of concurrent workers.
	#[serde(default = "default_max_concurrent")]
	pub max_concurrent: usize,
	/// Maximum execution attempts per order, including the first.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u32,
	/// Base delay for exponential retry backoff, in milliseconds.
	#[serde(default = "default_retry_backoff_ms")]
	pub retry_backoff_ms: u64,
	/// Maximum dequeues per rate-limit window.
	#[serde(default = "default_rate_limit_max")]
	pub rate_limit_max: u32,
	/// Length of the rolling rate-limit window, in seconds.
	#[serde(default = "default_rate_limit_window_secs")]
	pub rate_limit_window_secs: u64,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			max_concurrent: default_max_concurrent(),
			max_attempts: default_max_attempts(),
			retry_backoff_ms: default_retry_backoff_ms(),
			rate_limit_max: default_rate_limit_max(),
			rate_limit_window_secs: default_rate_limit_window_secs(),
		}
	}
}

fn default_max_concurrent() -> usize {
	10
}

fn default_max_attempts() -> u32 {
	3
}

fn default_retry_backoff_ms() -> u64 {
	1000
}

fn default_rate_limit_max() -> u32 {
	100
}

fn default_rate_limit_window_secs() -> u64 {
	60
}

impl QueueConfig {
	pub fn retry_backoff(&self) -> Duration {
		Duration::from_millis(self.retry_backoff_ms)
	}

	pub fn rate_limit_window(&self) -> Duration {
		Duration::from_secs(self.rate_limit_window_secs)
	}
}

/// Configuration for the liquidity router.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
	/// Timeout for one round of quote gathering, in milliseconds.
	#[serde(default = "default_quote_timeout_ms")]
	pub quote_timeout_ms: u64,
	/// Timeout for one swap submission, in milliseconds.
	#[serde(default = "default_swap_timeout_ms")]
	pub swap_timeout_ms: u64,
	/// Map of venue names to their implementation-specific configurations.
	/// Each venue table carries a `kind` field naming the implementation.
	pub venues: HashMap<String, toml::Value>,
}

fn default_quote_timeout_ms() -> u64 {
	5000
}

fn default_swap_timeout_ms() -> u64 {
	30000
}

impl RouterConfig {
	pub fn quote_timeout(&self) -> Duration {
		Duration::from_millis(self.quote_timeout_ms)
	}

	pub fn swap_timeout(&self) -> Duration {
		Duration::from_millis(self.swap_timeout_ms)
	}
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	// Limit input size to prevent ReDoS attacks
	const MAX_INPUT_SIZE: usize = 1024 * 1024; // 1MB
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = input.to_string();
	let mut replacements = Vec::new();

	for cap in re.captures_iter(input) {
		let full_match = cap.get(0).unwrap();
		let var_name = cap.get(1).unwrap().as_str();
		let default_value = cap.get(2).map(|m| m.as_str());

		let value = match std::env::var(var_name) {
			Ok(v) => v,
			Err(_) => {
				if let Some(default) = default_value {
					default.to_string()
				} else {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						var_name
					)));
				}
			},
		};

		replacements.push((full_match.start(), full_match.end(), value));
	}

	// Apply replacements in reverse order to maintain positions
	for (start, end, value) in replacements.iter().rev() {
		result.replace_range(start..end, value);
	}

	Ok(result)
}

impl Config {
	/// Loads configuration from a TOML file, resolving environment variables
	/// and validating the result.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let contents = tokio::fs::read_to_string(path).await?;
		contents.parse()
	}

	/// Validates the configuration to ensure all required fields are
	/// properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.server.host.is_empty() {
			return Err(ConfigError::Validation("Server host cannot be empty".into()));
		}

		match self.storage.backend.as_str() {
			"memory" => {}
			"file" => {
				if self.storage.path.as_deref().unwrap_or("").is_empty() {
					return Err(ConfigError::Validation(
						"File storage backend requires a path".into(),
					));
				}
			}
			other => {
				return Err(ConfigError::Validation(format!(
					"Unknown storage backend '{}'",
					other
				)));
			}
		}
		if self.storage.cache_ttl_secs == 0 {
			return Err(ConfigError::Validation(
				"Storage cache_ttl_secs must be greater than 0".into(),
			));
		}
		if self.storage.cleanup_interval_secs == 0 {
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_secs must be greater than 0".into(),
			));
		}
		if self.storage.cleanup_interval_secs > 86400 {
			return Err(ConfigError::Validation(
				"Storage cleanup_interval_secs cannot exceed 86400 (24 hours)".into(),
			));
		}

		if self.queue.max_concurrent == 0 {
			return Err(ConfigError::Validation(
				"Queue max_concurrent must be greater than 0".into(),
			));
		}
		if self.queue.max_attempts == 0 {
			return Err(ConfigError::Validation(
				"Queue max_attempts must be greater than 0".into(),
			));
		}
		if self.queue.rate_limit_max == 0 {
			return Err(ConfigError::Validation(
				"Queue rate_limit_max must be greater than 0".into(),
			));
		}
		if self.queue.rate_limit_window_secs == 0 {
			return Err(ConfigError::Validation(
				"Queue rate_limit_window_secs must be greater than 0".into(),
			));
		}

		if self.router.venues.is_empty() {
			return Err(ConfigError::Validation(
				"At least one router venue must be configured".into(),
			));
		}
		if self.router.quote_timeout_ms == 0 || self.router.swap_timeout_ms == 0 {
			return Err(ConfigError::Validation(
				"Router timeouts must be greater than 0".into(),
			));
		}

		Ok(())
	}
}

/// Implementation of FromStr for Config to enable parsing from string.
///
/// Environment variables are resolved and the configuration is
/// automatically validated after parsing.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
