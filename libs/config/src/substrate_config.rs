//! Substrate Configuration Module
//!
//! Provides configuration loading for the lock checker, the framed transport and
//! the request correlator. Supports loading from TOML files with environment
//! variable overrides (`LOCKSTEP_NETWORK__MAX_FRAME_SIZE=4096`).

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::defaults;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "LOCKSTEP";

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct SubstrateConfig {
    /// Lock-order checker settings
    pub locking: LockingConfig,

    /// Framed transport settings
    pub network: NetworkConfig,

    /// Request/response correlation settings
    pub correlation: CorrelationConfig,
}

/// Lock-order checker settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LockingConfig {
    /// Append-only side file for deadlock reports; `None` disables the file
    pub deadlock_log: Option<PathBuf>,
    pub report_to_stderr: bool,
}

/// Framed transport settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub max_frame_size: usize,
    pub tcp_nodelay: bool,
    /// Hex dump every frame at trace level
    pub dump_frames: bool,
    pub stall_allowance_ms: u64,
}

/// Request/response correlation settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CorrelationConfig {
    /// Zero means callers wait forever for a reply
    pub request_timeout_ms: u64,
    pub results_queue_capacity: usize,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            deadlock_log: Some(PathBuf::from(defaults::locking::DEADLOCK_LOG)),
            report_to_stderr: defaults::locking::REPORT_TO_STDERR,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_frame_size: defaults::network::MAX_FRAME_SIZE,
            tcp_nodelay: defaults::network::TCP_NODELAY,
            dump_frames: defaults::network::DUMP_FRAMES,
            stall_allowance_ms: defaults::network::STALL_ALLOWANCE_MS,
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: defaults::correlation::REQUEST_TIMEOUT_MS,
            results_queue_capacity: defaults::correlation::RESULTS_QUEUE_CAPACITY,
        }
    }
}

impl NetworkConfig {
    pub fn stall_allowance(&self) -> Duration {
        Duration::from_millis(self.stall_allowance_ms)
    }
}

impl CorrelationConfig {
    /// Reply deadline, `None` when callers should block until answered
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl SubstrateConfig {
    /// Load configuration from a TOML file with environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading substrate config: {:?}", path);

        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(true))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to build configuration from {:?}", path))?;

        let parsed: SubstrateConfig = config
            .try_deserialize()
            .with_context(|| format!("Failed to deserialize configuration from {:?}", path))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse configuration from an in-memory TOML document (no environment overrides)
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()
            .context("Failed to build configuration from string")?;

        let parsed: SubstrateConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject values the transport and correlator cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.network.max_frame_size < defaults::network::MIN_FRAME_SIZE {
            bail!(
                "network.max_frame_size must be at least {} bytes, got {}",
                defaults::network::MIN_FRAME_SIZE,
                self.network.max_frame_size
            );
        }
        if self.correlation.results_queue_capacity == 0 {
            bail!("correlation.results_queue_capacity must be at least 1");
        }
        debug!(?self, "Substrate configuration validated");
        Ok(())
    }
}

/// Convenience function: load from `path` when given, defaults otherwise
pub fn load_config(path: Option<&Path>) -> Result<SubstrateConfig> {
    match path {
        Some(path) => SubstrateConfig::load(path),
        None => Ok(SubstrateConfig::default()),
    }
}
