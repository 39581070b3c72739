//! # Lockstep Configuration
//!
//! Centralized configuration and defaults for the lock checker, the framed
//! transport and the request correlator.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use config::SubstrateConfig;
//!
//! let config = SubstrateConfig::load("config/substrate.toml").unwrap();
//! let timeout = config.correlation.request_timeout();
//! ```

pub mod defaults;
pub mod substrate_config;

// Re-export commonly used types
pub use substrate_config::{
    load_config, CorrelationConfig, LockingConfig, NetworkConfig, SubstrateConfig,
};
