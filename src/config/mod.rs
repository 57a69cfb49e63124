//! Monitor Configuration Module
//!
//! Per-deployment configuration loaded from TOML: which instruments to poll,
//! their channels and thresholds, correlation offsets and alert timing.
//!
//! ## Loading Order
//!
//! 1. `--config <path>` on the command line
//! 2. `SENTINEL_CONFIG` environment variable (path to TOML file)
//! 3. `sentinel.toml` in the current working directory
//! 4. Built-in defaults
//!
//! The loaded config is passed explicitly to the monitor; there is no global.

mod monitor_config;
pub mod defaults;
pub mod validation;

pub use monitor_config::*;
