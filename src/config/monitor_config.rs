//! Monitor Configuration - every tunable of one monitor deployment
//!
//! Each section implements `Default` with the stock monitor values, so a
//! missing file or a partial file still yields a complete configuration.

use super::defaults;
use crate::hysteresis::HysteresisPolicy;
use crate::thresholds::ThresholdSet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "SENTINEL_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "sentinel.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one monitor process.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitorConfig {
    /// Identification, cycle timing and alert cooldown
    #[serde(default)]
    pub monitor: MonitorSection,

    /// Run-record correlation
    #[serde(default)]
    pub correlation: CorrelationConfig,

    /// Debounce parameters per alert class
    #[serde(default)]
    pub hysteresis: HysteresisConfig,

    /// Timeouts around external calls
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Run-record REST service
    #[serde(default)]
    pub records: RecordsConfig,

    /// Slack delivery
    #[serde(default)]
    pub slack: SlackConfig,

    /// Instruments polled every cycle, in declaration order
    #[serde(default)]
    pub instruments: Vec<InstrumentConfig>,
}

/// Where a loaded config came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Defaults => write!(f, "built-in defaults"),
        }
    }
}

impl MonitorConfig {
    /// Load configuration using the standard search order:
    /// 1. `explicit` path (from `--config`)
    /// 2. `$SENTINEL_CONFIG`
    /// 3. `./sentinel.toml`
    /// 4. Built-in defaults
    ///
    /// A file that exists but fails to parse or validate is an error; only a
    /// missing file falls through to the next candidate.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(path = %path.display(), label = %config.monitor.label, "Loaded monitor config");
            return Ok((config, ConfigSource::File(path.to_path_buf())));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                let config = Self::load_from_file(&p)?;
                info!(path = %p.display(), label = %config.monitor.label, "Loaded monitor config from SENTINEL_CONFIG");
                return Ok((config, ConfigSource::File(p)));
            }
            warn!(path = %path, "SENTINEL_CONFIG points to non-existent file, falling back");
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            let config = Self::load_from_file(&local)?;
            info!(label = %config.monitor.label, "Loaded monitor config from ./sentinel.toml");
            return Ok((config, ConfigSource::File(local)));
        }

        info!("No sentinel.toml found, using built-in defaults");
        Ok((Self::default(), ConfigSource::Defaults))
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        // Two-pass: unknown keys first (warnings only)
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Range and consistency checks. Suspicious values are logged.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (errors, warnings) = super::validation::validate_ranges(self);
        for w in &warnings {
            warn!("{}", w);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Per-channel maxima across all instruments, in declaration order.
    pub fn thresholds(&self) -> ThresholdSet {
        self.instruments
            .iter()
            .flat_map(|i| &i.channels)
            .filter_map(|c| c.threshold.map(|t| (c.key.clone(), t)))
            .collect()
    }

    /// Every declared channel key, in declaration order.
    pub fn channel_keys(&self) -> impl Iterator<Item = &str> {
        self.instruments
            .iter()
            .flat_map(|i| &i.channels)
            .map(|c| c.key.as_str())
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            Self::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            Self::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// [monitor]
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    /// Alert prefix, e.g. `VACUUM` gives `VACUUM_ERROR: ...`
    #[serde(default = "default_label")]
    pub label: String,

    /// Seconds between cycles
    #[serde(default = "default_cycle_delay")]
    pub cycle_delay_secs: u64,

    /// Backlog capacity in cycles
    #[serde(default = "default_backlog_capacity")]
    pub backlog_capacity: usize,

    /// Chat user ids mentioned on paging alerts
    #[serde(default)]
    pub on_call: Vec<String>,

    /// Global alert cooldown in minutes; 0 disables it
    #[serde(default = "default_warning_interval")]
    pub warning_interval_min: u64,
}

fn default_label() -> String {
    defaults::MONITOR_LABEL.to_string()
}
fn default_cycle_delay() -> u64 {
    defaults::CYCLE_DELAY_SECS
}
fn default_backlog_capacity() -> usize {
    defaults::BACKLOG_CAPACITY
}
fn default_warning_interval() -> u64 {
    defaults::WARNING_INTERVAL_MIN
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            label: default_label(),
            cycle_delay_secs: default_cycle_delay(),
            backlog_capacity: default_backlog_capacity(),
            on_call: Vec::new(),
            warning_interval_min: default_warning_interval(),
        }
    }
}

impl MonitorSection {
    pub fn cycle_delay(&self) -> Duration {
        Duration::from_secs(self.cycle_delay_secs)
    }

    pub fn warning_interval(&self) -> Duration {
        Duration::from_secs(self.warning_interval_min.saturating_mul(60))
    }
}

// ============================================================================
// [correlation]
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct CorrelationConfig {
    /// Match readings to run records and publish them
    #[serde(default)]
    pub enabled: bool,

    /// Expected `event_time − reading_time` in seconds (may be negative)
    #[serde(default = "default_ideal_offset")]
    pub ideal_offset_secs: f64,

    /// Largest accepted deviation from the ideal offset in seconds
    #[serde(default = "default_tolerance")]
    pub tolerance_secs: f64,

    /// Alert once per run when candidates exist but none is within tolerance
    #[serde(default = "default_true")]
    pub alert_on_miss: bool,
}

fn default_ideal_offset() -> f64 {
    defaults::READ_RUN_TIME_OFFSET_SECS
}
fn default_tolerance() -> f64 {
    defaults::MAX_TIME_DIFF_TOLERANCE_SECS
}
fn default_true() -> bool {
    true
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ideal_offset_secs: default_ideal_offset(),
            tolerance_secs: default_tolerance(),
            alert_on_miss: true,
        }
    }
}

// ============================================================================
// [hysteresis]
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HysteresisConfig {
    #[serde(default)]
    pub read_error: ReadErrorPolicyConfig,

    #[serde(default)]
    pub threshold: ThresholdPolicyConfig,
}

/// `[hysteresis.read_error]`
#[derive(Debug, Clone, Deserialize)]
pub struct ReadErrorPolicyConfig {
    #[serde(default = "default_patience")]
    pub patience: u32,

    #[serde(default = "default_error_reupdate")]
    pub reupdate_interval_secs: u64,
}

/// `[hysteresis.threshold]`
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdPolicyConfig {
    #[serde(default = "default_patience")]
    pub patience: u32,

    #[serde(default = "default_threshold_reupdate")]
    pub reupdate_interval_secs: u64,
}

fn default_patience() -> u32 {
    defaults::PATIENCE
}
fn default_error_reupdate() -> u64 {
    defaults::ERROR_REUPDATE_INTERVAL_SECS
}
fn default_threshold_reupdate() -> u64 {
    defaults::THRESHOLD_REUPDATE_INTERVAL_SECS
}

impl Default for ReadErrorPolicyConfig {
    fn default() -> Self {
        Self {
            patience: default_patience(),
            reupdate_interval_secs: default_error_reupdate(),
        }
    }
}

impl Default for ThresholdPolicyConfig {
    fn default() -> Self {
        Self {
            patience: default_patience(),
            reupdate_interval_secs: default_threshold_reupdate(),
        }
    }
}

impl HysteresisConfig {
    pub fn read_error_policy(&self) -> HysteresisPolicy {
        HysteresisPolicy::new(
            self.read_error.patience,
            Duration::from_secs(self.read_error.reupdate_interval_secs),
        )
    }

    pub fn threshold_policy(&self) -> HysteresisPolicy {
        HysteresisPolicy::new(
            self.threshold.patience,
            Duration::from_secs(self.threshold.reupdate_interval_secs),
        )
    }
}

// ============================================================================
// [watchdog]
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Upper bound on one instrument read
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Upper bound on one latest-run fetch
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_read_timeout() -> u64 {
    defaults::READ_TIMEOUT_SECS
}
fn default_fetch_timeout() -> u64 {
    defaults::FETCH_TIMEOUT_SECS
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

impl WatchdogConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

// ============================================================================
// [records]
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RecordsConfig {
    /// Service root, e.g. `http://records.lab.local/api`
    #[serde(default)]
    pub base_url: String,

    /// Lab identifier used to select the latest run
    #[serde(default)]
    pub lab: String,

    /// Token sent as `Authorization: Token <key>`; `SENTINEL_RECORDS_KEY` overrides
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_records_timeout")]
    pub http_timeout_secs: u64,
}

fn default_fetch_retries() -> u32 {
    defaults::FETCH_MAX_RETRIES
}
fn default_retry_base_ms() -> u64 {
    defaults::FETCH_RETRY_BASE_MS
}
fn default_records_timeout() -> u64 {
    defaults::RECORDS_HTTP_TIMEOUT_SECS
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            lab: String::new(),
            api_key: None,
            max_retries: default_fetch_retries(),
            retry_base_ms: default_retry_base_ms(),
            http_timeout_secs: default_records_timeout(),
        }
    }
}

// ============================================================================
// [slack]
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackConfig {
    /// Deliver alerts to Slack; otherwise they are only logged
    #[serde(default)]
    pub enabled: bool,

    /// Bot token; `SLACK_BOT_TOKEN` overrides
    #[serde(default)]
    pub token: Option<String>,

    /// Channel id or name
    #[serde(default)]
    pub channel: String,
}

// ============================================================================
// [[instruments]]
// ============================================================================

/// One polled instrument.
///
/// With `command` set, the driver command is run each cycle and must print a
/// JSON object of channel values. Without it, values are read from stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    pub name: String,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// `[[instruments.channels]]`
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// `VALNAME_in_UNITNAME`
    pub key: String,

    /// Alert when the value is strictly above this
    #[serde(default)]
    pub threshold: Option<f64>,
}
