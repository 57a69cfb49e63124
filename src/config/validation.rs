//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range/consistency checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree (including arrays of tables such as `[[instruments]]`),
//! compare against known field names, and emit warnings with "did you mean?"
//! suggestions. Then proceed with normal serde deserialization.

use super::defaults::MAX_INTERVAL_SECS;
use super::MonitorConfig;
use crate::types::ChannelKey;
use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

impl ValidationWarning {
    fn suspicious(field: &str, message: String) -> Self {
        Self {
            field: field.to_string(),
            message,
            suggestion: None,
        }
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `MonitorConfig`.
///
/// Array-of-table entries share their parent's path, so
/// `[[instruments.channels]] key` is `instruments.channels.key`.
/// Any new field added to `MonitorConfig` must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [monitor]
        "monitor",
        "monitor.label",
        "monitor.cycle_delay_secs",
        "monitor.backlog_capacity",
        "monitor.on_call",
        "monitor.warning_interval_min",
        // [correlation]
        "correlation",
        "correlation.enabled",
        "correlation.ideal_offset_secs",
        "correlation.tolerance_secs",
        "correlation.alert_on_miss",
        // [hysteresis]
        "hysteresis",
        "hysteresis.read_error",
        "hysteresis.read_error.patience",
        "hysteresis.read_error.reupdate_interval_secs",
        "hysteresis.threshold",
        "hysteresis.threshold.patience",
        "hysteresis.threshold.reupdate_interval_secs",
        // [watchdog]
        "watchdog",
        "watchdog.read_timeout_secs",
        "watchdog.fetch_timeout_secs",
        // [records]
        "records",
        "records.base_url",
        "records.lab",
        "records.api_key",
        "records.max_retries",
        "records.retry_base_ms",
        "records.http_timeout_secs",
        // [slack]
        "slack",
        "slack.enabled",
        "slack.token",
        "slack.channel",
        // [[instruments]]
        "instruments",
        "instruments.name",
        "instruments.command",
        "instruments.args",
        "instruments.channels",
        "instruments.channels.key",
        "instruments.channels.threshold",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`. Tables inside arrays are walked under the
/// array's own path. Duplicates are removed, first occurrence kept.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    collect_keys(value, prefix, &mut keys);
    let mut seen = HashSet::new();
    keys.retain(|k| seen.insert(k.clone()));
    keys
}

fn collect_keys(value: &toml::Value, prefix: &str, keys: &mut Vec<String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                keys.push(path.clone());
                collect_keys(v, &path, keys);
            }
        }
        toml::Value::Array(items) => {
            for item in items.iter().filter(|v| v.is_table()) {
                collect_keys(item, prefix, keys);
            }
        }
        _ => {}
    }
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by(|(ka, da), (kb, db)| da.cmp(db).then_with(|| ka.cmp(kb)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new(); // parse errors are reported by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Range and Consistency Validation
// ============================================================================

/// Validate ranges and cross-field consistency on a parsed config.
///
/// Returns (errors, warnings). Errors are values the monitor cannot run
/// with; warnings are suspicious but not fatal.
pub fn validate_ranges(config: &MonitorConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let m = &config.monitor;
    if m.label.trim().is_empty() {
        errors.push("monitor.label must not be empty".to_string());
    }
    if m.cycle_delay_secs == 0 {
        errors.push("monitor.cycle_delay_secs must be > 0".to_string());
    }
    if m.backlog_capacity == 0 {
        errors.push("monitor.backlog_capacity must be >= 1".to_string());
    }
    if m.warning_interval_min == 0 {
        warnings.push(ValidationWarning::suspicious(
            "monitor.warning_interval_min",
            "monitor.warning_interval_min = 0 disables the alert cooldown".to_string(),
        ));
    }

    let h = &config.hysteresis;
    if h.read_error.patience == 0 {
        errors.push("hysteresis.read_error.patience must be >= 1".to_string());
    }
    if h.threshold.patience == 0 {
        errors.push("hysteresis.threshold.patience must be >= 1".to_string());
    }

    validate_intervals(config, &mut errors);

    let w = &config.watchdog;
    if w.read_timeout_secs == 0 {
        errors.push("watchdog.read_timeout_secs must be > 0".to_string());
    }
    if w.fetch_timeout_secs == 0 {
        errors.push("watchdog.fetch_timeout_secs must be > 0".to_string());
    }

    validate_correlation(config, &mut errors, &mut warnings);
    validate_instruments(config, &mut errors, &mut warnings);

    if config.slack.enabled && config.slack.channel.trim().is_empty() {
        errors.push("slack.channel must be set when slack.enabled = true".to_string());
    }

    (errors, warnings)
}

/// Every interval and timeout must fit within [`MAX_INTERVAL_SECS`].
fn validate_intervals(config: &MonitorConfig, errors: &mut Vec<String>) {
    let intervals = [
        ("monitor.cycle_delay_secs", config.monitor.cycle_delay_secs),
        (
            "monitor.warning_interval_min",
            config.monitor.warning_interval_min.saturating_mul(60),
        ),
        (
            "hysteresis.read_error.reupdate_interval_secs",
            config.hysteresis.read_error.reupdate_interval_secs,
        ),
        (
            "hysteresis.threshold.reupdate_interval_secs",
            config.hysteresis.threshold.reupdate_interval_secs,
        ),
        ("watchdog.read_timeout_secs", config.watchdog.read_timeout_secs),
        ("watchdog.fetch_timeout_secs", config.watchdog.fetch_timeout_secs),
        ("records.http_timeout_secs", config.records.http_timeout_secs),
    ];
    for (field, secs) in intervals {
        if secs > MAX_INTERVAL_SECS {
            errors.push(format!(
                "{field} exceeds the maximum of one week ({MAX_INTERVAL_SECS} s)"
            ));
        }
    }
}

fn validate_correlation(
    config: &MonitorConfig,
    errors: &mut Vec<String>,
    warnings: &mut Vec<ValidationWarning>,
) {
    let c = &config.correlation;
    if !c.ideal_offset_secs.is_finite() {
        errors.push(format!(
            "correlation.ideal_offset_secs = {} must be finite",
            c.ideal_offset_secs
        ));
    }
    // NaN fails both comparisons, so test for the valid range instead
    if !(c.tolerance_secs.is_finite() && c.tolerance_secs >= 0.0) {
        errors.push(format!(
            "correlation.tolerance_secs = {} must be a finite value >= 0",
            c.tolerance_secs
        ));
    }

    if !c.enabled {
        return;
    }
    if config.records.base_url.trim().is_empty() {
        errors.push("records.base_url must be set when correlation.enabled = true".to_string());
    }
    if config.records.lab.trim().is_empty() {
        errors.push("records.lab must be set when correlation.enabled = true".to_string());
    }
    if config.records.max_retries == 0 {
        errors.push("records.max_retries must be >= 1".to_string());
    }

    // The backlog must reach back past the ideal lead or nothing can match
    let span = config.monitor.backlog_capacity as f64 * config.monitor.cycle_delay_secs as f64;
    if c.ideal_offset_secs.is_finite() && c.ideal_offset_secs > span {
        warnings.push(ValidationWarning::suspicious(
            "correlation.ideal_offset_secs",
            format!(
                "correlation.ideal_offset_secs = {:.1} exceeds the backlog span ({span:.0} s); no reading can match",
                c.ideal_offset_secs
            ),
        ));
    }
}

fn validate_instruments(
    config: &MonitorConfig,
    errors: &mut Vec<String>,
    warnings: &mut Vec<ValidationWarning>,
) {
    if config.instruments.is_empty() {
        warnings.push(ValidationWarning::suspicious(
            "instruments",
            "No [[instruments]] configured; the monitor will only correlate and alert on nothing"
                .to_string(),
        ));
    }

    let mut names = HashSet::new();
    let mut keys = HashSet::new();
    let mut stdin_fed = 0usize;

    for (idx, instrument) in config.instruments.iter().enumerate() {
        if instrument.name.trim().is_empty() {
            errors.push(format!("instruments[{idx}].name must not be empty"));
        } else if !names.insert(instrument.name.as_str()) {
            errors.push(format!("Duplicate instrument name '{}'", instrument.name));
        }

        match instrument.command.as_deref() {
            None => stdin_fed += 1,
            Some(cmd) if cmd.trim().is_empty() => errors.push(format!(
                "instruments '{}': command must not be empty",
                instrument.name
            )),
            Some(_) => {}
        }

        if instrument.channels.is_empty() {
            warnings.push(ValidationWarning::suspicious(
                "instruments.channels",
                format!(
                    "Instrument '{}' declares no channels; every well-formed key it reports is accepted without a threshold",
                    instrument.name
                ),
            ));
        }

        for channel in &instrument.channels {
            if let Err(e) = ChannelKey::parse(&channel.key) {
                errors.push(format!("instruments '{}': {e}", instrument.name));
            }
            if !keys.insert(channel.key.as_str()) {
                errors.push(format!("Duplicate channel key '{}'", channel.key));
            }
            if let Some(t) = channel.threshold {
                if !t.is_finite() {
                    errors.push(format!(
                        "Threshold for '{}' must be finite (got {t})",
                        channel.key
                    ));
                }
            }
        }
    }

    if stdin_fed > 1 {
        errors.push(format!(
            "{stdin_fed} instruments have no command; only one can read from stdin"
        ));
    }
}

// ============================================================================
// Tests
// ============================================================================
