//! Config Validation Tests
//!
//! Typo detection and range/consistency validation for `sentinel.toml`,
//! exercised through the public config API the binary uses.

use status_sentinel::config::validation::{
    known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys,
};
use status_sentinel::config::{ConfigError, MonitorConfig};
use std::time::Duration;

const FULL_CONFIG: &str = r##"
[monitor]
label = "vacuum"
cycle_delay_secs = 5
backlog_capacity = 30
on_call = ["U012AB3CD"]
warning_interval_min = 10

[correlation]
enabled = true
ideal_offset_secs = 3.0
tolerance_secs = 15.0

[hysteresis.read_error]
patience = 3
reupdate_interval_secs = 1800

[hysteresis.threshold]
patience = 3
reupdate_interval_secs = 600

[records]
base_url = "https://records.example.org/api"
lab = "strontium"

[slack]
enabled = false
channel = "#vacuum-alerts"

[[instruments]]
name = "ion_gauges"
command = "read-ion-gauges"
args = ["--port", "/dev/ttyUSB0"]

[[instruments.channels]]
key = "science_in_torr"
threshold = 1e-9

[[instruments.channels]]
key = "load_lock_in_torr"
threshold = 5e-7
"##;

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn full_config_has_no_unknown_keys() {
    let warnings = validate_unknown_keys(FULL_CONFIG);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
}

#[test]
fn typo_in_section_key_warns_with_suggestion() {
    let toml_str = r#"
[monitor]
warning_intervall_min = 10
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "monitor.warning_intervall_min");
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("monitor.warning_interval_min")
    );
}

#[test]
fn typo_inside_array_of_tables_is_caught() {
    let toml_str = r#"
[[instruments]]
name = "gauges"

[[instruments.channels]]
key = "science_in_torr"
treshold = 1e-9
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(
        warnings[0].suggestion.as_deref(),
        Some("instruments.channels.threshold")
    );
    assert!(warnings[0].to_string().contains("did you mean"));
}

#[test]
fn completely_unknown_section_has_no_suggestion() {
    let warnings = validate_unknown_keys("[telemetry_export]\nendpoint = \"x\"\n");
    assert!(!warnings.is_empty());
    assert!(warnings.iter().all(|w| w.suggestion.is_none()));
}

#[test]
fn every_known_key_suggests_itself() {
    let known = known_config_keys();
    for key in &known {
        assert_eq!(suggest_correction(key, &known).as_deref(), Some(*key));
    }
}

#[test]
fn unknown_keys_do_not_fail_loading() {
    let toml_str = format!("{FULL_CONFIG}\n[slack_extra]\nmood = \"calm\"\n");
    assert!(MonitorConfig::from_toml_str(&toml_str).is_ok());
}

// ============================================================================
// Range and Consistency Validation
// ============================================================================

#[test]
fn full_config_loads_with_expected_values() {
    let config = MonitorConfig::from_toml_str(FULL_CONFIG).unwrap();

    assert_eq!(config.monitor.label, "vacuum");
    assert_eq!(config.monitor.warning_interval(), Duration::from_secs(600));
    assert_eq!(config.hysteresis.read_error_policy().patience, 3);
    assert_eq!(
        config.hysteresis.read_error_policy().reupdate_interval,
        Duration::from_secs(1800)
    );
    assert_eq!(config.instruments[0].args, vec!["--port", "/dev/ttyUSB0"]);

    let thresholds = config.thresholds();
    assert_eq!(thresholds.get("science_in_torr"), Some(1e-9));
    assert_eq!(
        config.channel_keys().collect::<Vec<_>>(),
        vec!["science_in_torr", "load_lock_in_torr"]
    );
}

#[test]
fn zero_patience_is_rejected() {
    let toml_str = FULL_CONFIG.replace("patience = 3\nreupdate_interval_secs = 600", "patience = 0\nreupdate_interval_secs = 600");
    match MonitorConfig::from_toml_str(&toml_str) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("hysteresis.threshold.patience"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn malformed_channel_key_is_rejected() {
    let toml_str = FULL_CONFIG.replace("load_lock_in_torr", "load_lock_torr");
    let err = MonitorConfig::from_toml_str(&toml_str).unwrap_err();
    assert!(err.to_string().contains("load_lock_torr"));
}

#[test]
fn duplicate_channel_across_instruments_is_rejected() {
    let toml_str = format!(
        "{FULL_CONFIG}
[[instruments]]
name = \"backup_gauge\"
command = \"read-backup\"

[[instruments.channels]]
key = \"science_in_torr\"
"
    );
    match MonitorConfig::from_toml_str(&toml_str) {
        Err(ConfigError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("Duplicate channel key 'science_in_torr'")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn correlation_without_record_store_is_rejected() {
    let mut config = MonitorConfig::from_toml_str(FULL_CONFIG).unwrap();
    config.records.base_url.clear();
    config.records.lab.clear();

    let (errors, _) = validate_ranges(&config);
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| e.contains("records.base_url")));
    assert!(errors.iter().any(|e| e.contains("records.lab")));

    config.correlation.enabled = false;
    let (errors, _) = validate_ranges(&config);
    assert!(errors.is_empty());
}

#[test]
fn negative_tolerance_is_rejected() {
    let mut config = MonitorConfig::from_toml_str(FULL_CONFIG).unwrap();
    config.correlation.tolerance_secs = -1.0;
    let (errors, _) = validate_ranges(&config);
    assert!(errors.iter().any(|e| e.contains("correlation.tolerance_secs")));
}

#[test]
fn ideal_offset_beyond_backlog_span_warns() {
    let mut config = MonitorConfig::from_toml_str(FULL_CONFIG).unwrap();
    config.correlation.ideal_offset_secs = 600.0;

    let (errors, warnings) = validate_ranges(&config);
    assert!(errors.is_empty());
    assert!(warnings
        .iter()
        .any(|w| w.field == "correlation.ideal_offset_secs"));
}

#[test]
fn disabled_cooldown_warns_but_loads() {
    let toml_str = FULL_CONFIG.replace("warning_interval_min = 10", "warning_interval_min = 0");
    let config = MonitorConfig::from_toml_str(&toml_str).unwrap();
    assert_eq!(config.monitor.warning_interval(), Duration::ZERO);

    let (_, warnings) = validate_ranges(&config);
    assert!(warnings
        .iter()
        .any(|w| w.field == "monitor.warning_interval_min"));
}

#[test]
fn enabled_slack_needs_a_channel() {
    let toml_str = FULL_CONFIG
        .replace("enabled = false", "enabled = true")
        .replace("channel = \"#vacuum-alerts\"", "channel = \"\"");
    match MonitorConfig::from_toml_str(&toml_str) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors, vec!["slack.channel must be set when slack.enabled = true"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn default_config_is_valid() {
    let (errors, _) = validate_ranges(&MonitorConfig::default());
    assert!(errors.is_empty(), "defaults must validate: {errors:?}");
}
