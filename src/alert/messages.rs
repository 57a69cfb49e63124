//! Alert text templates
//!
//! Every message starts with `{LABEL}_{KIND}:` so channel readers and log
//! searches can tell monitors and alert kinds apart at a glance.

use super::Severity;
use crate::hysteresis::Transition;
use crate::thresholds::{describe, format_value, Violation};
use chrono::{DateTime, Utc};

/// Message builder for one monitor label.
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    label: String,
}

impl MessageCatalog {
    /// `label` is upper-cased and spaces become underscores.
    pub fn new(label: &str) -> Self {
        Self {
            label: label.trim().to_uppercase().replace(' ', "_"),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Severity of a hysteresis edge: only raising pages on-call.
    pub fn severity(transition: Transition) -> Severity {
        match transition {
            Transition::Raised => Severity::Page,
            Transition::Persists | Transition::Resolved => Severity::Notice,
        }
    }

    pub fn read_error(&self, transition: Transition, failing: &[String]) -> String {
        let list = failing.join(", ");
        let label = &self.label;
        match transition {
            Transition::Raised => format!(
                "{label}_ERROR: The {} monitor is unable to read from the following: {list}",
                self.lower_label()
            ),
            Transition::Persists => format!(
                "{label}_ERROR_UPDATE: The reading error persists. Unable to read from the following: {list}"
            ),
            Transition::Resolved => {
                format!("{label}_ERROR_RESOLVED: The outstanding reading error has been resolved.")
            }
        }
    }

    pub fn threshold(&self, transition: Transition, violations: &[Violation]) -> String {
        let list = describe(violations);
        let label = &self.label;
        match transition {
            Transition::Raised => format!(
                "{label}_THRESHOLD_EXCEEDED: The following readings are above threshold: {list}"
            ),
            Transition::Persists => format!(
                "{label}_THRESHOLD_UPDATE: The following values are still above threshold: {list}"
            ),
            Transition::Resolved => format!(
                "{label}_THRESHOLD_RESOLVED: The outstanding threshold warning has been resolved. All values below threshold."
            ),
        }
    }

    /// A run record came in with no backlog entry close enough to its lead time.
    pub fn correlation_miss(&self, event_id: u64, deviation_secs: f64, tolerance_secs: f64) -> String {
        format!(
            "{}_CORRELATION_MISS: Time difference {} sec between reading and run {event_id} exceeds max tolerance of {} sec. Check the run record client.",
            self.label,
            format_value(deviation_secs.abs()),
            format_value(tolerance_secs)
        )
    }

    pub fn upload_failed(
        &self,
        name: &str,
        value: f64,
        taken_at: DateTime<Utc>,
        event_id: u64,
        detail: &str,
    ) -> String {
        format!(
            "{}_UPLOAD_ERROR: Error uploading {name} = {} from {} to run_id {event_id}. Error text: {detail}",
            self.label,
            format_value(value),
            taken_at.format("%Y-%m-%d %H:%M:%S")
        )
    }

    pub fn shutdown(&self, reason: &str) -> String {
        format!(
            "{}_MONITOR_SHUTDOWN: An error has stopped the {} monitor: {reason}",
            self.label,
            self.lower_label()
        )
    }

    fn lower_label(&self) -> String {
        self.label.to_lowercase().replace('_', " ")
    }
}
