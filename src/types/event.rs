//! Authoritative run records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A run record from the external record store.
///
/// Immutable once fetched. Ids are monotonically non-decreasing but not
/// necessarily contiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub event_id: u64,
    pub event_time: DateTime<Utc>,
    /// Run parameters and any readouts already attached to the run.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RunEvent {
    pub fn new(event_id: u64, event_time: DateTime<Utc>) -> Self {
        Self {
            event_id,
            event_time,
            fields: Map::new(),
        }
    }

    /// Attach a field (builder style, used by record adapters and tests).
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Whether the record already carries a value under `name`.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}
