//! Instrument readings and channel keys

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// One cycle's channel snapshot: channel key → value.
///
/// A NaN value marks the channel as unavailable for this cycle. Unavailable
/// channels are never thresholded or published.
pub type Readings = BTreeMap<String, f64>;

/// Channel keys returned as unavailable (NaN) in a snapshot, in key order.
pub fn unavailable_channels(readings: &Readings) -> Vec<String> {
    readings
        .iter()
        .filter(|(_, value)| value.is_nan())
        .map(|(key, _)| key.clone())
        .collect()
}

fn channel_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<name>\S.*?)_in_(?P<unit>[^\s_]+)$")
            .expect("channel key pattern is a valid regex")
    })
}

/// Errors raised while interpreting a channel key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelKeyError {
    #[error("'{0}' is not in the form VALNAME_in_UNITNAME")]
    Malformed(String),
}

/// A channel key split into its value name and unit.
///
/// `pressure_in_torr` → name `pressure`, unit `torr`. The unit is the part
/// after the last `_in_`, so `NaMOT_Top_mean_in_mv` keeps its underscores
/// in the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    pub name: String,
    pub unit: String,
}

impl ChannelKey {
    pub fn parse(key: &str) -> Result<Self, ChannelKeyError> {
        let captures = channel_key_pattern()
            .captures(key)
            .ok_or_else(|| ChannelKeyError::Malformed(key.to_string()))?;
        Ok(Self {
            name: captures["name"].to_string(),
            unit: captures["unit"].to_string(),
        })
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_in_{}", self.name, self.unit)
    }
}

/// A single time-stamped instrument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub name: String,
    pub unit: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Build a reading from a raw channel key such as `pressure_in_torr`.
    pub fn from_channel(
        key: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ChannelKeyError> {
        let ChannelKey { name, unit } = ChannelKey::parse(key)?;
        Ok(Self {
            name,
            unit,
            value,
            timestamp,
        })
    }

    /// The channel key this reading was recorded under.
    pub fn channel(&self) -> String {
        format!("{}_in_{}", self.name, self.unit)
    }

    /// NaN denotes "unavailable".
    pub fn is_available(&self) -> bool {
        !self.value.is_nan()
    }
}
