//! Event correlation: match a run record to the backlog entry that was
//! recorded the expected lead time before it.
//!
//! ## Offset convention
//!
//! `offset = event_time − reading_time`, in seconds. A positive offset means
//! the reading precedes the run record. `ideal_offset` uses the same sign: an
//! ideal offset of 3 s means "the reading should be taken about 3 s before
//! the run is stamped". A negative ideal offset is allowed for instruments
//! whose value is only available after the run record is written.
//!
//! Entries with `offset < ideal_offset` are never eligible: a reading that
//! lands closer to (or after) the run than the expected lead belongs to a
//! later run.

use crate::backlog::{BacklogEntry, Snapshot};
use crate::types::{Readings, RunEvent};
use chrono::{DateTime, Utc};

/// A successful association between a run and one backlog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationResult {
    pub event_id: u64,
    pub matched_timestamp: DateTime<Utc>,
    pub matched_readings: Readings,
    /// `offset − ideal_offset` in seconds; never negative.
    pub offset_from_ideal_secs: f64,
}

/// Outcome of [`correlate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Correlation {
    Matched(CorrelationResult),
    /// No eligible entry within tolerance. Carries the smallest deviation
    /// seen among eligible entries, or `+∞` when there were none.
    NoMatch { best_deviation_secs: f64 },
}

impl Correlation {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// Seconds from `reading_time` to `event_time`.
pub fn offset_secs(event_time: DateTime<Utc>, reading_time: DateTime<Utc>) -> f64 {
    let delta = event_time - reading_time;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Pick the backlog entry whose offset from `event` is closest to
/// `ideal_offset_secs`.
///
/// Linear scan over the snapshot, oldest first; the first entry wins ties.
/// A best deviation strictly greater than `tolerance_secs` is a miss.
pub fn correlate(
    backlog: &Snapshot,
    event: &RunEvent,
    ideal_offset_secs: f64,
    tolerance_secs: f64,
) -> Correlation {
    let mut best: Option<(f64, &BacklogEntry)> = None;

    for entry in backlog {
        let offset = offset_secs(event.event_time, entry.timestamp);
        if offset < ideal_offset_secs {
            continue;
        }
        let deviation = offset - ideal_offset_secs;
        match best {
            Some((best_dev, _)) if deviation >= best_dev => {}
            _ => best = Some((deviation, entry)),
        }
    }

    let Some((deviation, entry)) = best else {
        return Correlation::NoMatch {
            best_deviation_secs: f64::INFINITY,
        };
    };

    if deviation > tolerance_secs {
        return Correlation::NoMatch {
            best_deviation_secs: deviation,
        };
    }

    Correlation::Matched(CorrelationResult {
        event_id: event.event_id,
        matched_timestamp: entry.timestamp,
        matched_readings: entry.readings.clone(),
        offset_from_ideal_secs: deviation,
    })
}
