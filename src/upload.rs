//! Upload Gate - at most one successful publish per (run, reading) pair
//!
//! Every monitor cycle rediscovers the same best match until a newer run
//! supersedes it, so the gate remembers which keys the record store has
//! already confirmed. Failed publishes are not remembered and will be
//! retried on a later cycle if the match still stands.

use crate::records::RecordSink;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Result of [`UploadGate::publish_if_new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    AlreadyPublished,
    Failed(String),
}

/// Set of `(event_id, reading_name)` keys confirmed by the record store.
///
/// Grows for the life of the process; run ids advance at experiment
/// cadence, so the set stays small.
#[derive(Debug, Clone, Default)]
pub struct UploadGate {
    published: HashSet<(u64, String)>,
}

impl UploadGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_published(&self, event_id: u64, reading_name: &str) -> bool {
        self.published
            .contains(&(event_id, reading_name.to_string()))
    }

    /// Record a key as published without calling the sink, e.g. when the
    /// fetched run already carries the reading.
    pub fn mark_published(&mut self, event_id: u64, reading_name: &str) {
        self.published.insert((event_id, reading_name.to_string()));
    }

    pub fn len(&self) -> usize {
        self.published.len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty()
    }

    /// Publish `value` for `(event_id, reading_name)` unless already done.
    pub async fn publish_if_new(
        &mut self,
        event_id: u64,
        reading_name: &str,
        value: f64,
        sink: &dyn RecordSink,
    ) -> PublishOutcome {
        if self.is_published(event_id, reading_name) {
            debug!(event_id, reading = reading_name, "Reading already published");
            return PublishOutcome::AlreadyPublished;
        }

        match sink.publish_reading(event_id, reading_name, value).await {
            Ok(()) => {
                self.mark_published(event_id, reading_name);
                debug!(event_id, reading = reading_name, value, "Reading published");
                PublishOutcome::Published
            }
            Err(e) => {
                warn!(event_id, reading = reading_name, error = %e, "Publish failed, will retry");
                PublishOutcome::Failed(e.detail)
            }
        }
    }
}
