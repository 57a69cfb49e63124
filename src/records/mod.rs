//! Run-record store capabilities
//!
//! The record store is the authoritative timeline: it hands out the newest
//! run record and accepts instrument readouts attached to a run.
//!
//! - **EventSource**: newest run record, retried by the adapter
//! - **RecordSink**: attach one reading to one run
//! - **HttpRecordClient**: REST implementation of both

pub mod http;

pub use http::{HttpRecordClient, RecordClientError};

use crate::types::RunEvent;
use async_trait::async_trait;
use std::time::Duration;

/// Failure to obtain the newest run record.
///
/// Every variant is transient: the monitor logs it and tries again next
/// cycle instead of shutting down.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record store returned an unreadable run: {0}")]
    Malformed(String),
    #[error("record store returned no runs")]
    Empty,
    #[error("run fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// The sink rejected a reading. `detail` is shown to operators verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct PublishError {
    pub detail: String,
}

impl PublishError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Source of authoritative run records.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Newest run record.
    async fn latest_event(&self) -> Result<RunEvent, FetchError>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

/// Destination for readings associated with a run.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn publish_reading(
        &self,
        event_id: u64,
        name: &str,
        value: f64,
    ) -> Result<(), PublishError>;
}
