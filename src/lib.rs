//! Status Sentinel: instrument telemetry correlation and alerting
//!
//! Polls laboratory instruments on a fixed cycle, attaches each reading to
//! the run record it belongs to, and turns persistent faults into debounced,
//! rate-limited chat alerts.
//!
//! ## Architecture
//!
//! - **Backlog**: bounded FIFO of recent cycle snapshots
//! - **Correlation**: picks the backlog entry that precedes a run by the expected lead
//! - **Upload Gate**: at most one successful publish per (run, reading)
//! - **Thresholds / Hysteresis**: violations and read errors become raise/persist/resolve edges
//! - **Alert**: cooldown-gated delivery with on-call paging
//! - **Pipeline**: instruments, the monitor engine and the cycle loop

pub mod alert;
pub mod backlog;
pub mod clock;
pub mod config;
pub mod correlation;
pub mod hysteresis;
pub mod pipeline;
pub mod records;
pub mod thresholds;
pub mod types;
pub mod upload;

// Re-export configuration
pub use config::MonitorConfig;

// Re-export commonly used types
pub use types::{ChannelKey, Reading, Readings, RunEvent};

// Re-export the engine
pub use backlog::{Backlog, BacklogEntry, Snapshot};
pub use correlation::{correlate, Correlation, CorrelationResult};
pub use hysteresis::{HysteresisMachine, HysteresisPolicy, Transition};
pub use pipeline::{CycleReport, Monitor, MonitorStats, ProcessingLoop};
pub use thresholds::{evaluate, ThresholdSet, Violation};
pub use upload::{PublishOutcome, UploadGate};
