//! Monitoring Pipeline Module
//!
//! ```text
//! Instrument::read (per instrument, under watchdog)
//!        │
//!        ▼
//! Monitor::run_cycle ── backlog, hysteresis, thresholds, correlation
//!        │
//!        ▼
//! ProcessingLoop ── fixed delay between cycles, cancellation, shutdown alert
//! ```

mod monitor;
pub mod processing_loop;
pub mod source;

pub use monitor::{CorrelationOutcome, CycleReport, Monitor, MonitorError, MonitorStats};
pub use processing_loop::ProcessingLoop;
pub use source::{ChannelInstrument, CommandInstrument, DeviceError, Instrument};
