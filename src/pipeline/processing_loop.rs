//! Fixed-interval cycle loop around a [`Monitor`].
//!
//! A cycle always runs to completion; cancellation is only observed while
//! sleeping between cycles. A fatal device error sends the shutdown alert
//! and ends the loop with an error.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::monitor::{CorrelationOutcome, CycleReport, Monitor, MonitorStats};

// ============================================================================
// Processing Loop
// ============================================================================

/// Owns the monitor for the lifetime of the loop.
///
/// Built with [`new()`](ProcessingLoop::new), optionally switched to a
/// single cycle with [`once()`](ProcessingLoop::once), then consumed by
/// [`run()`](ProcessingLoop::run).
pub struct ProcessingLoop {
    monitor: Monitor,
    cycle_delay: Duration,
    cancel_token: CancellationToken,
    single_cycle: bool,
}

impl ProcessingLoop {
    pub fn new(monitor: Monitor, cycle_delay: Duration, cancel_token: CancellationToken) -> Self {
        Self {
            monitor,
            cycle_delay,
            cancel_token,
            single_cycle: false,
        }
    }

    /// Stop after the first cycle.
    pub fn once(mut self) -> Self {
        self.single_cycle = true;
        self
    }

    /// Run cycles until cancellation, a single cycle, or a fatal error.
    ///
    /// Returns final monitor statistics.
    pub async fn run(mut self) -> anyhow::Result<MonitorStats> {
        info!(
            label = self.monitor.label(),
            instruments = self.monitor.instrument_count(),
            cycle_delay_secs = self.cycle_delay.as_secs(),
            "Monitor started"
        );

        loop {
            match self.monitor.run_cycle().await {
                Ok(report) => log_report(&report),
                Err(e) => {
                    error!(error = %e, "Monitor stopping on fatal error");
                    self.monitor.shutdown(&e.to_string()).await;
                    log_stats(&self.monitor.stats());
                    return Err(e.into());
                }
            }

            if self.single_cycle {
                break;
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }
                () = tokio::time::sleep(self.cycle_delay) => {}
            }
        }

        let stats = self.monitor.stats();
        log_stats(&stats);
        Ok(stats)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Log the notable parts of a cycle at info; the full report is at debug
/// inside the monitor.
fn log_report(report: &CycleReport) {
    for (class, transition) in &report.transitions {
        info!(class, transition = ?transition, "Alert class changed state");
    }
    if let Some(CorrelationOutcome::Matched {
        event_id,
        offset_from_ideal_secs,
    }) = &report.correlation
    {
        if !report.publishes.is_empty() {
            info!(
                event_id,
                offset_from_ideal_secs,
                publishes = report.publishes.len(),
                "Correlated readings with run"
            );
        }
    }
}

fn log_stats(stats: &MonitorStats) {
    info!(
        cycles = stats.cycles,
        uploads = stats.uploads,
        alerts_sent = stats.alerts_sent,
        alerts_suppressed = stats.alerts_suppressed,
        alerts_failed = stats.alerts_failed,
        "Monitor statistics"
    );
}
