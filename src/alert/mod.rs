//! Alert delivery with a per-monitor cooldown
//!
//! Hysteresis decides *whether* something alert-worthy happened; the
//! [`Alerter`] decides whether the resulting message goes out now or is
//! dropped because another alert went out less than `warning_interval` ago.
//! Paging alerts carry on-call mentions but obey the same cooldown.

pub mod messages;
pub mod slack;

pub use messages::MessageCatalog;
pub use slack::SlackSink;

use crate::clock::Clock;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Alert delivery errors
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned status {0}")]
    ServerError(reqwest::StatusCode),
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Where alert text ends up (chat channel, log, test buffer).
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, text: &str) -> Result<(), AlertError>;

    /// Human-readable name for logging.
    fn sink_name(&self) -> &str;
}

/// Sink that only writes to the log. Used when no chat channel is set up.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn send_alert(&self, text: &str) -> Result<(), AlertError> {
        warn!(alert = %text, "ALERT");
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "log"
    }
}

/// How loudly an alert should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Plain message.
    Notice,
    /// Prefixed with on-call mentions.
    Page,
}

/// What happened to one alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Dropped by the cooldown; `since` is the time since the last dispatch.
    Suppressed { since: Duration },
    /// The sink failed. The failure is logged and swallowed.
    Failed(String),
}

/// Render `<@ID>` mentions for chat paging.
pub fn mention_prefix(on_call: &[String]) -> String {
    on_call.iter().map(|id| format!("<@{id}>")).collect()
}

/// Counters kept by the alerter for shutdown logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertStats {
    pub sent: u64,
    pub suppressed: u64,
    pub failed: u64,
}

/// Cooldown-gated alert dispatcher, one per monitor.
pub struct Alerter {
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    warning_interval: Duration,
    on_call: Vec<String>,
    last_sent: Option<Instant>,
    stats: AlertStats,
}

impl Alerter {
    pub fn new(
        sink: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        warning_interval: Duration,
        on_call: Vec<String>,
    ) -> Self {
        Self {
            sink,
            clock,
            warning_interval,
            on_call,
            last_sent: None,
            stats: AlertStats::default(),
        }
    }

    pub fn stats(&self) -> AlertStats {
        self.stats
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    /// Final text for `text` at `severity`.
    pub fn render(&self, text: &str, severity: Severity) -> String {
        match severity {
            Severity::Page if !self.on_call.is_empty() => {
                format!("{} {text}", mention_prefix(&self.on_call))
            }
            _ => text.to_string(),
        }
    }

    /// Send unless another alert went out within the warning interval.
    ///
    /// A zero interval disables the cooldown.
    pub async fn dispatch(&mut self, text: &str, severity: Severity) -> DispatchOutcome {
        let rendered = self.render(text, severity);
        let now = self.clock.now();

        if let Some(last) = self.last_sent {
            let since = now.saturating_duration_since(last);
            if !self.warning_interval.is_zero() && since <= self.warning_interval {
                self.stats.suppressed += 1;
                info!(
                    alert = %rendered,
                    minutes_since_last = since.as_secs_f64() / 60.0,
                    "Alert silenced by cooldown"
                );
                return DispatchOutcome::Suppressed { since };
            }
        }

        self.deliver(&rendered, now).await
    }

    /// Send regardless of the cooldown. Reserved for the shutdown notice.
    pub async fn dispatch_forced(&mut self, text: &str, severity: Severity) -> DispatchOutcome {
        let rendered = self.render(text, severity);
        let now = self.clock.now();
        self.deliver(&rendered, now).await
    }

    async fn deliver(&mut self, rendered: &str, now: Instant) -> DispatchOutcome {
        info!(alert = %rendered, sink = self.sink.sink_name(), "Dispatching alert");
        // Cooldown starts on the attempt, not on confirmed delivery
        self.last_sent = Some(now);
        match self.sink.send_alert(rendered).await {
            Ok(()) => {
                self.stats.sent += 1;
                DispatchOutcome::Sent
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!(error = %e, sink = self.sink.sink_name(), "Alert delivery failed");
                DispatchOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl AlertSink for Recorder {
        async fn send_alert(&self, text: &str) -> Result<(), AlertError> {
            self.sent.lock().unwrap().push(text.to_string());
            if self.fail {
                Err(AlertError::Rejected("channel_not_found".into()))
            } else {
                Ok(())
            }
        }

        fn sink_name(&self) -> &str {
            "recorder"
        }
    }

    fn alerter(recorder: &Arc<Recorder>, clock: &Arc<ManualClock>, minutes: u64) -> Alerter {
        Alerter::new(
            recorder.clone(),
            clock.clone(),
            Duration::from_secs(minutes * 60),
            vec!["U1".to_string(), "U2".to_string()],
        )
    }

    #[tokio::test]
    async fn second_alert_inside_window_is_dropped() {
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut alerter = alerter(&recorder, &clock, 10);

        assert_eq!(alerter.dispatch("first", Severity::Notice).await, DispatchOutcome::Sent);
        clock.advance(Duration::from_secs(120));
        assert!(matches!(
            alerter.dispatch("second", Severity::Page).await,
            DispatchOutcome::Suppressed { .. }
        ));

        assert_eq!(recorder.sent.lock().unwrap().as_slice(), ["first"]);
        assert_eq!(alerter.stats().suppressed, 1);
    }

    #[tokio::test]
    async fn window_reopens_after_interval() {
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut alerter = alerter(&recorder, &clock, 10);

        alerter.dispatch("first", Severity::Notice).await;
        clock.advance(Duration::from_secs(10 * 60 + 1));
        assert_eq!(alerter.dispatch("second", Severity::Notice).await, DispatchOutcome::Sent);
        assert_eq!(recorder.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn paging_alerts_carry_mentions() {
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut alerter = alerter(&recorder, &clock, 10);

        alerter.dispatch("VACUUM_ERROR: pump", Severity::Page).await;
        assert_eq!(
            recorder.sent.lock().unwrap()[0],
            "<@U1><@U2> VACUUM_ERROR: pump"
        );
    }

    #[tokio::test]
    async fn forced_dispatch_ignores_cooldown() {
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut alerter = alerter(&recorder, &clock, 10);

        alerter.dispatch("first", Severity::Notice).await;
        assert_eq!(
            alerter.dispatch_forced("shutdown", Severity::Page).await,
            DispatchOutcome::Sent
        );
        assert_eq!(recorder.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed_and_still_starts_cooldown() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut alerter = alerter(&recorder, &clock, 10);

        assert!(matches!(
            alerter.dispatch("first", Severity::Notice).await,
            DispatchOutcome::Failed(_)
        ));
        assert!(alerter.last_sent().is_some());
        assert!(matches!(
            alerter.dispatch("second", Severity::Notice).await,
            DispatchOutcome::Suppressed { .. }
        ));
        assert_eq!(alerter.stats().failed, 1);
    }

    #[tokio::test]
    async fn zero_interval_never_suppresses() {
        let recorder = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut alerter = alerter(&recorder, &clock, 0);

        for i in 0..3 {
            assert_eq!(
                alerter.dispatch(&format!("alert {i}"), Severity::Notice).await,
                DispatchOutcome::Sent
            );
        }
    }
}
