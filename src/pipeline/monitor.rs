//! Monitor engine: one cycle of read → backlog → hysteresis → correlate.
//!
//! The monitor owns every piece of mutable state (backlog, published keys,
//! alert class counters, cooldown) and is driven by exactly one task, so
//! none of it is locked. Collaborators are injected at construction.
//!
//! ```text
//! instruments ──read──► merged Readings ──► Backlog
//!                            │                 │
//!              NaN + failed  │  thresholds     │ snapshot
//!                  ▼         ▼                 ▼
//!            read-error   threshold       correlate(latest run)
//!            hysteresis   hysteresis           │
//!                  └────┬────┘                 ▼
//!                       ▼                 UploadGate ──► RecordSink
//!                    Alerter ──► AlertSink
//! ```

use super::source::{DeviceError, Instrument};
use crate::alert::{AlertSink, Alerter, DispatchOutcome, MessageCatalog, Severity};
use crate::backlog::Backlog;
use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::correlation::{correlate, Correlation};
use crate::hysteresis::{HysteresisMachine, Transition, READ_ERROR, THRESHOLD_EXCEEDED};
use crate::records::{EventSource, FetchError, RecordSink};
use crate::thresholds::{evaluate, ThresholdSet, Violation};
use crate::types::{unavailable_channels, Reading, Readings, RunEvent};
use crate::upload::{PublishOutcome, UploadGate};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error that ends the monitor.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("instrument '{instrument}' failed permanently: {detail}")]
    Fatal { instrument: String, detail: String },
}

/// What happened on the correlation side of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationOutcome {
    FetchFailed(String),
    /// The record store returned an older run than one already seen.
    StaleEvent { event_id: u64, latest_seen: u64 },
    Matched { event_id: u64, offset_from_ideal_secs: f64 },
    NoMatch { event_id: u64, best_deviation_secs: f64 },
}

/// Summary of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Channels read this cycle, NaN included.
    pub channels: usize,
    /// Failed instruments followed by unavailable channels.
    pub read_errors: Vec<String>,
    pub violations: Vec<Violation>,
    pub transitions: Vec<(&'static str, Transition)>,
    pub correlation: Option<CorrelationOutcome>,
    pub publishes: Vec<(String, PublishOutcome)>,
    pub alerts: Vec<DispatchOutcome>,
}

/// Counters over the monitor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub cycles: u64,
    pub uploads: u64,
    pub alerts_sent: u64,
    pub alerts_suppressed: u64,
    pub alerts_failed: u64,
}

/// Correlation collaborators and parameters.
struct CorrelationContext {
    source: Arc<dyn EventSource>,
    sink: Arc<dyn RecordSink>,
    ideal_offset_secs: f64,
    tolerance_secs: f64,
    alert_on_miss: bool,
    fetch_timeout: Duration,
    latest_event_id: Option<u64>,
    miss_alerted_for: Option<u64>,
    /// `(event_id, reading)` pairs whose upload failure was already alerted.
    upload_alerted: HashSet<(u64, String)>,
}

/// The correlation and hysteresis-alerting engine for one deployment.
pub struct Monitor {
    clock: Arc<dyn Clock>,
    instruments: Vec<Box<dyn Instrument>>,
    read_timeout: Duration,
    backlog: Backlog,
    thresholds: ThresholdSet,
    hysteresis: HysteresisMachine,
    gate: UploadGate,
    alerter: Alerter,
    catalog: MessageCatalog,
    correlation: Option<CorrelationContext>,
    config: MonitorConfig,
    cycles: u64,
    uploads: u64,
}

impl Monitor {
    /// Build a monitor from `config`. Instruments and the record store are
    /// attached with [`with_instrument`](Self::with_instrument) and
    /// [`with_correlation`](Self::with_correlation).
    pub fn new(config: &MonitorConfig, alert_sink: Arc<dyn AlertSink>, clock: Arc<dyn Clock>) -> Self {
        let hysteresis = HysteresisMachine::new(config.hysteresis.threshold_policy())
            .with_policy(READ_ERROR, config.hysteresis.read_error_policy())
            .with_policy(THRESHOLD_EXCEEDED, config.hysteresis.threshold_policy());

        let alerter = Alerter::new(
            alert_sink,
            Arc::clone(&clock),
            config.monitor.warning_interval(),
            config.monitor.on_call.clone(),
        );

        Self {
            clock,
            instruments: Vec::new(),
            read_timeout: config.watchdog.read_timeout(),
            backlog: Backlog::new(config.monitor.backlog_capacity),
            thresholds: config.thresholds(),
            hysteresis,
            gate: UploadGate::new(),
            alerter,
            catalog: MessageCatalog::new(&config.monitor.label),
            correlation: None,
            config: config.clone(),
            cycles: 0,
            uploads: 0,
        }
    }

    /// Poll `instrument` every cycle, after those already attached.
    pub fn with_instrument(mut self, instrument: Box<dyn Instrument>) -> Self {
        self.instruments.push(instrument);
        self
    }

    /// Correlate readings against `source` and publish matches to `sink`.
    pub fn with_correlation(
        mut self,
        source: Arc<dyn EventSource>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        let c = &self.config.correlation;
        self.correlation = Some(CorrelationContext {
            source,
            sink,
            ideal_offset_secs: c.ideal_offset_secs,
            tolerance_secs: c.tolerance_secs,
            alert_on_miss: c.alert_on_miss,
            fetch_timeout: self.config.watchdog.fetch_timeout(),
            latest_event_id: None,
            miss_alerted_for: None,
            upload_alerted: HashSet::new(),
        });
        self
    }

    pub fn label(&self) -> &str {
        self.catalog.label()
    }

    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    pub fn backlog(&self) -> &Backlog {
        &self.backlog
    }

    pub fn hysteresis(&self) -> &HysteresisMachine {
        &self.hysteresis
    }

    pub fn upload_gate(&self) -> &UploadGate {
        &self.gate
    }

    pub fn stats(&self) -> MonitorStats {
        let alerts = self.alerter.stats();
        MonitorStats {
            cycles: self.cycles,
            uploads: self.uploads,
            alerts_sent: alerts.sent,
            alerts_suppressed: alerts.suppressed,
            alerts_failed: alerts.failed,
        }
    }

    /// Run one monitoring cycle.
    ///
    /// Only a fatal device error is returned; everything else is recovered
    /// locally and reflected in the report.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, MonitorError> {
        let mut report = CycleReport::default();

        let (readings, failed) = self.read_instruments().await?;
        // Stamped after every read has returned
        let taken_at = self.clock.today();
        report.channels = readings.len();
        report.read_errors = failed;
        report.read_errors.extend(unavailable_channels(&readings));

        if !readings.is_empty() {
            self.backlog.push(taken_at, readings.clone());
        }

        let now = self.clock.now();
        let read_error_present = !report.read_errors.is_empty();
        if let Some(t) = self.hysteresis.observe(READ_ERROR, read_error_present, now) {
            report.transitions.push((READ_ERROR, t));
            let text = self.catalog.read_error(t, &report.read_errors);
            let outcome = self.alerter.dispatch(&text, MessageCatalog::severity(t)).await;
            report.alerts.push(outcome);
        }

        report.violations = evaluate(&readings, &self.thresholds);
        let violation_present = !report.violations.is_empty();
        if let Some(t) = self.hysteresis.observe(THRESHOLD_EXCEEDED, violation_present, now) {
            report.transitions.push((THRESHOLD_EXCEEDED, t));
            let text = self.catalog.threshold(t, &report.violations);
            let outcome = self.alerter.dispatch(&text, MessageCatalog::severity(t)).await;
            report.alerts.push(outcome);
        }

        if self.correlation.is_some() {
            self.correlate_latest(&mut report).await;
        }

        self.cycles += 1;
        debug!(
            cycle = self.cycles,
            channels = report.channels,
            read_errors = report.read_errors.len(),
            violations = report.violations.len(),
            correlation = ?report.correlation,
            publishes = report.publishes.len(),
            alerts = report.alerts.len(),
            "Cycle complete"
        );
        Ok(report)
    }

    /// Send the shutdown notice, bypassing the cooldown.
    pub async fn shutdown(&mut self, reason: &str) -> DispatchOutcome {
        let text = self.catalog.shutdown(reason);
        self.alerter.dispatch_forced(&text, Severity::Page).await
    }

    /// Read every instrument under the watchdog. Returns merged readings and
    /// the names of instruments that failed transiently.
    async fn read_instruments(&mut self) -> Result<(Readings, Vec<String>), MonitorError> {
        let mut readings = Readings::new();
        let mut failed = Vec::new();

        for instrument in &mut self.instruments {
            match tokio::time::timeout(self.read_timeout, instrument.read()).await {
                Ok(Ok(values)) => readings.extend(values),
                Ok(Err(DeviceError::Transient(detail))) => {
                    warn!(instrument = instrument.name(), error = %detail, "Instrument read failed");
                    failed.push(instrument.name().to_string());
                }
                Ok(Err(DeviceError::Fatal(detail))) => {
                    return Err(MonitorError::Fatal {
                        instrument: instrument.name().to_string(),
                        detail,
                    });
                }
                Err(_) => {
                    warn!(
                        instrument = instrument.name(),
                        timeout_secs = self.read_timeout.as_secs(),
                        "Instrument read timed out"
                    );
                    failed.push(instrument.name().to_string());
                }
            }
        }

        Ok((readings, failed))
    }

    async fn correlate_latest(&mut self, report: &mut CycleReport) {
        let Some(ctx) = self.correlation.as_mut() else {
            return;
        };

        let event = match tokio::time::timeout(ctx.fetch_timeout, ctx.source.latest_event()).await {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                warn!(source = ctx.source.source_name(), error = %e, "Could not fetch latest run");
                report.correlation = Some(CorrelationOutcome::FetchFailed(e.to_string()));
                return;
            }
            Err(_) => {
                let e = FetchError::Timeout(ctx.fetch_timeout);
                warn!(source = ctx.source.source_name(), error = %e, "Latest run fetch timed out");
                report.correlation = Some(CorrelationOutcome::FetchFailed(e.to_string()));
                return;
            }
        };

        if let Some(latest_seen) = ctx.latest_event_id {
            if event.event_id < latest_seen {
                warn!(event_id = event.event_id, latest_seen, "Run id went backwards, ignoring run");
                report.correlation = Some(CorrelationOutcome::StaleEvent {
                    event_id: event.event_id,
                    latest_seen,
                });
                return;
            }
        }
        if ctx.latest_event_id != Some(event.event_id) {
            info!(event_id = event.event_id, runtime = %event.event_time, "New run");
        }
        ctx.latest_event_id = Some(event.event_id);

        match correlate(
            &self.backlog.snapshot(),
            &event,
            ctx.ideal_offset_secs,
            ctx.tolerance_secs,
        ) {
            Correlation::Matched(result) => {
                report.correlation = Some(CorrelationOutcome::Matched {
                    event_id: result.event_id,
                    offset_from_ideal_secs: result.offset_from_ideal_secs,
                });
                for (name, value) in &result.matched_readings {
                    let reading = match Reading::from_channel(name, *value, result.matched_timestamp) {
                        Ok(reading) => reading,
                        Err(e) => {
                            warn!(error = %e, "Not publishing reading");
                            continue;
                        }
                    };
                    self.publish(&event, &reading, report).await;
                }
            }
            Correlation::NoMatch { best_deviation_secs } => {
                report.correlation = Some(CorrelationOutcome::NoMatch {
                    event_id: event.event_id,
                    best_deviation_secs,
                });
                self.report_miss(&event, best_deviation_secs, report).await;
            }
        }
    }

    async fn publish(&mut self, event: &RunEvent, reading: &Reading, report: &mut CycleReport) {
        let Some(ctx) = self.correlation.as_mut() else {
            return;
        };
        let channel = reading.channel();
        if !reading.is_available() {
            return;
        }

        // The store already holds this readout (e.g. from a previous process)
        if event.has_field(&channel) && !self.gate.is_published(event.event_id, &channel) {
            debug!(event_id = event.event_id, reading = %channel, "Run already carries reading");
            self.gate.mark_published(event.event_id, &channel);
            report.publishes.push((channel, PublishOutcome::AlreadyPublished));
            return;
        }

        let outcome = self
            .gate
            .publish_if_new(event.event_id, &channel, reading.value, ctx.sink.as_ref())
            .await;

        match &outcome {
            PublishOutcome::Published => {
                self.uploads += 1;
                info!(
                    event_id = event.event_id,
                    reading = %channel,
                    value = reading.value,
                    taken_at = %reading.timestamp,
                    "Reading published to run"
                );
            }
            PublishOutcome::AlreadyPublished => return,
            PublishOutcome::Failed(detail) => {
                // One alert per (run, reading); later retries are only logged
                if !ctx.upload_alerted.insert((event.event_id, channel.clone())) {
                    report.publishes.push((channel, outcome.clone()));
                    return;
                }
                let text = self.catalog.upload_failed(
                    &channel,
                    reading.value,
                    reading.timestamp,
                    event.event_id,
                    detail,
                );
                let alert = self.alerter.dispatch(&text, Severity::Notice).await;
                report.alerts.push(alert);
            }
        }
        report.publishes.push((channel, outcome));
    }

    async fn report_miss(&mut self, event: &RunEvent, best_deviation_secs: f64, report: &mut CycleReport) {
        let Some(ctx) = self.correlation.as_mut() else {
            return;
        };

        if !best_deviation_secs.is_finite() {
            debug!(event_id = event.event_id, "No backlog entry precedes the run by the ideal lead");
            return;
        }

        warn!(
            event_id = event.event_id,
            deviation_secs = best_deviation_secs,
            tolerance_secs = ctx.tolerance_secs,
            "No reading within tolerance of run"
        );
        if !ctx.alert_on_miss || ctx.miss_alerted_for == Some(event.event_id) {
            return;
        }
        ctx.miss_alerted_for = Some(event.event_id);
        let text = self
            .catalog
            .correlation_miss(event.event_id, best_deviation_secs, ctx.tolerance_secs);
        let outcome = self.alerter.dispatch(&text, Severity::Notice).await;
        report.alerts.push(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::LogSink;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use crate::records::PublishError;
    use chrono::Utc;

    struct Scripted {
        name: &'static str,
        script: Vec<Result<Readings, DeviceError>>,
    }

    #[async_trait]
    impl Instrument for Scripted {
        async fn read(&mut self) -> Result<Readings, DeviceError> {
            if self.script.is_empty() {
                Err(DeviceError::Transient("script exhausted".into()))
            } else {
                self.script.remove(0)
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    /// Takes `delay` of wall time per read.
    struct Slow {
        clock: Arc<ManualClock>,
        delay: Duration,
    }

    #[async_trait]
    impl Instrument for Slow {
        async fn read(&mut self) -> Result<Readings, DeviceError> {
            self.clock.advance(self.delay);
            value("slow_in_V", 1.0)
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    /// Never answers.
    struct Stuck;

    #[async_trait]
    impl Instrument for Stuck {
        async fn read(&mut self) -> Result<Readings, DeviceError> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "stuck"
        }
    }

    /// Record store that never answers a fetch.
    struct Unresponsive;

    #[async_trait]
    impl EventSource for Unresponsive {
        async fn latest_event(&self) -> Result<RunEvent, FetchError> {
            std::future::pending().await
        }

        fn source_name(&self) -> &str {
            "unresponsive"
        }
    }

    #[async_trait]
    impl RecordSink for Unresponsive {
        async fn publish_reading(&self, _: u64, _: &str, _: f64) -> Result<(), PublishError> {
            Ok(())
        }
    }

    fn value(key: &str, v: f64) -> Result<Readings, DeviceError> {
        let mut r = Readings::new();
        r.insert(key.to_string(), v);
        Ok(r)
    }

    fn monitor(script: Vec<Result<Readings, DeviceError>>) -> Monitor {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        Monitor::new(&MonitorConfig::default(), Arc::new(LogSink), clock)
            .with_instrument(Box::new(Scripted { name: "scripted", script }))
    }

    #[tokio::test]
    async fn readings_land_in_backlog() {
        let mut m = monitor(vec![value("x_in_V", 1.0), value("x_in_V", 2.0)]);
        m.run_cycle().await.unwrap();
        let report = m.run_cycle().await.unwrap();

        assert_eq!(report.channels, 1);
        assert!(report.read_errors.is_empty());
        assert_eq!(m.backlog().len(), 2);
        assert_eq!(m.stats().cycles, 2);
    }

    #[tokio::test]
    async fn nan_channels_and_failed_instruments_are_read_errors() {
        let mut m = monitor(vec![
            value("x_in_V", f64::NAN),
            Err(DeviceError::Transient("port busy".into())),
        ]);

        let first = m.run_cycle().await.unwrap();
        assert_eq!(first.read_errors, vec!["x_in_V"]);
        assert_eq!(m.backlog().len(), 1);

        let second = m.run_cycle().await.unwrap();
        assert_eq!(second.read_errors, vec!["scripted"]);
        assert_eq!(m.backlog().len(), 1, "failed reads are not buffered");
    }

    #[tokio::test]
    async fn fatal_device_error_ends_the_cycle() {
        let mut m = monitor(vec![Err(DeviceError::Fatal("unplugged".into()))]);
        match m.run_cycle().await {
            Err(MonitorError::Fatal { instrument, detail }) => {
                assert_eq!(instrument, "scripted");
                assert_eq!(detail, "unplugged");
            }
            other => panic!("expected fatal error, got {other:?}"),
        }
        assert_eq!(m.stats().cycles, 0);
    }

    #[tokio::test]
    async fn read_error_raises_after_patience() {
        let mut m = monitor(Vec::new());
        for _ in 0..2 {
            assert!(m.run_cycle().await.unwrap().transitions.is_empty());
        }
        let third = m.run_cycle().await.unwrap();
        assert_eq!(third.transitions, vec![(READ_ERROR, Transition::Raised)]);
        assert_eq!(third.alerts, vec![DispatchOutcome::Sent]);
    }

    #[tokio::test]
    async fn readings_are_stamped_after_the_read_returns() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let mut m = Monitor::new(&MonitorConfig::default(), Arc::new(LogSink), clock.clone())
            .with_instrument(Box::new(Slow {
                clock: clock.clone(),
                delay: Duration::from_secs(20),
            }));

        m.run_cycle().await.unwrap();

        let stamped = m.backlog().latest().unwrap().timestamp;
        assert_eq!(stamped, clock.today());
        assert_eq!(stamped - start, chrono::Duration::seconds(20));
    }

    #[tokio::test]
    async fn failed_instrument_is_excluded_while_others_are_buffered() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut m = Monitor::new(&MonitorConfig::default(), Arc::new(LogSink), clock)
            .with_instrument(Box::new(Scripted {
                name: "gauges",
                script: vec![value("science_in_torr", 2e-10), value("science_in_torr", 3e-10)],
            }))
            .with_instrument(Box::new(Scripted {
                name: "chiller",
                script: vec![
                    value("water_in_C", 21.5),
                    Err(DeviceError::Transient("no reply".into())),
                ],
            }));

        let first = m.run_cycle().await.unwrap();
        assert_eq!(first.channels, 2);
        let merged = &m.backlog().latest().unwrap().readings;
        assert_eq!(merged["science_in_torr"], 2e-10);
        assert_eq!(merged["water_in_C"], 21.5);

        let second = m.run_cycle().await.unwrap();
        assert_eq!(second.read_errors, vec!["chiller"]);
        assert_eq!(second.channels, 1);
        let latest = &m.backlog().latest().unwrap().readings;
        assert_eq!(latest["science_in_torr"], 3e-10);
        assert!(!latest.contains_key("water_in_C"));
        assert_eq!(m.backlog().len(), 2);
    }

    #[tokio::test]
    async fn overrunning_read_is_a_transient_error() {
        let mut config = MonitorConfig::default();
        config.watchdog.read_timeout_secs = 1;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut m = Monitor::new(&config, Arc::new(LogSink), clock)
            .with_instrument(Box::new(Stuck))
            .with_instrument(Box::new(Scripted {
                name: "gauges",
                script: vec![value("science_in_torr", 2e-10)],
            }));

        let report = m.run_cycle().await.unwrap();
        assert_eq!(report.read_errors, vec!["stuck"]);
        assert_eq!(m.backlog().len(), 1);
        assert!(m.backlog().latest().unwrap().readings.contains_key("science_in_torr"));
    }

    #[tokio::test]
    async fn hung_fetch_reports_watchdog_timeout() {
        let mut config = MonitorConfig::default();
        config.watchdog.fetch_timeout_secs = 1;
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(Unresponsive);
        let mut m = Monitor::new(&config, Arc::new(LogSink), clock)
            .with_instrument(Box::new(Scripted {
                name: "gauges",
                script: vec![value("science_in_torr", 2e-10)],
            }))
            .with_correlation(store.clone(), store);

        let report = m.run_cycle().await.unwrap();
        assert_eq!(
            report.correlation,
            Some(CorrelationOutcome::FetchFailed(
                FetchError::Timeout(Duration::from_secs(1)).to_string()
            ))
        );
        assert_eq!(m.backlog().len(), 1);
    }
}
