//! Instrument abstraction for channel readings.
//!
//! Provides a unified trait for polling one instrument per cycle. Concrete
//! drivers live outside this crate; the adapters here talk to them through
//! a driver command (one JSON object on stdout per invocation) or through
//! JSON lines on stdin handed off via an mpsc queue.

use crate::types::{ChannelKey, Readings};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use tokio::io::AsyncBufRead;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Why an instrument produced no readings this cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// Counts toward the read-error alert class; the monitor keeps running.
    #[error("transient read error: {0}")]
    Transient(String),
    /// The instrument can never be read again; the monitor shuts down.
    #[error("fatal device error: {0}")]
    Fatal(String),
}

/// Trait abstracting one polled instrument.
///
/// The monitor calls [`read`](Instrument::read) once per cycle inside a
/// watchdog timeout; a read that overruns is treated as transient.
#[async_trait]
pub trait Instrument: Send + 'static {
    /// Current values of every channel this instrument owns.
    ///
    /// A channel that is temporarily unavailable is reported as NaN.
    async fn read(&mut self) -> Result<Readings, DeviceError>;

    /// Human-readable name for logging and read-error alerts.
    fn name(&self) -> &str;
}

// ============================================================================
// Driver Output Parsing
// ============================================================================

/// Parse one JSON object of channel values.
///
/// With declared `channels`, exactly those keys are returned (missing or
/// non-numeric values become NaN) and anything else is ignored. With no
/// declared channels, every well-formed `VALNAME_in_UNITNAME` key is kept.
pub fn parse_channel_values(text: &str, channels: &[String]) -> Result<Readings, DeviceError> {
    let object: Map<String, Value> = serde_json::from_str(text.trim())
        .map_err(|e| DeviceError::Transient(format!("unparsable driver output: {e}")))?;

    let as_value = |v: &Value| v.as_f64().unwrap_or(f64::NAN);

    if channels.is_empty() {
        let mut readings = Readings::new();
        for (key, value) in &object {
            match ChannelKey::parse(key) {
                Ok(_) => {
                    readings.insert(key.clone(), as_value(value));
                }
                Err(e) => warn!(error = %e, "Skipping driver channel"),
            }
        }
        return Ok(readings);
    }

    for key in object.keys().filter(|k| !channels.contains(k)) {
        debug!(channel = %key, "Ignoring undeclared channel");
    }

    Ok(channels
        .iter()
        .map(|key| (key.clone(), object.get(key).map_or(f64::NAN, as_value)))
        .collect())
}

// ============================================================================
// Channel Instrument (mpsc hand-off)
// ============================================================================

/// Instrument fed by another task through an mpsc queue.
///
/// Each read drains the queue and keeps the newest batch. An empty queue is
/// a transient error; a closed and drained queue is fatal.
pub struct ChannelInstrument {
    name: String,
    rx: mpsc::Receiver<Readings>,
}

impl ChannelInstrument {
    pub fn new(name: impl Into<String>, rx: mpsc::Receiver<Readings>) -> Self {
        Self {
            name: name.into(),
            rx,
        }
    }

    /// Instrument plus the sender its feeder should use.
    pub fn channel(name: impl Into<String>, buffer: usize) -> (Self, mpsc::Sender<Readings>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(name, rx), tx)
    }
}

#[async_trait]
impl Instrument for ChannelInstrument {
    async fn read(&mut self) -> Result<Readings, DeviceError> {
        let mut newest = None;
        loop {
            match self.rx.try_recv() {
                Ok(batch) => newest = Some(batch),
                Err(mpsc::error::TryRecvError::Empty) => {
                    return newest.ok_or_else(|| {
                        DeviceError::Transient("no readings since last cycle".to_string())
                    });
                }
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    return newest.ok_or_else(|| {
                        DeviceError::Fatal("reading feeder has stopped".to_string())
                    });
                }
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Feed JSON lines from `reader` into a [`ChannelInstrument`] queue.
///
/// Malformed lines are logged and skipped. Returns the number of batches
/// handed off once the reader hits EOF or the instrument is dropped.
pub async fn feed_json_lines<R>(
    reader: R,
    channels: Vec<String>,
    tx: mpsc::Sender<Readings>,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    let mut lines = reader.lines();
    let mut fed = 0u64;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_channel_values(&line, &channels) {
            Ok(readings) => {
                if tx.send(readings).await.is_err() {
                    break;
                }
                fed += 1;
            }
            Err(e) => warn!(error = %e, "Skipping malformed reading line"),
        }
    }
    info!(batches = fed, "Reading feeder finished");
    Ok(fed)
}

// ============================================================================
// Command Instrument (driver process per cycle)
// ============================================================================

/// Runs a driver command every cycle and parses its stdout.
///
/// A non-zero exit or unparsable output is transient; a command that cannot
/// be started at all (missing or not executable) is fatal.
pub struct CommandInstrument {
    name: String,
    program: String,
    args: Vec<String>,
    channels: Vec<String>,
}

impl CommandInstrument {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        channels: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            channels,
        }
    }
}

#[async_trait]
impl Instrument for CommandInstrument {
    async fn read(&mut self) -> Result<Readings, DeviceError> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    DeviceError::Fatal(format!("cannot run '{}': {e}", self.program))
                }
                _ => DeviceError::Transient(format!("'{}' failed to run: {e}", self.program)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeviceError::Transient(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_channel_values(&stdout, &self.channels)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn declared_channels_missing_values_become_nan() {
        let readings = parse_channel_values(
            r#"{"science_in_torr": 2e-10, "load_lock_in_torr": null, "extra_in_V": 1}"#,
            &keys(&["science_in_torr", "load_lock_in_torr", "oven_in_torr"]),
        )
        .unwrap();

        assert_eq!(readings.len(), 3);
        assert_eq!(readings["science_in_torr"], 2e-10);
        assert!(readings["load_lock_in_torr"].is_nan());
        assert!(readings["oven_in_torr"].is_nan());
        assert!(!readings.contains_key("extra_in_V"));
    }

    #[test]
    fn undeclared_mode_keeps_only_well_formed_keys() {
        let readings =
            parse_channel_values(r#"{"water_in_C": 21.5, "garbage": 3}"#, &[]).unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings["water_in_C"], 21.5);
    }

    #[test]
    fn unparsable_output_is_transient() {
        assert!(matches!(
            parse_channel_values("ERROR: port busy", &[]),
            Err(DeviceError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn channel_instrument_keeps_newest_batch() {
        let (mut instrument, tx) = ChannelInstrument::channel("stdin", 8);

        assert!(matches!(instrument.read().await, Err(DeviceError::Transient(_))));

        for v in [1.0, 2.0, 3.0] {
            let mut r = Readings::new();
            r.insert("x_in_V".into(), v);
            tx.send(r).await.unwrap();
        }
        assert_eq!(instrument.read().await.unwrap()["x_in_V"], 3.0);
        assert!(matches!(instrument.read().await, Err(DeviceError::Transient(_))));

        drop(tx);
        assert!(matches!(instrument.read().await, Err(DeviceError::Fatal(_))));
    }

    #[tokio::test]
    async fn feeder_skips_bad_lines() {
        let input: &[u8] = b"{\"x_in_V\": 1.5}\nnot json\n\n{\"x_in_V\": 2.5}\n";
        let (mut instrument, tx) = ChannelInstrument::channel("stdin", 8);

        let fed = feed_json_lines(input, keys(&["x_in_V"]), tx).await.unwrap();
        assert_eq!(fed, 2);
        assert_eq!(instrument.read().await.unwrap()["x_in_V"], 2.5);
        assert!(matches!(instrument.read().await, Err(DeviceError::Fatal(_))));
    }

    #[tokio::test]
    async fn missing_driver_is_fatal() {
        let mut instrument = CommandInstrument::new(
            "gauges",
            "/nonexistent/status-sentinel-driver",
            Vec::new(),
            keys(&["x_in_V"]),
        );
        assert!(matches!(instrument.read().await, Err(DeviceError::Fatal(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn driver_output_is_parsed() {
        let mut instrument = CommandInstrument::new(
            "echo",
            "sh",
            vec!["-c".into(), r#"echo '{"x_in_V": 4.25}'"#.into()],
            keys(&["x_in_V"]),
        );
        assert_eq!(instrument.read().await.unwrap()["x_in_V"], 4.25);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_driver_is_transient() {
        let mut instrument = CommandInstrument::new(
            "broken",
            "sh",
            vec!["-c".into(), "echo busy >&2; exit 3".into()],
            Vec::new(),
        );
        match instrument.read().await {
            Err(DeviceError::Transient(msg)) => assert!(msg.contains("busy")),
            other => panic!("expected transient error, got {other:?}"),
        }
    }
}
