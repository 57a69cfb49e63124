//! status-sentinel - instrument monitor
//!
//! Polls the configured instruments every cycle, publishes correlated
//! readings to the run-record store and alerts on read errors and
//! threshold breaches.
//!
//! # Usage
//!
//! ```bash
//! # Run with ./sentinel.toml (or $SENTINEL_CONFIG)
//! status-sentinel
//!
//! # Feed a stdin instrument from a driver script
//! python read_gauges.py | status-sentinel --config vacuum.toml
//!
//! # Validate a config without starting
//! status-sentinel --config vacuum.toml --check-config
//! ```
//!
//! # Environment Variables
//!
//! - `SENTINEL_CONFIG`: Path to the monitor config
//! - `SLACK_BOT_TOKEN`: Slack bot token (overrides `[slack] token`)
//! - `SENTINEL_RECORDS_KEY`: Record store API key (overrides `[records] api_key`)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use status_sentinel::alert::{AlertSink, Alerter, LogSink, MessageCatalog, Severity, SlackSink};
use status_sentinel::clock::{Clock, SystemClock};
use status_sentinel::config::{ConfigSource, MonitorConfig};
use status_sentinel::pipeline::source::feed_json_lines;
use status_sentinel::pipeline::{ChannelInstrument, CommandInstrument, Monitor, ProcessingLoop};
use status_sentinel::records::HttpRecordClient;

/// Batches a stdin instrument may queue between cycles.
const STDIN_QUEUE_DEPTH: usize = 64;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "status-sentinel")]
#[command(about = "Instrument telemetry correlation and hysteresis alerting")]
#[command(version)]
struct CliArgs {
    /// Path to the monitor config (overrides SENTINEL_CONFIG and ./sentinel.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Load and validate the config, print a summary and exit
    #[arg(long)]
    check_config: bool,

    /// Slack bot token
    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    slack_token: Option<String>,

    /// Record store API key
    #[arg(long, env = "SENTINEL_RECORDS_KEY", hide_env_values = true)]
    records_key: Option<String>,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

// ============================================================================
// Wiring
// ============================================================================

fn build_alert_sink(config: &MonitorConfig, token: Option<String>) -> Result<Arc<dyn AlertSink>> {
    if !config.slack.enabled {
        info!("Slack disabled, alerts will only be logged");
        return Ok(Arc::new(LogSink));
    }
    let token = token
        .or_else(|| config.slack.token.clone())
        .context("slack.enabled = true but no token (set SLACK_BOT_TOKEN or [slack] token)")?;
    let sink = SlackSink::new(token, config.slack.channel.clone())
        .context("Failed to build Slack client")?;
    info!(channel = %config.slack.channel, "Alerts go to Slack");
    Ok(Arc::new(sink))
}

fn build_monitor(
    config: &MonitorConfig,
    alert_sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    records_key: Option<String>,
) -> Result<Monitor> {
    let mut monitor = Monitor::new(config, alert_sink, clock);

    for instrument in &config.instruments {
        let channels: Vec<String> = instrument.channels.iter().map(|c| c.key.clone()).collect();
        match &instrument.command {
            Some(program) => {
                info!(instrument = %instrument.name, command = %program, "Polling driver command");
                monitor = monitor.with_instrument(Box::new(CommandInstrument::new(
                    instrument.name.clone(),
                    program.clone(),
                    instrument.args.clone(),
                    channels,
                )));
            }
            None => {
                info!(instrument = %instrument.name, "Reading JSON lines from stdin");
                let (reader, tx) = ChannelInstrument::channel(instrument.name.clone(), STDIN_QUEUE_DEPTH);
                tokio::spawn(async move {
                    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                    if let Err(e) = feed_json_lines(stdin, channels, tx).await {
                        warn!(error = %e, "stdin feeder stopped");
                    }
                });
                monitor = monitor.with_instrument(Box::new(reader));
            }
        }
    }

    if config.correlation.enabled {
        let client = Arc::new(
            HttpRecordClient::new(&config.records, records_key)
                .context("Failed to build record store client")?,
        );
        info!(
            base_url = %config.records.base_url,
            lab = %config.records.lab,
            ideal_offset_secs = config.correlation.ideal_offset_secs,
            tolerance_secs = config.correlation.tolerance_secs,
            "Correlating readings with run records"
        );
        monitor = monitor.with_correlation(client.clone(), client);
    }

    Ok(monitor)
}

fn print_summary(config: &MonitorConfig, source: &ConfigSource) {
    println!();
    println!("  Config OK ({source})");
    println!("  Label:        {}", config.monitor.label);
    println!("  Cycle delay:  {} s", config.monitor.cycle_delay_secs);
    println!("  Instruments:  {}", config.instruments.len());
    for instrument in &config.instruments {
        let kind = instrument.command.as_deref().unwrap_or("<stdin>");
        println!(
            "    - {} ({kind}): {} channels",
            instrument.name,
            instrument.channels.len()
        );
    }
    println!("  Thresholds:   {}", config.thresholds().len());
    println!(
        "  Correlation:  {}",
        if config.correlation.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "  Slack:        {}",
        if config.slack.enabled { "enabled" } else { "disabled" }
    );
    println!();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let (config, source) =
        MonitorConfig::load(args.config.as_deref()).context("Failed to load monitor config")?;

    if args.check_config {
        print_summary(&config, &source);
        return Ok(());
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let alert_sink = build_alert_sink(&config, args.slack_token)?;
    let monitor = build_monitor(&config, Arc::clone(&alert_sink), Arc::clone(&clock), args.records_key)?;

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut processing = ProcessingLoop::new(monitor, config.monitor.cycle_delay(), cancel_token);
    if args.once {
        processing = processing.once();
    }

    // The loop runs in its own task so a panic still produces a shutdown alert
    match tokio::spawn(processing.run()).await {
        Ok(Ok(_stats)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(join_error) => {
            let reason = if join_error.is_panic() {
                "the monitor task panicked"
            } else {
                "the monitor task was cancelled"
            };
            error!(error = %join_error, "Monitor task ended abnormally");
            let mut alerter = Alerter::new(alert_sink, clock, Duration::ZERO, config.monitor.on_call.clone());
            let text = MessageCatalog::new(&config.monitor.label).shutdown(reason);
            alerter.dispatch_forced(&text, Severity::Page).await;
            Err(anyhow::anyhow!("Monitor stopped: {reason}"))
        }
    }
}
