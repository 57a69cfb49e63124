//! System-wide default constants.
//!
//! Every `#[serde(default = ...)]` in the config module resolves to one of
//! these, so a monitor with no config file behaves like the stock deployment.

// ============================================================================
// Monitor
// ============================================================================

/// Alert prefix used when `[monitor] label` is unset.
pub const MONITOR_LABEL: &str = "STATUS";

/// Delay between monitoring cycles (seconds).
pub const CYCLE_DELAY_SECS: u64 = 5;

/// Backlog capacity (cycles). 30 cycles at 5 s = 2.5 minutes of history.
pub const BACKLOG_CAPACITY: usize = 30;

/// Global alert cooldown (minutes).
pub const WARNING_INTERVAL_MIN: u64 = 10;

// ============================================================================
// Correlation
// ============================================================================

/// Expected lead of a reading before its run record (seconds).
pub const READ_RUN_TIME_OFFSET_SECS: f64 = 3.0;

/// Largest accepted deviation from the expected lead (seconds).
pub const MAX_TIME_DIFF_TOLERANCE_SECS: f64 = 15.0;

// ============================================================================
// Hysteresis
// ============================================================================

/// Consecutive cycles needed to raise or resolve an alert class.
pub const PATIENCE: u32 = 3;

/// Reminder interval for an active read-error alert (seconds).
pub const ERROR_REUPDATE_INTERVAL_SECS: u64 = 1_800;

/// Reminder interval for an active threshold alert (seconds).
pub const THRESHOLD_REUPDATE_INTERVAL_SECS: u64 = 600;

// ============================================================================
// Watchdog
// ============================================================================

/// Upper bound on a single instrument read (seconds).
pub const READ_TIMEOUT_SECS: u64 = 60;

/// Upper bound on a single latest-run fetch, retries included (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Record Store Client
// ============================================================================

/// Upper bound accepted for any configured interval or timeout (one week).
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 60 * 60;

/// HTTP client timeout for record store requests (seconds).
pub const RECORDS_HTTP_TIMEOUT_SECS: u64 = 10;

/// Attempts made for the latest-run fetch before giving up.
pub const FETCH_MAX_RETRIES: u32 = 10;

/// First retry delay; doubles each attempt (milliseconds).
pub const FETCH_RETRY_BASE_MS: u64 = 300;

/// Cap on the backoff exponent. `2^5 × 300 ms` ≈ 10 s between attempts.
pub const FETCH_MAX_BACKOFF_EXPONENT: u32 = 5;

/// Format of the `runtime` field on run records.
pub const RUNTIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

// ============================================================================
// Slack
// ============================================================================

/// Web API endpoint used for message delivery.
pub const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// HTTP client timeout for Slack requests (seconds).
pub const SLACK_HTTP_TIMEOUT_SECS: u64 = 10;
