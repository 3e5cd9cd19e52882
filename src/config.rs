//! Engine timing configuration.
//!
//! Scan and refresh intervals have floors so a misconfigured deployment can
//! not keep the radio in a busy loop. Values below a floor are raised
//! silently (with a debug log), never rejected.

use std::time::Duration;
use tracing::debug;

/// Shortest allowed scan window.
pub const MIN_SCAN_TIME: Duration = Duration::from_secs(10);

/// Shortest allowed pause between poll cycles.
pub const MIN_REFRESH_TIME: Duration = Duration::from_secs(5 * 60);

/// Default pause before re-checking the adapter or retrying an empty bootstrap.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Timing configuration, fixed for the lifetime of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    scan_time: Duration,
    refresh_time: Duration,
    retry_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_time: MIN_SCAN_TIME,
            refresh_time: MIN_REFRESH_TIME,
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }
}

impl Config {
    pub fn new(scan_time: Duration, refresh_time: Duration, retry_after: Duration) -> Self {
        if scan_time < MIN_SCAN_TIME {
            debug!(
                requested = ?scan_time,
                applied = ?MIN_SCAN_TIME,
                "scan time below floor, raising"
            );
        }
        if refresh_time < MIN_REFRESH_TIME {
            debug!(
                requested = ?refresh_time,
                applied = ?MIN_REFRESH_TIME,
                "refresh time below floor, raising"
            );
        }

        Self {
            scan_time: scan_time.max(MIN_SCAN_TIME),
            refresh_time: refresh_time.max(MIN_REFRESH_TIME),
            retry_after,
        }
    }

    /// Build from millisecond values, as carried by plugin configuration.
    pub fn from_millis(scan_time: u64, refresh_time: u64, retry_after: u64) -> Self {
        Self::new(
            Duration::from_millis(scan_time),
            Duration::from_millis(refresh_time),
            Duration::from_millis(retry_after),
        )
    }

    /// Length of every scan window; also the per-device read budget.
    pub fn scan_time(&self) -> Duration {
        self.scan_time
    }

    /// Pause between the end of one poll cycle and the start of the next.
    pub fn refresh_time(&self) -> Duration {
        self.refresh_time
    }

    pub fn retry_after(&self) -> Duration {
        self.retry_after
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use ble_sensor_poller::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    // "ms" must be tried before "m" and "s"
    let units: [(&str, u64, &str); 4] = [
        ("ms", 1, "milliseconds"),
        ("h", 3_600_000, "hours"),
        ("m", 60_000, "minutes"),
        ("s", 1_000, "seconds"),
    ];

    for (suffix, millis_per_unit, unit) in units {
        if let Some(num) = src.strip_suffix(suffix) {
            let value: u64 = num
                .trim()
                .parse()
                .map_err(|_| format!("invalid {unit}: {num}"))?;
            return value
                .checked_mul(millis_per_unit)
                .map(Duration::from_millis)
                .ok_or_else(|| format!("duration too large: {src}"));
        }
    }

    let secs: u64 = src
        .parse()
        .map_err(|_| format!("invalid duration: {src}"))?;
    Ok(Duration::from_secs(secs))
}

/// Like [`parse_duration`], but zero is rejected.
pub fn parse_nonzero_duration(src: &str) -> Result<Duration, String> {
    let duration = parse_duration(src)?;
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}
