//! Time utilities.
//!
//! The runtime measures time as `f64` seconds since the Unix epoch, the unit
//! market ticks, signals and trade statistics all share. Simulated sessions
//! feed their own clock, so nothing in the trading path reads the wall clock
//! directly except through [`now_secs`].

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds in one calendar day (UTC, no leap seconds).
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Current wall-clock time as seconds since Unix epoch.
#[inline]
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Calendar day index (days since epoch) of a timestamp.
#[inline]
pub fn day_index(timestamp: f64) -> i64 {
    (timestamp / SECONDS_PER_DAY).floor() as i64
}

/// Timestamp of the first second of the given day index.
#[inline]
pub fn day_start(day: i64) -> f64 {
    day as f64 * SECONDS_PER_DAY
}
