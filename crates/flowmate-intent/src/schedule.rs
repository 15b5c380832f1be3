//! Cron schedules for custom card frequencies.
//!
//! Cards accept a cron expression as a custom schedule.  Expressions are
//! parsed via the `cron` crate, which expects 6 or 7 fields (with seconds);
//! typical 5-field user input is normalised by prepending a `0` seconds
//! field.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::{IntentError, Result};

/// Normalise a cron expression to the 6/7-field format expected by the
/// `cron` crate.
pub fn normalize_cron_expr(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Parse a cron expression into a [`cron::Schedule`].
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule> {
    let normalized = normalize_cron_expr(expr);
    cron::Schedule::from_str(&normalized).map_err(|e| IntentError::InvalidSchedule {
        expression: expr.to_string(),
        reason: e.to_string(),
    })
}

/// The first occurrence of `schedule` strictly after `after`.
pub fn next_run_after(schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}
