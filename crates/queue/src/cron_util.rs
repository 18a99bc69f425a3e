//! Cron pattern parsing and fire-time computation

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::QueueError;

/// Parse a cron expression
///
/// The cron crate expects six fields (with seconds); callers supply the
/// conventional five-field form, so seconds are pinned to zero.
pub fn parse_pattern(expr: &str) -> Result<Schedule, QueueError> {
    let fields = expr.split_whitespace().count();
    let full_expr = if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };

    Schedule::from_str(&full_expr).map_err(|e| QueueError::InvalidCron {
        expr: expr.to_string(),
        message: e.to_string(),
    })
}

/// Next fire time strictly after `after`.
///
/// A burst of missed ticks collapses into the single upcoming one.
pub fn next_fire_after(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, QueueError> {
    let schedule = parse_pattern(expr)?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| QueueError::InvalidCron {
            expr: expr.to_string(),
            message: "no upcoming fire time".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_five_field() {
        assert!(parse_pattern("*/5 * * * *").is_ok());
        assert!(parse_pattern("0 9 * * 1-5").is_ok());
    }

    #[test]
    fn test_parse_six_field_passthrough() {
        assert!(parse_pattern("0 0 9 * * 1-5").is_ok());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_pattern("not a cron").is_err());
        assert!(matches!(
            parse_pattern("61 * * * *"),
            Err(QueueError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_next_fire_after() {
        let after = Utc.with_ymd_and_hms(2025, 6, 1, 10, 2, 30).unwrap();
        let next = next_fire_after("*/5 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 10, 5, 0).unwrap());

        // Strictly after: a fire time equal to `after` is skipped.
        let on_tick = Utc.with_ymd_and_hms(2025, 6, 1, 10, 5, 0).unwrap();
        let next = next_fire_after("*/5 * * * *", on_tick).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 6, 1, 10, 10, 0).unwrap());
    }
}
