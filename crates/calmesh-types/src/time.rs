//! Wire time conversion
//!
//! Timestamps are ISO-8601 UTC strings on the wire and epoch-millisecond
//! integers everywhere else.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::CalError;

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render an epoch-millisecond timestamp as an ISO-8601 UTC string
pub fn to_rfc3339(ts_millis: i64) -> String {
    match Utc.timestamp_millis_opt(ts_millis).single() {
        Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        None => format!("invalid-timestamp({ts_millis})"),
    }
}

/// Parse an ISO-8601 timestamp (any offset) into epoch milliseconds
pub fn parse_rfc3339(s: &str) -> Result<i64, CalError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
        .map_err(|e| CalError::Validation {
            message: format!("invalid timestamp {s:?}: {e}"),
        })
}

/// Parse an all-day date (`YYYY-MM-DD`) as UTC midnight, epoch milliseconds
pub fn parse_date(s: &str) -> Result<i64, CalError> {
    let date = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| {
        CalError::Validation {
            message: format!("invalid date {s:?}: {e}"),
        }
    })?;
    let dt = date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time");
    Ok(Utc.from_utc_datetime(&dt).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_round_trip() {
        let ts = 1_771_581_600_000; // 2026-02-20T10:00:00Z
        let s = to_rfc3339(ts);
        assert_eq!(parse_rfc3339(&s).unwrap(), ts);
    }

    #[test]
    fn test_parse_offset_normalised_to_utc() {
        let a = parse_rfc3339("2026-02-20T10:00:00+00:00").unwrap();
        let b = parse_rfc3339("2026-02-20T12:00:00+02:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_date() {
        let ts = parse_date("2026-02-20").unwrap();
        assert_eq!(to_rfc3339(ts), "2026-02-20T00:00:00.000Z");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_rfc3339("not a time").is_err());
        assert!(parse_date("2026-99-99").is_err());
    }
}
