//! Timestamp helpers.
//!
//! Timestamps are RFC3339 strings in UTC with second precision, the form
//! rendered for `createdat` / `modifiedat`.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::TypeError;

/// The current time, formatted for storage.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse any RFC3339 timestamp and normalize it to UTC.
pub fn normalize_timestamp(src: &str) -> Result<String, TypeError> {
    DateTime::parse_from_rfc3339(src)
        .map(|t| format_timestamp(t.with_timezone(&Utc)))
        .map_err(|_| TypeError::InvalidTimestamp(src.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formats_with_z_suffix() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 1).unwrap();
        assert_eq!(format_timestamp(t), "2025-01-01T12:00:01Z");
    }

    #[test]
    fn normalizes_offsets() {
        assert_eq!(
            normalize_timestamp("2025-01-01T14:00:01+02:00").unwrap(),
            "2025-01-01T12:00:01Z"
        );
        assert!(normalize_timestamp("yesterday").is_err());
    }

    #[test]
    fn now_is_parseable() {
        let now = now_timestamp();
        assert_eq!(normalize_timestamp(&now).unwrap(), now);
    }
}
