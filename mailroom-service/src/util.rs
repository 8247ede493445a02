//! Small shared helpers

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};

/// Format a timestamp for storage
///
/// Fixed-width RFC 3339 with microseconds and a `Z` suffix, so string
/// comparison in SQL agrees with chronological order.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time, formatted for storage
pub(crate) fn now_ts() -> String {
    fmt_ts(Utc::now())
}

/// Parse a stored timestamp
pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Store(format!("bad timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_fmt_ts_is_fixed_width_and_ordered() {
        let base = Utc::now();
        let earlier = fmt_ts(base);
        let later = fmt_ts(base + Duration::milliseconds(1));
        assert_eq!(earlier.len(), later.len());
        assert!(earlier < later);
    }

    #[test]
    fn test_roundtrip() {
        let now = Utc::now();
        let parsed = parse_ts(&fmt_ts(now)).unwrap();
        // Microsecond precision survives the roundtrip
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }
}
