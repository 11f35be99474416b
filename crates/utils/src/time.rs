use chrono::{DateTime, Utc};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Values below this are taken to be epoch seconds rather than milliseconds
/// (10^11 ms is early 1973, 10^11 s is far beyond any realistic date).
const SECONDS_CUTOFF: i64 = 100_000_000_000;

/// Interprets a numeric timestamp that may be in seconds or milliseconds.
pub fn epoch_to_ms(value: i64) -> i64 {
    if (-SECONDS_CUTOFF..SECONDS_CUTOFF).contains(&value) {
        value.saturating_mul(1000)
    } else {
        value
    }
}

/// Parses an RFC 3339 timestamp into epoch milliseconds.
pub fn parse_rfc3339_ms(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}
