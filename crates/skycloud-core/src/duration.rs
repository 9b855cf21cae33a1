//! Human readable durations ("1d", "2 hours", "90m", "1500").
//!
//! The accepted grammar is `<number>[ ]<unit>`; a bare number is milliseconds.
//! Units are case-insensitive and accept the usual long, plural and abbreviated forms.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

const SECOND_MS: f64 = 1000.0;
const MINUTE_MS: f64 = SECOND_MS * 60.0;
const HOUR_MS: f64 = MINUTE_MS * 60.0;
const DAY_MS: f64 = HOUR_MS * 24.0;
const WEEK_MS: f64 = DAY_MS * 7.0;
const YEAR_MS: f64 = DAY_MS * 365.25;

const MAX_INPUT_LEN: usize = 100;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(-?(?:\d+)?\.?\d+) *(milliseconds?|msecs?|ms|seconds?|secs?|s|minutes?|mins?|m|hours?|hrs?|h|days?|d|weeks?|w|years?|yrs?|y)?$",
    )
    .expect("duration regex is valid")
});

/// Parse a human duration string into a signed [`Duration`].
///
/// Returns `None` when the string does not match the grammar.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() || input.len() > MAX_INPUT_LEN {
        return None;
    }

    let captures = DURATION_RE.captures(input)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    let unit = captures
        .get(2)
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_else(|| "ms".to_string());

    let factor = match unit.as_str() {
        "years" | "year" | "yrs" | "yr" | "y" => YEAR_MS,
        "weeks" | "week" | "w" => WEEK_MS,
        "days" | "day" | "d" => DAY_MS,
        "hours" | "hour" | "hrs" | "hr" | "h" => HOUR_MS,
        "minutes" | "minute" | "mins" | "min" | "m" => MINUTE_MS,
        "seconds" | "second" | "secs" | "sec" | "s" => SECOND_MS,
        "milliseconds" | "millisecond" | "msecs" | "msec" | "ms" => 1.0,
        _ => return None,
    };

    let millis = (value * factor).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }

    Duration::try_milliseconds(millis as i64)
}

/// Resolve a relative duration against `now`.
///
/// Zero, negative and unparsable durations yield `None`.
pub fn human_time(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let duration = parse_duration(input)?;
    if duration <= Duration::zero() {
        return None;
    }
    now.checked_add_signed(duration)
}

/// Parse an upload expiry value.
///
/// Accepts `date=<ISO8601>` for absolute timestamps or a relative duration. The
/// resulting timestamp must lie strictly after `now`.
pub fn parse_expiry(header: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let header = header.trim().to_lowercase();
    if header.is_empty() {
        return None;
    }

    let at = match header.strip_prefix("date=") {
        Some(date) => parse_absolute(date.trim())?,
        None => human_time(&header, now)?,
    };

    (at > now).then_some(at)
}

fn parse_absolute(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&value.to_uppercase()) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dt%H:%M:%S%.f", "%Y-%m-%dt%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(parse_duration("1d"), Some(Duration::days(1)));
        assert_eq!(parse_duration("2 hours"), Some(Duration::hours(2)));
        assert_eq!(parse_duration("30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_duration("1.5h"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("1500"), Some(Duration::milliseconds(1500)));
        assert_eq!(parse_duration("1W"), Some(Duration::weeks(1)));
        assert_eq!(parse_duration("10 Secs"), Some(Duration::seconds(10)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("1 fortnight"), None);
        assert_eq!(parse_duration("d1"), None);
    }

    #[test]
    fn relative_expiry_is_in_the_future() {
        let now = Utc::now();
        for input in ["1d", "5m", "1 year", "10s", "250ms", "3 weeks", "1"] {
            let at = parse_expiry(input, now).unwrap_or_else(|| panic!("{input} should parse"));
            assert!(at > now, "{input} should resolve after now");
        }
    }

    #[test]
    fn zero_and_negative_relative_expiry_rejected() {
        let now = Utc::now();
        assert_eq!(parse_expiry("0", now), None);
        assert_eq!(parse_expiry("-5m", now), None);
    }

    #[test]
    fn out_of_range_durations_rejected() {
        let now = Utc::now();
        assert_eq!(parse_duration("-9223372036854775808"), None);
        assert_eq!(parse_duration("9223372036854775808"), None);
        assert_eq!(parse_expiry("-9223372036854775808", now), None);
        assert_eq!(parse_expiry("1e30y", now), None);
        assert_eq!(parse_expiry("9000000000000000000", now), None);
    }

    #[test]
    fn absolute_expiry() {
        let now = Utc::now();
        assert!(parse_expiry("date=2999-01-01T00:00:00Z", now).is_some());
        assert!(parse_expiry("date=2999-01-01", now).is_some());
        assert_eq!(parse_expiry("date=2000-01-01T00:00:00Z", now), None);
        assert_eq!(parse_expiry("date=not-a-date", now), None);
    }
}
