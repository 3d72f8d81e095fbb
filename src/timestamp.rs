//! Parsing of the date forms accepted by `timestamp:min/max`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::ParseError;

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a (possibly partial) ISO-8601 instant, interpreted as UTC.
///
/// Partial dates resolve to the start of the period they name: `2011` is
/// 2011-01-01T00:00:00Z and `2011-02` is 2011-02-01T00:00:00Z.
pub fn parse_instant(input: &str) -> Result<DateTime<Utc>, ParseError> {
    let text = input.trim();

    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(instant.with_timezone(&Utc));
    }

    let without_zone = text.strip_suffix('Z').unwrap_or(text);
    for format in DATE_TIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(without_zone, format) {
            return Ok(naive.and_utc());
        }
    }

    let date = match text.len() {
        4 => NaiveDate::parse_from_str(&format!("{text}-01-01"), "%Y-%m-%d"),
        7 => NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d"),
        _ => NaiveDate::parse_from_str(text, "%Y-%m-%d"),
    };
    date.ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            ParseError::timestamp(
                input,
                "expected YYYY, YYYY-MM, YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS".to_string(),
            )
        })
}
