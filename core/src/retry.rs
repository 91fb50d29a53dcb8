//! Duration parsing for the retry-backoff annotation.
//!
//! The annotation value is either one duration (used as the base interval)
//! or two comma-separated durations (base, max). Each duration follows the
//! same grammar as Go's `time.ParseDuration`: a sequence of decimal numbers
//! each followed by a unit, e.g. `300ms`, `1.5h`, `2h45m`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration {0:?}")]
    Invalid(String),
    #[error("unknown unit {0:?} in duration")]
    UnknownUnit(String),
}

/// A base/max interval pair for a retry policy's exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    pub base_interval: Duration,
    pub max_interval: Option<Duration>,
}

/// Parse the `xds.lmwn.com/retry-backoff` annotation value.
///
/// `""` means no backoff was configured (`Ok(None)`), distinct from a
/// malformed value, which is an `Err`. `"1s"` sets only the base interval;
/// `"1s,10s"` sets base and max.
pub fn parse_retry_backoff(value: &str) -> Result<Option<RetryBackoff>, DurationParseError> {
    if value.is_empty() {
        return Ok(None);
    }

    match value.splitn(2, ',').collect::<Vec<_>>().as_slice() {
        [one] => Ok(Some(RetryBackoff {
            base_interval: parse_duration(one)?,
            max_interval: None,
        })),
        [base, max] => Ok(Some(RetryBackoff {
            base_interval: parse_duration(base)?,
            max_interval: Some(parse_duration(max)?),
        })),
        _ => unreachable!("splitn(2, ..) never yields more than two parts"),
    }
}

/// Parse a single Go-style duration string (`"300ms"`, `"1.5h"`, `"2h45m"`).
pub fn parse_duration(value: &str) -> Result<Duration, DurationParseError> {
    if value.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let mut total = Duration::ZERO;
    let mut rest = value;

    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| DurationParseError::Invalid(value.to_string()))?;
        if digits_end == 0 {
            return Err(DurationParseError::Invalid(value.to_string()));
        }
        let number: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| DurationParseError::Invalid(value.to_string()))?;

        let unit_start = digits_end;
        let unit_end = rest[unit_start..]
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .map(|i| unit_start + i)
            .unwrap_or(rest.len());
        let unit = &rest[unit_start..unit_end];

        let nanos_per_unit: f64 = match unit {
            "ns" => 1.0,
            "us" | "\u{b5}s" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            "" => return Err(DurationParseError::Invalid(value.to_string())),
            other => return Err(DurationParseError::UnknownUnit(other.to_string())),
        };

        total += Duration::from_nanos((number * nanos_per_unit).round() as u64);
        rest = &rest[unit_end..];
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_seconds() {
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
    }

    #[test]
    fn parses_fractional_hours() {
        assert_eq!(parse_duration("1.5h"), Ok(Duration::from_secs(5400)));
    }

    #[test]
    fn parses_combined_units() {
        assert_eq!(
            parse_duration("2h45m"),
            Ok(Duration::from_secs(2 * 3600 + 45 * 60))
        );
    }

    #[test]
    fn rejects_unknown_unit() {
        assert_eq!(
            parse_duration("5x"),
            Err(DurationParseError::UnknownUnit("x".to_string()))
        );
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
    }

    #[test]
    fn backoff_single_value_sets_only_base() {
        let b = parse_retry_backoff("1s").unwrap().unwrap();
        assert_eq!(b.base_interval, Duration::from_secs(1));
        assert_eq!(b.max_interval, None);
    }

    #[test]
    fn backoff_two_values_sets_base_and_max() {
        let b = parse_retry_backoff("1s,10s").unwrap().unwrap();
        assert_eq!(b.base_interval, Duration::from_secs(1));
        assert_eq!(b.max_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn backoff_empty_string_is_not_configured_not_an_error() {
        assert_eq!(parse_retry_backoff(""), Ok(None));
    }

    #[test]
    fn backoff_rejects_a_third_comma_separated_segment() {
        // splitn(2, ',') leaves "10m,20m" as the max-interval string, whose
        // unit token swallows the stray comma and fails as an unknown unit.
        assert_eq!(
            parse_retry_backoff("5s,10m,20m"),
            Err(DurationParseError::UnknownUnit("m,".to_string()))
        );
    }
}
