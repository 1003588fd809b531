//! Parsing helpers for durations and absolute timestamps.

use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// Parse a duration like `"30s"`, `"5m"`, `"2h"` or `"1d"` into milliseconds.
pub fn parse_duration_ms(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::invalid_job("empty duration string"));
    }

    let Some(split) = input.find(|c: char| c.is_alphabetic()) else {
        return Err(Error::invalid_job(format!(
            "duration missing unit suffix (s/m/h/d): {input}"
        )));
    };
    let (num_str, suffix) = input.split_at(split);

    let value: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| Error::invalid_job(format!("invalid number in duration: {num_str}")))?;
    if value == 0 {
        return Err(Error::invalid_job("duration must be > 0"));
    }

    let unit = match suffix {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => {
            return Err(Error::invalid_job(format!(
                "unknown duration suffix: {suffix} (expected s/m/h/d)"
            )));
        },
    };
    value
        .checked_mul(unit)
        .ok_or_else(|| Error::invalid_job(format!("duration overflows: {input}")))
}

/// Parse an RFC 3339 timestamp or a plain epoch-milliseconds number.
pub fn parse_absolute_time_ms(input: &str) -> Result<u64> {
    let input = input.trim();
    if !input.is_empty() && input.bytes().all(|b| b.is_ascii_digit()) {
        return input
            .parse()
            .map_err(|_| Error::invalid_job(format!("invalid epoch milliseconds: {input}")));
    }

    let dt: DateTime<Utc> = input
        .parse::<DateTime<Utc>>()
        .map_err(|e| Error::invalid_job(format!("invalid RFC 3339 timestamp: {e}")))?;
    u64::try_from(dt.timestamp_millis())
        .map_err(|_| Error::invalid_job("timestamp is before epoch"))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("30s", 30_000)]
    #[case("5m", 300_000)]
    #[case("2h", 7_200_000)]
    #[case("1d", 86_400_000)]
    #[case("  10m  ", 600_000)]
    fn parses_durations(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(parse_duration_ms(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("100")]
    #[case("0s")]
    #[case("10x")]
    #[case("m")]
    fn rejects_bad_durations(#[case] input: &str) {
        assert!(parse_duration_ms(input).is_err(), "{input}");
    }

    #[test]
    fn rfc3339_and_offset_agree() {
        let utc = parse_absolute_time_ms("2026-01-12T18:00:00Z").unwrap();
        let offset = parse_absolute_time_ms("2026-01-12T19:00:00+01:00").unwrap();
        assert_eq!(utc, offset);
        let dt = DateTime::from_timestamp_millis(utc as i64).unwrap();
        assert_eq!(
            dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "2026-01-12T18:00:00Z"
        );
    }

    #[test]
    fn epoch_millis_pass_through() {
        assert_eq!(
            parse_absolute_time_ms("1768240800000").unwrap(),
            1_768_240_800_000
        );
    }

    #[test]
    fn garbage_timestamp_fails() {
        assert!(parse_absolute_time_ms("not a date").is_err());
        assert!(parse_absolute_time_ms("").is_err());
    }
}
