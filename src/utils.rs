//! Utility helpers used across the crate.
//!
//! Artifact name extraction from URLs and parsing of interval strings.
use crate::error::{Result, UpdateError};
use sanitize_filename::sanitize;
use std::time::Duration;
use url::Url;

/// Extracts the artifact file name from a URL.
///
/// 1. Takes the last segment of the path, ignoring query and fragment.
/// 2. Keeps it verbatim (no percent-decoding), so it matches what was recorded before.
/// 3. Sanitizes it to remove characters invalid for the OS.
///
/// Returns `None` when the URL has no usable final segment.
pub fn artifact_name_from_url(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(sanitize)
        .filter(|name| !name.is_empty())
}

/// Parses an interval written as `[d.]hh:mm[:ss[.fff]]`, e.g. `"06:00:00"`
/// or `"1.12:30:00"`.
pub fn parse_interval(input: &str) -> Result<Duration> {
    let invalid = |reason: &str| {
        UpdateError::configuration(format!("invalid interval `{input}`: {reason}"))
    };
    let trimmed = input.trim();

    let (days, clock) = match trimmed.split_once('.') {
        // a dot before the first colon separates days, one after it is a fraction
        Some((days, rest)) if !days.contains(':') => (
            days.parse::<u64>().map_err(|_| invalid("bad day count"))?,
            rest,
        ),
        _ => (0, trimmed),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(invalid("expected hh:mm or hh:mm:ss"));
    }

    let hours: u64 = parts[0].parse().map_err(|_| invalid("bad hours"))?;
    let minutes: u64 = parts[1].parse().map_err(|_| invalid("bad minutes"))?;
    let seconds: f64 = match parts.get(2) {
        Some(s) => s.parse().map_err(|_| invalid("bad seconds"))?,
        None => 0.0,
    };

    if hours > 23 || minutes > 59 || !(0.0..60.0).contains(&seconds) {
        return Err(invalid("component out of range"));
    }

    let whole = days
        .checked_mul(86_400)
        .and_then(|secs| secs.checked_add(hours * 3_600 + minutes * 60))
        .ok_or_else(|| invalid("too large"))?;
    let interval = Duration::from_secs(whole)
        .checked_add(Duration::from_secs_f64(seconds))
        .ok_or_else(|| invalid("too large"))?;

    if interval.is_zero() {
        return Err(invalid("must be greater than zero"));
    }

    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(url: &str) -> Option<String> {
        artifact_name_from_url(&Url::parse(url).unwrap())
    }

    #[test]
    fn test_artifact_name_extraction() {
        // Simple case
        assert_eq!(
            name("https://example.com/files/app-v2.apk").as_deref(),
            Some("app-v2.apk")
        );

        // With query parameters (should ignore ?sig=123)
        assert_eq!(
            name("https://cdn.example.com/pkg/app-v2.apk?sig=123&exp=99").as_deref(),
            Some("app-v2.apk")
        );

        // Percent-encoding is kept verbatim
        assert_eq!(
            name("https://example.com/my%20app.apk").as_deref(),
            Some("my%20app.apk")
        );

        // Edge case: No filename (ends in slash)
        assert_eq!(name("https://example.com/"), None);
        assert_eq!(name("https://example.com/releases/"), None);
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(
            parse_interval("06:00:00").unwrap(),
            Duration::from_secs(6 * 3600)
        );
        assert_eq!(
            parse_interval("00:30").unwrap(),
            Duration::from_secs(30 * 60)
        );
        assert_eq!(
            parse_interval("1.12:00:00").unwrap(),
            Duration::from_secs(36 * 3600)
        );
        assert_eq!(
            parse_interval("00:00:01.5").unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        assert!(parse_interval("").is_err());
        assert!(parse_interval("6h").is_err());
        assert!(parse_interval("00:00:00").is_err());
        assert!(parse_interval("24:00:00").is_err());
        assert!(parse_interval("00:61:00").is_err());
        assert!(parse_interval("x.01:00:00").is_err());
    }

    #[test]
    fn test_parse_interval_rejects_overflowing_day_counts() {
        for input in ["18446744073709551615.00:00", "213503982334601.23:59"] {
            let err = parse_interval(input).unwrap_err();
            assert!(err.to_string().contains("too large"), "{input}: {err}");
        }
    }
}
