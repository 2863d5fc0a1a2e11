//! Kubernetes-style duration string parsing for
//! `spec.adapterDiscovery.pollingInterval`.

use regex::Regex;
use std::time::Duration;
use tracing::warn;

use lazy_static::lazy_static;

const DEFAULT_POLLING_INTERVAL_SECS: u64 = 30;

lazy_static! {
    static ref DURATION_RE: Regex = Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$").unwrap();
}

/// Parses a Kubernetes-style duration string (`"45s"`, `"1m"`, `"2h"`,
/// `"1d"`). Returns `None` for anything malformed or non-positive —
/// callers fall back to the default polling interval in that case.
pub fn parse_kubernetes_duration(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() {
        return None;
    }
    let captures = DURATION_RE.captures(&trimmed)?;
    let number: u64 = captures.name("number")?.as_str().parse().ok()?;
    if number == 0 {
        return None;
    }
    let unit = captures.name("unit")?.as_str();
    let seconds = match unit {
        "s" => number,
        "m" => number.checked_mul(60)?,
        "h" => number.checked_mul(3600)?,
        "d" => number.checked_mul(86400)?,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

/// `getPollingInterval(spec)`: returns the parsed duration, or a 30 s
/// fallback for any of {absent, empty, malformed, negative, zero}.
pub fn get_polling_interval(raw: Option<&str>) -> Duration {
    match raw {
        Some(s) if !s.is_empty() => parse_kubernetes_duration(s).unwrap_or_else(|| {
            warn!("invalid adapterDiscovery.pollingInterval '{}', falling back to {}s", s, DEFAULT_POLLING_INTERVAL_SECS);
            Duration::from_secs(DEFAULT_POLLING_INTERVAL_SECS)
        }),
        _ => Duration::from_secs(DEFAULT_POLLING_INTERVAL_SECS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_durations() {
        assert_eq!(parse_kubernetes_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_kubernetes_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_kubernetes_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_kubernetes_duration("1d"), Some(Duration::from_secs(86400)));
    }

    #[test]
    fn rejects_malformed_negative_and_zero() {
        assert_eq!(parse_kubernetes_duration("-5s"), None);
        assert_eq!(parse_kubernetes_duration("0s"), None);
        assert_eq!(parse_kubernetes_duration("garbage"), None);
        assert_eq!(parse_kubernetes_duration(""), None);
    }

    #[test]
    fn get_polling_interval_falls_back_to_30s() {
        for bad in [None, Some(""), Some("garbage"), Some("-5s"), Some("0s")] {
            assert_eq!(get_polling_interval(bad), Duration::from_secs(30));
        }
    }

    #[test]
    fn get_polling_interval_uses_parsed_value() {
        assert_eq!(get_polling_interval(Some("45s")), Duration::from_secs(45));
        assert_eq!(get_polling_interval(Some("1m")), Duration::from_secs(60));
    }
}
