/// Rate-limit tracker module
///
/// The upstream API reports a monthly request quota in response headers.
/// Each fetch yields one reading; a run reduces its readings to the single
/// most constrained one for the operator report.

use std::fmt;

use reqwest::header::HeaderMap;

const REMAINING_HEADER: &str = "x-ratelimit-requests-remaining";
const LIMIT_HEADER: &str = "x-ratelimit-requests-limit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitReading {
    pub remaining: u64,
    pub limit: u64,
}

impl RateLimitReading {
    /// Extract a reading from response headers. Absence of either header,
    /// or a non-numeric value, means "unknown" rather than an error.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let remaining = parse_header(headers, REMAINING_HEADER)?;
        let limit = parse_header(headers, LIMIT_HEADER)?;
        Some(Self { remaining, limit })
    }
}

impl fmt::Display for RateLimitReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remaining, self.limit)
    }
}

fn parse_header(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

/// Reduce a run's readings to the one with the least remaining quota.
/// Returns None for an empty batch; the report assembly must special-case
/// that instead of calling this blindly.
pub fn worst_reading(readings: &[RateLimitReading]) -> Option<RateLimitReading> {
    readings.iter().min_by_key(|r| r.remaining).copied()
}
