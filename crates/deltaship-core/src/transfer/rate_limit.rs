//! Detection and parsing of remote rate-limit responses.
//!
//! Origins describe throttling in free text ("retry after about 2 hours",
//! "Retry-After: 45"). Parsing is kept as pure functions over the rendered
//! error message so the accepted phrasings can be pinned by a fixed corpus in
//! tests. Providers that change their wording will stop matching; that shows up
//! as generic retries in the logs, not as a parse error.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::retry::Sleeper;

/// A bare `429` only counts as a status code, so keys like `part-429.bin`
/// in a failure message do not look like throttling.
static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:http(?:/[\d.]+)?|status(?:\s+code)?)[\s:=]*429\b|rate[\s_-]?limit|too\s+many\s+requests|retry[\s_-]?after",
    )
    .expect("valid rate-limit marker regex")
});

static PHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:about|approximately|in|after|wait)\s+(\d+)\s*(hours?|hrs?|minutes?|mins?|seconds?|secs?)\b",
    )
    .expect("valid rate-limit phrase regex")
});

static RETRY_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)retry[-_ ]?after"?\s*[:=]\s*"?(\d+)"#).expect("valid retry-after regex")
});

/// Whether a failure message signals remote throttling.
pub fn is_rate_limited(message: &str) -> bool {
    MARKER_RE.is_match(message)
}

/// Largest wait, in seconds, suggested anywhere in the message.
pub fn suggested_wait_secs(message: &str) -> Option<u64> {
    let phrases = PHRASE_RE.captures_iter(message).filter_map(|caps| {
        let n: u64 = caps[1].parse().ok()?;
        Some(n.saturating_mul(unit_seconds(&caps[2])))
    });
    let headers = RETRY_AFTER_RE
        .captures_iter(message)
        .filter_map(|caps| caps[1].parse::<u64>().ok());
    phrases.chain(headers).max()
}

fn unit_seconds(unit: &str) -> u64 {
    match unit.to_ascii_lowercase().chars().next() {
        Some('h') => 3600,
        Some('m') => 60,
        _ => 1,
    }
}

/// How long to wait on a rate limit, and when to give up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// A parsed wait above this aborts the job as unrecoverable.
    pub ceiling: Duration,
    /// Added to every parsed wait.
    pub margin: Duration,
    /// Used when a rate-limit marker carries no parsable wait.
    pub default_wait: Duration,
    /// How often the remaining wait is logged.
    pub report_interval: Duration,
    /// Consecutive rate-limit waits tolerated for one attempt.
    pub max_waits: u32,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            ceiling: Duration::from_secs(3 * 3600),
            margin: Duration::from_secs(5),
            default_wait: Duration::from_secs(60),
            report_interval: Duration::from_secs(30),
            max_waits: 10,
        }
    }
}

impl RateLimitPolicy {
    /// Wait to apply for a failure message, or `None` when it is not a rate limit.
    pub fn wait_for(&self, message: &str) -> Option<Duration> {
        if !is_rate_limited(message) {
            return None;
        }
        let base = suggested_wait_secs(message)
            .map(Duration::from_secs)
            .unwrap_or(self.default_wait);
        Some(base.saturating_add(self.margin))
    }

    pub fn exceeds_ceiling(&self, wait: Duration) -> bool {
        wait > self.ceiling
    }

    /// Sleep for `total`, logging the remaining time every `report_interval`.
    pub fn sleep_reporting(&self, label: &str, total: Duration, sleeper: &dyn Sleeper) {
        let step = if self.report_interval.is_zero() {
            total
        } else {
            self.report_interval
        };
        let mut remaining = total;
        while !remaining.is_zero() {
            tracing::info!("{label}: rate limited, {}s remaining", remaining.as_secs());
            let slice = step.min(remaining);
            sleeper.sleep(slice);
            remaining -= slice;
        }
    }
}
