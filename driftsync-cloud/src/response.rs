//! Backoff and metadata headers on server responses.
//!
//! Servers ask clients to slow down in three ways: `Retry-After` (seconds or
//! an HTTP date), `X-Backoff` and `X-Weave-Backoff` (seconds). An absent,
//! empty or malformed header is *absent*, which is distinct from zero.
//! Header names are case-insensitive; when a header repeats, the first value
//! wins.

use crate::clock::duration_millis;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

pub const X_BACKOFF: &str = "x-backoff";
pub const X_WEAVE_BACKOFF: &str = "x-weave-backoff";
pub const X_WEAVE_TIMESTAMP: &str = "x-weave-timestamp";
pub const X_WEAVE_RECORDS: &str = "x-weave-records";
pub const X_WEAVE_QUOTA_REMAINING: &str = "x-weave-quota-remaining";
pub const X_WEAVE_ALERT: &str = "x-weave-alert";
pub const X_TIMESTAMP: &str = "x-timestamp";

/// The backoff directives carried by one response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResponseBackoffSignal {
    pub status: u16,
    pub retry_after_secs: Option<u64>,
    pub backoff_secs: Option<u64>,
    pub weave_backoff_secs: Option<u64>,
}

impl ResponseBackoffSignal {
    /// Reads every backoff header. `now_ms` resolves date-valued `Retry-After`.
    pub fn parse(status: u16, headers: &HeaderMap, now_ms: u64) -> Self {
        Self {
            status,
            retry_after_secs: retry_after_in_seconds(headers, now_ms),
            backoff_secs: backoff_in_seconds(headers),
            weave_backoff_secs: weave_backoff_in_seconds(headers),
        }
    }

    /// Largest requested delay in seconds, or `None` when nothing was asked.
    pub fn total_backoff_in_seconds(&self, include_retry_after: bool) -> Option<u64> {
        let retry_after = if include_retry_after {
            self.retry_after_secs
        } else {
            None
        };
        [retry_after, self.backoff_secs, self.weave_backoff_secs]
            .into_iter()
            .flatten()
            .max()
    }

    /// Combined delay. `Retry-After` only counts on error statuses; on a
    /// success it is advisory and ignored.
    pub fn total_backoff(&self) -> Option<Duration> {
        let include_retry_after = !(200..300).contains(&self.status);
        self.total_backoff_in_seconds(include_retry_after)
            .map(Duration::from_secs)
    }

    pub fn total_backoff_in_millis(&self) -> Option<u64> {
        self.total_backoff().map(duration_millis)
    }

    pub fn is_empty(&self) -> bool {
        self.retry_after_secs.is_none() && self.backoff_secs.is_none() && self.weave_backoff_secs.is_none()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl reqwest::header::AsHeaderName) -> Option<&'a str> {
    let value = headers.get(name)?.to_str().ok()?.trim();
    if value.is_empty() { None } else { Some(value) }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    header_str(headers, name)?.parse().ok()
}

/// `Retry-After` as whole seconds from `now_ms`. Dates in the past are absent.
pub fn retry_after_in_seconds(headers: &HeaderMap, now_ms: u64) -> Option<u64> {
    let value = header_str(headers, RETRY_AFTER)?;
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let at = parse_http_date(value)?;
    let now_ms = i64::try_from(now_ms).ok()?;
    let delta_ms = u64::try_from(at.timestamp_millis().checked_sub(now_ms)?).ok()?;
    Some(delta_ms / 1000)
}

pub fn backoff_in_seconds(headers: &HeaderMap) -> Option<u64> {
    header_u64(headers, X_BACKOFF)
}

pub fn weave_backoff_in_seconds(headers: &HeaderMap) -> Option<u64> {
    header_u64(headers, X_WEAVE_BACKOFF)
}

/// Parses IMF-fixdate, RFC 850 and asctime forms.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

// ── X-Weave-* metadata ──

/// `X-Weave-Timestamp` (decimal seconds) in milliseconds.
pub fn weave_timestamp_millis(headers: &HeaderMap) -> Option<u64> {
    decimal_seconds_to_millis(header_str(headers, X_WEAVE_TIMESTAMP)?)
}

/// Server time from whichever timestamp header is present.
pub fn server_timestamp_millis(headers: &HeaderMap) -> Option<u64> {
    weave_timestamp_millis(headers)
        .or_else(|| decimal_seconds_to_millis(header_str(headers, X_TIMESTAMP)?))
        .or_else(|| {
            let date = parse_http_date(header_str(headers, reqwest::header::DATE)?)?;
            u64::try_from(date.timestamp_millis()).ok()
        })
}

pub fn weave_records(headers: &HeaderMap) -> Option<u64> {
    header_u64(headers, X_WEAVE_RECORDS)
}

/// Remaining quota in KB. Servers may report a negative value when over quota.
pub fn weave_quota_remaining(headers: &HeaderMap) -> Option<i64> {
    header_str(headers, X_WEAVE_QUOTA_REMAINING)?.parse().ok()
}

pub fn weave_alert(headers: &HeaderMap) -> Option<String> {
    header_str(headers, X_WEAVE_ALERT).map(str::to_string)
}

/// "1323393518.04" → 1323393518040. Extra fractional digits are truncated.
pub fn decimal_seconds_to_millis(value: &str) -> Option<u64> {
    let (whole, fraction) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs: u64 = whole.parse().ok()?;
    let mut millis = 0u64;
    for (i, digit) in fraction.bytes().take(3).enumerate() {
        millis += u64::from(digit - b'0') * 10u64.pow(2 - i as u32);
    }
    secs.checked_mul(1000)?.checked_add(millis)
}
