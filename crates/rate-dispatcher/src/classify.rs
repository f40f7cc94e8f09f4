//! Rate-limit classification (§4.3): deciding whether a [`Response`] means
//! "the host is throttling us and we should back off" as opposed to a plain
//! success or a plain (non-rate-limit) failure.

use crate::response::Response;

/// The result of inspecting a response for rate-limit signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    /// Whether the response should be treated as rate-limited.
    pub rate_limited: bool,
    /// A server-provided retry-after hint in seconds, if one parsed.
    pub retry_after_hint: Option<f64>,
}

/// Classifies a response per the rules in the specification:
///
/// - `status == 429`
/// - header `Retry-After` present and parses as a non-negative number of seconds
/// - header `X-RateLimit-Remaining == "0"`
/// - header `X-Secondary-Rate-Limit` present with any value
///
/// `Retry-After` accepts the alternative key `X-RateLimit-Reset-After` with
/// identical semantics. A header present but failing to parse numerically is
/// "no hint" — it does not by itself cause rate-limit classification.
pub fn classify<P>(response: &Response<P>) -> Classification {
    let retry_after_hint = retry_after_seconds(response);

    let rate_limited = response.status == 429
        || retry_after_hint.is_some()
        || response.headers.get("x-ratelimit-remaining") == Some("0")
        || response.headers.contains("x-secondary-rate-limit");

    Classification {
        rate_limited,
        retry_after_hint,
    }
}

fn retry_after_seconds<P>(response: &Response<P>) -> Option<f64> {
    let raw = response
        .headers
        .get("retry-after")
        .or_else(|| response.headers.get("x-ratelimit-reset-after"))?;

    let seconds: f64 = raw.trim().parse().ok()?;
    if seconds.is_sign_negative() || !seconds.is_finite() {
        None
    } else {
        Some(seconds)
    }
}
