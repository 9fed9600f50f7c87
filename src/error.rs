//! Typed errors for the router and its adapters.
//!
//! Every caller-visible failure carries a `remediation` string (spec §6/§7):
//! the precedence order below is enforced by [`crate::router::Router::complete`],
//! not by this enum itself — validation errors are raised before any provider
//! call, policy errors after, transient/non-transient upstream errors bubble
//! from the adapter unchanged.

use thiserror::Error;

/// Top-level error returned from [`crate::router::Router::complete`].
#[derive(Debug, Error)]
pub enum RouterError {
    /// The requested model is not present in the vendor's allowlist.
    #[error("model not allowed: {model}. allowed: [{allowed}]. {remediation}")]
    ModelNotAllowed {
        model: String,
        allowed: String,
        remediation: String,
    },

    /// The ALS block rendered to more than `ALS_MAX_CHARS` NFC code points.
    /// Never truncated — immutability forbids rewriting caller-bound text.
    #[error("ALS block exceeds {limit} NFC chars ({actual} chars). {remediation}")]
    AlsBlockTooLong {
        limit: usize,
        actual: usize,
        remediation: String,
    },

    /// `grounding_mode == REQUIRED` but grounding was never attempted, or no
    /// tool call occurred.
    #[error("grounding required but not attempted: {remediation}")]
    GroundingRequiredError { remediation: String },

    /// `grounding_mode == REQUIRED`, tools were invoked, but zero anchored
    /// citations were extracted.
    #[error("grounding required but no anchored citations found: {remediation}")]
    GroundingRequiredFailed { remediation: String },

    /// The provider invoked a search tool but returned zero results.
    #[error("grounding tool returned empty results: {remediation}")]
    GroundingEmptyResults { remediation: String },

    /// The circuit breaker for this `vendor:model` is open.
    #[error("circuit open for {vendor_model}, reopening at {reopen_at_epoch_ms}ms")]
    CircuitOpen {
        vendor_model: String,
        reopen_at_epoch_ms: u128,
    },

    /// The pacer says this `vendor:model` must wait before the next call.
    #[error("rate limited, retry after {wait_ms}ms")]
    RateLimitedWait { wait_ms: u64 },

    /// Provider credentials are missing or malformed.
    #[error("missing or invalid credentials: {remediation}")]
    AuthMissing { remediation: String },

    /// The outer deadline for the provider call elapsed.
    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The caller cancelled the in-flight request.
    #[error("request cancelled")]
    Cancelled,

    /// Any adapter-level failure that isn't one of the above, still tagged
    /// with whether it should trip the circuit breaker.
    #[error("upstream error: {0}")]
    Upstream(#[from] AdapterError),
}

impl RouterError {
    /// Stable machine-readable tag for `metadata.error_type` (spec §6).
    pub fn error_type(&self) -> &'static str {
        match self {
            RouterError::ModelNotAllowed { .. } => "MODEL_NOT_ALLOWED",
            RouterError::AlsBlockTooLong { .. } => "ALS_BLOCK_TOO_LONG",
            RouterError::GroundingRequiredError { .. } => "GROUNDING_REQUIRED_ERROR",
            RouterError::GroundingRequiredFailed { .. } => "GROUNDING_REQUIRED_FAILED",
            RouterError::GroundingEmptyResults { .. } => "GROUNDING_EMPTY_RESULTS",
            RouterError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            RouterError::RateLimitedWait { .. } => "RATE_LIMITED_WAIT",
            RouterError::AuthMissing { .. } => "AUTH_MISSING",
            RouterError::Timeout { .. } => "TIMEOUT",
            RouterError::Cancelled => "CANCELLED",
            RouterError::Upstream(_) => "UPSTREAM_ERROR",
        }
    }

    /// Whether this failure should count against the per-`vendor:model`
    /// circuit breaker (spec §7: only transient upstream errors do).
    pub fn trips_breaker(&self) -> bool {
        matches!(self, RouterError::Upstream(e) if e.transient)
    }
}

/// An error surfaced by a provider adapter, tagged with whether the
/// underlying condition is transient (spec §4.5 classifier).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct AdapterError {
    pub message: String,
    pub transient: bool,
    /// `Retry-After` delay in seconds, if the provider supplied one (429s).
    pub retry_after_secs: Option<u64>,
}

impl AdapterError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
            retry_after_secs: None,
        }
    }

    pub fn transient_with_retry_after(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self {
            message: message.into(),
            transient: true,
            retry_after_secs: Some(retry_after_secs),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
            retry_after_secs: None,
        }
    }

    /// Classify an HTTP status code per spec §4.5: 429/500/502/503/504 are
    /// transient; any other non-2xx is not.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            429 => Self::transient(format!("HTTP 429: {body}")),
            500 | 502 | 503 | 504 => Self::transient(format!("HTTP {status}: {body}")),
            other => Self::permanent(format!("HTTP {other}: {body}")),
        }
    }

    /// Same classification as [`Self::from_status`], but on a 429 also
    /// parses the Pacer's wait hint out of the response headers (spec
    /// §4.5: `Retry-After` or OpenAI-style `x-ratelimit-reset-*`).
    pub fn from_response(status: u16, headers: &reqwest::header::HeaderMap, body: impl Into<String>) -> Self {
        let body = body.into();
        if status == 429 {
            return match Self::parse_retry_after_secs(headers) {
                Some(secs) => Self::transient_with_retry_after(format!("HTTP 429: {body}"), secs),
                None => Self::transient(format!("HTTP 429: {body}")),
            };
        }
        Self::from_status(status, body)
    }

    /// `Retry-After` (seconds; HTTP-date form isn't parsed — no date crate
    /// in the dependency tree, and providers observed in practice always
    /// send seconds) takes priority, then the first present OpenAI-style
    /// `x-ratelimit-reset-*` header (`6m0s`/`30s`/plain-seconds Go duration
    /// strings).
    fn parse_retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
        if let Some(v) = headers.get(reqwest::header::RETRY_AFTER).and_then(|v| v.to_str().ok()) {
            if let Ok(secs) = v.trim().parse::<u64>() {
                return Some(secs);
            }
        }
        for name in ["x-ratelimit-reset-requests", "x-ratelimit-reset-tokens", "x-ratelimit-reset"] {
            if let Some(v) = headers.get(name).and_then(|v| v.to_str().ok()) {
                if let Some(secs) = Self::parse_go_duration_secs(v) {
                    return Some(secs);
                }
            }
        }
        None
    }

    /// Parse a Go-style duration string (`"6m0s"`, `"30s"`, `"250ms"`, or a
    /// bare integer meaning seconds) into whole seconds, rounded up.
    fn parse_go_duration_secs(value: &str) -> Option<u64> {
        let value = value.trim();
        if let Ok(secs) = value.parse::<u64>() {
            return Some(secs);
        }

        let mut total_ms: f64 = 0.0;
        let mut number = String::new();
        let mut saw_component = false;
        let mut chars = value.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                number.push(c);
                chars.next();
                continue;
            }
            let mut unit = String::new();
            while let Some(&c2) = chars.peek() {
                if c2.is_alphabetic() {
                    unit.push(c2);
                    chars.next();
                } else {
                    break;
                }
            }
            let magnitude: f64 = number.parse().ok()?;
            number.clear();
            let unit_ms = match unit.as_str() {
                "ms" => 1.0,
                "s" => 1_000.0,
                "m" => 60_000.0,
                "h" => 3_600_000.0,
                _ => return None,
            };
            total_ms += magnitude * unit_ms;
            saw_component = true;
        }

        saw_component.then(|| (total_ms / 1000.0).ceil() as u64)
    }

    /// Classify an SDK/transport-level error by name substring, per spec
    /// §4.5 ("ServiceUnavailable", "TooManyRequests", "UNAVAILABLE",
    /// "RateLimit"), plus bare connection errors.
    pub fn from_sdk_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let text = err.to_string();
        let is_transient = ["ServiceUnavailable", "TooManyRequests", "UNAVAILABLE", "RateLimit"]
            .iter()
            .any(|needle| text.contains(needle));
        if is_transient {
            Self::transient(text)
        } else {
            Self::permanent(text)
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return Self::transient(err.to_string());
        }
        match err.status().map(|s| s.as_u16()) {
            Some(status) => Self::from_status(status, err.to_string()),
            None => Self::transient(err.to_string()),
        }
    }
}

impl From<reqwest_middleware::Error> for AdapterError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => e.into(),
            reqwest_middleware::Error::Middleware(e) => Self::transient(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> reqwest::header::HeaderMap {
        let mut map = reqwest::header::HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                reqwest::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                reqwest::header::HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn retry_after_seconds_header_feeds_retry_after_secs() {
        let err = AdapterError::from_response(429, &headers(&[("retry-after", "30")]), "rate limited");
        assert!(err.transient);
        assert_eq!(err.retry_after_secs, Some(30));
    }

    #[test]
    fn ratelimit_reset_go_duration_header_is_parsed_when_retry_after_is_absent() {
        let err = AdapterError::from_response(429, &headers(&[("x-ratelimit-reset-requests", "6m0s")]), "rate limited");
        assert_eq!(err.retry_after_secs, Some(360));
    }

    #[test]
    fn missing_headers_leave_retry_after_secs_none_but_still_transient() {
        let err = AdapterError::from_response(429, &headers(&[]), "rate limited");
        assert!(err.transient);
        assert_eq!(err.retry_after_secs, None);
    }

    #[test]
    fn non_429_status_is_unaffected_by_header_parsing() {
        let err = AdapterError::from_response(500, &headers(&[("retry-after", "30")]), "server error");
        assert!(err.transient);
        assert_eq!(err.retry_after_secs, None);
    }
}
