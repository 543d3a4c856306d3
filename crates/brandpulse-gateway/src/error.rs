use std::fmt::{Display, Formatter};
use std::time::Duration;

use thiserror::Error;

use crate::ProviderId;

const BODY_EXCERPT_LIMIT: usize = 256;

/// Validation errors for identifiers and request parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid provider '{value}', expected one of similarweb, instagram, facebook, nlp")]
    InvalidProvider { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("unix timestamp {value} is out of range")]
    TimestampOutOfRange { value: i64 },

    #[error("required field '{field}' is missing or empty")]
    MissingField { field: &'static str },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
}

/// Classification of a single failed outbound attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallErrorKind {
    /// Local rate budget exhausted before the request was sent.
    RateLimitExceeded,
    /// Upstream answered 429.
    UpstreamThrottled,
    /// Upstream answered 5xx.
    UpstreamServerError,
    /// Upstream answered 4xx other than 429.
    UpstreamClientError,
    /// Connection, timeout or body-read failure, or a 1xx/3xx answer the
    /// transport did not resolve.
    Transport,
    /// Response body is not valid JSON.
    Decode,
}

impl CallErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "budget.rate_limit_exceeded",
            Self::UpstreamThrottled => "upstream.throttled",
            Self::UpstreamServerError => "upstream.server_error",
            Self::UpstreamClientError => "upstream.client_error",
            Self::Transport => "upstream.transport",
            Self::Decode => "upstream.decode",
        }
    }
}

/// Structured failure of one attempt, carried into the terminal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    kind: CallErrorKind,
    message: String,
    status: Option<u16>,
    retry_after: Option<Duration>,
    retryable: bool,
}

impl CallError {
    pub fn rate_limit_exceeded(retry_in: Duration) -> Self {
        Self {
            kind: CallErrorKind::RateLimitExceeded,
            message: format!(
                "local rate budget exhausted; next token in {:.3}s",
                retry_in.as_secs_f64()
            ),
            status: None,
            retry_after: Some(retry_in),
            retryable: true,
        }
    }

    pub fn upstream_throttled(retry_after: Option<Duration>) -> Self {
        Self {
            kind: CallErrorKind::UpstreamThrottled,
            message: String::from("upstream returned 429 Too Many Requests"),
            status: Some(429),
            retry_after,
            retryable: true,
        }
    }

    pub fn upstream_server_error(status: u16, body: &str) -> Self {
        Self {
            kind: CallErrorKind::UpstreamServerError,
            message: format!("upstream returned status {status}: {}", excerpt(body)),
            status: Some(status),
            retry_after: None,
            retryable: true,
        }
    }

    pub fn upstream_client_error(status: u16, body: &str) -> Self {
        Self {
            kind: CallErrorKind::UpstreamClientError,
            message: format!("upstream returned status {status}: {}", excerpt(body)),
            status: Some(status),
            retry_after: None,
            retryable: false,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Transport,
            message: message.into(),
            status: None,
            retry_after: None,
            retryable: true,
        }
    }

    /// Informational or redirect status reaching the adapter; retrying would
    /// get the same answer.
    pub fn unexpected_status(status: u16) -> Self {
        Self {
            kind: CallErrorKind::Transport,
            message: format!("upstream returned unexpected status {status}"),
            status: Some(status),
            retry_after: None,
            retryable: false,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: CallErrorKind::Decode,
            message: message.into(),
            status: None,
            retry_after: None,
            retryable: false,
        }
    }

    /// Overrides the default retry classification, e.g. for providers whose
    /// 4xx answers are known to be transient.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub const fn kind(&self) -> CallErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl Display for CallError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for CallError {}

/// Error surfaced to gateway callers.
///
/// A successful transport with no usable data is not an error; adapters
/// return `Ok(None)` for that case.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{provider} '{endpoint}' failed after {attempts} attempt(s): {cause}")]
    Terminal {
        provider: ProviderId,
        endpoint: String,
        attempts: u32,
        cause: CallError,
    },

    #[error("{provider} '{endpoint}' cancelled after {attempts} attempt(s)")]
    Cancelled {
        provider: ProviderId,
        endpoint: String,
        attempts: u32,
    },

    #[error("invalid {provider} request: {message}")]
    InvalidRequest {
        provider: ProviderId,
        message: String,
    },
}

impl GatewayError {
    pub fn invalid_request(provider: ProviderId, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            provider,
            message: message.into(),
        }
    }

    pub const fn provider(&self) -> ProviderId {
        match self {
            Self::Terminal { provider, .. }
            | Self::Cancelled { provider, .. }
            | Self::InvalidRequest { provider, .. } => *provider,
        }
    }

    /// The failure of the last attempt, when one was made.
    pub fn last_cause(&self) -> Option<&CallError> {
        match self {
            Self::Terminal { cause, .. } => Some(cause),
            Self::Cancelled { .. } | Self::InvalidRequest { .. } => None,
        }
    }

    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Terminal { attempts, .. } | Self::Cancelled { attempts, .. } => *attempts,
            Self::InvalidRequest { .. } => 0,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Terminal { cause, .. } => cause.code(),
            Self::Cancelled { .. } => "gateway.cancelled",
            Self::InvalidRequest { .. } => "gateway.invalid_request",
        }
    }
}

/// Failures of the response cache and its store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache value serialization error: {0}")]
    Serialization(String),

    #[error("shared computation for key '{key}' ended without a result")]
    ComputeAborted { key: String },

    #[error(transparent)]
    Compute(#[from] GatewayError),
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Invalid gateway configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {name} has invalid value '{value}': {reason}")]
    InvalidVar {
        name: String,
        value: String,
        reason: String,
    },

    #[error("rate budget for {provider} must have capacity >= 1 and a positive refill rate")]
    InvalidBudget { provider: ProviderId },

    #[error("retry policy for {provider} must allow at least one attempt")]
    InvalidRetryPolicy { provider: ProviderId },
}

fn excerpt(body: &str) -> &str {
    let trimmed = body.trim();
    if trimmed.len() <= BODY_EXCERPT_LIMIT {
        return trimmed;
    }
    let mut end = BODY_EXCERPT_LIMIT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    &trimmed[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_permanent_unless_overridden() {
        let error = CallError::upstream_client_error(404, "not found");
        assert!(!error.retryable());
        assert!(error.with_retryable(true).retryable());
    }

    #[test]
    fn server_error_message_truncates_large_bodies() {
        let body = "é".repeat(400);
        let error = CallError::upstream_server_error(502, &body);
        assert_eq!(error.status(), Some(502));
        assert!(error.message().len() < 300);
        assert_eq!(error.code(), "upstream.server_error");
    }

    #[test]
    fn terminal_error_exposes_last_cause() {
        let error = GatewayError::Terminal {
            provider: ProviderId::Facebook,
            endpoint: String::from("page/posts"),
            attempts: 5,
            cause: CallError::upstream_server_error(500, "boom"),
        };

        assert_eq!(error.attempts(), 5);
        assert_eq!(error.last_cause().and_then(CallError::status), Some(500));
        assert!(error.to_string().contains("after 5 attempt(s)"));
    }
}
