// Canonical error codes and their classification table.
// Every code maps to a category, severity, and retry policy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical error code shared with UI and telemetry consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Quota
    QuotaExceeded,
    QuotaDailyLimit,
    QuotaMonthlyLimit,
    RateLimited,
    // Network
    NetworkError,
    Timeout,
    ConnectionRefused,
    // Service
    ServiceUnavailable,
    ProviderError,
    ModelOverloaded,
    Maintenance,
    // Request
    InvalidRequest,
    ContextTooLarge,
    Unauthorized,
    Forbidden,
    ContentFiltered,
    // Response
    ResponseInvalid,
    ResponseEmpty,
    ResponseTruncated,
    /// Fallback for anything unrecognised, including codes added later.
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 20] = [
        ErrorCode::QuotaExceeded,
        ErrorCode::QuotaDailyLimit,
        ErrorCode::QuotaMonthlyLimit,
        ErrorCode::RateLimited,
        ErrorCode::NetworkError,
        ErrorCode::Timeout,
        ErrorCode::ConnectionRefused,
        ErrorCode::ServiceUnavailable,
        ErrorCode::ProviderError,
        ErrorCode::ModelOverloaded,
        ErrorCode::Maintenance,
        ErrorCode::InvalidRequest,
        ErrorCode::ContextTooLarge,
        ErrorCode::Unauthorized,
        ErrorCode::Forbidden,
        ErrorCode::ContentFiltered,
        ErrorCode::ResponseInvalid,
        ErrorCode::ResponseEmpty,
        ErrorCode::ResponseTruncated,
        ErrorCode::Unknown,
    ];

    /// Wire name of the code, e.g. `RATE_LIMITED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::QuotaDailyLimit => "QUOTA_DAILY_LIMIT",
            ErrorCode::QuotaMonthlyLimit => "QUOTA_MONTHLY_LIMIT",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::ModelOverloaded => "MODEL_OVERLOADED",
            ErrorCode::Maintenance => "MAINTENANCE",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::ContextTooLarge => "CONTEXT_TOO_LARGE",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::ContentFiltered => "CONTENT_FILTERED",
            ErrorCode::ResponseInvalid => "RESPONSE_INVALID",
            ErrorCode::ResponseEmpty => "RESPONSE_EMPTY",
            ErrorCode::ResponseTruncated => "RESPONSE_TRUNCATED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Parse a wire name. Unrecognised names become `Unknown`.
    pub fn parse(name: &str) -> ErrorCode {
        let name = name.trim();
        ErrorCode::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(name))
            .unwrap_or(ErrorCode::Unknown)
    }

    /// Static classification for this code.
    pub fn classification(&self) -> Classification {
        classify(*self)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad failure family, used to pick retry behaviour and UI treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Quota,
    Network,
    Service,
    Temporary,
    Permanent,
    Content,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Retry policy and presentation hints for one error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    /// Suggested backoff. Always `None` when not retryable.
    pub retry_after_ms: Option<u64>,
}

impl Classification {
    const fn retry(category: ErrorCategory, severity: Severity, after_ms: u64) -> Self {
        Self {
            category,
            severity,
            retryable: true,
            retry_after_ms: Some(after_ms),
        }
    }

    const fn fatal(category: ErrorCategory, severity: Severity) -> Self {
        Self {
            category,
            severity,
            retryable: false,
            retry_after_ms: None,
        }
    }
}

/// Default backoff for rate limiting when the server gives no `retry-after`.
pub const DEFAULT_RATE_LIMIT_BACKOFF_MS: u64 = 5_000;

/// Look up the classification for a code.
pub fn classify(code: ErrorCode) -> Classification {
    use ErrorCategory::*;
    use Severity::*;

    match code {
        ErrorCode::QuotaExceeded => Classification::fatal(Quota, Warning),
        ErrorCode::QuotaDailyLimit => Classification::fatal(Quota, Warning),
        ErrorCode::QuotaMonthlyLimit => Classification::fatal(Quota, Warning),
        ErrorCode::RateLimited => {
            Classification::retry(Quota, Info, DEFAULT_RATE_LIMIT_BACKOFF_MS)
        }

        ErrorCode::NetworkError => Classification::retry(Network, Warning, 3_000),
        ErrorCode::Timeout => Classification::retry(Network, Warning, 5_000),
        ErrorCode::ConnectionRefused => Classification::retry(Network, Error, 10_000),

        ErrorCode::ServiceUnavailable => Classification::retry(Service, Error, 30_000),
        ErrorCode::ProviderError => Classification::retry(Service, Error, 10_000),
        ErrorCode::ResponseInvalid => Classification::retry(Service, Warning, 10_000),
        ErrorCode::ResponseEmpty => Classification::retry(Service, Warning, 10_000),
        ErrorCode::ResponseTruncated => Classification::retry(Service, Warning, 10_000),

        ErrorCode::ModelOverloaded => Classification::retry(Temporary, Info, 15_000),
        ErrorCode::Maintenance => Classification::retry(Temporary, Warning, 60_000),

        ErrorCode::InvalidRequest => Classification::fatal(Permanent, Error),
        ErrorCode::ContextTooLarge => Classification::fatal(Permanent, Warning),
        ErrorCode::Unauthorized => Classification::fatal(Permanent, Critical),
        ErrorCode::Forbidden => Classification::fatal(Permanent, Critical),

        ErrorCode::ContentFiltered => Classification::fatal(Content, Warning),

        ErrorCode::Unknown => Classification::retry(ErrorCategory::Unknown, Error, 5_000),
    }
}
