// The classified error value handed to UI and telemetry consumers.
// Combines the code's classification with its user-facing text and a timestamp.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

use super::codes::{ErrorCategory, ErrorCode, Severity, classify};
use super::messages::user_message;

/// A failure mapped onto the canonical taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{code}: {technical_message}")]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub retryable: bool,
    /// Backoff before a retry. `None` whenever `retryable` is false.
    pub retry_after_ms: Option<u64>,
    pub user_title: String,
    pub user_message: String,
    pub technical_message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Optional context folded into a new error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub request_id: Option<String>,
    /// Server-provided backoff, overriding the table default.
    pub retry_after_ms: Option<u64>,
}

impl ErrorContext {
    pub fn with_retry_after(retry_after_ms: u64) -> Self {
        Self {
            retry_after_ms: Some(retry_after_ms),
            ..Self::default()
        }
    }
}

impl ClassifiedError {
    /// Build an error for `code`, stamped with the given clock.
    pub fn at(
        code: ErrorCode,
        technical_message: impl Into<String>,
        context: ErrorContext,
        clock: &dyn Clock,
    ) -> Self {
        let classification = classify(code);
        let text = user_message(code);

        let retry_after_ms = if classification.retryable {
            context.retry_after_ms.or(classification.retry_after_ms)
        } else {
            None
        };

        Self {
            code,
            category: classification.category,
            severity: classification.severity,
            retryable: classification.retryable,
            retry_after_ms,
            user_title: text.title.to_string(),
            user_message: text.message.to_string(),
            technical_message: technical_message.into(),
            timestamp: clock.now(),
            request_id: context.request_id,
        }
    }

    /// Attach the id of the request that failed.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Backoff as a `Duration`, if the error may be retried.
    pub fn retry_delay(&self) -> Option<Duration> {
        if !self.retryable {
            return None;
        }
        self.retry_after_ms.map(Duration::from_millis)
    }

    pub fn is_quota_error(&self) -> bool {
        self.category == ErrorCategory::Quota
    }

    pub fn is_network_error(&self) -> bool {
        self.category == ErrorCategory::Network
    }

    /// Whether retrying cannot help and the user has to change something
    /// (sign in, upgrade, rephrase).
    pub fn requires_user_action(&self) -> bool {
        !self.retryable
            && matches!(
                self.category,
                ErrorCategory::Quota | ErrorCategory::Permanent | ErrorCategory::Content
            )
    }
}

/// Build a classified error stamped with the system clock.
pub fn create_error(
    code: ErrorCode,
    technical_message: impl Into<String>,
    context: ErrorContext,
) -> ClassifiedError {
    ClassifiedError::at(code, technical_message, context, &SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_create_error_combines_tables() {
        let clock = ManualClock::default();
        let err = ClassifiedError::at(
            ErrorCode::ModelOverloaded,
            "upstream 529",
            ErrorContext::default(),
            &clock,
        );

        assert_eq!(err.category, ErrorCategory::Temporary);
        assert!(err.retryable);
        assert_eq!(err.retry_after_ms, Some(15_000));
        assert_eq!(err.user_title, "High demand");
        assert_eq!(err.technical_message, "upstream 529");
        assert_eq!(err.timestamp, clock.now());
        assert_eq!(err.retry_delay(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_fatal_error_ignores_retry_after_override() {
        let err = create_error(
            ErrorCode::Forbidden,
            "no access",
            ErrorContext::with_retry_after(9_000),
        );

        assert!(!err.retryable);
        assert_eq!(err.retry_after_ms, None);
        assert_eq!(err.retry_delay(), None);
        assert!(err.requires_user_action());
    }

    #[test]
    fn test_display_and_request_id() {
        let err = create_error(ErrorCode::Timeout, "read timed out", ErrorContext::default())
            .with_request_id("req-7");

        assert_eq!(err.to_string(), "TIMEOUT: read timed out");
        assert_eq!(err.request_id.as_deref(), Some("req-7"));
        assert!(err.is_network_error());
        assert!(!err.is_quota_error());
    }

    #[test]
    fn test_serializes_with_wire_code() {
        let err = create_error(ErrorCode::RateLimited, "slow down", ErrorContext::default());
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["code"], "RATE_LIMITED");
        assert_eq!(json["category"], "quota");
        assert_eq!(json["severity"], "info");
        assert!(json.get("request_id").is_none());
    }
}
