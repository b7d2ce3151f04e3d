// Normalisation of raw failures into classified errors.
// Each parser handles one shape of failure; the first one that matches wins.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::clock::{Clock, SystemClock};

use super::classified::{ClassifiedError, ErrorContext};
use super::codes::{DEFAULT_RATE_LIMIT_BACKOFF_MS, ErrorCode};

/// A failure as it arrives from the fetch boundary, before classification.
#[derive(Error, Debug, Clone)]
pub enum RawError {
    /// The backend answered with a status code (any status, including 2xx
    /// responses whose body signals a failure).
    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        /// Raw `retry-after` header value.
        retry_after: Option<String>,
        body: Option<Value>,
        message: String,
    },

    /// The request never produced a response.
    #[error("transport failure: {message}")]
    Transport { message: String, timed_out: bool },

    #[error("{0}")]
    Message(String),

    #[error("{0}")]
    Classified(ClassifiedError),

    #[error("unrecognised error")]
    Unknown(Option<Value>),
}

impl From<reqwest::Error> for RawError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => RawError::Http {
                status: status.as_u16(),
                retry_after: None,
                body: None,
                message: e.to_string(),
            },
            None => RawError::Transport {
                timed_out: e.is_timeout(),
                message: e.to_string(),
            },
        }
    }
}

impl From<ClassifiedError> for RawError {
    fn from(e: ClassifiedError) -> Self {
        RawError::Classified(e)
    }
}

impl From<String> for RawError {
    fn from(message: String) -> Self {
        RawError::Message(message)
    }
}

impl From<&str> for RawError {
    fn from(message: &str) -> Self {
        RawError::Message(message.to_string())
    }
}

type Parser = fn(&RawError, &dyn Clock) -> Option<ClassifiedError>;

const PARSERS: [Parser; 5] = [
    parse_classified,
    parse_quota_payload,
    parse_http,
    parse_transport,
    parse_message,
];

/// Classify a raw failure. Never fails; unrecognised input becomes `UNKNOWN`.
pub fn parse_error(raw: &RawError) -> ClassifiedError {
    parse_error_with(raw, &SystemClock)
}

/// Classify a raw failure, stamping it with the given clock.
pub fn parse_error_with(raw: &RawError, clock: &dyn Clock) -> ClassifiedError {
    PARSERS
        .iter()
        .find_map(|parser| parser(raw, clock))
        .unwrap_or_else(|| parse_unknown(raw, clock))
}

fn parse_classified(raw: &RawError, _clock: &dyn Clock) -> Option<ClassifiedError> {
    match raw {
        RawError::Classified(e) => Some(e.clone()),
        _ => None,
    }
}

/// Quota exhaustion in a backend payload beats whatever the status code says.
fn parse_quota_payload(raw: &RawError, clock: &dyn Clock) -> Option<ClassifiedError> {
    let (body, technical) = match raw {
        RawError::Http {
            status,
            body: Some(body),
            message,
            ..
        } => (body, format!("HTTP {}: {}", status, message)),
        RawError::Unknown(Some(body)) => (body, body.to_string()),
        _ => return None,
    };

    let code = quota_marker(body)?;
    let context = ErrorContext {
        request_id: request_id(body),
        ..ErrorContext::default()
    };
    Some(ClassifiedError::at(code, technical, context, clock))
}

fn parse_http(raw: &RawError, clock: &dyn Clock) -> Option<ClassifiedError> {
    let RawError::Http {
        status,
        retry_after,
        body,
        message,
    } = raw
    else {
        return None;
    };

    let code = code_for_status(*status);
    let mut context = ErrorContext {
        request_id: body.as_ref().and_then(request_id),
        ..ErrorContext::default()
    };
    if code == ErrorCode::RateLimited {
        context.retry_after_ms = Some(parse_retry_after(retry_after.as_deref(), clock.now()));
    }

    let detail = body
        .as_ref()
        .and_then(body_message)
        .unwrap_or_else(|| message.clone());
    Some(ClassifiedError::at(
        code,
        format!("HTTP {}: {}", status, detail),
        context,
        clock,
    ))
}

fn parse_transport(raw: &RawError, clock: &dyn Clock) -> Option<ClassifiedError> {
    let RawError::Transport { message, timed_out } = raw else {
        return None;
    };

    let lower = message.to_lowercase();
    let code = if *timed_out || lower.contains("timeout") || lower.contains("timed out") {
        ErrorCode::Timeout
    } else {
        ErrorCode::NetworkError
    };
    Some(ClassifiedError::at(
        code,
        message.clone(),
        ErrorContext::default(),
        clock,
    ))
}

fn parse_message(raw: &RawError, clock: &dyn Clock) -> Option<ClassifiedError> {
    let RawError::Message(message) = raw else {
        return None;
    };
    Some(ClassifiedError::at(
        ErrorCode::Unknown,
        message.clone(),
        ErrorContext::default(),
        clock,
    ))
}

fn parse_unknown(raw: &RawError, clock: &dyn Clock) -> ClassifiedError {
    let technical = match raw {
        RawError::Unknown(Some(value)) => value.to_string(),
        other => other.to_string(),
    };
    ClassifiedError::at(ErrorCode::Unknown, technical, ErrorContext::default(), clock)
}

/// Map an HTTP status onto a canonical code.
pub fn code_for_status(status: u16) -> ErrorCode {
    match status {
        401 => ErrorCode::Unauthorized,
        403 => ErrorCode::Forbidden,
        429 => ErrorCode::RateLimited,
        500 | 502 | 503 => ErrorCode::ServiceUnavailable,
        504 => ErrorCode::Timeout,
        400..=499 => ErrorCode::InvalidRequest,
        _ => ErrorCode::Unknown,
    }
}

/// Parse a `retry-after` header (delay-seconds or HTTP-date) into milliseconds.
pub fn parse_retry_after(header: Option<&str>, now: DateTime<Utc>) -> u64 {
    let Some(value) = header.map(str::trim).filter(|v| !v.is_empty()) else {
        return DEFAULT_RATE_LIMIT_BACKOFF_MS;
    };

    if let Ok(secs) = value.parse::<f64>() {
        if secs.is_finite() && secs >= 0.0 {
            return (secs * 1000.0).round() as u64;
        }
        return DEFAULT_RATE_LIMIT_BACKOFF_MS;
    }

    match DateTime::parse_from_rfc2822(value) {
        Ok(at) => (at.with_timezone(&Utc) - now).num_milliseconds().max(0) as u64,
        Err(_) => DEFAULT_RATE_LIMIT_BACKOFF_MS,
    }
}

const CODE_FIELDS: [&str; 4] = ["code", "error_code", "errorCode", "type"];
const MESSAGE_FIELDS: [&str; 3] = ["message", "detail", "error"];

/// The quota code signalled by a backend payload, if any.
pub fn quota_marker(body: &Value) -> Option<ErrorCode> {
    let nested = body.get("error").filter(|e| e.is_object());
    let scopes = std::iter::once(body).chain(nested);

    for scope in scopes {
        for field in CODE_FIELDS {
            if let Some(name) = scope.get(field).and_then(Value::as_str) {
                match ErrorCode::parse(name) {
                    code @ (ErrorCode::QuotaExceeded
                    | ErrorCode::QuotaDailyLimit
                    | ErrorCode::QuotaMonthlyLimit) => return Some(code),
                    _ => {}
                }
                if mentions_quota(name) {
                    return Some(ErrorCode::QuotaExceeded);
                }
            }
        }

        for flag in ["quota_exceeded", "quotaExceeded"] {
            if scope.get(flag).and_then(Value::as_bool) == Some(true) {
                return Some(ErrorCode::QuotaExceeded);
            }
        }

        for field in MESSAGE_FIELDS {
            if let Some(text) = scope.get(field).and_then(Value::as_str) {
                if mentions_quota(text) {
                    return Some(ErrorCode::QuotaExceeded);
                }
            }
        }
    }

    match body {
        Value::String(text) if mentions_quota(text) => Some(ErrorCode::QuotaExceeded),
        _ => None,
    }
}

pub fn has_quota_marker(body: &Value) -> bool {
    quota_marker(body).is_some()
}

fn mentions_quota(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("quota_exceeded")
        || lower.contains("quota exceeded")
        || lower.contains("insufficient_quota")
}

fn request_id(body: &Value) -> Option<String> {
    ["request_id", "requestId"]
        .into_iter()
        .find_map(|field| body.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

fn body_message(body: &Value) -> Option<String> {
    let nested = body.get("error").filter(|e| e.is_object());
    std::iter::once(body)
        .chain(nested)
        .flat_map(|scope| MESSAGE_FIELDS.iter().filter_map(move |f| scope.get(*f)))
        .find_map(Value::as_str)
        .map(str::to_string)
}
