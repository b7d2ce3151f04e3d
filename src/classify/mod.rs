// Error classification module.
// Maps raw AI request failures onto the canonical code/category/retry taxonomy.

pub mod classified;
pub mod codes;
pub mod messages;
pub mod parse;

pub use classified::{ClassifiedError, ErrorContext, create_error};
pub use codes::{
    Classification, DEFAULT_RATE_LIMIT_BACKOFF_MS, ErrorCategory, ErrorCode, Severity, classify,
};
pub use messages::{UserMessage, user_message};
pub use parse::{
    RawError, code_for_status, has_quota_marker, parse_error, parse_error_with,
    parse_retry_after, quota_marker,
};
