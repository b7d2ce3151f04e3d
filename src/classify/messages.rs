// User-facing text for each error code.
// Titles are short headings; messages tell the student what to do next.

use super::codes::ErrorCode;

/// Title and message shown to the user for a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserMessage {
    pub title: &'static str,
    pub message: &'static str,
}

const fn msg(title: &'static str, message: &'static str) -> UserMessage {
    UserMessage { title, message }
}

pub fn user_message(code: ErrorCode) -> UserMessage {
    match code {
        ErrorCode::QuotaExceeded => msg(
            "AI usage limit reached",
            "You have used all of your AI assistant credits. Upgrade your plan or try again later.",
        ),
        ErrorCode::QuotaDailyLimit => msg(
            "Daily limit reached",
            "You have reached today's AI assistant limit. It resets at midnight.",
        ),
        ErrorCode::QuotaMonthlyLimit => msg(
            "Monthly limit reached",
            "You have reached this month's AI assistant limit. It resets at the start of next month.",
        ),
        ErrorCode::RateLimited => msg(
            "Too many requests",
            "You are sending requests too quickly. Please wait a moment and try again.",
        ),
        ErrorCode::NetworkError => msg(
            "Connection problem",
            "We could not reach the AI assistant. Check your internet connection and try again.",
        ),
        ErrorCode::Timeout => msg(
            "Request timed out",
            "The AI assistant took too long to respond. Please try again.",
        ),
        ErrorCode::ConnectionRefused => msg(
            "Service unreachable",
            "The AI assistant is not accepting connections right now. Please try again shortly.",
        ),
        ErrorCode::ServiceUnavailable => msg(
            "Service unavailable",
            "The AI assistant is temporarily unavailable. Please try again in a little while.",
        ),
        ErrorCode::ProviderError => msg(
            "AI provider error",
            "Our AI provider returned an error. Please try again.",
        ),
        ErrorCode::ModelOverloaded => msg(
            "High demand",
            "The AI assistant is busy right now. We will retry shortly.",
        ),
        ErrorCode::Maintenance => msg(
            "Scheduled maintenance",
            "The AI assistant is undergoing maintenance. Please check back soon.",
        ),
        ErrorCode::InvalidRequest => msg(
            "Invalid request",
            "Something about this request was not accepted. Please adjust it and try again.",
        ),
        ErrorCode::ContextTooLarge => msg(
            "Too much content",
            "This request is too long for the AI assistant. Try shortening your question or attachment.",
        ),
        ErrorCode::Unauthorized => msg(
            "Sign in required",
            "Your session has expired. Please sign in again to use the AI assistant.",
        ),
        ErrorCode::Forbidden => msg(
            "Access denied",
            "Your account does not have access to this AI feature.",
        ),
        ErrorCode::ContentFiltered => msg(
            "Content not allowed",
            "This request was blocked by our content guidelines. Please rephrase and try again.",
        ),
        ErrorCode::ResponseInvalid => msg(
            "Unexpected response",
            "The AI assistant returned a response we could not read. Please try again.",
        ),
        ErrorCode::ResponseEmpty => msg(
            "Empty response",
            "The AI assistant did not return an answer. Please try again.",
        ),
        ErrorCode::ResponseTruncated => msg(
            "Incomplete response",
            "The AI assistant's answer was cut off. Please try again.",
        ),
        ErrorCode::Unknown => msg(
            "Something went wrong",
            "An unexpected error occurred. Please try again.",
        ),
    }
}
