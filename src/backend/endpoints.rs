// AI backend endpoint functions.
// Typed calls for each assistant feature.

use crate::classify::{ErrorCode, ErrorContext, RawError, create_error};

use super::client::AiClient;
use super::types::{
    ChatRequest, ChatResponse, FeedbackRequest, FeedbackResponse, FinishReason, HintRequest,
    HintResponse,
};

impl AiClient {
    /// Send a chat turn to the assistant.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, RawError> {
        let response: ChatResponse = self.post("/chat", request).await?;
        check_finish(response.finish_reason)?;
        Ok(response)
    }

    /// Get a hint for a question.
    pub async fn hint(&self, request: &HintRequest) -> Result<HintResponse, RawError> {
        let response: HintResponse = self.post("/hint", request).await?;
        check_finish(response.finish_reason)?;
        if response.hint.trim().is_empty() {
            return Err(RawError::Classified(create_error(
                ErrorCode::ResponseEmpty,
                format!("empty hint for question {}", request.question_id),
                ErrorContext::default(),
            )));
        }
        Ok(response)
    }

    /// Get feedback on a submission.
    pub async fn feedback(&self, request: &FeedbackRequest) -> Result<FeedbackResponse, RawError> {
        let response: FeedbackResponse = self.post("/feedback", request).await?;
        check_finish(response.finish_reason)?;
        Ok(response)
    }
}

/// Reject generations that were filtered or cut short.
pub fn check_finish(reason: Option<FinishReason>) -> Result<(), RawError> {
    let (code, message) = match reason {
        Some(FinishReason::ContentFilter) => (
            ErrorCode::ContentFiltered,
            "generation stopped by content filter",
        ),
        Some(FinishReason::Length) => (
            ErrorCode::ResponseTruncated,
            "generation hit the token limit",
        ),
        _ => return Ok(()),
    };
    Err(RawError::Classified(create_error(
        code,
        message,
        ErrorContext::default(),
    )))
}
