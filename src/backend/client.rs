// HTTP client for the AI backend.
// Sends JSON requests and turns every non-usable response into a RawError
// ready for classification.

use reqwest::{
    Client, Response,
    header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use crate::classify::{ErrorCode, ErrorContext, RawError, create_error, has_quota_marker};
use crate::config::Config;
use crate::error::{Result, TutorError};

/// Client for the AI feature endpoints.
#[derive(Debug, Clone)]
pub struct AiClient {
    client: Client,
    base_url: String,
}

impl AiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("tutor-ai"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .build()
            .map_err(TutorError::Http)?;

        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a JSON body to `endpoint` and decode the JSON reply.
    pub async fn post<B, T>(&self, endpoint: &str, body: &B) -> std::result::Result<T, RawError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, "sending AI request");
        let response = self.client.post(&url).json(body).send().await?;

        let value = check_response(response).await?;
        decode(value)
    }
}

/// Read a response and reject anything that is not a usable payload.
async fn check_response(response: Response) -> std::result::Result<Value, RawError> {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let text = response.text().await?;

    interpret_response(status, retry_after, &text)
}

/// Decide whether a raw status/body pair is a success payload.
pub fn interpret_response(
    status: u16,
    retry_after: Option<String>,
    text: &str,
) -> std::result::Result<Value, RawError> {
    let trimmed = text.trim();
    let body: Option<Value> = if trimmed.is_empty() {
        None
    } else {
        serde_json::from_str(trimmed).ok()
    };

    if !(200..300).contains(&status) {
        let message = match &body {
            Some(_) => format!("backend returned status {}", status),
            None if trimmed.is_empty() => format!("backend returned status {}", status),
            None => truncate(trimmed, 200),
        };
        return Err(RawError::Http {
            status,
            retry_after,
            body,
            message,
        });
    }

    match body {
        Some(body) if has_quota_marker(&body) => Err(RawError::Http {
            status,
            retry_after,
            body: Some(body),
            message: "backend reported quota exhaustion".to_string(),
        }),
        Some(Value::Null) => Err(empty_response(status)),
        Some(body) => Ok(body),
        None if trimmed.is_empty() => Err(empty_response(status)),
        None => Err(RawError::Classified(create_error(
            ErrorCode::ResponseInvalid,
            format!("response is not JSON: {}", truncate(trimmed, 200)),
            ErrorContext::default(),
        ))),
    }
}

fn empty_response(status: u16) -> RawError {
    RawError::Classified(create_error(
        ErrorCode::ResponseEmpty,
        format!("backend returned status {} with no body", status),
        ErrorContext::default(),
    ))
}

/// Decode a payload into the expected response type.
pub fn decode<T: DeserializeOwned>(value: Value) -> std::result::Result<T, RawError> {
    serde_json::from_value(value).map_err(|e| {
        RawError::Classified(create_error(
            ErrorCode::ResponseInvalid,
            format!("unexpected response shape: {}", e),
            ErrorContext::default(),
        ))
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::parse_error;
    use serde_json::json;

    #[test]
    fn test_success_payload_passes() {
        let value = interpret_response(200, None, r#"{ "hint": "factor it" }"#).unwrap();
        assert_eq!(value, json!({ "hint": "factor it" }));
    }

    #[test]
    fn test_error_status_carries_header_and_body() {
        let err = interpret_response(
            429,
            Some("2".to_string()),
            r#"{ "error": { "message": "slow down" } }"#,
        )
        .unwrap_err();

        let classified = parse_error(&err);
        assert_eq!(classified.code, ErrorCode::RateLimited);
        assert_eq!(classified.retry_after_ms, Some(2_000));
        assert_eq!(classified.technical_message, "HTTP 429: slow down");
    }

    #[test]
    fn test_quota_marker_in_ok_response() {
        let err = interpret_response(200, None, r#"{ "code": "QUOTA_EXCEEDED" }"#).unwrap_err();
        assert!(matches!(err, RawError::Http { status: 200, .. }));
        assert_eq!(parse_error(&err).code, ErrorCode::QuotaExceeded);
    }

    #[test]
    fn test_empty_and_invalid_bodies() {
        let err = interpret_response(200, None, "   ").unwrap_err();
        assert_eq!(parse_error(&err).code, ErrorCode::ResponseEmpty);

        let err = interpret_response(200, None, "null").unwrap_err();
        assert_eq!(parse_error(&err).code, ErrorCode::ResponseEmpty);

        let err = interpret_response(200, None, "<html>oops</html>").unwrap_err();
        assert_eq!(parse_error(&err).code, ErrorCode::ResponseInvalid);
    }

    #[test]
    fn test_non_json_error_page() {
        let err = interpret_response(502, None, "<html>Bad Gateway</html>").unwrap_err();
        let classified = parse_error(&err);
        assert_eq!(classified.code, ErrorCode::ServiceUnavailable);
        assert_eq!(classified.technical_message, "HTTP 502: <html>Bad Gateway</html>");
    }

    #[test]
    fn test_decode_shape_mismatch() {
        #[derive(Debug, serde::Deserialize)]
        struct Reply {
            #[allow(dead_code)]
            hint: String,
        }
        let err = decode::<Reply>(json!({ "other": 1 })).unwrap_err();
        assert_eq!(parse_error(&err).code, ErrorCode::ResponseInvalid);
    }

    #[test]
    fn test_client_trims_base_url() {
        let config = Config {
            backend_url: "https://ai.example.edu/api/".to_string(),
            ..Config::default()
        };
        let client = AiClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://ai.example.edu/api");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
