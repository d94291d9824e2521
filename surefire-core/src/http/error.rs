//! HTTP error mapping utilities

use crate::providers::{ErrorMapper, ProviderError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// Map a non-success HTTP response to a classified provider error
pub fn map_http_error(
    provider: &str,
    status: StatusCode,
    headers: Option<&HeaderMap>,
    body: Option<String>,
) -> ProviderError {
    let details = body
        .as_deref()
        .and_then(|b| serde_json::from_str::<Value>(b).ok())
        .and_then(|v| extract_error_details(&v));

    let message = details
        .as_ref()
        .map(|d| d.message.clone())
        .or(body)
        .filter(|m| !m.trim().is_empty());

    let retry_after = headers
        .and_then(|h| h.get(RETRY_AFTER))
        .and_then(|v| v.to_str().ok())
        .and_then(ErrorMapper::parse_retry_after)
        .or_else(|| details.and_then(|d| d.retry_after_seconds).and_then(ErrorMapper::retry_after_from_secs));

    ErrorMapper::from_status_code(provider, status.as_u16(), message.as_deref(), retry_after)
}

/// Map a transport-level reqwest failure
pub fn map_request_error(provider: &str, err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout {
            provider: provider.to_string(),
            after: Some(timeout),
        }
    } else if err.is_connect() {
        ProviderError::network(provider, format!("connection failed: {}", err))
    } else if err.is_decode() {
        ProviderError::invalid_response(provider, err.to_string())
    } else {
        ProviderError::network(provider, err.to_string())
    }
}

/// Error details extracted from response body
#[derive(Debug, PartialEq)]
struct ErrorDetails {
    message: String,
    retry_after_seconds: Option<f64>,
}

/// Extract error details from a JSON error body
fn extract_error_details(json: &Value) -> Option<ErrorDetails> {
    // OpenAI format: { "error": { "message": "...", "type": "...", "code": "..." } }
    if let Some(error) = json.get("error") {
        if let Some(message) = error.get("message").and_then(|v| v.as_str()) {
            return Some(ErrorDetails {
                message: message.to_string(),
                retry_after_seconds: error.get("retry_after").and_then(|v| v.as_f64()),
            });
        }
    }

    // Generic format: { "message": "...", "error": "..." }
    if let Some(message) = json.get("message").and_then(|v| v.as_str()) {
        return Some(ErrorDetails {
            message: message.to_string(),
            retry_after_seconds: json.get("retry_after").and_then(|v| v.as_f64()),
        });
    }

    if let Some(error) = json.get("error").and_then(|v| v.as_str()) {
        return Some(ErrorDetails {
            message: error.to_string(),
            retry_after_seconds: None,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ContextOverflow, ErrorClass};
    use reqwest::header::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_openai_error_body() {
        let body = json!({"error": {"message": "Invalid API key provided", "type": "invalid_request_error"}});
        let err = map_http_error("p", StatusCode::UNAUTHORIZED, None, Some(body.to_string()));
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert!(err.to_string().contains("Invalid API key provided"));
    }

    #[test]
    fn test_retry_after_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let body = json!({"error": {"message": "slow down", "retry_after": 30}});
        let err = map_http_error("p", StatusCode::TOO_MANY_REQUESTS, Some(&headers), Some(body.to_string()));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_retry_after_from_body() {
        let body = json!({"message": "slow down", "retry_after": 1.5});
        let err = map_http_error("p", StatusCode::TOO_MANY_REQUESTS, None, Some(body.to_string()));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_out_of_range_retry_after_header_is_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e20"));
        let err = map_http_error("p", StatusCode::TOO_MANY_REQUESTS, Some(&headers), None);
        assert_eq!(err.class(), ErrorClass::RateLimited);
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_negative_retry_after_in_body_is_dropped() {
        let body = json!({"error": {"message": "slow down", "retry_after": -1}});
        let err = map_http_error("p", StatusCode::TOO_MANY_REQUESTS, None, Some(body.to_string()));
        assert_eq!(err.class(), ErrorClass::RateLimited);
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn test_bad_header_falls_back_to_body_hint() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("1e20"));
        let body = json!({"error": {"message": "slow down", "retry_after": 4}});
        let err = map_http_error("p", StatusCode::TOO_MANY_REQUESTS, Some(&headers), Some(body.to_string()));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_context_overflow_on_bad_request_is_retryable() {
        let body = json!({"error": {"message": "This model's maximum context length is 8192 tokens."}});
        let err = map_http_error("p", StatusCode::BAD_REQUEST, None, Some(body.to_string()));
        assert!(err.is_retryable());
        assert_eq!(err.context_overflow(), Some(ContextOverflow::Limit(8192)));
    }

    #[test]
    fn test_plain_text_body() {
        let err = map_http_error("p", StatusCode::BAD_GATEWAY, None, Some("upstream down".to_string()));
        assert_eq!(err.class(), ErrorClass::Provider);
        assert!(err.to_string().contains("upstream down"));
    }

    #[test]
    fn test_extract_error_string_field() {
        let details = extract_error_details(&json!({"error": "boom"})).unwrap();
        assert_eq!(details.message, "boom");
        assert!(extract_error_details(&json!({"ok": true})).is_none());
    }
}
