//! Classified per-attempt provider errors

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Result type for a single provider attempt
pub type ProviderResult<T> = Result<T, ProviderError>;

/// What a provider said about an over-long prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextOverflow {
    /// The provider named its limit in tokens
    Limit(usize),
    /// Overflow reported without a usable number
    Unspecified,
}

/// An error from one attempt against one provider
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("{provider}: rate limited{}", fmt_retry_after(.retry_after))]
    RateLimit {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("{provider}: timed out{}", fmt_after(.after))]
    Timeout {
        provider: String,
        after: Option<Duration>,
    },

    #[error("{provider}: network error: {message}")]
    Network { provider: String, message: String },

    #[error("{provider}: invalid response: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("{provider}: provider error: {message}")]
    Provider {
        provider: String,
        message: String,
        context_overflow: Option<ContextOverflow>,
    },

    /// Malformed request or rejected credentials; retrying cannot help
    #[error("{provider}: fatal error: {message}")]
    Fatal { provider: String, message: String },
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(" (retry after {:?})", d))
        .unwrap_or_default()
}

fn fmt_after(after: &Option<Duration>) -> String {
    after.map(|d| format!(" after {:?}", d)).unwrap_or_default()
}

/// Coarse classification driving the retry decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited,
    /// Network failures and timeouts
    Transient,
    InvalidResponse,
    Provider,
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Transient => "transient",
            ErrorClass::InvalidResponse => "invalid_response",
            ErrorClass::Provider => "provider_error",
            ErrorClass::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProviderError::RateLimit { .. } => ErrorClass::RateLimited,
            ProviderError::Timeout { .. } | ProviderError::Network { .. } => ErrorClass::Transient,
            ProviderError::InvalidResponse { .. } => ErrorClass::InvalidResponse,
            ProviderError::Provider { .. } => ErrorClass::Provider,
            ProviderError::Fatal { .. } => ErrorClass::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() != ErrorClass::Fatal
    }

    pub fn provider(&self) -> &str {
        match self {
            ProviderError::RateLimit { provider, .. }
            | ProviderError::Timeout { provider, .. }
            | ProviderError::Network { provider, .. }
            | ProviderError::InvalidResponse { provider, .. }
            | ProviderError::Provider { provider, .. }
            | ProviderError::Fatal { provider, .. } => provider,
        }
    }

    /// Provider hint for how long to wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn context_overflow(&self) -> Option<ContextOverflow> {
        match self {
            ProviderError::Provider {
                context_overflow, ..
            } => *context_overflow,
            _ => None,
        }
    }

    pub fn invalid_response(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        ProviderError::InvalidResponse {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn provider_error(provider: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        ProviderError::Provider {
            provider: provider.into(),
            context_overflow: ErrorMapper::detect_context_overflow(&message),
            message,
        }
    }

    pub fn network(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Network {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Fatal {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Maps raw provider failures (status codes, error messages) onto [`ProviderError`]
pub struct ErrorMapper;

fn context_tokens_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+)\s*tokens").expect("token count pattern is a valid regex"))
}

impl ErrorMapper {
    /// Map an HTTP status code and optional body to a provider error
    pub fn from_status_code(
        provider: &str,
        status: u16,
        body: Option<&str>,
        retry_after: Option<Duration>,
    ) -> ProviderError {
        let message = body.unwrap_or("").to_string();

        // Overflow usually arrives as a 400 but must stay retryable.
        if let Some(overflow) = Self::detect_context_overflow(&message) {
            return ProviderError::Provider {
                provider: provider.to_string(),
                message,
                context_overflow: Some(overflow),
            };
        }

        match status {
            400 | 401 | 403 | 422 => ProviderError::Fatal {
                provider: provider.to_string(),
                message: non_empty(message, status),
            },
            429 => ProviderError::RateLimit {
                provider: provider.to_string(),
                retry_after,
            },
            408 | 504 => ProviderError::Timeout {
                provider: provider.to_string(),
                after: None,
            },
            _ => ProviderError::Provider {
                provider: provider.to_string(),
                message: non_empty(message, status),
                context_overflow: None,
            },
        }
    }

    /// Map a free-form provider error message to a provider error
    pub fn from_message(provider: &str, error_msg: &str) -> ProviderError {
        let lower = error_msg.to_lowercase();

        if let Some(overflow) = Self::detect_context_overflow(error_msg) {
            return ProviderError::Provider {
                provider: provider.to_string(),
                message: error_msg.to_string(),
                context_overflow: Some(overflow),
            };
        }

        if lower.contains("rate limit") || lower.contains("too many requests") {
            return ProviderError::RateLimit {
                provider: provider.to_string(),
                retry_after: None,
            };
        }

        if lower.contains("timeout") || lower.contains("timed out") {
            return ProviderError::Timeout {
                provider: provider.to_string(),
                after: None,
            };
        }

        if lower.contains("unauthorized")
            || lower.contains("authentication")
            || lower.contains("invalid api key")
        {
            return ProviderError::fatal(provider, error_msg);
        }

        if lower.contains("connection") || lower.contains("network") {
            return ProviderError::network(provider, error_msg);
        }

        ProviderError::Provider {
            provider: provider.to_string(),
            message: error_msg.to_string(),
            context_overflow: None,
        }
    }

    /// Recognise "maximum context length" style errors and pull out the limit
    pub fn detect_context_overflow(message: &str) -> Option<ContextOverflow> {
        let lower = message.to_lowercase();
        let is_overflow = lower.contains("maximum context length")
            || lower.contains("context length exceeded")
            || lower.contains("context_length_exceeded")
            || lower.contains("context window")
            || lower.contains("exceeds maximum length");
        if !is_overflow {
            return None;
        }

        let limit = context_tokens_pattern()
            .captures(message)
            .and_then(|cap| cap[1].parse::<usize>().ok());

        Some(match limit {
            Some(limit) => ContextOverflow::Limit(limit),
            None => ContextOverflow::Unspecified,
        })
    }

    /// Parse a `Retry-After` header given in (possibly fractional) seconds
    pub fn parse_retry_after(value: &str) -> Option<Duration> {
        let secs: f64 = value.trim().parse().ok()?;
        Self::retry_after_from_secs(secs)
    }

    /// A retry hint in seconds, or `None` when it is negative, not finite or
    /// too large to represent
    pub fn retry_after_from_secs(secs: f64) -> Option<Duration> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(secs).ok()
    }
}

fn non_empty(message: String, status: u16) -> String {
    if message.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        message
    }
}
