//! Errors surfaced to callers of the client and chat sessions

use crate::capabilities::FeatureSet;
use crate::config::ConfigError;
use crate::providers::{AttemptOutcome, AttemptRecord, ProviderError};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Every attempt failed, or a fatal error stopped the request early
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("no provider supports model '{model}' with features {required_features}")]
    NoCapableProvider {
        model: String,
        required_features: FeatureSet,
    },

    #[error("unknown model '{model}'")]
    UnknownModel { model: String },

    #[error("invalid history: {message}")]
    InvalidHistory { message: String },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Streamed text produced before the request gave up, if any
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            Error::Api(api) => api.partial_output.as_deref(),
            _ => None,
        }
    }
}

/// Aggregated failure of one logical request
#[derive(Debug, Clone)]
pub struct ApiError {
    pub attempts: Vec<AttemptRecord>,
    pub last_error: Option<ProviderError>,
    /// Text already delivered to the caller when a stream gave up
    pub partial_output: Option<String>,
}

impl ApiError {
    pub fn new(attempts: Vec<AttemptRecord>, last_error: Option<ProviderError>) -> Self {
        Self {
            attempts,
            last_error,
            partial_output: None,
        }
    }

    pub fn with_partial_output(mut self, partial: impl Into<String>) -> Self {
        let partial = partial.into();
        self.partial_output = if partial.is_empty() {
            None
        } else {
            Some(partial)
        };
        self
    }

    /// True when the request stopped on a non-retryable error
    pub fn is_fatal(&self) -> bool {
        self.last_error
            .as_ref()
            .map(|e| !e.is_retryable())
            .unwrap_or(false)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request failed after {} attempt(s)", self.attempts.len())?;
        for (i, attempt) in self.attempts.iter().enumerate() {
            match &attempt.outcome {
                AttemptOutcome::Failed(err) => write!(f, "; [{}] {}", i + 1, err)?,
                AttemptOutcome::Success => {
                    write!(f, "; [{}] {}: succeeded", i + 1, attempt.provider)?
                }
            }
        }
        if let Some(partial) = &self.partial_output {
            write!(f, "; {} chars of partial output", partial.chars().count())?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.last_error
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ErrorMapper;
    use chrono::Utc;
    use std::time::Duration;

    fn failed(provider: &str, err: ProviderError) -> AttemptRecord {
        AttemptRecord {
            provider: provider.to_string(),
            started_at: Utc::now(),
            outcome: AttemptOutcome::Failed(err),
            latency: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_api_error_lists_every_attempt() {
        let first = ErrorMapper::from_status_code("alpha", 429, None, None);
        let second = ProviderError::invalid_response("beta", "empty body");
        let err = ApiError::new(
            vec![failed("alpha", first), failed("beta", second.clone())],
            Some(second),
        );
        let rendered = err.to_string();
        assert!(rendered.starts_with("request failed after 2 attempt(s)"));
        assert!(rendered.contains("[1] alpha: rate limited"));
        assert!(rendered.contains("[2] beta: invalid response: empty body"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_partial_output_is_exposed() {
        let err: Error = ApiError::new(vec![], None)
            .with_partial_output("Once upon")
            .into();
        assert_eq!(err.partial_output(), Some("Once upon"));
        assert!(err.to_string().contains("9 chars of partial output"));
    }

    #[test]
    fn test_empty_partial_is_dropped() {
        let err = ApiError::new(vec![], None).with_partial_output("");
        assert!(err.partial_output.is_none());
    }
}
