//! Client configuration schema with serde support

use super::error::ValidationError;
use super::secrets::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Fully resolved client configuration.
///
/// Every field has a default, so an empty file or object is a valid layer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Total attempts per logical request
    #[serde(default = "default_retries", alias = "max_retries")]
    pub retries: u32,

    /// Delay before the second attempt, in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,

    #[serde(default = "default_backoff_factor")]
    pub retry_backoff_factor: f64,

    /// Upper bound on any single backoff delay, in seconds
    #[serde(default)]
    pub max_retry_delay: Option<f64>,

    /// Fraction of each delay that may be randomised (0 disables jitter)
    #[serde(default)]
    pub retry_jitter: f64,

    /// Lifetime of the discovered-provider snapshot, in seconds
    #[serde(default = "default_provider_cache_ttl")]
    pub provider_cache_ttl: u64,

    #[serde(default)]
    pub preferred_providers: Vec<String>,

    /// Priority weight overrides (provider id -> weight, higher is preferred)
    #[serde(default)]
    pub provider_weights: BTreeMap<String, u32>,

    #[serde(default)]
    pub use_ai_cleaner: bool,

    #[serde(default = "default_max_history_tokens")]
    pub max_history_tokens: usize,

    /// In (0, 1]: share of the budget history may use. Above 1: keep at most
    /// that many recent messages.
    #[serde(default = "default_context_reduction_factor")]
    pub context_reduction_factor: f64,

    /// Share of a force-truncated message kept from its beginning
    #[serde(default = "default_truncation_head_fraction")]
    pub truncation_head_fraction: f64,

    /// Context window assumed for models missing from the catalog
    #[serde(default = "default_context_tokens")]
    pub default_context_tokens: usize,

    #[serde(default)]
    pub unknown_model_policy: UnknownModelPolicy,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,

    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// OpenAI-compatible endpoints served by the HTTP transport
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// What to do when a model is missing from the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownModelPolicy {
    /// Treat it as a chat-only model with `default_context_tokens`
    #[default]
    AssumeDefault,
    /// Refuse the request with `UnknownModel`
    FailClosed,
}

/// One provider endpoint reachable over HTTP
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    /// Provider id used by the selector and health registry
    pub name: String,

    pub base_url: String,

    /// Falls back to the client-wide `api_key` when unset
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Models this endpoint serves
    #[serde(default)]
    pub models: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_model: default_model(),
            timeout: default_timeout(),
            retries: default_retries(),
            retry_delay: default_retry_delay(),
            retry_backoff_factor: default_backoff_factor(),
            max_retry_delay: None,
            retry_jitter: 0.0,
            provider_cache_ttl: default_provider_cache_ttl(),
            preferred_providers: Vec::new(),
            provider_weights: BTreeMap::new(),
            use_ai_cleaner: false,
            max_history_tokens: default_max_history_tokens(),
            context_reduction_factor: default_context_reduction_factor(),
            truncation_head_fraction: default_truncation_head_fraction(),
            default_context_tokens: default_context_tokens(),
            unknown_model_policy: UnknownModelPolicy::default(),
            image_model: default_image_model(),
            transcription_model: default_transcription_model(),
            speech_model: default_speech_model(),
            proxy: None,
            api_key: None,
            endpoints: Vec::new(),
        }
    }
}

// Default value functions for serde
fn default_log_level() -> String { "info".to_string() }
fn default_model() -> String { "gpt-4o".to_string() }
fn default_timeout() -> f64 { 120.0 }
fn default_retries() -> u32 { 3 }
fn default_retry_delay() -> f64 { 2.0 }
fn default_backoff_factor() -> f64 { 2.0 }
fn default_provider_cache_ttl() -> u64 { 86_400 }
fn default_max_history_tokens() -> usize { 4096 }
fn default_context_reduction_factor() -> f64 { 0.7 }
fn default_truncation_head_fraction() -> f64 { 0.5 }
fn default_context_tokens() -> usize { 8192 }
fn default_image_model() -> String { "dall-e-3".to_string() }
fn default_transcription_model() -> String { "whisper-1".to_string() }
fn default_speech_model() -> String { "tts-1".to_string() }

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Whether a seconds value converts to a `Duration` without overflow
fn is_duration(secs: f64) -> bool {
    Duration::try_from_secs_f64(secs).is_ok()
}

/// Seconds as a `Duration`, saturating values that were never validated
pub(crate) fn seconds(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

impl ClientConfig {
    pub fn timeout_duration(&self) -> Duration {
        seconds(self.timeout)
    }

    pub fn provider_cache_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.provider_cache_ttl)
    }

    /// Validate the configuration, reporting the first offending field
    pub fn validate(&self) -> Result<(), ValidationError> {
        let level = self.log_level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ValidationError::not_one_of(
                "log_level",
                LOG_LEVELS.join("|"),
                self.log_level.clone(),
            ));
        }

        if self.default_model.trim().is_empty() {
            return Err(ValidationError::missing("default_model"));
        }

        if !is_duration(self.timeout) || self.timeout <= 0.0 {
            return Err(ValidationError::out_of_range(
                "timeout",
                "Must be a positive number of seconds",
            ));
        }

        if self.retries == 0 {
            return Err(ValidationError::out_of_range(
                "retries",
                "At least one attempt is required",
            ));
        }

        if !is_duration(self.retry_delay) {
            return Err(ValidationError::out_of_range(
                "retry_delay",
                "Must be non-negative",
            ));
        }

        if !self.retry_backoff_factor.is_finite() || self.retry_backoff_factor < 1.0 {
            return Err(ValidationError::out_of_range(
                "retry_backoff_factor",
                "Must be at least 1.0",
            ));
        }

        if let Some(cap) = self.max_retry_delay {
            if !is_duration(cap) {
                return Err(ValidationError::out_of_range(
                    "max_retry_delay",
                    "Must be non-negative",
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(ValidationError::out_of_range(
                "retry_jitter",
                "Must be between 0.0 and 1.0",
            ));
        }

        if self.max_history_tokens == 0 {
            return Err(ValidationError::out_of_range(
                "max_history_tokens",
                "Must be greater than 0",
            ));
        }

        if !self.context_reduction_factor.is_finite() || self.context_reduction_factor <= 0.0 {
            return Err(ValidationError::out_of_range(
                "context_reduction_factor",
                "Must be greater than 0",
            ));
        }

        if !(0.0..=1.0).contains(&self.truncation_head_fraction) {
            return Err(ValidationError::out_of_range(
                "truncation_head_fraction",
                "Must be between 0.0 and 1.0",
            ));
        }

        if self.default_context_tokens == 0 {
            return Err(ValidationError::out_of_range(
                "default_context_tokens",
                "Must be greater than 0",
            ));
        }

        for (field, value) in [
            ("image_model", &self.image_model),
            ("transcription_model", &self.transcription_model),
            ("speech_model", &self.speech_model),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::missing(field));
            }
        }

        if let Some(proxy) = &self.proxy {
            validate_url("proxy", proxy, &["http", "https", "socks5", "socks5h"])?;
        }

        let mut seen_names = HashSet::new();
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            if !seen_names.insert(&endpoint.name) {
                return Err(ValidationError::duplicate(
                    format!("endpoints[{}].name", i),
                    endpoint.name.clone(),
                ));
            }
            endpoint.validate(&format!("endpoints[{}]", i))?;
        }

        Ok(())
    }
}

impl EndpointConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::missing(format!("{}.name", path)));
        }

        if self.base_url.is_empty() {
            return Err(ValidationError::missing(format!("{}.base_url", path)));
        }
        validate_url(&format!("{}.base_url", path), &self.base_url, &["http", "https"])?;

        for (i, model) in self.models.iter().enumerate() {
            if model.trim().is_empty() {
                return Err(ValidationError::missing(format!("{}.models[{}]", path, i)));
            }
        }

        Ok(())
    }
}

fn validate_url(path: &str, raw: &str, schemes: &[&str]) -> Result<(), ValidationError> {
    match url::Url::parse(raw) {
        Ok(url) if schemes.contains(&url.scheme()) => Ok(()),
        Ok(url) => Err(ValidationError::bad_url(
            path,
            format!(
                "URL scheme must be one of {}, got: {}",
                schemes.join(", "),
                url.scheme()
            ),
        )),
        Err(e) => Err(ValidationError::bad_url(path, e.to_string())),
    }
}
