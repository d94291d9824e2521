//! Configuration for the surefire client
//!
//! A [`ClientConfig`] is resolved once from up to four layers, lowest
//! precedence first: built-in defaults, a JSON or YAML file (with `${VAR}`
//! interpolation), an explicit configuration object, and per-key overrides.
//! The resolution remembers which layer supplied each key.

mod env;
mod error;
mod schema;
mod secrets;

pub use error::{ConfigError, ConfigResult, FileFormat, ValidationError, ValidationErrorKind};
pub use schema::{ClientConfig, EndpointConfig, UnknownModelPolicy};
pub(crate) use schema::seconds;
pub use secrets::SecretString;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The layer a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    File(PathBuf),
    Object,
    Overrides,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File(path) => write!(f, "file:{}", path.display()),
            ConfigSource::Object => write!(f, "object"),
            ConfigSource::Overrides => write!(f, "overrides"),
        }
    }
}

/// A partial configuration: every key is optional.
///
/// Used for configuration files, explicit configuration objects and
/// overrides alike.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(default, alias = "max_retries", skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_backoff_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_jitter: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_cache_ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_providers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_weights: Option<BTreeMap<String, u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_ai_cleaner: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_history_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_reduction_factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation_head_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_context_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown_model_policy: Option<UnknownModelPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<Vec<EndpointConfig>>,
}

/// Copies every key present in a layer onto the config and records its source.
macro_rules! apply_layer {
    (
        $layer:expr, $config:expr, $provenance:expr, $source:expr;
        required: [$($field:ident),* $(,)?];
        optional: [$($opt:ident),* $(,)?]
    ) => {
        $(
            if let Some(value) = $layer.$field {
                $config.$field = value;
                $provenance.insert(stringify!($field), $source.clone());
            }
        )*
        $(
            if let Some(value) = $layer.$opt {
                $config.$opt = Some(value);
                $provenance.insert(stringify!($opt), $source.clone());
            }
        )*
    };
}

impl ConfigOverrides {
    fn apply(
        self,
        config: &mut ClientConfig,
        provenance: &mut BTreeMap<&'static str, ConfigSource>,
        source: &ConfigSource,
    ) {
        apply_layer!(
            self, config, provenance, source;
            required: [
                log_level, default_model, timeout, retries, retry_delay,
                retry_backoff_factor, retry_jitter, provider_cache_ttl,
                preferred_providers, provider_weights, use_ai_cleaner,
                max_history_tokens, context_reduction_factor,
                truncation_head_fraction, default_context_tokens,
                unknown_model_policy, image_model, transcription_model,
                speech_model, endpoints,
            ];
            optional: [max_retry_delay, proxy, api_key]
        );
    }
}

/// A validated configuration together with the source of each key
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: ClientConfig,
    provenance: BTreeMap<&'static str, ConfigSource>,
}

impl ResolvedConfig {
    /// Which layer supplied `key`. `max_retries` is reported as `retries`.
    /// Returns `None` for keys the configuration does not have.
    pub fn source_of(&self, key: &str) -> Option<&ConfigSource> {
        let key = if key == "max_retries" { "retries" } else { key };
        self.provenance.get(key)
    }

    pub fn into_config(self) -> ClientConfig {
        self.config
    }
}

/// Builds a [`ResolvedConfig`] from layered sources
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    file: Option<PathBuf>,
    object: Option<ConfigOverrides>,
    overrides: ConfigOverrides,
    raw_overrides: serde_json::Map<String, serde_json::Value>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON (`.json`) or YAML (any other extension) file
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn object(mut self, object: ConfigOverrides) -> Self {
        self.object = Some(object);
        self
    }

    pub fn overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Override a single key by name; unknown keys fail at `build`
    pub fn set(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.raw_overrides.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> ConfigResult<ResolvedConfig> {
        let mut config = ClientConfig::default();
        let mut provenance: BTreeMap<&'static str, ConfigSource> = FIELDS
            .iter()
            .map(|field| (*field, ConfigSource::Default))
            .collect();

        if let Some(path) = &self.file {
            let layer = parse_file(path)?;
            layer.apply(&mut config, &mut provenance, &ConfigSource::File(path.clone()));
        }

        if let Some(object) = self.object {
            object.apply(&mut config, &mut provenance, &ConfigSource::Object);
        }

        self.overrides
            .apply(&mut config, &mut provenance, &ConfigSource::Overrides);

        if !self.raw_overrides.is_empty() {
            let raw: ConfigOverrides =
                serde_json::from_value(serde_json::Value::Object(self.raw_overrides)).map_err(
                    |e| ConfigError::Override {
                        message: e.to_string(),
                    },
                )?;
            raw.apply(&mut config, &mut provenance, &ConfigSource::Overrides);
        }

        config.validate()?;
        debug!(
            file = ?self.file,
            default_model = %config.default_model,
            retries = config.retries,
            "configuration resolved"
        );

        Ok(ResolvedConfig { config, provenance })
    }
}

const FIELDS: &[&str] = &[
    "log_level",
    "default_model",
    "timeout",
    "retries",
    "retry_delay",
    "retry_backoff_factor",
    "max_retry_delay",
    "retry_jitter",
    "provider_cache_ttl",
    "preferred_providers",
    "provider_weights",
    "use_ai_cleaner",
    "max_history_tokens",
    "context_reduction_factor",
    "truncation_head_fraction",
    "default_context_tokens",
    "unknown_model_policy",
    "image_model",
    "transcription_model",
    "speech_model",
    "proxy",
    "api_key",
    "endpoints",
];

fn parse_file(path: &Path) -> ConfigResult<ConfigOverrides> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;

    let interpolated = env::interpolate_env_vars(&content)?;
    if interpolated.trim().is_empty() {
        return Ok(ConfigOverrides::default());
    }

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            format: FileFormat::Json,
            line: Some(e.line()),
            column: Some(e.column()),
            message: e.to_string(),
        })
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            format: FileFormat::Yaml,
            line: e.location().map(|l| l.line()),
            column: e.location().map(|l| l.column()),
            message: e.to_string(),
        })
    }
}

/// Load and validate a configuration file on top of the defaults
pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<ClientConfig> {
    Ok(ConfigBuilder::new().file(path).build()?.into_config())
}
