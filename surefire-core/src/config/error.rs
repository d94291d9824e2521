//! Errors from resolving a client configuration

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Format of a configuration file, picked from its extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileFormat::Json => "JSON",
            FileFormat::Yaml => "YAML",
        })
    }
}

/// Why a configuration could not be resolved into a usable client
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{format} syntax error in {} at {}: {message}", .path.display(), position(.line, .column))]
    Parse {
        path: PathBuf,
        format: FileFormat,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    /// A `${VAR}` reference in a config file names an unset variable
    #[error("config file references unset environment variable ${{{var}}}")]
    MissingEnvVar { var: String },

    /// A per-key override is unknown or has the wrong type
    #[error("bad config override: {message}")]
    Override { message: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The validated settings were still rejected by the HTTP stack
    #[error("cannot build HTTP client: {message}")]
    HttpClient { message: String },
}

fn position(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(line), Some(column)) => format!("line {line}, column {column}"),
        (Some(line), None) => format!("line {line}"),
        _ => "unknown position".to_string(),
    }
}

/// A setting with an unusable value, named by its path in the config
/// document (e.g. `endpoints[0].base_url`)
#[derive(Debug, Error, PartialEq)]
#[error("invalid config value at `{field_path}`: {kind}")]
pub struct ValidationError {
    pub field_path: String,
    pub kind: ValidationErrorKind,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationErrorKind {
    #[error("a value is required")]
    Missing,

    #[error("expected one of {expected}, got '{actual}'")]
    NotOneOf { expected: String, actual: String },

    #[error("{message}")]
    OutOfRange { message: String },

    /// Endpoint names must be unique so they can be told apart in health
    /// and attempt records
    #[error("'{value}' is already used")]
    Duplicate { value: String },

    #[error("bad URL: {message}")]
    BadUrl { message: String },
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
        }
    }

    pub fn missing(field_path: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::Missing)
    }

    pub fn not_one_of(
        field_path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::NotOneOf {
                expected: expected.into(),
                actual: actual.into(),
            },
        )
    }

    pub fn out_of_range(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::OutOfRange {
                message: message.into(),
            },
        )
    }

    pub fn duplicate(field_path: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::Duplicate {
                value: value.into(),
            },
        )
    }

    pub fn bad_url(field_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::BadUrl {
                message: message.into(),
            },
        )
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
