use std::path::PathBuf;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Malformed or missing input fields. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid timestamp in {field}: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("sound {sound_ref} has no duration")]
    MissingDuration { sound_ref: String },

    #[error("sound {sound_ref} has a non-positive duration")]
    InvalidDuration { sound_ref: String },

    #[error("snapshot for {found} cannot be appended to {expected}")]
    ContentMismatch { expected: String, found: String },

    #[error("snapshot platform {found} does not match item platform {expected}")]
    PlatformMismatch { expected: String, found: String },

    #[error("snapshot for {content_id} is older than the last recorded snapshot")]
    OutOfOrder { content_id: String },

    #[error("content {content_id} appears more than once in the batch")]
    DuplicateContent { content_id: String },
}

/// Invalid or self-contradictory configuration. Fatal to the call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("all metric weights are zero; the ranking objective is undefined")]
    AllWeightsZero,

    #[error("weight {name} must be a finite non-negative number")]
    NegativeWeight { name: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A single rejected record inside an otherwise successful batch call.
#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub index: usize,
    pub content_id: Option<String>,
    #[serde(serialize_with = "display_error")]
    pub error: ValidationError,
}

impl ItemError {
    pub fn new(index: usize, content_id: Option<String>, error: ValidationError) -> Self {
        Self {
            index,
            content_id,
            error,
        }
    }
}

fn display_error<S: Serializer>(error: &ValidationError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}
