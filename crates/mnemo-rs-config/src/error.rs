//! Config loading and validation errors.

use thiserror::Error;

/// Errors returned while loading or validating a memory manager config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config layer could not be read from disk.
    #[error("failed to read config layer {layer}: {source}")]
    Read {
        layer: String,
        #[source]
        source: std::io::Error,
    },
    /// A config layer is not valid JSON5.
    #[error("failed to parse config layer {layer}: {source}")]
    Parse {
        layer: String,
        #[source]
        source: json5::Error,
    },
    /// The merged document does not match the config model.
    #[error("failed to decode config: {0}")]
    Decode(#[from] serde_json::Error),
    /// A specific field failed validation.
    #[error("invalid config at {path}: {message}")]
    InvalidField { path: String, message: String },
}

impl ConfigError {
    pub(crate) fn read(layer: &str, source: std::io::Error) -> Self {
        Self::Read {
            layer: layer.to_string(),
            source,
        }
    }

    pub(crate) fn parse(layer: &str, source: json5::Error) -> Self {
        Self::Parse {
            layer: layer.to_string(),
            source,
        }
    }
}
