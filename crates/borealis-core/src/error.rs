use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BorealisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Could not serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid value for `{field}`: {message}")]
    ConfigValidation { field: String, message: String },

    #[error("Configuration version {config} is not compatible with pipeline version {pipeline}")]
    VersionMismatch { config: String, pipeline: String },

    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    #[error("Invalid FITS file: {0}")]
    InvalidFits(String),

    #[error("Missing keyword {key} in {}", path.display())]
    MissingKeyword { path: PathBuf, key: String },

    #[error("Invalid camera number {0}")]
    InvalidCamera(i64),

    #[error("Unknown filter name: {0}")]
    UnknownFilter(String),

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl BorealisError {
    /// Validation failure naming the offending configuration field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BorealisError>;
