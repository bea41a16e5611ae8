//! Error types for the pipeline
//!
//! Only fatal conditions are errors. Compilation diagnostics and compatibility
//! findings are plain values collected in [`crate::diagnostics::Diagnostics`]
//! and [`crate::compatibility::CompatibilityFinding`].

use std::path::PathBuf;

use thiserror::Error;

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fatal input problems detected before any stage runs
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Schema file not found: {0}")]
    Missing(PathBuf),

    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {document} at line {line}, column {column}: {message}")]
    Malformed {
        document: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Schema is missing mandatory section: {0}")]
    MissingSection(&'static str),

    #[error("Invalid entity '{name}': {reason}")]
    InvalidEntity { name: String, reason: String },

    #[error("Contracts directory not found: {0}")]
    ContractsDirMissing(PathBuf),

    #[error("Duplicate route prefix '{path}' (entities '{first}' and '{second}')")]
    DuplicateRoute {
        path: String,
        first: String,
        second: String,
    },

    #[error("Run state is locked by another process: {0}")]
    StateLocked(PathBuf),

    #[error("Configuration error: {0}")]
    Settings(#[from] config_crate::ConfigError),
}

/// Fatal emission problems that make downstream artifacts unreliable
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmissionError {
    #[error("Field '{entity}.{field}' references undefined entity '{target}'")]
    UnresolvedReference {
        entity: String,
        field: String,
        target: String,
    },

    #[error("Alias '{entity}' references undefined entity '{target}'")]
    UnresolvedAlias { entity: String, target: String },

    #[error("Entity names '{first}' and '{second}' map to the same identifier '{identifier}'")]
    NameCollision {
        first: String,
        second: String,
        identifier: String,
    },
}

/// Report rendering or writing failed; never changes the run outcome
#[derive(Error, Debug)]
pub enum ReportingError {
    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persisted run-state store failures
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Umbrella error for the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Emission(#[from] EmissionError),

    #[error(transparent)]
    Reporting(#[from] ReportingError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether this error comes from the inputs (as opposed to the pipeline breaking)
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Emission(_))
    }

    /// Short machine-readable code used in reports
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration-error",
            Self::Emission(_) => "emission-error",
            Self::Reporting(_) => "reporting-error",
            Self::State(_) => "state-error",
            Self::Io(_) => "io-error",
        }
    }
}
