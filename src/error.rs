//! Error types for sft-lab.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for sft-lab operations.
pub type Result<T> = std::result::Result<T, LabError>;

/// Errors that can occur in sft-lab.
///
/// Structural errors (`DataDirectoryMissing`, `NoFilesMatched`,
/// `CatalogUnavailable`) abort a load. Per-record errors (`MalformedRecord`,
/// `MalformedTurn`) are reported by the corpus loader and skipped.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LabError {
    /// The configured data directory does not exist.
    #[error("data directory not found: {}", path.display())]
    DataDirectoryMissing {
        /// Directory that was looked up.
        path: PathBuf,
    },

    /// A session file pattern matched nothing.
    #[error("no files found matching pattern: {pattern} in {}", dir.display())]
    NoFilesMatched {
        /// Glob pattern, relative to `dir`.
        pattern: String,
        /// Data directory the pattern was applied to.
        dir: PathBuf,
    },

    /// A session line is not valid JSON.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A session record is valid JSON but lacks required fields.
    #[error("malformed turn: {0}")]
    MalformedTurn(String),

    /// The tool catalog could not be loaded.
    #[error("tool catalog unavailable at {}: {reason}", path.display())]
    CatalogUnavailable {
        /// Catalog location.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration sources could not be merged or deserialized.
    #[error("configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// Invalid configuration file.
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid glob pattern.
    #[error("invalid file pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Progress bar template error.
    #[error("template error: {0}")]
    Template(#[from] indicatif::style::TemplateError),

    /// Training error.
    #[error("training error: {0}")]
    Training(String),

    /// Checkpoint error.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl LabError {
    /// Whether the corpus loader may skip the offending record and continue.
    #[must_use]
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::MalformedRecord(_) | Self::MalformedTurn(_))
    }
}
