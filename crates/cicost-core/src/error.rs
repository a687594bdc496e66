//! Error types for the analysis engine.

use thiserror::Error;

/// A raw run payload could not be turned into a canonical run.
///
/// Recoverable per run: batch normalization records it and moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizationError {
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("field '{field}' has unparsable timestamp '{value}'")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("run '{id}' is completed but has no finish time")]
    MissingFinishedAt { id: String },

    #[error("run '{id}' finished before it started")]
    NegativeDuration { id: String },

    #[error("field '{field}' has unsupported value '{value}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("unsupported provider '{0}'")]
    UnsupportedProvider(String),

    #[error("run '{id}' already appeared earlier in the batch")]
    DuplicateRun { id: String },
}

/// The anomaly baseline is too short to be meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("insufficient baseline: {available} period(s) available, {required} required")]
pub struct InsufficientDataError {
    pub required: usize,
    pub available: usize,
}

/// Invalid rate configuration, raised before the engine runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateTableError {
    #[error("default rate must be positive, got {0}")]
    NonPositiveDefault(f64),

    #[error("rate for {provider}/{runner_class} must be positive, got {rate}")]
    NonPositiveRate {
        provider: String,
        runner_class: String,
        rate: f64,
    },

    #[error("duplicate rate entry for {provider}/{runner_class}")]
    DuplicateEntry {
        provider: String,
        runner_class: String,
    },
}

/// Engine configuration that cannot be used as given.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Rates(#[from] RateTableError),

    #[error("anomaly sensitivity must be a finite, non-negative number, got {0}")]
    InvalidSensitivity(f64),

    #[error("anomaly min_baseline_periods must be at least 1")]
    ZeroMinBaselinePeriods,

    #[error("anomaly baseline_window ({window}) is smaller than min_baseline_periods ({min})")]
    BaselineWindowTooShort { window: usize, min: usize },
}
