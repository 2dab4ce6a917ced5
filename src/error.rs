//! Error types for Synheart Sense

use thiserror::Error;

/// Errors that can occur during computation
///
/// None of these abort a processing cycle. They surface as explicit
/// "no result" states to the caller, who decides whether to retry next cycle.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Insufficient data: need {needed}, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Stage '{stage}' failed: {reason}")]
    StageFailure { stage: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ComputeError {
    pub(crate) fn stage(stage: &str, reason: impl Into<String>) -> Self {
        ComputeError::StageFailure {
            stage: stage.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ComputeError::ConfigurationError(msg.into())
    }

    /// True for errors that are expected to clear on a later cycle
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ComputeError::InsufficientData { .. } | ComputeError::SensorUnavailable(_)
        )
    }
}
