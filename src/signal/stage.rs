//! Stage configuration and the stage algorithm seam

use crate::error::ComputeError;
use crate::signal::stages;
use crate::types::SignalBuffer;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Maximum number of numeric parameters a stage carries
pub const MAX_STAGE_PARAMS: usize = 16;

/// Role of a stage within a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Preprocess,
    Filter,
    ArtifactRemoval,
    FeatureExtract,
    Algorithm,
    Postprocess,
}

/// Configuration of one pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique name within its pipeline
    pub name: String,
    pub kind: StageKind,
    /// Algorithm identifier, resolved through [`algorithm_for`]
    pub algorithm: String,
    pub enabled: bool,
    /// Numeric parameters; missing trailing values take the algorithm defaults
    #[serde(default)]
    pub params: Vec<f64>,
    /// Minimum number of frames the stage needs to produce output (0 = any)
    #[serde(default)]
    pub buffer_size: usize,
}

impl StageConfig {
    pub fn new(name: &str, kind: StageKind, algorithm: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            algorithm: algorithm.to_string(),
            enabled: true,
            params: Vec::new(),
            buffer_size: 0,
        }
    }

    pub fn with_params(mut self, params: &[f64]) -> Self {
        self.params = params.to_vec();
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Parameter at `index`, or `default` when absent
    pub fn param(&self, index: usize, default: f64) -> f64 {
        self.params.get(index).copied().unwrap_or(default)
    }

    /// Check the config against its algorithm without building a stage
    pub fn validate(&self) -> Result<(), ComputeError> {
        self.resolve().map(|_| ())
    }

    /// Validate and resolve the algorithm, completing params from its defaults
    fn resolve(&self) -> Result<(StageConfig, Box<dyn StageAlgorithm>), ComputeError> {
        if self.name.trim().is_empty() {
            return Err(ComputeError::config("stage name must not be empty"));
        }
        if self.params.len() > MAX_STAGE_PARAMS {
            return Err(ComputeError::config(format!(
                "stage '{}' has {} params, at most {} allowed",
                self.name,
                self.params.len(),
                MAX_STAGE_PARAMS
            )));
        }
        if let Some(bad) = self.params.iter().position(|p| !p.is_finite()) {
            return Err(ComputeError::config(format!(
                "stage '{}' param {} is not finite",
                self.name, bad
            )));
        }
        let algorithm = algorithm_for(&self.algorithm).ok_or_else(|| {
            ComputeError::config(format!(
                "stage '{}': unknown algorithm '{}'",
                self.name, self.algorithm
            ))
        })?;

        let mut completed = self.clone();
        let defaults = algorithm.defaults();
        if completed.params.len() < defaults.len() {
            let start = completed.params.len();
            completed.params.extend_from_slice(&defaults[start..]);
        }
        algorithm
            .validate(&completed.params)
            .map_err(|reason| ComputeError::config(format!("stage '{}': {}", self.name, reason)))?;
        Ok((completed, algorithm))
    }
}

/// Result of running a stage algorithm
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub buffer: SignalBuffer,
    /// Stage quality estimate (0-1)
    pub quality: f64,
}

/// Parameter an algorithm exposes to adaptive tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TuningParam {
    pub index: usize,
    pub min: f64,
    pub max: f64,
    /// Initial adjustment step
    pub step: f64,
    /// Whether increasing the parameter tends to raise stage quality
    pub raises_quality: bool,
}

/// A signal transform `(input, params) -> (output, quality)`
///
/// Implementations hold no per-buffer state; everything a call needs comes
/// from its arguments.
pub trait StageAlgorithm: Send + Sync + std::fmt::Debug {
    /// Algorithm identifier as used in [`StageConfig::algorithm`]
    fn id(&self) -> &'static str;

    /// Default parameter values
    fn defaults(&self) -> Vec<f64> {
        Vec::new()
    }

    /// Reject parameter sets the algorithm cannot run with
    fn validate(&self, _params: &[f64]) -> Result<(), String> {
        Ok(())
    }

    fn process(&self, input: &SignalBuffer, params: &[f64]) -> Result<StageOutput, String>;

    /// Parameter adaptive tuning may adjust, if any
    fn tuning_param(&self) -> Option<TuningParam> {
        None
    }
}

/// Resolve a built-in algorithm by identifier
pub fn algorithm_for(id: &str) -> Option<Box<dyn StageAlgorithm>> {
    let algorithm: Box<dyn StageAlgorithm> = match id {
        "normalize" => Box::new(stages::Normalize),
        "dc_removal" => Box::new(stages::DcRemoval),
        "bandpass" => Box::new(stages::Bandpass),
        "motion_gate" => Box::new(stages::MotionGate),
        "envelope" => Box::new(stages::Envelope),
        "bias_correction" => Box::new(stages::BiasCorrection),
        "lowpass" => Box::new(stages::Lowpass),
        "spike_clamp" => Box::new(stages::SpikeClamp),
        _ => return None,
    };
    Some(algorithm)
}

/// A configured stage plus its intermediate buffer and last-cycle figures
#[derive(Debug)]
pub struct PipelineStage {
    config: StageConfig,
    algorithm: Box<dyn StageAlgorithm>,
    /// Output of the last cycle, the input of the next stage
    pub(crate) output: SignalBuffer,
    pub(crate) quality: f64,
    pub(crate) latency_us: u64,
    pub(crate) failures: u64,
}

impl PipelineStage {
    /// Build a stage from a built-in algorithm identifier
    pub fn new(config: StageConfig) -> Result<Self, ComputeError> {
        let (config, algorithm) = config.resolve()?;
        Ok(Self::assemble(config, algorithm))
    }

    /// Build a stage around a caller-supplied algorithm
    pub fn with_algorithm(
        mut config: StageConfig,
        algorithm: Box<dyn StageAlgorithm>,
    ) -> Result<Self, ComputeError> {
        if config.params.len() > MAX_STAGE_PARAMS {
            return Err(ComputeError::config(format!(
                "stage '{}' has too many params",
                config.name
            )));
        }
        let defaults = algorithm.defaults();
        if config.params.len() < defaults.len() {
            let start = config.params.len();
            config.params.extend_from_slice(&defaults[start..]);
        }
        algorithm
            .validate(&config.params)
            .map_err(|reason| ComputeError::config(format!("stage '{}': {}", config.name, reason)))?;
        config.algorithm = algorithm.id().to_string();
        Ok(Self::assemble(config, algorithm))
    }

    fn assemble(config: StageConfig, algorithm: Box<dyn StageAlgorithm>) -> Self {
        Self {
            config,
            algorithm,
            output: SignalBuffer::empty(1, 0.0, 0),
            quality: 0.0,
            latency_us: 0,
            failures: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn quality(&self) -> f64 {
        self.quality
    }

    pub fn latency_us(&self) -> u64 {
        self.latency_us
    }

    pub fn tuning_param(&self) -> Option<TuningParam> {
        self.algorithm.tuning_param()
    }

    /// Swap in a new configuration
    ///
    /// The algorithm is re-resolved only when its identifier changes. On
    /// rejection the current configuration stays active.
    pub(crate) fn reconfigure(&mut self, config: StageConfig) -> Result<(), ComputeError> {
        if config.algorithm == self.algorithm.id() {
            let mut candidate = config;
            let defaults = self.algorithm.defaults();
            if candidate.params.len() > MAX_STAGE_PARAMS {
                return Err(ComputeError::config(format!(
                    "stage '{}' has too many params",
                    candidate.name
                )));
            }
            if candidate.params.iter().any(|p| !p.is_finite()) {
                return Err(ComputeError::config(format!(
                    "stage '{}' has a non-finite param",
                    candidate.name
                )));
            }
            if candidate.params.len() < defaults.len() {
                let start = candidate.params.len();
                candidate.params.extend_from_slice(&defaults[start..]);
            }
            self.algorithm
                .validate(&candidate.params)
                .map_err(|reason| {
                    ComputeError::config(format!("stage '{}': {}", candidate.name, reason))
                })?;
            self.config = candidate;
        } else {
            let (config, algorithm) = config.resolve()?;
            self.config = config;
            self.algorithm = algorithm;
        }
        Ok(())
    }

    /// Set one parameter in place, used by adaptive tuning
    pub(crate) fn set_param(&mut self, index: usize, value: f64) {
        if let Some(slot) = self.config.params.get_mut(index) {
            *slot = value;
        }
    }

    /// Run the stage on `input`, leaving the result in `self.output`
    ///
    /// A disabled stage copies its input through. A failing stage also copies
    /// its input through, records quality 0.0 and reports the error.
    pub(crate) fn run(&mut self, input: &SignalBuffer) -> Result<(), ComputeError> {
        if !self.config.enabled {
            self.output = input.clone();
            self.quality = input.quality;
            self.latency_us = 0;
            return Ok(());
        }

        let started = Instant::now();
        let result = if self.config.buffer_size > 0 && input.len() < self.config.buffer_size {
            Err(format!(
                "needs {} frames, got {}",
                self.config.buffer_size,
                input.len()
            ))
        } else {
            self.algorithm
                .process(input, &self.config.params)
                .and_then(|out| {
                    if out.buffer.samples.iter().all(|v| v.is_finite()) {
                        Ok(out)
                    } else {
                        Err("non-finite output".to_string())
                    }
                })
        };
        self.latency_us = started.elapsed().as_micros() as u64;

        match result {
            Ok(StageOutput { mut buffer, quality }) => {
                let quality = if quality.is_finite() {
                    quality.clamp(0.0, 1.0)
                } else {
                    0.0
                };
                buffer.quality = quality;
                self.output = buffer;
                self.quality = quality;
                Ok(())
            }
            Err(reason) => {
                self.output = input.clone();
                self.quality = 0.0;
                self.failures += 1;
                Err(ComputeError::stage(&self.config.name, reason))
            }
        }
    }

    /// Drop the intermediate buffer and last-cycle figures
    pub(crate) fn reset(&mut self) {
        self.output = SignalBuffer::empty(self.output.channels, self.output.sample_rate_hz, 0);
        self.quality = 0.0;
        self.latency_us = 0;
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_params_completed_from_defaults() {
        let stage = PipelineStage::new(
            StageConfig::new("gate", StageKind::ArtifactRemoval, "motion_gate"),
        )
        .unwrap();
        assert_eq!(stage.config().params, vec![3.0]);
    }

    #[test]
    fn test_too_many_params_rejected() {
        let config =
            StageConfig::new("norm", StageKind::Preprocess, "normalize").with_params(&[1.0; 17]);
        assert!(matches!(
            config.validate(),
            Err(ComputeError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let config = StageConfig::new("x", StageKind::Filter, "wavelet");
        assert!(PipelineStage::new(config).is_err());
    }

    #[test]
    fn test_disabled_stage_passes_through() {
        let mut stage =
            PipelineStage::new(StageConfig::new("env", StageKind::FeatureExtract, "envelope").disabled())
                .unwrap();
        let input = SignalBuffer::mono(vec![1.0, 5.0, 3.0], 50.0, 0);
        stage.run(&input).unwrap();
        assert_eq!(stage.output, input);
    }

    #[test]
    fn test_reconfigure_rejection_keeps_prior_config() {
        let mut stage = PipelineStage::new(
            StageConfig::new("bp", StageKind::Filter, "bandpass").with_params(&[0.5, 4.0]),
        )
        .unwrap();
        let bad = StageConfig::new("bp", StageKind::Filter, "bandpass").with_params(&[5.0, 1.0]);
        assert!(stage.reconfigure(bad).is_err());
        assert_eq!(stage.config().params, vec![0.5, 4.0]);
    }

    #[test]
    fn test_min_buffer_size_failure() {
        let mut stage = PipelineStage::new(
            StageConfig::new("env", StageKind::FeatureExtract, "envelope").with_buffer_size(10),
        )
        .unwrap();
        let input = SignalBuffer::mono(vec![1.0, 2.0], 50.0, 0);
        assert!(stage.run(&input).is_err());
        assert_eq!(stage.quality(), 0.0);
        assert_eq!(stage.output.samples, input.samples);
    }
}
