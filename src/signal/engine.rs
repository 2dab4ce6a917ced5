//! Pipeline engine
//!
//! Runs up to [`MAX_STAGES`] stages in order. The output of stage *i* is the
//! sole input of stage *i+1*. A failing stage never aborts a cycle: it is
//! scored 0.0, counted, and the next stage runs on the failed stage's input.

use crate::error::ComputeError;
use crate::signal::stage::{PipelineStage, StageAlgorithm, StageConfig};
use crate::signal::tuning::{AdaptiveTuning, TuningAdjustment, TuningConfig};
use crate::types::{SignalBuffer, SignalKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of stages in one pipeline
pub const MAX_STAGES: usize = 8;

/// Default number of consecutive failing cycles before the supervisor hears
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Receives degraded-mode notifications from a pipeline
///
/// The pipeline only reports; remediation (reset, reconfigure, power-cycle
/// the sensor) is the supervisor's call.
pub trait Supervisor: Send {
    /// Called once when a pipeline has failed `consecutive_failures` cycles in a row
    fn on_degraded(&mut self, pipeline: &str, consecutive_failures: u32, last_error: &ComputeError);

    /// Called when a degraded pipeline completes a clean cycle
    fn on_recovered(&mut self, _pipeline: &str) {}
}

/// Per-stage figures of the last cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetrics {
    pub name: String,
    pub enabled: bool,
    pub quality: f64,
    pub latency_us: u64,
    pub failures: u64,
}

/// Pipeline performance snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub name: String,
    pub kind: SignalKind,
    /// Summed stage latency of the last cycle (µs)
    pub latency_us: u64,
    /// Overall quality of the last cycle (0-1)
    pub quality: f64,
    pub samples_processed: u64,
    pub cycles: u64,
    pub errors: u64,
    pub degraded: bool,
    pub tuning_adjustments: u64,
    pub stages: Vec<StageMetrics>,
}

/// An ordered chain of signal stages
pub struct Pipeline {
    name: String,
    kind: SignalKind,
    stages: Vec<PipelineStage>,
    tuning_config: TuningConfig,
    tuning: AdaptiveTuning,
    latency_us: u64,
    quality: f64,
    samples_processed: u64,
    cycles: u64,
    error_count: u64,
    consecutive_failures: u32,
    failure_threshold: u32,
    degraded: bool,
    supervisor: Option<Box<dyn Supervisor>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("stages", &self.stages)
            .field("tuning_config", &self.tuning_config)
            .field("quality", &self.quality)
            .field("cycles", &self.cycles)
            .field("error_count", &self.error_count)
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(name: &str, kind: SignalKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            stages: Vec::with_capacity(MAX_STAGES),
            tuning_config: TuningConfig::default(),
            tuning: AdaptiveTuning::new(),
            latency_us: 0,
            quality: 0.0,
            samples_processed: 0,
            cycles: 0,
            error_count: 0,
            consecutive_failures: 0,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            degraded: false,
            supervisor: None,
        }
    }

    /// Build a pipeline from a list of stage configs
    pub fn from_stages(
        name: &str,
        kind: SignalKind,
        stages: &[StageConfig],
    ) -> Result<Self, ComputeError> {
        let mut pipeline = Self::new(name, kind);
        for config in stages {
            pipeline.add_stage(config.clone())?;
        }
        Ok(pipeline)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SignalKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage(&self, name: &str) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.name() == name)
    }

    pub fn stage_configs(&self) -> Vec<StageConfig> {
        self.stages.iter().map(|s| s.config().clone()).collect()
    }

    pub fn quality(&self) -> f64 {
        self.quality
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn tuning_config(&self) -> &TuningConfig {
        &self.tuning_config
    }

    pub fn tuning(&self) -> &AdaptiveTuning {
        &self.tuning
    }

    pub fn set_tuning(&mut self, config: TuningConfig) -> Result<(), ComputeError> {
        config.validate().map_err(ComputeError::config)?;
        self.tuning_config = config;
        self.tuning.reset();
        Ok(())
    }

    pub fn set_failure_threshold(&mut self, threshold: u32) {
        self.failure_threshold = threshold.max(1);
    }

    pub fn set_supervisor(&mut self, supervisor: Box<dyn Supervisor>) {
        self.supervisor = Some(supervisor);
    }

    fn check_capacity(&self, name: &str) -> Result<(), ComputeError> {
        if self.stages.len() >= MAX_STAGES {
            return Err(ComputeError::config(format!(
                "pipeline '{}' already has {} stages",
                self.name, MAX_STAGES
            )));
        }
        if self.stage(name).is_some() {
            return Err(ComputeError::config(format!(
                "pipeline '{}' already has a stage named '{}'",
                self.name, name
            )));
        }
        Ok(())
    }

    /// Append a stage running a built-in algorithm
    pub fn add_stage(&mut self, config: StageConfig) -> Result<(), ComputeError> {
        self.check_capacity(&config.name)?;
        let stage = PipelineStage::new(config)?;
        log::debug!("pipeline '{}': added stage '{}'", self.name, stage.name());
        self.stages.push(stage);
        Ok(())
    }

    /// Append a stage running a caller-supplied algorithm
    pub fn add_custom_stage(
        &mut self,
        config: StageConfig,
        algorithm: Box<dyn StageAlgorithm>,
    ) -> Result<(), ComputeError> {
        self.check_capacity(&config.name)?;
        let stage = PipelineStage::with_algorithm(config, algorithm)?;
        self.stages.push(stage);
        Ok(())
    }

    /// Remove a stage by name, returning its configuration
    pub fn remove_stage(&mut self, name: &str) -> Result<StageConfig, ComputeError> {
        let idx = self
            .stages
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| ComputeError::config(format!("no stage named '{}'", name)))?;
        let stage = self.stages.remove(idx);
        self.tuning.forget(name);
        Ok(stage.config().clone())
    }

    /// Replace a stage's configuration
    ///
    /// The new config is validated first; on rejection the prior config
    /// stays active.
    pub fn update_config(&mut self, name: &str, config: StageConfig) -> Result<(), ComputeError> {
        if config.name != name && self.stage(&config.name).is_some() {
            return Err(ComputeError::config(format!(
                "pipeline '{}' already has a stage named '{}'",
                self.name, config.name
            )));
        }
        let stage = self
            .stages
            .iter_mut()
            .find(|s| s.name() == name)
            .ok_or_else(|| ComputeError::config(format!("no stage named '{}'", name)))?;
        stage.reconfigure(config)?;
        self.tuning.forget(name);
        log::info!("pipeline '{}': stage '{}' reconfigured", self.name, name);
        Ok(())
    }

    /// Clear intermediate buffers, counters and tuning state; keep configuration
    pub fn reset(&mut self) {
        self.stages.iter_mut().for_each(PipelineStage::reset);
        self.tuning.reset();
        self.latency_us = 0;
        self.quality = 0.0;
        self.samples_processed = 0;
        self.cycles = 0;
        self.error_count = 0;
        self.consecutive_failures = 0;
        self.degraded = false;
    }

    /// Run one cycle
    ///
    /// A zero-length input yields an empty buffer with quality 0.0 without
    /// running any stage.
    pub fn process(&mut self, input: SignalBuffer) -> SignalBuffer {
        if input.is_empty() {
            self.quality = 0.0;
            self.latency_us = 0;
            return SignalBuffer::empty(input.channels, input.sample_rate_hz, input.start_timestamp_ms);
        }

        let mut quality = input.quality;
        let mut latency_us = 0u64;
        let mut last_error = None;

        for i in 0..self.stages.len() {
            let (done, rest) = self.stages.split_at_mut(i);
            let source = done.last().map(|s| &s.output).unwrap_or(&input);
            let stage = &mut rest[0];
            if let Err(e) = stage.run(source) {
                log::warn!("pipeline '{}': {}", self.name, e);
                self.error_count += 1;
                last_error = Some(e);
            }
            latency_us += stage.latency_us();
            if stage.is_enabled() {
                quality = quality.min(stage.quality());
            }
        }

        let mut output = match self.stages.last() {
            Some(stage) => stage.output.clone(),
            None => input,
        };
        output.quality = quality;

        self.latency_us = latency_us;
        self.quality = quality;
        self.samples_processed += output.len() as u64;
        self.cycles += 1;

        self.track_failures(last_error);

        if self.tuning_config.enabled && self.cycles % self.tuning_config.interval as u64 == 0 {
            self.tune();
        }

        output
    }

    fn tune(&mut self) -> Option<TuningAdjustment> {
        self.tuning.adjust(&self.tuning_config, &mut self.stages)
    }

    fn track_failures(&mut self, last_error: Option<ComputeError>) {
        match last_error {
            Some(error) => {
                self.consecutive_failures += 1;
                if !self.degraded && self.consecutive_failures >= self.failure_threshold {
                    self.degraded = true;
                    log::warn!(
                        "pipeline '{}' degraded after {} failing cycles",
                        self.name,
                        self.consecutive_failures
                    );
                    if let Some(supervisor) = self.supervisor.as_mut() {
                        supervisor.on_degraded(&self.name, self.consecutive_failures, &error);
                    }
                }
            }
            None => {
                self.consecutive_failures = 0;
                if self.degraded {
                    self.degraded = false;
                    log::info!("pipeline '{}' recovered", self.name);
                    if let Some(supervisor) = self.supervisor.as_mut() {
                        supervisor.on_recovered(&self.name);
                    }
                }
            }
        }
    }

    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            name: self.name.clone(),
            kind: self.kind,
            latency_us: self.latency_us,
            quality: self.quality,
            samples_processed: self.samples_processed,
            cycles: self.cycles,
            errors: self.error_count,
            degraded: self.degraded,
            tuning_adjustments: self.tuning.adjustments(),
            stages: self
                .stages
                .iter()
                .map(|s| StageMetrics {
                    name: s.name().to_string(),
                    enabled: s.is_enabled(),
                    quality: s.quality(),
                    latency_us: s.latency_us(),
                    failures: s.failures,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::stage::{StageKind, StageOutput, TuningParam};
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    fn gain(name: &str, k: f64) -> StageConfig {
        StageConfig::new(name, StageKind::Preprocess, "normalize").with_params(&[k, 0.0, 0.0])
    }

    fn ramp(n: usize) -> SignalBuffer {
        SignalBuffer::mono((0..n).map(|i| i as f64).collect(), 50.0, 0)
    }

    /// Quality equals its first parameter
    #[derive(Debug)]
    struct QualityKnob;

    impl StageAlgorithm for QualityKnob {
        fn id(&self) -> &'static str {
            "quality_knob"
        }

        fn defaults(&self) -> Vec<f64> {
            vec![0.5]
        }

        fn process(&self, input: &SignalBuffer, params: &[f64]) -> Result<StageOutput, String> {
            Ok(StageOutput {
                buffer: input.clone(),
                quality: params[0],
            })
        }

        fn tuning_param(&self) -> Option<TuningParam> {
            Some(TuningParam {
                index: 0,
                min: 0.0,
                max: 1.0,
                step: 0.1,
                raises_quality: true,
            })
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Supervisor for Recorder {
        fn on_degraded(&mut self, pipeline: &str, failures: u32, _e: &ComputeError) {
            self.events
                .lock()
                .unwrap()
                .push(format!("degraded {} {}", pipeline, failures));
        }

        fn on_recovered(&mut self, pipeline: &str) {
            self.events.lock().unwrap().push(format!("recovered {}", pipeline));
        }
    }

    #[test]
    fn test_stages_run_in_order() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline.add_stage(gain("double", 2.0)).unwrap();
        pipeline
            .add_stage(StageConfig::new("offset", StageKind::Postprocess, "normalize").with_params(&[1.0, 1.0, 0.0]))
            .unwrap();
        let out = pipeline.process(SignalBuffer::mono(vec![1.0, 2.0], 50.0, 0));
        assert_eq!(out.samples, vec![3.0, 5.0]);
        assert_eq!(out.quality, 1.0);
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline.add_stage(gain("g", 2.0)).unwrap();
        let out = pipeline.process(SignalBuffer::mono(Vec::new(), 50.0, 7));
        assert!(out.is_empty());
        assert_eq!(out.quality, 0.0);
        assert_eq!(out.start_timestamp_ms, 7);
        assert_eq!(pipeline.error_count(), 0);
        assert_eq!(pipeline.metrics().cycles, 0);
    }

    #[test]
    fn test_stage_failure_continues_on_best_buffer() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline.add_stage(gain("double", 2.0)).unwrap();
        pipeline
            .add_stage(StageConfig::new("env", StageKind::FeatureExtract, "envelope"))
            .unwrap();
        pipeline
            .add_stage(StageConfig::new("offset", StageKind::Postprocess, "normalize").with_params(&[1.0, 1.0, 0.0]))
            .unwrap();

        // flat input fails the envelope stage
        let out = pipeline.process(SignalBuffer::mono(vec![3.0; 4], 50.0, 0));
        assert_eq!(out.samples, vec![7.0; 4]);
        assert_eq!(out.quality, 0.0);
        assert_eq!(pipeline.error_count(), 1);
        assert_eq!(pipeline.stage("env").unwrap().quality(), 0.0);
        assert_eq!(pipeline.stage("offset").unwrap().quality(), 1.0);
    }

    #[test]
    fn test_capacity_is_eight() {
        let mut pipeline = Pipeline::new("test", SignalKind::Imu);
        for i in 0..MAX_STAGES {
            pipeline.add_stage(gain(&format!("s{}", i), 1.0)).unwrap();
        }
        let err = pipeline.add_stage(gain("s8", 1.0)).unwrap_err();
        assert!(matches!(err, ComputeError::ConfigurationError(_)));
        assert_eq!(pipeline.len(), MAX_STAGES);
    }

    #[test]
    fn test_duplicate_and_missing_names() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline.add_stage(gain("g", 1.0)).unwrap();
        assert!(pipeline.add_stage(gain("g", 2.0)).is_err());
        assert!(pipeline.remove_stage("nope").is_err());
        assert!(pipeline.update_config("nope", gain("nope", 1.0)).is_err());
    }

    #[test]
    fn test_update_config_rejection_keeps_prior() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline.add_stage(gain("g", 2.0)).unwrap();
        let rejected = pipeline.update_config("g", gain("g", 0.0));
        assert!(rejected.is_err());
        let out = pipeline.process(SignalBuffer::mono(vec![1.0], 50.0, 0));
        assert_eq!(out.samples, vec![2.0]);

        pipeline.update_config("g", gain("g", 3.0)).unwrap();
        let out = pipeline.process(SignalBuffer::mono(vec![1.0], 50.0, 0));
        assert_eq!(out.samples, vec![3.0]);
    }

    #[test]
    fn test_update_config_can_switch_algorithm() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline.add_stage(gain("g", 2.0)).unwrap();
        pipeline
            .update_config("g", StageConfig::new("g", StageKind::FeatureExtract, "envelope"))
            .unwrap();
        let out = pipeline.process(SignalBuffer::mono(vec![0.0, 4.0], 50.0, 0));
        assert_eq!(out.samples, vec![0.0, 1.0]);
    }

    #[test]
    fn test_remove_stage_returns_config() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline.add_stage(gain("g", 2.0)).unwrap();
        let config = pipeline.remove_stage("g").unwrap();
        assert_eq!(config.params, vec![2.0, 0.0, 0.0]);
        assert!(pipeline.is_empty());
        let out = pipeline.process(SignalBuffer::mono(vec![1.5], 50.0, 0));
        assert_eq!(out.samples, vec![1.5]);
    }

    #[test]
    fn test_reset_keeps_configuration() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline.add_stage(gain("g", 2.0)).unwrap();
        pipeline
            .add_stage(StageConfig::new("env", StageKind::FeatureExtract, "envelope"))
            .unwrap();
        pipeline.process(SignalBuffer::mono(vec![1.0; 3], 50.0, 0));
        assert_eq!(pipeline.error_count(), 1);

        pipeline.reset();
        let metrics = pipeline.metrics();
        assert_eq!(metrics.errors, 0);
        assert_eq!(metrics.cycles, 0);
        assert_eq!(pipeline.len(), 2);
        assert!(pipeline.stage("g").unwrap().output.is_empty());
    }

    #[test]
    fn test_metrics_track_samples() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline.add_stage(gain("g", 1.0)).unwrap();
        pipeline.process(ramp(10));
        pipeline.process(ramp(5));
        let metrics = pipeline.metrics();
        assert_eq!(metrics.samples_processed, 15);
        assert_eq!(metrics.cycles, 2);
        assert_eq!(metrics.stages.len(), 1);
    }

    #[test]
    fn test_supervisor_notified_once_per_episode() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new("ppg", SignalKind::Ppg);
        pipeline
            .add_stage(StageConfig::new("env", StageKind::FeatureExtract, "envelope"))
            .unwrap();
        pipeline.set_supervisor(Box::new(Recorder {
            events: events.clone(),
        }));

        for _ in 0..DEFAULT_FAILURE_THRESHOLD - 1 {
            pipeline.process(SignalBuffer::mono(vec![1.0; 4], 50.0, 0));
        }
        assert!(!pipeline.is_degraded());
        for _ in 0..3 {
            pipeline.process(SignalBuffer::mono(vec![1.0; 4], 50.0, 0));
        }
        assert!(pipeline.is_degraded());
        pipeline.process(ramp(4));
        assert!(!pipeline.is_degraded());

        let events = events.lock().unwrap().clone();
        assert_eq!(events, vec!["degraded ppg 3".to_string(), "recovered ppg".to_string()]);
    }

    #[test]
    fn test_tuning_converges_without_oscillation() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline
            .add_custom_stage(
                StageConfig::new("knob", StageKind::Algorithm, "quality_knob"),
                Box::new(QualityKnob),
            )
            .unwrap();
        pipeline
            .set_tuning(TuningConfig {
                enabled: true,
                target_quality: 0.8,
                interval: 2,
                dead_band: 0.05,
                min_step_ratio: 0.1,
            })
            .unwrap();

        let mut values = Vec::new();
        for _ in 0..12 {
            pipeline.process(ramp(4));
            values.push(pipeline.stage("knob").unwrap().config().params[0]);
        }

        // 0.5 -> 0.6 -> 0.7 -> 0.8, then inside the dead band
        assert!(values.windows(2).all(|w| w[1] >= w[0]));
        let last = *values.last().unwrap();
        assert!((last - 0.8).abs() < 1e-9);
        assert_eq!(pipeline.tuning().adjustments(), 3);
    }

    #[test]
    fn test_tuning_reversals_halve_step_and_stay_bounded() {
        let mut pipeline = Pipeline::new("test", SignalKind::Ppg);
        pipeline
            .add_custom_stage(
                StageConfig::new("knob", StageKind::Algorithm, "quality_knob").with_params(&[0.45]),
                Box::new(QualityKnob),
            )
            .unwrap();
        pipeline
            .set_tuning(TuningConfig {
                enabled: true,
                target_quality: 0.8,
                interval: 1,
                dead_band: 0.02,
                min_step_ratio: 0.1,
            })
            .unwrap();

        let mut values = vec![0.45];
        for _ in 0..40 {
            pipeline.process(ramp(4));
            values.push(pipeline.stage("knob").unwrap().config().params[0]);
        }

        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        let moves: Vec<f64> = values
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .filter(|d| *d > 1e-12)
            .collect();
        // later moves never exceed earlier ones
        assert!(moves.windows(2).all(|w| w[1] <= w[0] + 1e-9));
        assert!(moves.len() < 40);
        let settled = *values.last().unwrap();
        let tail_moves = values[30..].windows(2).filter(|w| (w[1] - w[0]).abs() > 1e-12).count();
        assert_eq!(tail_moves, 0, "still hunting at {}", settled);
        // 0.85 overshoots, the reversal halves the step back to 0.80
        assert!((settled - 0.8).abs() <= 0.02);
        let step = pipeline.tuning().step_of("knob").unwrap();
        assert!((step - 0.05).abs() < 1e-12);
    }
}
