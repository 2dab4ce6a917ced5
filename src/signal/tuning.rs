//! Adaptive parameter tuning
//!
//! Every `interval` cycles the lowest-quality tunable stage has one parameter
//! nudged toward the target quality. Each direction reversal halves that
//! stage's step, and the stage is left alone once its step has decayed below
//! `min_step_ratio` of the initial step.

use crate::signal::stage::PipelineStage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Adaptive tuning settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    pub enabled: bool,
    /// Quality the tuner steers toward (0-1)
    pub target_quality: f64,
    /// Processed cycles between adjustments
    pub interval: u32,
    /// No adjustment while |quality - target| is within this band
    pub dead_band: f64,
    /// Tuning stops once the step falls below this fraction of the initial step
    pub min_step_ratio: f64,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_quality: 0.8,
            interval: 10,
            dead_band: 0.05,
            min_step_ratio: 0.1,
        }
    }
}

impl TuningConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.target_quality) {
            return Err("target quality must be within 0..1".to_string());
        }
        if self.interval == 0 {
            return Err("tuning interval must be at least 1".to_string());
        }
        if self.dead_band < 0.0 {
            return Err("dead band must not be negative".to_string());
        }
        if !(self.min_step_ratio > 0.0 && self.min_step_ratio < 1.0) {
            return Err("min step ratio must be in (0, 1)".to_string());
        }
        Ok(())
    }
}

/// One parameter change made by the tuner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningAdjustment {
    pub stage: String,
    pub param_index: usize,
    pub old_value: f64,
    pub new_value: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct ParamTuner {
    step: f64,
    initial_step: f64,
    /// +1 or -1 for the last move, 0 before the first
    last_direction: i8,
    settled: bool,
}

/// Tuner state, keyed by stage name
#[derive(Debug, Clone, Default)]
pub struct AdaptiveTuning {
    tuners: HashMap<String, ParamTuner>,
    adjustments: u64,
}

impl AdaptiveTuning {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total adjustments made since the last reset
    pub fn adjustments(&self) -> u64 {
        self.adjustments
    }

    /// Whether the named stage has stopped being tuned
    pub fn is_settled(&self, stage: &str) -> bool {
        self.tuners.get(stage).map(|t| t.settled).unwrap_or(false)
    }

    /// Current step of the named stage, if it has been tuned
    pub fn step_of(&self, stage: &str) -> Option<f64> {
        self.tuners.get(stage).map(|t| t.step)
    }

    pub fn reset(&mut self) {
        self.tuners.clear();
        self.adjustments = 0;
    }

    /// Forget a stage, e.g. after it was removed or reconfigured
    pub fn forget(&mut self, stage: &str) {
        self.tuners.remove(stage);
    }

    /// Run one tuning round; at most one parameter of one stage changes
    pub fn adjust(
        &mut self,
        config: &TuningConfig,
        stages: &mut [PipelineStage],
    ) -> Option<TuningAdjustment> {
        let (idx, param) = stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_enabled() && !self.is_settled(s.name()))
            .filter_map(|(i, s)| s.tuning_param().map(|p| (i, p)))
            .min_by(|(a, _), (b, _)| stages[*a].quality().total_cmp(&stages[*b].quality()))?;

        let stage = &mut stages[idx];
        let error = config.target_quality - stage.quality();
        if error.abs() <= config.dead_band {
            return None;
        }

        let wants_more_quality = error > 0.0;
        let direction: i8 = if wants_more_quality == param.raises_quality { 1 } else { -1 };

        let tuner = self
            .tuners
            .entry(stage.name().to_string())
            .or_insert(ParamTuner {
                step: param.step,
                initial_step: param.step,
                last_direction: 0,
                settled: false,
            });

        if tuner.last_direction != 0 && tuner.last_direction != direction {
            tuner.step /= 2.0;
        }
        if tuner.step < tuner.initial_step * config.min_step_ratio {
            tuner.settled = true;
            log::debug!("tuning of stage '{}' settled", stage.name());
            return None;
        }
        tuner.last_direction = direction;

        let old_value = stage.config().param(param.index, param.min);
        let new_value = (old_value + direction as f64 * tuner.step).clamp(param.min, param.max);
        if (new_value - old_value).abs() < f64::EPSILON {
            return None;
        }

        stage.set_param(param.index, new_value);
        self.adjustments += 1;
        log::debug!(
            "tuned stage '{}' param {}: {:.4} -> {:.4} (quality {:.3})",
            stage.name(),
            param.index,
            old_value,
            new_value,
            stage.quality()
        );
        Some(TuningAdjustment {
            stage: stage.name().to_string(),
            param_index: param.index,
            old_value,
            new_value,
        })
    }
}
