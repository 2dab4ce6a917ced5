//! IMU step counting and activity classification
//!
//! Steps come from a peak/valley state machine over the gravity-removed
//! acceleration magnitude; activity level comes from an EMA of the same
//! magnitude.

use crate::error::ComputeError;
use crate::types::{ActivityInfo, ActivityState, ImuSample, SignalBuffer};
use serde::{Deserialize, Serialize};

/// Standard gravity (m/s²)
pub const GRAVITY: f64 = 9.81;

/// Step detector and classifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub gravity: f64,
    /// EMA factor for the smoothed magnitude
    pub smoothing_alpha: f64,
    /// Absolute magnitude a peak must exceed (m/s²)
    pub step_threshold: f64,
    /// A peak must exceed this multiple of the previous magnitude
    pub peak_ratio: f64,
    /// A valley must fall below this multiple of the previous magnitude
    pub valley_ratio: f64,
    /// Samples after a counted step during which no transition happens
    pub cooldown_samples: u32,
    /// Smoothed magnitude at which activity becomes Walking
    pub walking_threshold: f64,
    /// Smoothed magnitude at which activity becomes Running
    pub running_threshold: f64,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            gravity: GRAVITY,
            smoothing_alpha: 0.2,
            step_threshold: 0.8,
            peak_ratio: 1.3,
            valley_ratio: 0.7,
            cooldown_samples: 10,
            walking_threshold: 0.3,
            running_threshold: 1.5,
        }
    }
}

impl StepConfig {
    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.gravity <= 0.0 {
            return Err(ComputeError::config("gravity must be positive"));
        }
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(ComputeError::config("smoothing alpha must be in (0, 1]"));
        }
        if self.step_threshold <= 0.0 {
            return Err(ComputeError::config("step threshold must be positive"));
        }
        if self.peak_ratio <= 1.0 {
            return Err(ComputeError::config("peak ratio must exceed 1"));
        }
        if !(self.valley_ratio > 0.0 && self.valley_ratio < 1.0) {
            return Err(ComputeError::config("valley ratio must be in (0, 1)"));
        }
        if !(0.0 <= self.walking_threshold && self.walking_threshold < self.running_threshold) {
            return Err(ComputeError::config(
                "activity boundaries must satisfy 0 <= walking < running",
            ));
        }
        Ok(())
    }

    /// Activity level for a smoothed magnitude
    pub fn classify(&self, smoothed_magnitude: f64) -> ActivityState {
        if smoothed_magnitude < self.walking_threshold {
            ActivityState::Still
        } else if smoothed_magnitude < self.running_threshold {
            ActivityState::Walking
        } else {
            ActivityState::Running
        }
    }
}

/// Gravity-removed acceleration magnitude `|‖a‖ - g|`
pub fn motion_magnitude(accel: [f64; 3], gravity: f64) -> f64 {
    let norm = (accel[0] * accel[0] + accel[1] * accel[1] + accel[2] * accel[2]).sqrt();
    (norm - gravity).abs()
}

/// Which half of the stride the detector is waiting for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPhase {
    #[default]
    SeekingPeak,
    SeekingValley,
}

/// Step detector state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub smoothed_magnitude: f64,
    pub last_magnitude: f64,
    pub phase: StepPhase,
    /// Samples left before transitions are allowed again
    pub cooldown_remaining: u32,
    pub step_count: u64,
}

/// Streaming step counter and activity classifier
#[derive(Debug, Clone, Default)]
pub struct ActivityClassifier {
    config: StepConfig,
    state: StepState,
    activity: ActivityState,
    samples: u64,
    duration_ms: f64,
}

impl ActivityClassifier {
    pub fn new(config: StepConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    pub fn config(&self) -> &StepConfig {
        &self.config
    }

    pub fn state(&self) -> &StepState {
        &self.state
    }

    pub fn step_count(&self) -> u64 {
        self.state.step_count
    }

    pub fn activity(&self) -> ActivityState {
        self.activity
    }

    pub fn samples_processed(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        self.state = StepState::default();
        self.activity = ActivityState::Still;
        self.samples = 0;
        self.duration_ms = 0.0;
    }

    /// Advance the detector by one magnitude sample; true when a step was counted
    pub fn process_magnitude(&mut self, magnitude: f64) -> bool {
        let cfg = &self.config;
        let state = &mut self.state;

        state.smoothed_magnitude =
            cfg.smoothing_alpha * magnitude + (1.0 - cfg.smoothing_alpha) * state.smoothed_magnitude;

        let cooling = if state.cooldown_remaining > 0 {
            state.cooldown_remaining -= 1;
            state.cooldown_remaining > 0
        } else {
            false
        };

        let mut counted = false;
        if !cooling {
            match state.phase {
                StepPhase::SeekingPeak => {
                    if magnitude > cfg.step_threshold
                        && magnitude > cfg.peak_ratio * state.last_magnitude
                    {
                        state.phase = StepPhase::SeekingValley;
                    }
                }
                StepPhase::SeekingValley => {
                    if magnitude < cfg.valley_ratio * state.last_magnitude {
                        state.phase = StepPhase::SeekingPeak;
                        state.step_count += 1;
                        state.cooldown_remaining = cfg.cooldown_samples;
                        counted = true;
                    }
                }
            }
        }

        state.last_magnitude = magnitude;
        self.activity = cfg.classify(state.smoothed_magnitude);
        self.samples += 1;
        counted
    }

    /// Consume one raw IMU sample
    pub fn process_sample(&mut self, sample: &ImuSample) -> bool {
        self.process_magnitude(motion_magnitude(sample.accel, self.config.gravity))
    }

    /// Consume a 3-channel acceleration buffer and return the updated snapshot
    pub fn process_buffer(&mut self, buffer: &SignalBuffer) -> Result<ActivityInfo, ComputeError> {
        if buffer.channels != 3 {
            return Err(ComputeError::config(format!(
                "activity classifier needs 3 acceleration channels, got {}",
                buffer.channels
            )));
        }
        let before = self.state.step_count;
        for frame in buffer.frames() {
            self.process_magnitude(motion_magnitude([frame[0], frame[1], frame[2]], self.config.gravity));
        }
        self.duration_ms += buffer.duration_ms();
        let new_steps = self.state.step_count - before;
        if new_steps > 0 {
            log::trace!("{} steps in {} frames", new_steps, buffer.len());
        }
        Ok(self.info())
    }

    /// Snapshot of the classifier
    pub fn info(&self) -> ActivityInfo {
        let cadence_spm = if self.duration_ms > 0.0 {
            self.state.step_count as f64 * 60_000.0 / self.duration_ms
        } else {
            0.0
        };
        ActivityInfo {
            activity: self.activity,
            step_count: self.state.step_count,
            magnitude: self.state.smoothed_magnitude,
            cadence_spm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Baseline 0.1 with a single-sample spike at each position
    fn spikes(positions: &[usize], len: usize) -> Vec<f64> {
        let mut m = vec![0.1; len];
        for &p in positions {
            m[p] = 2.0;
        }
        m
    }

    #[test]
    fn test_k_spaced_peaks_give_k_steps() {
        let positions: Vec<usize> = (0..7).map(|k| 5 + k * 20).collect();
        let mut classifier = ActivityClassifier::default();
        let counted = spikes(&positions, 160)
            .into_iter()
            .filter(|&m| classifier.process_magnitude(m))
            .count();
        assert_eq!(counted, 7);
        assert_eq!(classifier.step_count(), 7);
    }

    #[test]
    fn test_burst_within_cooldown_counts_once() {
        let mut classifier = ActivityClassifier::default();
        for m in spikes(&[5, 8, 11, 14], 60) {
            classifier.process_magnitude(m);
        }
        assert_eq!(classifier.step_count(), 1);
    }

    #[test]
    fn test_peak_needs_threshold_and_ratio() {
        let mut classifier = ActivityClassifier::default();
        // rises slowly above the threshold: never 1.3x the previous sample
        for m in [0.7, 0.85, 1.0, 1.2, 1.4, 0.1, 0.1] {
            classifier.process_magnitude(m);
        }
        assert_eq!(classifier.step_count(), 0);
        assert_eq!(classifier.state().phase, StepPhase::SeekingPeak);
    }

    #[test]
    fn test_cooldown_releases_after_window() {
        let mut classifier = ActivityClassifier::default();
        // step counted at index 1; a spike 10 samples later is allowed
        for m in spikes(&[0, 11], 20) {
            classifier.process_magnitude(m);
        }
        assert_eq!(classifier.step_count(), 2);

        let mut classifier = ActivityClassifier::default();
        // 9 samples later is still cooling down
        for m in spikes(&[0, 10], 20) {
            classifier.process_magnitude(m);
        }
        assert_eq!(classifier.step_count(), 1);
    }

    #[test]
    fn test_activity_levels() {
        let mut classifier = ActivityClassifier::default();
        for _ in 0..100 {
            classifier.process_magnitude(0.05);
        }
        assert_eq!(classifier.activity(), ActivityState::Still);
        for _ in 0..100 {
            classifier.process_magnitude(0.7);
        }
        assert_eq!(classifier.activity(), ActivityState::Walking);
        for _ in 0..100 {
            classifier.process_magnitude(2.5);
        }
        assert_eq!(classifier.activity(), ActivityState::Running);
        assert!((classifier.info().magnitude - 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_buffer_must_have_three_channels() {
        let mut classifier = ActivityClassifier::default();
        let mono = SignalBuffer::mono(vec![9.81; 10], 50.0, 0);
        assert!(matches!(
            classifier.process_buffer(&mono),
            Err(ComputeError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_buffer_at_rest_and_cadence() {
        let mut classifier = ActivityClassifier::default();
        let mut samples = Vec::new();
        for i in 0..500 {
            // 2 Hz impacts at 50 Hz
            let z = if i % 25 == 0 { 9.81 + 3.0 } else { 9.81 };
            samples.extend_from_slice(&[0.0, 0.0, z]);
        }
        let info = classifier
            .process_buffer(&SignalBuffer::new(samples, 3, 50.0, 0))
            .unwrap();
        assert_eq!(info.step_count, 20);
        assert!((info.cadence_spm - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_magnitude_removes_gravity() {
        assert!(motion_magnitude([0.0, 0.0, 9.81], GRAVITY).abs() < 1e-12);
        assert!((motion_magnitude([3.0, 4.0, 0.0], GRAVITY) - 4.81).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StepConfig {
            walking_threshold: 2.0,
            running_threshold: 1.0,
            ..StepConfig::default()
        };
        assert!(ActivityClassifier::new(config).is_err());
    }
}
