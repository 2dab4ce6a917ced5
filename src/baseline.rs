//! Baseline management
//!
//! This module keeps rolling baselines for HRV, resting heart rate and body
//! temperature. Baselines enable relative interpretation of daily vitals.

use crate::error::ComputeError;
use crate::ring::RingBuffer;
use crate::types::VitalsRecord;
use serde::{Deserialize, Serialize};

/// HRV baseline window in days
pub const HRV_BASELINE_DAYS: usize = 7;
/// Resting heart rate baseline window in days
pub const RHR_BASELINE_DAYS: usize = 7;
/// Temperature baseline window in days
pub const TEMP_BASELINE_DAYS: usize = 3;

/// Relative deviation `(current - baseline) / baseline`, 0 when the baseline is 0
pub fn deviation(current: f64, baseline: f64) -> f64 {
    if baseline == 0.0 {
        return 0.0;
    }
    (current - baseline) / baseline
}

/// A zero, negative or non-finite reading means the value was not measured
fn is_present(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Rolling baseline of one biomarker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerBaseline {
    name: String,
    values: RingBuffer<f64>,
    mean: f64,
    /// Accepted physiological range (inclusive)
    min: f64,
    max: f64,
    rejected: u64,
}

impl BiomarkerBaseline {
    pub fn new(name: &str, capacity: usize, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            values: RingBuffer::new(capacity),
            mean: 0.0,
            min,
            max,
            rejected: 0,
        }
    }

    /// Fold a value into the baseline
    ///
    /// Returns `Ok(false)` for a missing value (zero, negative or non-finite),
    /// which is skipped. A value outside the physiological range is discarded,
    /// counted, and reported as `InvalidSample`.
    pub fn update(&mut self, value: f64) -> Result<bool, ComputeError> {
        if !is_present(value) {
            return Ok(false);
        }
        if value < self.min || value > self.max {
            self.rejected += 1;
            return Err(ComputeError::InvalidSample(format!(
                "{} {} outside {}..{}",
                self.name, value, self.min, self.max
            )));
        }
        self.values.push(value);
        self.mean = self.values.mean();
        Ok(true)
    }

    /// Mean over the filled slots, 0.0 while empty
    pub fn value(&self) -> f64 {
        self.mean
    }

    /// Mean over the filled slots, `None` while empty
    pub fn mean(&self) -> Option<f64> {
        (!self.values.is_empty()).then_some(self.mean)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.values.capacity()
    }

    pub fn is_full(&self) -> bool {
        self.values.is_full()
    }

    /// Values discarded as out of range
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Retained values, oldest first
    pub fn values(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }

    /// Whether `value` would be accepted (present and within range)
    pub fn in_range(&self, value: f64) -> bool {
        is_present(value) && value >= self.min && value <= self.max
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.mean = 0.0;
        self.rejected = 0;
    }
}

/// Current baselines plus how today's vitals sit against them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineContext {
    /// HRV deviation from the prior baseline (fraction)
    pub hrv_deviation: Option<f64>,
    /// Resting HR deviation from the prior baseline (fraction)
    pub rhr_deviation: Option<f64>,
    /// Temperature deviation from the prior baseline (fraction)
    pub temperature_deviation: Option<f64>,
    /// Today's accepted temperature (°C)
    pub temperature_c: Option<f64>,
    /// Baselines after today's values were folded in
    pub hrv_baseline_ms: Option<f64>,
    pub rhr_baseline_bpm: Option<f64>,
    pub temperature_baseline_c: Option<f64>,
    /// Days of HRV or RHR history available
    pub baseline_days: usize,
}

/// Baseline tracker for HRV, resting HR and temperature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineTracker {
    hrv: BiomarkerBaseline,
    rhr: BiomarkerBaseline,
    temperature: BiomarkerBaseline,
}

impl Default for BaselineTracker {
    fn default() -> Self {
        Self::new(HRV_BASELINE_DAYS, RHR_BASELINE_DAYS, TEMP_BASELINE_DAYS)
    }
}

impl BaselineTracker {
    pub fn new(hrv_days: usize, rhr_days: usize, temp_days: usize) -> Self {
        Self {
            hrv: BiomarkerBaseline::new("HRV", hrv_days, 0.0, 300.0),
            rhr: BiomarkerBaseline::new("resting HR", rhr_days, 25.0, 220.0),
            temperature: BiomarkerBaseline::new("temperature", temp_days, 30.0, 45.0),
        }
    }

    pub fn hrv(&self) -> &BiomarkerBaseline {
        &self.hrv
    }

    pub fn rhr(&self) -> &BiomarkerBaseline {
        &self.rhr
    }

    pub fn temperature(&self) -> &BiomarkerBaseline {
        &self.temperature
    }

    /// Update baselines with today's vitals and return the contextual view
    ///
    /// Deviations compare today against the baseline as it stood before
    /// today's values were added.
    pub fn update_and_contextualize(&mut self, vitals: &VitalsRecord) -> BaselineContext {
        let hrv_deviation = Self::prior_deviation(&self.hrv, vitals.hrv_ms);
        let rhr_deviation = Self::prior_deviation(&self.rhr, vitals.resting_hr_bpm);
        let temperature_deviation =
            Self::prior_deviation(&self.temperature, vitals.temperature_c);
        let temperature_c = self
            .temperature
            .in_range(vitals.temperature_c)
            .then_some(vitals.temperature_c);

        for (baseline, value) in [
            (&mut self.hrv, vitals.hrv_ms),
            (&mut self.rhr, vitals.resting_hr_bpm),
            (&mut self.temperature, vitals.temperature_c),
        ] {
            if let Err(e) = baseline.update(value) {
                log::warn!("discarded vitals value: {}", e);
            }
        }

        BaselineContext {
            hrv_deviation,
            rhr_deviation,
            temperature_deviation,
            temperature_c,
            hrv_baseline_ms: self.hrv.mean(),
            rhr_baseline_bpm: self.rhr.mean(),
            temperature_baseline_c: self.temperature.mean(),
            baseline_days: self.hrv.len().max(self.rhr.len()),
        }
    }

    fn prior_deviation(baseline: &BiomarkerBaseline, current: f64) -> Option<f64> {
        match baseline.mean() {
            Some(base) if baseline.in_range(current) => Some(deviation(current, base)),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.hrv.clear();
        self.rhr.clear();
        self.temperature.clear();
    }
}
