//! PPG vitals extraction
//!
//! Turns filtered PPG buffers into pulse peaks, RR intervals, heart rate and
//! short-term HRV. Peak detection is streaming: the tail of each buffer is
//! carried into the next so beats straddling a buffer boundary are seen once.

use crate::error::ComputeError;
use crate::ring::RingBuffer;
use crate::types::{HrResult, HrvResult, SignalBuffer};
use serde::{Deserialize, Serialize};

/// Shortest physiological RR interval (200 bpm)
pub const RR_MIN_MS: f64 = 300.0;
/// Longest physiological RR interval (30 bpm)
pub const RR_MAX_MS: f64 = 2000.0;
/// Consecutive valid intervals required for HRV
pub const HRV_MIN_RR_INTERVALS: usize = 50;

/// Extractor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpgConfig {
    /// Minimum amplitude of a peak on the envelope-scaled signal
    pub peak_threshold: f64,
    /// Minimum distance between accepted peaks (ms)
    pub refractory_ms: f64,
    pub min_rr_ms: f64,
    pub max_rr_ms: f64,
    /// Valid intervals averaged for heart rate
    pub hr_window: usize,
    /// Consecutive valid intervals required for HRV
    pub hrv_min_intervals: usize,
    /// RR intervals retained
    pub rr_history: usize,
    /// A jump between buffers larger than this restarts peak tracking (ms)
    pub max_gap_ms: f64,
}

impl Default for PpgConfig {
    fn default() -> Self {
        Self {
            peak_threshold: 0.5,
            refractory_ms: 300.0,
            min_rr_ms: RR_MIN_MS,
            max_rr_ms: RR_MAX_MS,
            hr_window: 8,
            hrv_min_intervals: HRV_MIN_RR_INTERVALS,
            rr_history: 120,
            max_gap_ms: 250.0,
        }
    }
}

impl PpgConfig {
    pub fn validate(&self) -> Result<(), ComputeError> {
        if !self.peak_threshold.is_finite() {
            return Err(ComputeError::config("peak threshold must be finite"));
        }
        if self.refractory_ms <= 0.0 {
            return Err(ComputeError::config("refractory window must be positive"));
        }
        if !(self.min_rr_ms > 0.0 && self.min_rr_ms < self.max_rr_ms) {
            return Err(ComputeError::config("RR bounds must satisfy 0 < min < max"));
        }
        if self.hr_window == 0 {
            return Err(ComputeError::config("HR window must be at least 1"));
        }
        if self.hrv_min_intervals < 2 {
            return Err(ComputeError::config("HRV needs at least 2 intervals"));
        }
        if self.rr_history < self.hrv_min_intervals.max(self.hr_window) {
            return Err(ComputeError::config(format!(
                "RR history ({}) must hold at least {} intervals",
                self.rr_history,
                self.hrv_min_intervals.max(self.hr_window)
            )));
        }
        Ok(())
    }

    /// Refractory window in samples at `sample_rate_hz`, at least one
    pub fn refractory_samples(&self, sample_rate_hz: f64) -> usize {
        ((self.refractory_ms * sample_rate_hz / 1000.0).round() as usize).max(1)
    }
}

/// A local maximum above `threshold`: strictly above the `w` samples before,
/// at least as high as the `w` samples after
fn is_peak(values: &[f64], i: usize, w: usize, threshold: f64) -> bool {
    let v = values[i];
    v > threshold
        && values[i - w..i].iter().all(|&x| v > x)
        && values[i + 1..=i + w].iter().all(|&x| v >= x)
}

/// Detect pulse peaks in one block of samples
///
/// Returns frame indices. Candidates closer than the refractory window to the
/// previously accepted peak are merged into it. Samples within one window of
/// either edge cannot be confirmed.
pub fn detect_peaks(
    samples: &[f64],
    sample_rate_hz: f64,
    threshold: f64,
    refractory_ms: f64,
) -> Vec<usize> {
    if sample_rate_hz <= 0.0 {
        return Vec::new();
    }
    let w = ((refractory_ms * sample_rate_hz / 1000.0).round() as usize).max(1);
    if samples.len() <= 2 * w {
        return Vec::new();
    }
    let mut peaks: Vec<usize> = Vec::new();
    for i in w..samples.len() - w {
        if !is_peak(samples, i, w, threshold) {
            continue;
        }
        if let Some(&last) = peaks.last() {
            if i - last < w {
                continue;
            }
        }
        peaks.push(i);
    }
    peaks
}

/// Intervals between consecutive peak indices (ms)
pub fn rr_intervals_ms(peaks: &[usize], sample_rate_hz: f64) -> Vec<f64> {
    peaks
        .windows(2)
        .map(|w| (w[1] - w[0]) as f64 * 1000.0 / sample_rate_hz)
        .collect()
}

/// Root mean square of successive differences, `None` below two intervals
pub fn rmssd(rr_ms: &[f64]) -> Option<f64> {
    if rr_ms.len() < 2 {
        return None;
    }
    let sum_sq: f64 = rr_ms.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
    Some((sum_sq / (rr_ms.len() - 1) as f64).sqrt())
}

/// Population standard deviation of RR intervals, `None` below two intervals
pub fn sdnn(rr_ms: &[f64]) -> Option<f64> {
    if rr_ms.len() < 2 {
        return None;
    }
    let mean = rr_ms.iter().sum::<f64>() / rr_ms.len() as f64;
    let var = rr_ms.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / rr_ms.len() as f64;
    Some(var.sqrt())
}

/// Streaming PPG vitals extractor
///
/// Memory is bounded by the RR history ring and a carry of two refractory
/// windows of samples.
#[derive(Debug, Clone)]
pub struct PpgExtractor {
    config: PpgConfig,
    /// Retained intervals; `None` marks a discarded interval or a tracking break
    rr: RingBuffer<Option<f64>>,
    /// Tail of the previous buffer as (timestamp ms, value)
    carry: Vec<(f64, f64)>,
    /// Last sample already tested as a peak candidate
    checked_until_ms: Option<f64>,
    last_peak_ms: Option<f64>,
    next_timestamp_ms: Option<f64>,
    sample_rate_hz: f64,
    last_quality: f64,
    beats: u64,
    invalid_intervals: u64,
    result: HrResult,
}

impl Default for PpgExtractor {
    fn default() -> Self {
        Self {
            rr: RingBuffer::new(PpgConfig::default().rr_history),
            config: PpgConfig::default(),
            carry: Vec::new(),
            checked_until_ms: None,
            last_peak_ms: None,
            next_timestamp_ms: None,
            sample_rate_hz: 0.0,
            last_quality: 0.0,
            beats: 0,
            invalid_intervals: 0,
            result: HrResult::default(),
        }
    }
}

impl PpgExtractor {
    pub fn new(config: PpgConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            rr: RingBuffer::new(config.rr_history),
            config,
            ..Self::default()
        })
    }

    pub fn config(&self) -> &PpgConfig {
        &self.config
    }

    /// Peaks accepted since the last reset
    pub fn beats(&self) -> u64 {
        self.beats
    }

    /// RR intervals discarded as out of bounds
    pub fn invalid_intervals(&self) -> u64 {
        self.invalid_intervals
    }

    /// Latest heart rate estimate
    pub fn heart_rate(&self) -> &HrResult {
        &self.result
    }

    /// Valid RR intervals retained, oldest first
    pub fn rr_intervals(&self) -> Vec<f64> {
        self.rr.iter().filter_map(|v| *v).collect()
    }

    /// Drop all tracking state and history
    pub fn reset(&mut self) {
        self.rr.clear();
        self.restart_tracking();
        self.sample_rate_hz = 0.0;
        self.last_quality = 0.0;
        self.beats = 0;
        self.invalid_intervals = 0;
        self.result = HrResult::default();
    }

    fn restart_tracking(&mut self) {
        self.carry.clear();
        self.checked_until_ms = None;
        self.last_peak_ms = None;
        self.next_timestamp_ms = None;
    }

    /// Consume one filtered PPG buffer (channel 0) and return the updated estimate
    pub fn process(&mut self, buffer: &SignalBuffer) -> HrResult {
        if buffer.is_empty() || buffer.sample_rate_hz <= 0.0 {
            return self.result.clone();
        }
        self.check_continuity(buffer);

        let period = buffer.sample_period_ms();
        let w = self.config.refractory_samples(buffer.sample_rate_hz);

        let mut series: Vec<(f64, f64)> = Vec::with_capacity(self.carry.len() + buffer.len());
        series.append(&mut self.carry);
        series.extend(
            buffer
                .channel(0)
                .enumerate()
                .map(|(i, v)| (buffer.timestamp_of(i), v)),
        );
        let values: Vec<f64> = series.iter().map(|&(_, v)| v).collect();

        if series.len() > 2 * w {
            for i in w..series.len() - w {
                let ts = series[i].0;
                if self.checked_until_ms.map_or(false, |done| ts <= done) {
                    continue;
                }
                if is_peak(&values, i, w, self.config.peak_threshold) {
                    self.accept_peak(ts);
                }
            }
            self.checked_until_ms = Some(series[series.len() - w - 1].0);
        }

        let keep = series.len().min(2 * w);
        self.carry = series.split_off(series.len() - keep);
        self.next_timestamp_ms = self.carry.last().map(|&(ts, _)| ts + period);
        self.sample_rate_hz = buffer.sample_rate_hz;
        self.last_quality = buffer.quality;

        self.result = self.estimate();
        self.result.clone()
    }

    /// Restart peak tracking on a timestamp gap or sample-rate change
    fn check_continuity(&mut self, buffer: &SignalBuffer) {
        let rate_changed = self.sample_rate_hz > 0.0
            && (self.sample_rate_hz - buffer.sample_rate_hz).abs() > f64::EPSILON;
        let gap = self.next_timestamp_ms.map_or(false, |expected| {
            (buffer.start_timestamp_ms as f64 - expected).abs()
                > self.config.max_gap_ms.max(2.0 * buffer.sample_period_ms())
        });
        if rate_changed || gap {
            log::debug!(
                "PPG tracking restarted (rate change: {}, gap: {})",
                rate_changed,
                gap
            );
            if self.last_peak_ms.is_some() {
                // the next interval must not span the discontinuity
                self.rr.push(None);
            }
            self.restart_tracking();
        }
    }

    fn accept_peak(&mut self, ts: f64) {
        if let Some(last) = self.last_peak_ms {
            let interval = ts - last;
            if interval < self.config.refractory_ms {
                // merged into the earlier peak
                return;
            }
            if interval >= self.config.min_rr_ms && interval <= self.config.max_rr_ms {
                self.rr.push(Some(interval));
            } else {
                self.invalid_intervals += 1;
                self.rr.push(None);
                log::trace!("discarded RR interval {:.1} ms", interval);
            }
        }
        self.last_peak_ms = Some(ts);
        self.beats += 1;
    }

    fn estimate(&self) -> HrResult {
        let window = self.config.hr_window;
        let valid: Vec<f64> = {
            let all: Vec<f64> = self.rr.iter().filter_map(|v| *v).collect();
            let skip = all.len().saturating_sub(window);
            all[skip..].to_vec()
        };
        if valid.is_empty() {
            return HrResult::default();
        }

        let recent = self.rr.newest(window);
        let (total, ok) = recent.fold((0usize, 0usize), |(t, ok), v| {
            (t + 1, ok + usize::from(v.is_some()))
        });
        let valid_fraction = if total > 0 { ok as f64 / total as f64 } else { 0.0 };

        let mean_rr = valid.iter().sum::<f64>() / valid.len() as f64;
        HrResult {
            heart_rate_bpm: 60_000.0 / mean_rr,
            confidence: (100.0 * valid_fraction * self.last_quality).clamp(0.0, 100.0),
            count: valid.len(),
            rr_intervals_ms: valid,
        }
    }

    /// Short-term HRV over the most recent run of consecutive valid intervals
    pub fn hrv(&self) -> Result<HrvResult, ComputeError> {
        let mut run: Vec<f64> = self
            .rr
            .iter()
            .rev()
            .map_while(|v| *v)
            .collect();
        run.reverse();

        let needed = self.config.hrv_min_intervals;
        if run.len() < needed {
            return Err(ComputeError::InsufficientData {
                needed,
                available: run.len(),
            });
        }
        match (rmssd(&run), sdnn(&run)) {
            (Some(rmssd_ms), Some(sdnn_ms)) => Ok(HrvResult {
                rmssd_ms,
                sdnn_ms,
                interval_count: run.len(),
            }),
            _ => Err(ComputeError::InsufficientData {
                needed,
                available: run.len(),
            }),
        }
    }
}
