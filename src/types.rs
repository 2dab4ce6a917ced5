//! Core types for the Synheart Sense pipeline
//!
//! This module defines the data structures that flow between components:
//! raw sensor samples, signal buffers, per-modality results, daily vitals and
//! sleep records, and the aggregated health status.

use serde::{Deserialize, Serialize};

/// Maximum number of optical channels carried by a PPG sample
pub const PPG_MAX_CHANNELS: usize = 4;

/// Signal family a pipeline or buffer carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Ppg,
    Imu,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Ppg => "ppg",
            SignalKind::Imu => "imu",
        }
    }
}

/// Ordered block of samples handed from stage to stage
///
/// Multi-channel data is interleaved frame by frame
/// (`[x0, y0, z0, x1, y1, z1, ...]` for a 3-axis IMU).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBuffer {
    /// Interleaved samples
    pub samples: Vec<f64>,
    /// Values per frame (1 for PPG, 3 for accelerometer)
    pub channels: usize,
    /// Frames per second
    pub sample_rate_hz: f64,
    /// Timestamp of the first frame (ms)
    pub start_timestamp_ms: u64,
    /// Signal quality (0-1)
    pub quality: f64,
}

impl SignalBuffer {
    /// Create a buffer with full quality
    pub fn new(samples: Vec<f64>, channels: usize, sample_rate_hz: f64, start_timestamp_ms: u64) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            sample_rate_hz,
            start_timestamp_ms,
            quality: 1.0,
        }
    }

    /// Single-channel buffer
    pub fn mono(samples: Vec<f64>, sample_rate_hz: f64, start_timestamp_ms: u64) -> Self {
        Self::new(samples, 1, sample_rate_hz, start_timestamp_ms)
    }

    /// Empty buffer with zero quality, the explicit "nothing to report" value
    pub fn empty(channels: usize, sample_rate_hz: f64, start_timestamp_ms: u64) -> Self {
        Self {
            quality: 0.0,
            ..Self::new(Vec::new(), channels, sample_rate_hz, start_timestamp_ms)
        }
    }

    /// Build a single-channel buffer from one optical channel of PPG samples
    ///
    /// Quality is the mean of the per-sample quality indicators.
    pub fn from_ppg(samples: &[PpgSample], channel: usize, sample_rate_hz: f64) -> Self {
        let start = samples.first().map(|s| s.timestamp_ms).unwrap_or(0);
        if samples.is_empty() {
            return Self::empty(1, sample_rate_hz, start);
        }
        let values = samples
            .iter()
            .map(|s| s.channels.get(channel).copied().unwrap_or(0.0))
            .collect();
        let quality = samples.iter().map(|s| s.quality as f64).sum::<f64>()
            / (samples.len() as f64 * 100.0);
        Self {
            quality: quality.clamp(0.0, 1.0),
            ..Self::mono(values, sample_rate_hz, start)
        }
    }

    /// Build a 3-channel acceleration buffer from IMU samples
    pub fn from_imu(samples: &[ImuSample], sample_rate_hz: f64) -> Self {
        let start = samples.first().map(|s| s.timestamp_ms).unwrap_or(0);
        if samples.is_empty() {
            return Self::empty(3, sample_rate_hz, start);
        }
        let values = samples.iter().flat_map(|s| s.accel).collect();
        Self::new(values, 3, sample_rate_hz, start)
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// A buffer carries usable data when it is non-empty with nonzero quality
    pub fn is_valid(&self) -> bool {
        !self.is_empty() && self.quality > 0.0
    }

    /// Iterate frames (one slice of `channels` values per frame)
    pub fn frames(&self) -> std::slice::ChunksExact<'_, f64> {
        self.samples.chunks_exact(self.channels)
    }

    /// Iterate a single channel
    pub fn channel(&self, index: usize) -> impl Iterator<Item = f64> + '_ {
        self.samples
            .iter()
            .skip(index)
            .step_by(self.channels)
            .copied()
    }

    /// Milliseconds between frames
    pub fn sample_period_ms(&self) -> f64 {
        if self.sample_rate_hz > 0.0 {
            1000.0 / self.sample_rate_hz
        } else {
            0.0
        }
    }

    /// Timestamp of a frame (ms)
    pub fn timestamp_of(&self, frame: usize) -> f64 {
        self.start_timestamp_ms as f64 + frame as f64 * self.sample_period_ms()
    }

    /// Covered duration (ms)
    pub fn duration_ms(&self) -> f64 {
        self.len() as f64 * self.sample_period_ms()
    }

    /// Same metadata, new samples
    pub fn with_samples(&self, samples: Vec<f64>) -> Self {
        Self {
            samples,
            channels: self.channels,
            sample_rate_hz: self.sample_rate_hz,
            start_timestamp_ms: self.start_timestamp_ms,
            quality: self.quality,
        }
    }
}

/// Raw optical sample as delivered by a PPG sensor source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PpgSample {
    /// Sample timestamp (ms since session start or boot)
    pub timestamp_ms: u64,
    /// Channel readings [Red, IR, Green, Ambient]; unused channels are 0
    pub channels: [f64; PPG_MAX_CHANNELS],
    /// Number of active channels
    pub active_channels: u8,
    /// Signal quality indicator (0-100)
    pub quality: u8,
    /// Sequence number for loss detection
    pub sequence: u16,
}

impl PpgSample {
    /// Single-channel convenience constructor
    pub fn single(timestamp_ms: u64, value: f64, quality: u8, sequence: u16) -> Self {
        Self {
            timestamp_ms,
            channels: [value, 0.0, 0.0, 0.0],
            active_channels: 1,
            quality: quality.min(100),
            sequence,
        }
    }
}

/// Raw inertial sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub timestamp_ms: u64,
    /// Acceleration [x, y, z] in m/s²
    pub accel: [f64; 3],
    /// Angular rate [x, y, z] in degrees per second
    pub gyro: [f64; 3],
    /// Die temperature (°C)
    pub temperature_c: f64,
    pub sequence: u16,
}

/// A sample from either modality
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SensorSample {
    Ppg(PpgSample),
    Imu(ImuSample),
}

impl SensorSample {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            SensorSample::Ppg(s) => s.timestamp_ms,
            SensorSample::Imu(s) => s.timestamp_ms,
        }
    }

    pub fn kind(&self) -> SignalKind {
        match self {
            SensorSample::Ppg(_) => SignalKind::Ppg,
            SensorSample::Imu(_) => SignalKind::Imu,
        }
    }
}

/// Heart rate estimate with the RR intervals it was computed from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HrResult {
    /// Heart rate (bpm), 0 when no valid interval is available
    pub heart_rate_bpm: f64,
    /// Confidence (0-100)
    pub confidence: f64,
    /// Valid RR intervals in the averaging window (ms)
    pub rr_intervals_ms: Vec<f64>,
    /// Number of entries in `rr_intervals_ms`
    pub count: usize,
}

impl HrResult {
    pub fn is_valid(&self) -> bool {
        self.count > 0 && self.heart_rate_bpm > 0.0
    }
}

/// Short-term heart rate variability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvResult {
    /// Root mean square of successive differences (ms)
    pub rmssd_ms: f64,
    /// Standard deviation of RR intervals (ms)
    pub sdnn_ms: f64,
    /// Number of consecutive valid intervals used
    pub interval_count: usize,
}

/// Coarse motion classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityState {
    #[default]
    Still,
    Walking,
    Running,
}

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Still => "still",
            ActivityState::Walking => "walking",
            ActivityState::Running => "running",
        }
    }
}

/// Snapshot of the activity classifier
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityInfo {
    pub activity: ActivityState,
    /// Cumulative step count
    pub step_count: u64,
    /// Smoothed motion magnitude (m/s²)
    pub magnitude: f64,
    /// Steps per minute over the processed duration
    pub cadence_spm: f64,
}

/// Periodic physiological summary produced upstream (typically once per day)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VitalsRecord {
    /// HRV, RMSSD (ms); 0 when unavailable
    pub hrv_ms: f64,
    /// Resting heart rate (bpm); 0 when unavailable
    pub resting_hr_bpm: f64,
    /// Body temperature (°C); 0 when unavailable
    pub temperature_c: f64,
    /// Breaths per minute
    pub respiratory_rate: f64,
    /// Blood oxygen saturation (%)
    pub spo2_percentage: f64,
    /// Unix timestamp (ms)
    pub timestamp_ms: i64,
}

/// One night of sleep
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    pub total_sleep_minutes: f64,
    pub deep_sleep_minutes: f64,
    pub rem_sleep_minutes: f64,
    pub light_sleep_minutes: f64,
    pub awake_minutes: f64,
    /// Sleep efficiency (%)
    pub efficiency: f64,
    /// Number of awakenings
    pub wake_episodes: u32,
    /// Unix timestamps (ms)
    pub bedtime_ms: i64,
    pub wake_time_ms: i64,
}

/// Physiological readiness classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    #[default]
    Optimal,
    Adequate,
    Compromised,
}

impl RecoveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryState::Optimal => "optimal",
            RecoveryState::Adequate => "adequate",
            RecoveryState::Compromised => "compromised",
        }
    }
}

/// Reason a health status warrants attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthAlert {
    IllnessRisk,
    LowHrv,
    HighRestingHr,
    Fever,
    PoorSleep,
}

/// Aggregated health status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall health score (0-100)
    pub overall_score: f64,
    /// Probability of illness (0-1)
    pub illness_probability: f64,
    pub recovery_state: RecoveryState,
    /// Stress level (0-100)
    pub stress_level: f64,
    /// Score above the static improvement threshold
    pub trend_improving: bool,
    /// Score difference versus the previous evaluation
    pub score_change: Option<f64>,
    /// Latest sleep score, if a night has been recorded
    pub sleep_score: Option<f64>,
    /// HRV deviation from baseline (fraction)
    pub hrv_deviation: Option<f64>,
    /// Resting HR deviation from baseline (fraction)
    pub rhr_deviation: Option<f64>,
    pub alerts: Vec<HealthAlert>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            overall_score: 85.0,
            illness_probability: 0.0,
            recovery_state: RecoveryState::Optimal,
            stress_level: 15.0,
            trend_improving: true,
            score_change: None,
            sleep_score: None,
            hrv_deviation: None,
            rhr_deviation: None,
            alerts: Vec::new(),
        }
    }
}

/// One synchronized acquisition cycle across both modalities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynchronizedSample {
    /// Time the cycle was read (ms)
    pub timestamp_ms: u64,
    /// PPG data, `None` when the source had nothing this cycle
    pub ppg: Option<PpgSample>,
    /// IMU data, `None` when the source had nothing this cycle
    pub imu: Option<ImuSample>,
}

impl SynchronizedSample {
    pub fn ppg_valid(&self) -> bool {
        self.ppg.is_some()
    }

    pub fn imu_valid(&self) -> bool {
        self.imu.is_some()
    }
}

/// Samples drained from both sources in one acquisition cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionBatch {
    pub ppg: Vec<PpgSample>,
    pub imu: Vec<ImuSample>,
}

impl AcquisitionBatch {
    pub fn is_empty(&self) -> bool {
        self.ppg.is_empty() && self.imu.is_empty()
    }

    /// Interleave both modalities in timestamp order
    pub fn merged(&self) -> Vec<SensorSample> {
        let mut all: Vec<SensorSample> = self
            .ppg
            .iter()
            .copied()
            .map(SensorSample::Ppg)
            .chain(self.imu.iter().copied().map(SensorSample::Imu))
            .collect();
        all.sort_by_key(|s| s.timestamp_ms());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_frames_and_channels() {
        let buf = SignalBuffer::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 50.0, 1000);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.channel(1).collect::<Vec<_>>(), vec![2.0, 5.0]);
        assert_eq!(buf.frames().count(), 2);
        assert!((buf.timestamp_of(1) - 1020.0).abs() < 1e-9);
        assert!((buf.duration_ms() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_buffer_is_invalid() {
        let buf = SignalBuffer::empty(1, 50.0, 0);
        assert!(buf.is_empty());
        assert!(!buf.is_valid());
    }

    #[test]
    fn test_from_ppg_quality() {
        let samples = vec![
            PpgSample::single(0, 1.0, 100, 0),
            PpgSample::single(20, 2.0, 50, 1),
        ];
        let buf = SignalBuffer::from_ppg(&samples, 0, 50.0);
        assert_eq!(buf.samples, vec![1.0, 2.0]);
        assert!((buf.quality - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_merged_batch_is_time_ordered() {
        let batch = AcquisitionBatch {
            ppg: vec![PpgSample::single(30, 1.0, 90, 0)],
            imu: vec![ImuSample {
                timestamp_ms: 10,
                accel: [0.0, 0.0, 9.81],
                gyro: [0.0; 3],
                temperature_c: 30.0,
                sequence: 0,
            }],
        };
        let merged = batch.merged();
        assert_eq!(merged[0].kind(), SignalKind::Imu);
        assert_eq!(merged[1].timestamp_ms(), 30);
    }
}
