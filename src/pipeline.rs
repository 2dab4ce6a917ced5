//! Processor orchestration
//!
//! This module provides the public API for Synheart Sense. A
//! [`SenseProcessor`] owns both signal pipelines, the PPG extractor, the
//! activity classifier and the health monitor, and exposes pull-based
//! snapshots of their latest results.

use crate::activity::ActivityClassifier;
use crate::config::SenseConfig;
use crate::error::ComputeError;
use crate::health::HealthMonitor;
use crate::ppg::PpgExtractor;
use crate::signal::{Pipeline, PipelineMetrics, StageConfig, Supervisor};
use crate::types::{
    AcquisitionBatch, ActivityInfo, HealthStatus, HrResult, HrvResult, PpgSample, SignalBuffer,
    SignalKind, SleepRecord, VitalsRecord,
};
use serde::{Deserialize, Serialize};

/// Everything a consumer reads after a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SenseSnapshot {
    pub heart_rate: HrResult,
    /// `None` until enough consecutive intervals are available
    pub hrv: Option<HrvResult>,
    pub activity: ActivityInfo,
    pub health: HealthStatus,
    pub ppg_quality: f64,
    pub imu_quality: f64,
}

/// Processor performance counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorMetrics {
    pub ppg: PipelineMetrics,
    pub imu: PipelineMetrics,
    pub beats: u64,
    pub invalid_rr_intervals: u64,
    pub steps: u64,
    pub imu_samples: u64,
}

/// Results of one acquisition batch; a modality with no samples is `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub heart_rate: Option<HrResult>,
    pub activity: Option<ActivityInfo>,
}

/// Stateful sensor-to-health processor
///
/// Single owner of all streaming state. Move it into a worker and exchange
/// batches and snapshots by message, or wrap the whole processor in a mutex.
#[derive(Debug)]
pub struct SenseProcessor {
    config: SenseConfig,
    ppg_pipeline: Pipeline,
    imu_pipeline: Pipeline,
    extractor: PpgExtractor,
    activity: ActivityClassifier,
    health: HealthMonitor,
}

impl SenseProcessor {
    /// Create a processor from a validated configuration
    pub fn new(config: SenseConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            ppg_pipeline: config.ppg_pipeline()?,
            imu_pipeline: config.imu_pipeline()?,
            extractor: PpgExtractor::new(config.ppg.clone())?,
            activity: ActivityClassifier::new(config.step.clone())?,
            health: HealthMonitor::new(config.health.clone())?,
            config,
        })
    }

    /// Create a processor from a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        Self::new(SenseConfig::from_json(json)?)
    }

    pub fn config(&self) -> &SenseConfig {
        &self.config
    }

    pub fn pipeline(&self, signal: SignalKind) -> &Pipeline {
        match signal {
            SignalKind::Ppg => &self.ppg_pipeline,
            SignalKind::Imu => &self.imu_pipeline,
        }
    }

    fn pipeline_mut(&mut self, signal: SignalKind) -> &mut Pipeline {
        match signal {
            SignalKind::Ppg => &mut self.ppg_pipeline,
            SignalKind::Imu => &mut self.imu_pipeline,
        }
    }

    /// Run a raw PPG buffer through the PPG pipeline and the extractor
    pub fn process_ppg(&mut self, buffer: SignalBuffer) -> HrResult {
        let filtered = self.ppg_pipeline.process(buffer);
        self.extractor.process(&filtered)
    }

    /// Convenience for raw samples: takes the configured channel at the
    /// configured rate
    pub fn process_ppg_samples(&mut self, samples: &[PpgSample]) -> HrResult {
        let buffer = SignalBuffer::from_ppg(
            samples,
            self.config.ppg_channel,
            self.config.ppg_sample_rate_hz,
        );
        self.process_ppg(buffer)
    }

    /// Run a raw 3-axis acceleration buffer through the IMU pipeline and the
    /// activity classifier
    pub fn process_imu(&mut self, buffer: SignalBuffer) -> Result<ActivityInfo, ComputeError> {
        let filtered = self.imu_pipeline.process(buffer);
        if filtered.is_empty() {
            return Ok(self.activity.info());
        }
        self.activity.process_buffer(&filtered)
    }

    /// Process whatever a sensor batch read delivered
    pub fn process_batch(&mut self, batch: &AcquisitionBatch) -> Result<BatchResult, ComputeError> {
        let mut result = BatchResult::default();
        if !batch.ppg.is_empty() {
            result.heart_rate = Some(self.process_ppg_samples(&batch.ppg));
        }
        if !batch.imu.is_empty() {
            let buffer = SignalBuffer::from_imu(&batch.imu, self.config.imu_sample_rate_hz);
            result.activity = Some(self.process_imu(buffer)?);
        }
        log::trace!(
            "batch: {} PPG, {} IMU samples",
            batch.ppg.len(),
            batch.imu.len()
        );
        Ok(result)
    }

    /// Fold in a day's vitals
    pub fn update_vitals(&mut self, vitals: &VitalsRecord) -> HealthStatus {
        self.health.update_vitals(vitals)
    }

    /// Fold in a night's sleep
    pub fn update_sleep(&mut self, sleep: &SleepRecord) -> Result<HealthStatus, ComputeError> {
        self.health.update_sleep(sleep)
    }

    /// Replace one stage's configuration at runtime
    ///
    /// A rejected configuration leaves the running stage untouched.
    pub fn update_config(
        &mut self,
        signal: SignalKind,
        stage: &str,
        config: StageConfig,
    ) -> Result<(), ComputeError> {
        self.pipeline_mut(signal).update_config(stage, config)?;
        log::info!("{} stage '{}' reconfigured", signal.as_str(), stage);
        Ok(())
    }

    /// Receive degradation events for one pipeline
    pub fn set_supervisor(&mut self, signal: SignalKind, supervisor: Box<dyn Supervisor>) {
        self.pipeline_mut(signal).set_supervisor(supervisor);
    }

    pub fn get_heart_rate(&self) -> HrResult {
        self.extractor.heart_rate().clone()
    }

    pub fn get_hrv(&self) -> Result<HrvResult, ComputeError> {
        self.extractor.hrv()
    }

    pub fn get_activity_info(&self) -> ActivityInfo {
        self.activity.info()
    }

    pub fn get_health_status(&self) -> HealthStatus {
        self.health.status().clone()
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn snapshot(&self) -> SenseSnapshot {
        SenseSnapshot {
            heart_rate: self.get_heart_rate(),
            hrv: self.get_hrv().ok(),
            activity: self.get_activity_info(),
            health: self.get_health_status(),
            ppg_quality: self.ppg_pipeline.quality(),
            imu_quality: self.imu_pipeline.quality(),
        }
    }

    pub fn metrics(&self) -> ProcessorMetrics {
        ProcessorMetrics {
            ppg: self.ppg_pipeline.metrics(),
            imu: self.imu_pipeline.metrics(),
            beats: self.extractor.beats(),
            invalid_rr_intervals: self.extractor.invalid_intervals(),
            steps: self.activity.step_count(),
            imu_samples: self.activity.samples_processed(),
        }
    }

    /// Clear streaming state and health history; configuration is kept
    pub fn reset(&mut self) {
        self.ppg_pipeline.reset();
        self.imu_pipeline.reset();
        self.extractor.reset();
        self.activity.reset();
        self.health.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{PpgSensorModel, StageKind};
    use crate::simulator::{
        GaitPattern, HealthScenario, HealthSimulator, ImuSimulator, PpgSimulator, SampleGenerator,
    };
    use crate::types::RecoveryState;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use std::thread;

    const DAY_MS: i64 = 86_400_000;

    fn processor() -> SenseProcessor {
        SenseProcessor::new(SenseConfig::default()).unwrap()
    }

    #[test]
    fn test_healthy_week_then_illness() {
        let mut processor = processor();
        let mut sim = HealthSimulator::new(2024);

        for day in 0..7u32 {
            let ts = day as i64 * DAY_MS;
            processor.update_vitals(&sim.vitals(HealthScenario::Healthy, day, ts));
            processor
                .update_sleep(&sim.sleep(HealthScenario::Healthy, day, ts - 9 * 3_600_000))
                .unwrap();
        }
        let status = processor.get_health_status();
        assert_eq!(status.recovery_state, RecoveryState::Optimal);
        assert!(status.illness_probability < 0.3);
        assert!(status.trend_improving);

        for day in 0..3u32 {
            let ts = (7 + day) as i64 * DAY_MS;
            processor.update_vitals(&sim.vitals(HealthScenario::Sick, day, ts));
            let status = processor
                .update_sleep(&sim.sleep(HealthScenario::Sick, day, ts - 9 * 3_600_000))
                .unwrap();
            assert!(
                status.illness_probability > 0.5,
                "day {}: {}",
                day,
                status.illness_probability
            );
            assert_eq!(status.recovery_state, RecoveryState::Compromised);
            assert!(status
                .alerts
                .contains(&crate::types::HealthAlert::IllnessRisk));
        }
    }

    #[test]
    fn test_simulated_pulse_heart_rate() {
        let mut processor = processor();
        let mut sim = PpgSimulator::new(3, PpgSensorModel::Max30101, 72.0);
        let samples = sim.generate(3_000);

        let hr = processor.process_ppg_samples(&samples);
        assert!(hr.is_valid());
        assert!((hr.heart_rate_bpm - 72.0).abs() < 2.0, "{}", hr.heart_rate_bpm);
        assert_eq!(processor.get_heart_rate(), hr);
        // 30 s of pulse is not enough for HRV
        let err = processor.get_hrv().unwrap_err();
        assert!(matches!(err, ComputeError::InsufficientData { .. }));
        assert!(err.is_transient());
        assert!(processor.metrics().beats >= 30);
    }

    #[test]
    fn test_simulated_walk_steps() {
        let mut processor = processor();
        let mut sim = ImuSimulator::new(11, 50.0, GaitPattern::Walk);
        let mut info = ActivityInfo::default();
        for _ in 0..10 {
            let buffer = SignalBuffer::from_imu(&sim.generate(50), 50.0);
            info = processor.process_imu(buffer).unwrap();
        }
        assert_eq!(info.step_count, 20);
        assert!((info.cadence_spm - 120.0).abs() < 1e-6);
        assert_eq!(processor.metrics().imu.cycles, 10);
    }

    #[test]
    fn test_empty_buffers_give_no_result() {
        let mut processor = processor();
        let hr = processor.process_ppg(SignalBuffer::empty(1, 100.0, 0));
        assert!(!hr.is_valid());
        let info = processor
            .process_imu(SignalBuffer::empty(3, 100.0, 0))
            .unwrap();
        assert_eq!(info.step_count, 0);
        assert_eq!(processor.snapshot().ppg_quality, 0.0);

        let result = processor.process_batch(&AcquisitionBatch::default()).unwrap();
        assert_eq!(result, BatchResult::default());
    }

    #[test]
    fn test_imu_needs_three_axes() {
        let mut processor = processor();
        let mono = SignalBuffer::mono(vec![9.81; 20], 100.0, 0);
        assert!(processor.process_imu(mono).is_err());
    }

    #[test]
    fn test_update_config_runtime() {
        let mut processor = processor();
        let narrower = StageConfig::new("bandpass", StageKind::Filter, "bandpass")
            .with_params(&[0.7, 3.0]);
        processor
            .update_config(SignalKind::Ppg, "bandpass", narrower.clone())
            .unwrap();
        assert_eq!(
            processor
                .pipeline(SignalKind::Ppg)
                .stage("bandpass")
                .unwrap()
                .config()
                .params,
            vec![0.7, 3.0]
        );

        // low edge above high edge is rejected, prior config stays
        let inverted = narrower.clone().with_params(&[5.0, 1.0]);
        assert!(processor
            .update_config(SignalKind::Ppg, "bandpass", inverted)
            .is_err());
        assert_eq!(
            processor
                .pipeline(SignalKind::Ppg)
                .stage("bandpass")
                .unwrap()
                .config()
                .params,
            vec![0.7, 3.0]
        );

        assert!(processor
            .update_config(SignalKind::Imu, "missing", narrower)
            .is_err());
    }

    #[test]
    fn test_reset_clears_history() {
        let mut processor = processor();
        let mut sim = ImuSimulator::new(1, 50.0, GaitPattern::Walk);
        processor
            .process_imu(SignalBuffer::from_imu(&sim.generate(100), 50.0))
            .unwrap();
        processor.update_vitals(&VitalsRecord {
            hrv_ms: 50.0,
            resting_hr_bpm: 60.0,
            temperature_c: 36.5,
            ..Default::default()
        });
        processor.reset();
        assert_eq!(processor.get_activity_info().step_count, 0);
        assert!(processor.health().baselines().hrv().is_empty());
    }

    enum Message {
        Batch(AcquisitionBatch),
        Vitals(VitalsRecord),
    }

    #[test]
    fn test_worker_thread_message_passing() {
        let config = SenseConfig {
            imu_sample_rate_hz: 50.0,
            ..SenseConfig::default()
        };
        let mut processor = SenseProcessor::new(config).unwrap();

        let (tx, rx) = mpsc::channel::<Message>();
        let (snap_tx, snap_rx) = mpsc::channel::<SenseSnapshot>();
        let worker = thread::spawn(move || {
            for message in rx {
                match message {
                    Message::Batch(batch) => {
                        if processor.process_batch(&batch).is_err() {
                            continue;
                        }
                    }
                    Message::Vitals(vitals) => {
                        processor.update_vitals(&vitals);
                    }
                }
                if snap_tx.send(processor.snapshot()).is_err() {
                    break;
                }
            }
        });

        let mut imu = ImuSimulator::new(11, 50.0, GaitPattern::Walk);
        for _ in 0..10 {
            let batch = AcquisitionBatch {
                ppg: Vec::new(),
                imu: imu.generate(50),
            };
            tx.send(Message::Batch(batch)).unwrap();
        }
        tx.send(Message::Vitals(VitalsRecord {
            hrv_ms: 50.0,
            resting_hr_bpm: 60.0,
            temperature_c: 36.5,
            ..Default::default()
        }))
        .unwrap();
        drop(tx);

        let snapshots: Vec<SenseSnapshot> = snap_rx.iter().collect();
        worker.join().unwrap();

        assert_eq!(snapshots.len(), 11);
        let last = snapshots.last().unwrap();
        assert_eq!(last.activity.step_count, 20);
        assert_eq!(last.health.overall_score, 85.0);
    }
}
