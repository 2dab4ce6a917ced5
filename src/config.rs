//! Processor configuration
//!
//! One serde document covering sensor parts, pipeline stages, extractor,
//! step detector, health inference and acquisition settings. Missing fields
//! take their defaults, so `{}` is a valid configuration.

use crate::activity::StepConfig;
use crate::error::ComputeError;
use crate::health::HealthConfig;
use crate::ppg::PpgConfig;
use crate::sensor::SensorManagerConfig;
use crate::signal::{
    ImuSensorModel, Pipeline, PpgSensorModel, StageConfig, TuningConfig,
    DEFAULT_FAILURE_THRESHOLD, MAX_STAGES,
};
use crate::types::{SignalKind, PPG_MAX_CHANNELS};
use serde::{Deserialize, Serialize};

/// Full processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenseConfig {
    pub ppg_sensor: PpgSensorModel,
    pub imu_sensor: ImuSensorModel,
    /// Replaces the PPG part's stage chain when set
    pub ppg_stages: Option<Vec<StageConfig>>,
    /// Replaces the IMU part's stage chain when set
    pub imu_stages: Option<Vec<StageConfig>>,
    /// Optical channel fed to the vitals extractor
    pub ppg_channel: usize,
    pub ppg_sample_rate_hz: f64,
    pub imu_sample_rate_hz: f64,
    /// Consecutive failed cycles before a pipeline is reported degraded
    pub failure_threshold: u32,
    pub tuning: TuningConfig,
    pub ppg: PpgConfig,
    pub step: StepConfig,
    pub health: HealthConfig,
    pub sensors: SensorManagerConfig,
}

impl Default for SenseConfig {
    fn default() -> Self {
        let ppg_sensor = PpgSensorModel::Max30101;
        let imu_sensor = ImuSensorModel::Bmi270;
        Self {
            ppg_sensor,
            imu_sensor,
            ppg_stages: None,
            imu_stages: None,
            ppg_channel: 0,
            ppg_sample_rate_hz: ppg_sensor.sample_rate_hz(),
            imu_sample_rate_hz: imu_sensor.sample_rate_hz(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            tuning: TuningConfig::default(),
            ppg: PpgConfig::default(),
            step: StepConfig::default(),
            health: HealthConfig::default(),
            sensors: SensorManagerConfig::default(),
        }
    }
}

impl SenseConfig {
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: SenseConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Stage chain for the PPG pipeline
    pub fn ppg_stage_configs(&self) -> Vec<StageConfig> {
        self.ppg_stages
            .clone()
            .unwrap_or_else(|| self.ppg_sensor.stages())
    }

    /// Stage chain for the IMU pipeline
    pub fn imu_stage_configs(&self) -> Vec<StageConfig> {
        self.imu_stages
            .clone()
            .unwrap_or_else(|| self.imu_sensor.stages())
    }

    pub fn ppg_pipeline(&self) -> Result<Pipeline, ComputeError> {
        self.build_pipeline(self.ppg_sensor.name(), SignalKind::Ppg, &self.ppg_stage_configs())
    }

    pub fn imu_pipeline(&self) -> Result<Pipeline, ComputeError> {
        self.build_pipeline(self.imu_sensor.name(), SignalKind::Imu, &self.imu_stage_configs())
    }

    fn build_pipeline(
        &self,
        name: &str,
        kind: SignalKind,
        stages: &[StageConfig],
    ) -> Result<Pipeline, ComputeError> {
        let mut pipeline = Pipeline::from_stages(name, kind, stages)?;
        pipeline.set_tuning(self.tuning.clone())?;
        pipeline.set_failure_threshold(self.failure_threshold);
        Ok(pipeline)
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        let active = self.ppg_sensor.channels().min(PPG_MAX_CHANNELS);
        if self.ppg_channel >= active {
            return Err(ComputeError::config(format!(
                "PPG channel {} not available on {} ({} channels)",
                self.ppg_channel,
                self.ppg_sensor.name(),
                active
            )));
        }
        if !(self.ppg_sample_rate_hz > 0.0 && self.imu_sample_rate_hz > 0.0) {
            return Err(ComputeError::config("sample rates must be positive"));
        }
        if self.failure_threshold == 0 {
            return Err(ComputeError::config("failure threshold must be at least 1"));
        }
        for (label, stages) in [
            ("PPG", self.ppg_stage_configs()),
            ("IMU", self.imu_stage_configs()),
        ] {
            if stages.len() > MAX_STAGES {
                return Err(ComputeError::config(format!(
                    "{} pipeline has {} stages, at most {} allowed",
                    label,
                    stages.len(),
                    MAX_STAGES
                )));
            }
            for stage in &stages {
                stage.validate()?;
            }
        }
        self.tuning.validate().map_err(ComputeError::config)?;
        self.ppg.validate()?;
        self.step.validate()?;
        self.health.validate()?;
        if self.sensors.max_batch == 0 {
            return Err(ComputeError::config("sensor batch size must be at least 1"));
        }
        Ok(())
    }
}
