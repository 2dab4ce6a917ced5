//! Stage chains for the supported sensor parts
//!
//! Default figures follow the parts' recommended start-up configuration:
//! 100 Hz output rate, ±4 g accelerometer range.

use crate::error::ComputeError;
use crate::signal::engine::Pipeline;
use crate::signal::stage::{StageConfig, StageKind};
use crate::types::SignalKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const GRAVITY: f64 = 9.81;

/// Supported optical front ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PpgSensorModel {
    #[serde(rename = "MAX30101")]
    Max30101,
    #[serde(rename = "MAX86141")]
    Max86141,
}

/// Supported inertial parts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImuSensorModel {
    #[serde(rename = "BMA400")]
    Bma400,
    #[serde(rename = "BMI270")]
    Bmi270,
}

impl PpgSensorModel {
    pub fn name(&self) -> &'static str {
        match self {
            PpgSensorModel::Max30101 => "MAX30101",
            PpgSensorModel::Max86141 => "MAX86141",
        }
    }

    pub fn sample_rate_hz(&self) -> f64 {
        100.0
    }

    /// Full-scale ADC count used to normalize raw readings
    pub fn adc_full_scale(&self) -> f64 {
        match self {
            PpgSensorModel::Max30101 => 4096.0,
            PpgSensorModel::Max86141 => 262_144.0,
        }
    }

    /// Number of optical channels the part reports
    pub fn channels(&self) -> usize {
        match self {
            PpgSensorModel::Max30101 => 3,
            PpgSensorModel::Max86141 => 4,
        }
    }

    /// Stage chain for the part
    ///
    /// The integrated MAX30101 goes straight to a band-pass. The MAX86141 AFE
    /// has a much larger DC pedestal from external optics, so it gets a DC
    /// blocker and a low-pass in place of the band-pass.
    pub fn stages(&self) -> Vec<StageConfig> {
        let normalize = StageConfig::new("normalize", StageKind::Preprocess, "normalize")
            .with_params(&[1.0, 0.0, self.adc_full_scale()]);
        let gate = StageConfig::new("motion_gate", StageKind::ArtifactRemoval, "motion_gate")
            .with_params(&[3.0]);
        let envelope = StageConfig::new("envelope", StageKind::FeatureExtract, "envelope")
            .with_buffer_size(50);
        match self {
            PpgSensorModel::Max30101 => vec![
                normalize,
                StageConfig::new("bandpass", StageKind::Filter, "bandpass").with_params(&[0.5, 4.0]),
                gate,
                envelope,
            ],
            PpgSensorModel::Max86141 => vec![
                normalize,
                StageConfig::new("dc_removal", StageKind::Filter, "dc_removal")
                    .with_params(&[0.98, 1.0]),
                StageConfig::new("lowpass", StageKind::Filter, "lowpass").with_params(&[4.0]),
                gate,
                envelope,
            ],
        }
    }

    pub fn pipeline(&self) -> Result<Pipeline, ComputeError> {
        Pipeline::from_stages(self.name(), SignalKind::Ppg, &self.stages())
    }
}

impl ImuSensorModel {
    pub fn name(&self) -> &'static str {
        match self {
            ImuSensorModel::Bma400 => "BMA400",
            ImuSensorModel::Bmi270 => "BMI270",
        }
    }

    pub fn sample_rate_hz(&self) -> f64 {
        100.0
    }

    /// Accelerometer range (g)
    pub fn accel_range_g(&self) -> f64 {
        4.0
    }

    /// Gyroscope range (dps), `None` for accelerometer-only parts
    pub fn gyro_range_dps(&self) -> Option<f64> {
        match self {
            ImuSensorModel::Bma400 => None,
            ImuSensorModel::Bmi270 => Some(500.0),
        }
    }

    pub fn stages(&self) -> Vec<StageConfig> {
        vec![
            StageConfig::new("bias_correction", StageKind::Preprocess, "bias_correction")
                .with_params(&[0.0, 0.0, 0.0, 1.0]),
            StageConfig::new("spike_clamp", StageKind::ArtifactRemoval, "spike_clamp")
                .with_params(&[self.accel_range_g() * GRAVITY]),
            StageConfig::new("lowpass", StageKind::Filter, "lowpass").with_params(&[20.0]),
        ]
    }

    pub fn pipeline(&self) -> Result<Pipeline, ComputeError> {
        Pipeline::from_stages(self.name(), SignalKind::Imu, &self.stages())
    }
}

impl fmt::Display for PpgSensorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for ImuSensorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PpgSensorModel {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MAX30101" => Ok(PpgSensorModel::Max30101),
            "MAX86141" => Ok(PpgSensorModel::Max86141),
            other => Err(ComputeError::config(format!("unknown PPG sensor '{}'", other))),
        }
    }
}

impl FromStr for ImuSensorModel {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BMA400" => Ok(ImuSensorModel::Bma400),
            "BMI270" => Ok(ImuSensorModel::Bmi270),
            other => Err(ComputeError::config(format!("unknown IMU sensor '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_build() {
        for model in [PpgSensorModel::Max30101, PpgSensorModel::Max86141] {
            let pipeline = model.pipeline().unwrap();
            assert_eq!(pipeline.kind(), SignalKind::Ppg);
            assert!(pipeline.stage("envelope").is_some());
        }
        for model in [ImuSensorModel::Bma400, ImuSensorModel::Bmi270] {
            let pipeline = model.pipeline().unwrap();
            assert_eq!(pipeline.len(), 3);
        }
    }

    #[test]
    fn test_model_names_round_trip() {
        assert_eq!("max86141".parse::<PpgSensorModel>().unwrap(), PpgSensorModel::Max86141);
        assert_eq!("BMI270".parse::<ImuSensorModel>().unwrap(), ImuSensorModel::Bmi270);
        assert!("ADXL345".parse::<ImuSensorModel>().is_err());
        let json = serde_json::to_string(&PpgSensorModel::Max30101).unwrap();
        assert_eq!(json, "\"MAX30101\"");
    }

    #[test]
    fn test_imu_clamp_matches_range() {
        let stages = ImuSensorModel::Bma400.stages();
        assert!((stages[1].params[0] - 39.24).abs() < 1e-9);
    }
}
