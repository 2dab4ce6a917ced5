//! Synheart Sense - On-device sensor-to-health inference core
//!
//! Sense turns raw wearable sensor streams into health insight through a
//! deterministic chain: sensor acquisition → configurable signal pipelines →
//! PPG vitals and IMU activity → rolling baselines → illness and recovery
//! inference.
//!
//! ## Modules
//!
//! - **Signal**: Configurable stage pipelines with adaptive tuning and sensor presets
//! - **Vitals / Activity**: Heart rate, HRV, step counting and activity level
//! - **Health**: Baselines, sleep scoring, illness probability and recovery state
//! - **Sensor / Simulator**: Acquisition sessions and seeded signal simulators

pub mod activity;
pub mod baseline;
pub mod config;
pub mod error;
pub mod health;
pub mod pipeline;
pub mod ppg;
pub mod ring;
pub mod sensor;
pub mod signal;
pub mod simulator;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::SenseConfig;
pub use error::ComputeError;
pub use pipeline::{BatchResult, ProcessorMetrics, SenseProcessor, SenseSnapshot};

// Inference exports
pub use activity::ActivityClassifier;
pub use baseline::{BaselineContext, BaselineTracker};
pub use health::HealthMonitor;
pub use ppg::PpgExtractor;

// Signal exports
pub use signal::{ImuSensorModel, Pipeline, PpgSensorModel, StageConfig, StageKind};

/// Library version
pub const SENSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "synheart-sense";
