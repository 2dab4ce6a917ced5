//! Signal pipeline engine
//!
//! Configurable chains of signal stages (preprocess, filter, artifact
//! removal, feature extraction) with per-stage quality and latency,
//! graceful stage failure and bounded adaptive tuning.

mod engine;
pub mod presets;
mod stage;
pub mod stages;
mod tuning;

pub use engine::{
    Pipeline, PipelineMetrics, StageMetrics, Supervisor, DEFAULT_FAILURE_THRESHOLD, MAX_STAGES,
};
pub use presets::{ImuSensorModel, PpgSensorModel};
pub use stage::{
    algorithm_for, PipelineStage, StageAlgorithm, StageConfig, StageKind, StageOutput,
    TuningParam, MAX_STAGE_PARAMS,
};
pub use tuning::{AdaptiveTuning, TuningAdjustment, TuningConfig};
