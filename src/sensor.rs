//! Sensor acquisition
//!
//! Polls a PPG and an IMU source, aligns their timestamps within a
//! measurement session and tracks sample loss. Chip protocols live behind
//! [`SensorSource`]; this module never touches a bus.

use crate::error::ComputeError;
use crate::types::{AcquisitionBatch, ImuSample, PpgSample, SynchronizedSample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// A non-blocking sample producer
pub trait SensorSource: Send {
    type Sample;

    fn name(&self) -> &str;

    fn start(&mut self) -> Result<(), ComputeError>;

    fn stop(&mut self) -> Result<(), ComputeError>;

    /// Return up to `max_count` pending samples; an empty vec means no data yet
    fn read(&mut self, max_count: usize) -> Result<Vec<Self::Sample>, ComputeError>;
}

/// Millisecond time source
pub trait Clock: Send {
    fn now_ms(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Clock advanced by hand; clones share the same time
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Sensor manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorManagerConfig {
    /// Align PPG and IMU timestamps on synchronized reads
    pub sync_enabled: bool,
    /// Upper bound on samples drained per source in one batch read
    pub max_batch: usize,
}

impl Default for SensorManagerConfig {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            max_batch: 32,
        }
    }
}

/// An active measurement session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Clock reading when the session started (ms)
    pub base_timestamp_ms: u64,
}

/// Acquisition counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorStats {
    pub ppg_samples: u64,
    pub imu_samples: u64,
    /// Samples missing according to sequence numbers
    pub ppg_lost: u64,
    pub imu_lost: u64,
    pub synchronized_reads: u64,
    /// Synchronized reads where the modality had no data
    pub ppg_misses: u64,
    pub imu_misses: u64,
    pub read_errors: u64,
}

/// Samples skipped between `last` and `seq`, updating `last`
fn track_sequence(last: &mut Option<u16>, seq: u16) -> u64 {
    let lost = match *last {
        Some(prev) => seq.wrapping_sub(prev.wrapping_add(1)) as u64,
        None => 0,
    };
    *last = Some(seq);
    lost
}

/// Owns both sources and the session state
pub struct SensorManager<P, I, C = SystemClock>
where
    P: SensorSource<Sample = PpgSample>,
    I: SensorSource<Sample = ImuSample>,
    C: Clock,
{
    ppg: P,
    imu: I,
    clock: C,
    config: SensorManagerConfig,
    session: Option<SessionInfo>,
    ppg_running: bool,
    imu_running: bool,
    last_ppg_seq: Option<u16>,
    last_imu_seq: Option<u16>,
    stats: SensorStats,
}

impl<P, I, C> SensorManager<P, I, C>
where
    P: SensorSource<Sample = PpgSample>,
    I: SensorSource<Sample = ImuSample>,
    C: Clock,
{
    pub fn new(ppg: P, imu: I, clock: C, config: SensorManagerConfig) -> Self {
        Self {
            ppg,
            imu,
            clock,
            config,
            session: None,
            ppg_running: false,
            imu_running: false,
            last_ppg_seq: None,
            last_imu_seq: None,
            stats: SensorStats::default(),
        }
    }

    pub fn config(&self) -> &SensorManagerConfig {
        &self.config
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    pub fn stats(&self) -> &SensorStats {
        &self.stats
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn ppg_source(&self) -> &P {
        &self.ppg
    }

    pub fn imu_source(&self) -> &I {
        &self.imu
    }

    /// Start both sources and open a session
    ///
    /// A session opens as long as one source starts; the other is reported
    /// as missing on every read.
    pub fn start_session(&mut self) -> Result<SessionInfo, ComputeError> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }
        self.ppg_running = match self.ppg.start() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("PPG source '{}' failed to start: {}", self.ppg.name(), e);
                false
            }
        };
        self.imu_running = match self.imu.start() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("IMU source '{}' failed to start: {}", self.imu.name(), e);
                false
            }
        };
        if !self.ppg_running && !self.imu_running {
            return Err(ComputeError::SensorUnavailable(
                "neither PPG nor IMU source started".to_string(),
            ));
        }

        let session = SessionInfo {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            base_timestamp_ms: self.clock.now_ms(),
        };
        log::info!(
            "session {} started (ppg: {}, imu: {})",
            session.id,
            self.ppg_running,
            self.imu_running
        );
        self.last_ppg_seq = None;
        self.last_imu_seq = None;
        self.stats = SensorStats::default();
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Stop both sources and close the session
    pub fn stop_session(&mut self) -> Result<(), ComputeError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let mut first_error = None;
        if self.ppg_running {
            if let Err(e) = self.ppg.stop() {
                first_error.get_or_insert(e);
            }
        }
        if self.imu_running {
            if let Err(e) = self.imu.stop() {
                first_error.get_or_insert(e);
            }
        }
        self.ppg_running = false;
        self.imu_running = false;
        log::info!("session {} stopped", session.id);
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn require_session(&self) -> Result<&SessionInfo, ComputeError> {
        self.session
            .as_ref()
            .ok_or_else(|| ComputeError::SensorUnavailable("no active session".to_string()))
    }

    fn read_ppg(&mut self, max_count: usize) -> Vec<PpgSample> {
        if !self.ppg_running {
            return Vec::new();
        }
        match self.ppg.read(max_count) {
            Ok(samples) => {
                for s in &samples {
                    self.stats.ppg_lost += track_sequence(&mut self.last_ppg_seq, s.sequence);
                }
                self.stats.ppg_samples += samples.len() as u64;
                samples
            }
            Err(e) => {
                log::debug!("PPG read failed: {}", e);
                self.stats.read_errors += 1;
                Vec::new()
            }
        }
    }

    fn read_imu(&mut self, max_count: usize) -> Vec<ImuSample> {
        if !self.imu_running {
            return Vec::new();
        }
        match self.imu.read(max_count) {
            Ok(samples) => {
                for s in &samples {
                    self.stats.imu_lost += track_sequence(&mut self.last_imu_seq, s.sequence);
                }
                self.stats.imu_samples += samples.len() as u64;
                samples
            }
            Err(e) => {
                log::debug!("IMU read failed: {}", e);
                self.stats.read_errors += 1;
                Vec::new()
            }
        }
    }

    /// Poll one sample from each source
    ///
    /// Each modality is `None` when its source had nothing. With sync enabled
    /// and both present, both timestamps are set to
    /// `base + (now - base)`, a constant-offset alignment against the
    /// session start. Returns `Ok(None)` when neither source had data.
    pub fn read_synchronized(&mut self) -> Result<Option<SynchronizedSample>, ComputeError> {
        let base = self.require_session()?.base_timestamp_ms;

        let mut ppg = self.read_ppg(1).into_iter().next();
        let mut imu = self.read_imu(1).into_iter().next();
        let now = self.clock.now_ms();
        self.stats.synchronized_reads += 1;
        if ppg.is_none() {
            self.stats.ppg_misses += 1;
        }
        if imu.is_none() {
            self.stats.imu_misses += 1;
        }

        if ppg.is_none() && imu.is_none() {
            return Ok(None);
        }

        if self.config.sync_enabled {
            if let (Some(p), Some(i)) = (ppg.as_mut(), imu.as_mut()) {
                let aligned = base + now.saturating_sub(base);
                p.timestamp_ms = aligned;
                i.timestamp_ms = aligned;
            }
        }

        Ok(Some(SynchronizedSample {
            timestamp_ms: now,
            ppg,
            imu,
        }))
    }

    /// Drain up to `max_batch` pending samples from each source
    pub fn read_batch(&mut self) -> Result<AcquisitionBatch, ComputeError> {
        self.require_session()?;
        let max = self.config.max_batch.max(1);
        Ok(AcquisitionBatch {
            ppg: self.read_ppg(max),
            imu: self.read_imu(max),
        })
    }
}
