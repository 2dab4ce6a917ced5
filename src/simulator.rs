//! Seeded signal and health simulators
//!
//! Deterministic stand-ins for the optical front end, the accelerometer and
//! a wearer's day-to-day physiology. Used by the CLI and by host tests.

use crate::error::ComputeError;
use crate::sensor::{Clock, SensorSource};
use crate::signal::PpgSensorModel;
use crate::types::{ImuSample, PpgSample, SleepRecord, VitalsRecord, PPG_MAX_CHANNELS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

const GRAVITY: f64 = 9.81;
const DAY_MS: i64 = 86_400_000;

/// Uniform noise in `[-amplitude, amplitude]`
fn noise(rng: &mut StdRng, amplitude: f64) -> f64 {
    let a = amplitude.abs();
    rng.gen_range(-a..=a)
}

fn timestamp_at(start_ms: u64, index: u64, sample_rate_hz: f64) -> u64 {
    start_ms + (index as f64 * 1000.0 / sample_rate_hz).round() as u64
}

/// Anything that produces samples at a fixed rate
pub trait SampleGenerator: Send {
    type Sample;

    fn name(&self) -> &str;

    fn sample_rate_hz(&self) -> f64;

    fn next_sample(&mut self) -> Self::Sample;

    fn generate(&mut self, count: usize) -> Vec<Self::Sample> {
        (0..count).map(|_| self.next_sample()).collect()
    }
}

// ============================================================================
// PPG
// ============================================================================

/// Synthetic PPG: cardiac pulse with a dicrotic component and harmonics,
/// respiratory modulation, sensor noise and motion artifacts
#[derive(Debug, Clone)]
pub struct PpgSimulator {
    rng: StdRng,
    model: PpgSensorModel,
    heart_rate_bpm: f64,
    breathing_rate_hz: f64,
    noise_level: f64,
    motion_level: f64,
    motion_freq_hz: f64,
    sleep_mode: bool,
    cardiac_phase: f64,
    breathing_phase: f64,
    start_ms: u64,
    index: u64,
    sequence: u16,
}

impl PpgSimulator {
    pub fn new(seed: u64, model: PpgSensorModel, heart_rate_bpm: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            model,
            heart_rate_bpm,
            breathing_rate_hz: 0.25,
            noise_level: 0.0,
            motion_level: 0.0,
            motion_freq_hz: 1.0,
            sleep_mode: false,
            cardiac_phase: 0.0,
            breathing_phase: 0.0,
            start_ms: 0,
            index: 0,
            sequence: 0,
        }
    }

    pub fn with_start_timestamp(mut self, start_ms: u64) -> Self {
        self.start_ms = start_ms;
        self
    }

    pub fn model(&self) -> PpgSensorModel {
        self.model
    }

    pub fn heart_rate(&self) -> f64 {
        self.heart_rate_bpm
    }

    pub fn set_heart_rate(&mut self, bpm: f64) {
        self.heart_rate_bpm = bpm.clamp(30.0, 220.0);
    }

    /// Sensor noise, 0..1
    pub fn set_noise_level(&mut self, level: f64) {
        self.noise_level = level.clamp(0.0, 1.0);
    }

    /// Wearer movement, 0..1; picks a new artifact frequency
    pub fn set_motion_level(&mut self, level: f64) {
        self.motion_level = level.clamp(0.0, 1.0);
        self.motion_freq_hz = self.rng.gen_range(0.5..=2.5);
    }

    /// Sleep lowers pulse amplitude and deepens breathing
    pub fn set_sleep_mode(&mut self, sleeping: bool) {
        self.sleep_mode = sleeping;
    }

    /// Next normalized sample in `[0, 1]`
    pub fn next_value(&mut self) -> f64 {
        let fs = self.model.sample_rate_hz();
        let t = self.index as f64 / fs;
        let phi = 2.0 * PI * self.cardiac_phase;

        let mut value = 0.7
            + 0.2 * phi.sin()
            + 0.05 * (phi + 0.3 * PI).sin()
            + 0.02 * (2.0 * phi).sin()
            + 0.01 * (3.0 * phi).sin();
        if self.sleep_mode {
            value *= 0.85;
        }

        let breathing_depth = if self.sleep_mode { 1.5 } else { 1.0 };
        value += 0.03 * breathing_depth * (2.0 * PI * self.breathing_phase).sin();

        if self.noise_level > 0.0 {
            value += noise(&mut self.rng, self.noise_level * 0.1);
        }

        if self.motion_level > 0.0 {
            value += 0.2 * self.motion_level * (2.0 * PI * self.motion_freq_hz * t).sin();
            if self.rng.gen_bool((0.01 * self.motion_level).clamp(0.0, 1.0)) {
                value += noise(&mut self.rng, 0.3);
            }
        }

        self.cardiac_phase = (self.cardiac_phase + self.heart_rate_bpm / 60.0 / fs).fract();
        self.breathing_phase = (self.breathing_phase + self.breathing_rate_hz / fs).fract();
        value.clamp(0.0, 1.0)
    }
}

impl SampleGenerator for PpgSimulator {
    type Sample = PpgSample;

    fn name(&self) -> &str {
        self.model.name()
    }

    fn sample_rate_hz(&self) -> f64 {
        self.model.sample_rate_hz()
    }

    /// Raw ADC counts on every active channel; channel 0 carries the pulse
    fn next_sample(&mut self) -> PpgSample {
        let value = self.next_value();
        let full_scale = self.model.adc_full_scale();
        let active = self.model.channels().min(PPG_MAX_CHANNELS);
        let mut channels = [0.0; PPG_MAX_CHANNELS];
        for (i, slot) in channels.iter_mut().take(active).enumerate() {
            *slot = (value * full_scale * (1.0 - 0.1 * i as f64)).round();
        }
        let sample = PpgSample {
            timestamp_ms: timestamp_at(self.start_ms, self.index, self.model.sample_rate_hz()),
            channels,
            active_channels: active as u8,
            quality: (100.0 - 60.0 * self.motion_level).round() as u8,
            sequence: self.sequence,
        };
        self.index += 1;
        self.sequence = self.sequence.wrapping_add(1);
        sample
    }
}

// ============================================================================
// IMU
// ============================================================================

/// Movement pattern for the IMU simulator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GaitPattern {
    #[default]
    Rest,
    Walk,
    Run,
}

impl GaitPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            GaitPattern::Rest => "rest",
            GaitPattern::Walk => "walk",
            GaitPattern::Run => "run",
        }
    }

    /// Stride frequency (Hz), 0 at rest
    pub fn step_frequency_hz(&self) -> f64 {
        match self {
            GaitPattern::Rest => 0.0,
            GaitPattern::Walk => 2.0,
            GaitPattern::Run => 3.0,
        }
    }
}

impl fmt::Display for GaitPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GaitPattern {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rest" | "still" => Ok(GaitPattern::Rest),
            "walk" | "walking" => Ok(GaitPattern::Walk),
            "run" | "running" => Ok(GaitPattern::Run),
            other => Err(ComputeError::config(format!("unknown gait pattern '{}'", other))),
        }
    }
}

/// Synthetic wrist IMU with heel-strike impacts on the vertical axis
#[derive(Debug, Clone)]
pub struct ImuSimulator {
    rng: StdRng,
    sample_rate_hz: f64,
    pattern: GaitPattern,
    start_ms: u64,
    index: u64,
    sequence: u16,
}

impl ImuSimulator {
    pub fn new(seed: u64, sample_rate_hz: f64, pattern: GaitPattern) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            sample_rate_hz,
            pattern,
            start_ms: 0,
            index: 0,
            sequence: 0,
        }
    }

    pub fn with_start_timestamp(mut self, start_ms: u64) -> Self {
        self.start_ms = start_ms;
        self
    }

    pub fn pattern(&self) -> GaitPattern {
        self.pattern
    }

    pub fn set_pattern(&mut self, pattern: GaitPattern) {
        self.pattern = pattern;
    }

    /// Acceleration and angular rate at the current index
    fn motion(&mut self) -> ([f64; 3], [f64; 3]) {
        let t = self.index as f64 / self.sample_rate_hz;
        let f = self.pattern.step_frequency_hz();
        let cycle = (t * f).fract();
        let s = (2.0 * PI * f * t).sin();
        let c = (2.0 * PI * f * t).cos();
        let rng = &mut self.rng;

        match self.pattern {
            GaitPattern::Rest => (
                [noise(rng, 0.01), noise(rng, 0.01), GRAVITY + noise(rng, 0.01)],
                [noise(rng, 0.01), noise(rng, 0.01), noise(rng, 0.01)],
            ),
            GaitPattern::Walk => {
                let impact = if cycle < 0.1 { 3.0 * (-50.0 * cycle).exp() } else { 0.0 };
                (
                    [
                        0.2 * s + noise(rng, 0.1),
                        0.1 * c + noise(rng, 0.05),
                        GRAVITY + impact + 0.3 * s + noise(rng, 0.1),
                    ],
                    [0.1 * s, noise(rng, 0.02), noise(rng, 0.02)],
                )
            }
            GaitPattern::Run => {
                let impact = if cycle < 0.08 { 6.0 * (-80.0 * cycle).exp() } else { 0.0 };
                (
                    [
                        0.5 * s + noise(rng, 0.2),
                        0.3 * c + noise(rng, 0.15),
                        GRAVITY + impact + 0.8 * s + noise(rng, 0.2),
                    ],
                    [0.3 * s, noise(rng, 0.05), noise(rng, 0.05)],
                )
            }
        }
    }
}

impl SampleGenerator for ImuSimulator {
    type Sample = ImuSample;

    fn name(&self) -> &str {
        "simulated-imu"
    }

    fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    fn next_sample(&mut self) -> ImuSample {
        let (accel, gyro) = self.motion();
        let sample = ImuSample {
            timestamp_ms: timestamp_at(self.start_ms, self.index, self.sample_rate_hz),
            accel,
            gyro,
            temperature_c: 31.0,
            sequence: self.sequence,
        };
        self.index += 1;
        self.sequence = self.sequence.wrapping_add(1);
        sample
    }
}

// ============================================================================
// Simulated sources
// ============================================================================

/// A generator exposed as a [`SensorSource`], releasing samples as the clock
/// advances
#[derive(Debug)]
pub struct SimulatedSource<G, C> {
    generator: G,
    clock: C,
    started_at_ms: Option<u64>,
    emitted: u64,
}

impl<G: SampleGenerator, C: Clock> SimulatedSource<G, C> {
    pub fn new(generator: G, clock: C) -> Self {
        Self {
            generator,
            clock,
            started_at_ms: None,
            emitted: 0,
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn generator_mut(&mut self) -> &mut G {
        &mut self.generator
    }

    /// Samples due but not yet read
    pub fn pending(&self) -> u64 {
        match self.started_at_ms {
            Some(start) => {
                let elapsed = self.clock.now_ms().saturating_sub(start) as f64;
                let due = (elapsed * self.generator.sample_rate_hz() / 1000.0).floor() as u64;
                due.saturating_sub(self.emitted)
            }
            None => 0,
        }
    }
}

impl<G: SampleGenerator, C: Clock> SensorSource for SimulatedSource<G, C> {
    type Sample = G::Sample;

    fn name(&self) -> &str {
        self.generator.name()
    }

    fn start(&mut self) -> Result<(), ComputeError> {
        if self.started_at_ms.is_none() {
            self.started_at_ms = Some(self.clock.now_ms());
            self.emitted = 0;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ComputeError> {
        self.started_at_ms = None;
        Ok(())
    }

    fn read(&mut self, max_count: usize) -> Result<Vec<G::Sample>, ComputeError> {
        if self.started_at_ms.is_none() {
            return Err(ComputeError::SensorUnavailable(format!(
                "{} is not started",
                self.generator.name()
            )));
        }
        let count = self.pending().min(max_count as u64) as usize;
        self.emitted += count as u64;
        Ok(self.generator.generate(count))
    }
}

// ============================================================================
// Health scenarios
// ============================================================================

/// Physiological trajectory of a simulated wearer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthScenario {
    #[default]
    Healthy,
    GettingSick,
    Sick,
    Recovering,
    Overtrained,
}

impl HealthScenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthScenario::Healthy => "healthy",
            HealthScenario::GettingSick => "getting_sick",
            HealthScenario::Sick => "sick",
            HealthScenario::Recovering => "recovering",
            HealthScenario::Overtrained => "overtrained",
        }
    }
}

impl fmt::Display for HealthScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthScenario {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "healthy" => Ok(HealthScenario::Healthy),
            "getting_sick" => Ok(HealthScenario::GettingSick),
            "sick" => Ok(HealthScenario::Sick),
            "recovering" => Ok(HealthScenario::Recovering),
            "overtrained" => Ok(HealthScenario::Overtrained),
            other => Err(ComputeError::config(format!("unknown scenario '{}'", other))),
        }
    }
}

/// Daily vitals and sleep for a scenario
///
/// `day` counts days into the scenario, starting at 0.
#[derive(Debug, Clone)]
pub struct HealthSimulator {
    rng: StdRng,
    hrv_ms: f64,
    resting_hr_bpm: f64,
    temperature_c: f64,
}

impl HealthSimulator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            hrv_ms: 50.0,
            resting_hr_bpm: 60.0,
            temperature_c: 36.5,
        }
    }

    /// Override the wearer's healthy HRV, resting HR and temperature
    pub fn with_baseline(mut self, hrv_ms: f64, resting_hr_bpm: f64, temperature_c: f64) -> Self {
        self.hrv_ms = hrv_ms;
        self.resting_hr_bpm = resting_hr_bpm;
        self.temperature_c = temperature_c;
        self
    }

    pub fn vitals(&mut self, scenario: HealthScenario, day: u32, timestamp_ms: i64) -> VitalsRecord {
        let d = day as f64;
        let (hrv, rhr, temp) = match scenario {
            HealthScenario::Healthy => (self.hrv_ms, self.resting_hr_bpm, self.temperature_c),
            HealthScenario::GettingSick => (
                self.hrv_ms - 5.0 * d,
                self.resting_hr_bpm + 2.0 * d,
                self.temperature_c + 0.1 * d,
            ),
            HealthScenario::Sick => (
                self.hrv_ms - 20.0,
                self.resting_hr_bpm + 15.0,
                self.temperature_c + 1.5,
            ),
            HealthScenario::Recovering => (35.0 + 3.0 * d, 70.0 - 2.0 * d, 37.0 - 0.1 * d),
            HealthScenario::Overtrained => (
                self.hrv_ms - 15.0,
                self.resting_hr_bpm + 8.0,
                self.temperature_c,
            ),
        };
        let rng = &mut self.rng;
        VitalsRecord {
            hrv_ms: (hrv + noise(rng, 2.5)).clamp(10.0, 100.0),
            resting_hr_bpm: rhr + noise(rng, 1.5),
            temperature_c: (temp + noise(rng, 0.1)).clamp(35.0, 40.0),
            respiratory_rate: 16.0 + noise(rng, 2.0),
            spo2_percentage: (98.0 + noise(rng, 1.0)).min(100.0),
            timestamp_ms,
        }
    }

    /// Sleep for the night before `day`, going to bed at `bedtime_ms`
    pub fn sleep(&self, scenario: HealthScenario, day: u32, bedtime_ms: i64) -> SleepRecord {
        let d = day as f64;
        let (total, deep, rem, light, awake, efficiency, wakes) = match scenario {
            HealthScenario::Healthy => (480.0, 96.0, 96.0, 240.0, 48.0, 90.0, 2),
            HealthScenario::GettingSick | HealthScenario::Sick => {
                (420.0, 42.0, 63.0, 252.0, 63.0, 75.0, 5)
            }
            HealthScenario::Recovering => (
                480.0,
                72.0 + 6.0 * d,
                72.0 + 6.0 * d,
                (280.0 - 10.0 * d).max(0.0),
                (56.0 - 2.0 * d).max(0.0),
                (80.0 + 2.0 * d).min(100.0),
                4u32.saturating_sub(day / 2),
            ),
            HealthScenario::Overtrained => (480.0, 48.0, 72.0, 288.0, 72.0, 70.0, 6),
        };
        SleepRecord {
            total_sleep_minutes: total,
            deep_sleep_minutes: deep,
            rem_sleep_minutes: rem,
            light_sleep_minutes: light,
            awake_minutes: awake,
            efficiency,
            wake_episodes: wakes,
            bedtime_ms,
            wake_time_ms: bedtime_ms + ((total + awake) * 60_000.0) as i64,
        }
    }

    /// Vitals and sleep for consecutive days, day 0 stamped at `start_ms`
    pub fn days(
        &mut self,
        scenario: HealthScenario,
        count: u32,
        start_ms: i64,
    ) -> Vec<(VitalsRecord, SleepRecord)> {
        (0..count)
            .map(|day| {
                let morning = start_ms + day as i64 * DAY_MS;
                let bedtime = morning - 9 * 3_600_000;
                (
                    self.vitals(scenario, day, morning),
                    self.sleep(scenario, day, bedtime),
                )
            })
            .collect()
    }
}
