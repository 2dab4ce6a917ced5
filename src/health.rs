//! Illness and recovery inference
//!
//! Fuses baseline deviations, body temperature and sleep quality into an
//! illness probability, a recovery score and a health status.

use crate::baseline::{BaselineContext, BaselineTracker};
use crate::error::ComputeError;
use crate::types::{HealthAlert, HealthStatus, RecoveryState, SleepRecord, VitalsRecord};
use serde::{Deserialize, Serialize};

/// Inference thresholds and weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// HRV drop below baseline that counts as an illness factor (fraction)
    pub hrv_drop_threshold: f64,
    /// Resting HR rise above baseline that counts as an illness factor (fraction)
    pub rhr_rise_threshold: f64,
    pub fever_threshold_c: f64,
    pub poor_sleep_threshold: f64,
    /// Excess past each threshold at which a factor contributes fully
    pub hrv_full_scale: f64,
    pub rhr_full_scale: f64,
    pub fever_full_scale_c: f64,
    pub sleep_full_scale: f64,
    /// Recovery score before any factor is blended in
    pub baseline_score: f64,
    /// Points per unit of HRV deviation added to the HRV factor score
    pub hrv_score_gain: f64,
    /// Points per unit of resting HR deviation taken off the RHR factor score
    pub rhr_score_gain: f64,
    pub hrv_weight: f64,
    pub rhr_weight: f64,
    pub sleep_weight: f64,
    pub optimal_threshold: f64,
    pub adequate_threshold: f64,
    /// Score above which the trend is reported as improving
    pub trend_threshold: f64,
    /// Illness probability above which an `IllnessRisk` alert is raised
    pub illness_alert_threshold: f64,
    pub hrv_baseline_days: usize,
    pub rhr_baseline_days: usize,
    pub temp_baseline_days: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            hrv_drop_threshold: 0.30,
            rhr_rise_threshold: 0.15,
            fever_threshold_c: 37.5,
            poor_sleep_threshold: 70.0,
            hrv_full_scale: 0.30,
            rhr_full_scale: 0.15,
            fever_full_scale_c: 1.5,
            sleep_full_scale: 35.0,
            baseline_score: 85.0,
            hrv_score_gain: 100.0,
            rhr_score_gain: 200.0,
            hrv_weight: 0.4,
            rhr_weight: 0.3,
            sleep_weight: 0.3,
            optimal_threshold: 85.0,
            adequate_threshold: 70.0,
            trend_threshold: 75.0,
            illness_alert_threshold: 0.5,
            hrv_baseline_days: crate::baseline::HRV_BASELINE_DAYS,
            rhr_baseline_days: crate::baseline::RHR_BASELINE_DAYS,
            temp_baseline_days: crate::baseline::TEMP_BASELINE_DAYS,
        }
    }
}

impl HealthConfig {
    pub fn validate(&self) -> Result<(), ComputeError> {
        for (name, w) in [
            ("HRV weight", self.hrv_weight),
            ("RHR weight", self.rhr_weight),
            ("sleep weight", self.sleep_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(ComputeError::config(format!("{} must be within 0..1", name)));
            }
        }
        for (name, s) in [
            ("HRV full scale", self.hrv_full_scale),
            ("RHR full scale", self.rhr_full_scale),
            ("fever full scale", self.fever_full_scale_c),
            ("sleep full scale", self.sleep_full_scale),
        ] {
            if s <= 0.0 {
                return Err(ComputeError::config(format!("{} must be positive", name)));
            }
        }
        if self.hrv_score_gain < 0.0 || self.rhr_score_gain < 0.0 {
            return Err(ComputeError::config("recovery score gains must not be negative"));
        }
        if !(0.0..=1.0).contains(&self.illness_alert_threshold) {
            return Err(ComputeError::config("illness alert threshold must be within 0..1"));
        }
        if self.adequate_threshold > self.optimal_threshold {
            return Err(ComputeError::config(
                "adequate threshold must not exceed optimal threshold",
            ));
        }
        if self.hrv_baseline_days == 0 || self.rhr_baseline_days == 0 || self.temp_baseline_days == 0
        {
            return Err(ComputeError::config("baseline windows must be at least one day"));
        }
        Ok(())
    }
}

/// Sleep quality score (0-100)
///
/// 100 minus deductions for short or long sleep, low efficiency, little deep
/// or REM sleep, and frequent awakenings. 0 when no sleep was recorded.
pub fn sleep_score(sleep: &SleepRecord) -> f64 {
    let total = sleep.total_sleep_minutes;
    if total <= 0.0 {
        return 0.0;
    }
    let mut score = 100.0;

    let hours = total / 60.0;
    if hours < 6.0 {
        score -= (6.0 - hours) * 10.0;
    } else if hours > 10.0 {
        score -= (hours - 10.0) * 5.0;
    }

    if sleep.efficiency < 85.0 {
        score -= 85.0 - sleep.efficiency;
    }

    let deep_pct = sleep.deep_sleep_minutes / total * 100.0;
    if deep_pct < 15.0 {
        score -= (15.0 - deep_pct) * 2.0;
    }

    let rem_pct = sleep.rem_sleep_minutes / total * 100.0;
    if rem_pct < 20.0 {
        score -= (20.0 - rem_pct) * 1.5;
    }

    if sleep.wake_episodes > 3 {
        score -= (sleep.wake_episodes - 3) as f64 * 5.0;
    }

    score.clamp(0.0, 100.0)
}

fn check_sleep(sleep: &SleepRecord) -> Result<(), ComputeError> {
    let minutes = [
        sleep.total_sleep_minutes,
        sleep.deep_sleep_minutes,
        sleep.rem_sleep_minutes,
        sleep.light_sleep_minutes,
        sleep.awake_minutes,
    ];
    if minutes.iter().any(|m| !m.is_finite() || *m < 0.0) {
        return Err(ComputeError::InvalidSample(
            "sleep durations must be finite and non-negative".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&sleep.efficiency) {
        return Err(ComputeError::InvalidSample(format!(
            "sleep efficiency {} outside 0..100",
            sleep.efficiency
        )));
    }
    Ok(())
}

/// An active illness factor and its contribution (0.5-1)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IllnessFactor {
    pub alert: HealthAlert,
    pub contribution: f64,
}

fn contribution(excess: f64, full_scale: f64) -> f64 {
    (0.5 + 0.5 * excess / full_scale).min(1.0)
}

/// Factors past their thresholds, in fixed order HRV, RHR, fever, sleep
pub fn illness_factors(
    context: &BaselineContext,
    sleep_score: Option<f64>,
    config: &HealthConfig,
) -> Vec<IllnessFactor> {
    let mut factors = Vec::with_capacity(4);

    if let Some(dev) = context.hrv_deviation {
        if dev < -config.hrv_drop_threshold {
            factors.push(IllnessFactor {
                alert: HealthAlert::LowHrv,
                contribution: contribution(-dev - config.hrv_drop_threshold, config.hrv_full_scale),
            });
        }
    }
    if let Some(dev) = context.rhr_deviation {
        if dev > config.rhr_rise_threshold {
            factors.push(IllnessFactor {
                alert: HealthAlert::HighRestingHr,
                contribution: contribution(dev - config.rhr_rise_threshold, config.rhr_full_scale),
            });
        }
    }
    if let Some(temp) = context.temperature_c {
        if temp > config.fever_threshold_c {
            factors.push(IllnessFactor {
                alert: HealthAlert::Fever,
                contribution: contribution(
                    temp - config.fever_threshold_c,
                    config.fever_full_scale_c,
                ),
            });
        }
    }
    if let Some(score) = sleep_score {
        if score < config.poor_sleep_threshold {
            factors.push(IllnessFactor {
                alert: HealthAlert::PoorSleep,
                contribution: contribution(
                    config.poor_sleep_threshold - score,
                    config.sleep_full_scale,
                ),
            });
        }
    }
    factors
}

/// Mean of the active factor contributions, exactly 0 when none is active
pub fn illness_probability(factors: &[IllnessFactor]) -> f64 {
    if factors.is_empty() {
        return 0.0;
    }
    let mean = factors.iter().map(|f| f.contribution).sum::<f64>() / factors.len() as f64;
    mean.clamp(0.0, 1.0)
}

/// Recovery score (0-100)
///
/// Starts from the baseline score and blends in each available factor in
/// turn: `score = score·(1 - w) + factor·w`. Missing factors are skipped and
/// the remaining weights are not renormalised.
pub fn recovery_score(
    context: &BaselineContext,
    sleep_score: Option<f64>,
    config: &HealthConfig,
) -> f64 {
    let mut score = config.baseline_score;
    if let Some(dev) = context.hrv_deviation {
        let hrv_score = (config.baseline_score + config.hrv_score_gain * dev).clamp(0.0, 100.0);
        score = score * (1.0 - config.hrv_weight) + hrv_score * config.hrv_weight;
    }
    if let Some(dev) = context.rhr_deviation {
        let rhr_score = (config.baseline_score - config.rhr_score_gain * dev).clamp(0.0, 100.0);
        score = score * (1.0 - config.rhr_weight) + rhr_score * config.rhr_weight;
    }
    if let Some(sleep) = sleep_score {
        score = score * (1.0 - config.sleep_weight) + sleep.clamp(0.0, 100.0) * config.sleep_weight;
    }
    score.clamp(0.0, 100.0)
}

pub fn recovery_state(score: f64, config: &HealthConfig) -> RecoveryState {
    if score >= config.optimal_threshold {
        RecoveryState::Optimal
    } else if score >= config.adequate_threshold {
        RecoveryState::Adequate
    } else {
        RecoveryState::Compromised
    }
}

/// Health monitor owning the baselines and the latest status
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: HealthConfig,
    baselines: BaselineTracker,
    context: BaselineContext,
    last_vitals: Option<VitalsRecord>,
    last_sleep: Option<SleepRecord>,
    sleep_score: Option<f64>,
    status: HealthStatus,
    evaluations: u64,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self {
            config: HealthConfig::default(),
            baselines: BaselineTracker::default(),
            context: BaselineContext::default(),
            last_vitals: None,
            last_sleep: None,
            sleep_score: None,
            status: HealthStatus::default(),
            evaluations: 0,
        }
    }
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            baselines: BaselineTracker::new(
                config.hrv_baseline_days,
                config.rhr_baseline_days,
                config.temp_baseline_days,
            ),
            config,
            ..Self::default()
        })
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn baselines(&self) -> &BaselineTracker {
        &self.baselines
    }

    /// Context of the most recent vitals update
    pub fn context(&self) -> &BaselineContext {
        &self.context
    }

    pub fn last_vitals(&self) -> Option<&VitalsRecord> {
        self.last_vitals.as_ref()
    }

    pub fn last_sleep(&self) -> Option<&SleepRecord> {
        self.last_sleep.as_ref()
    }

    pub fn sleep_score(&self) -> Option<f64> {
        self.sleep_score
    }

    pub fn status(&self) -> &HealthStatus {
        &self.status
    }

    /// Fold in a vitals record and recompute the status
    pub fn update_vitals(&mut self, vitals: &VitalsRecord) -> HealthStatus {
        self.context = self.baselines.update_and_contextualize(vitals);
        self.last_vitals = Some(vitals.clone());
        self.evaluate()
    }

    /// Record a night of sleep and recompute the status
    pub fn update_sleep(&mut self, sleep: &SleepRecord) -> Result<HealthStatus, ComputeError> {
        check_sleep(sleep)?;
        self.sleep_score = Some(sleep_score(sleep));
        self.last_sleep = Some(sleep.clone());
        Ok(self.evaluate())
    }

    fn evaluate(&mut self) -> HealthStatus {
        let factors = illness_factors(&self.context, self.sleep_score, &self.config);
        let probability = illness_probability(&factors);
        let score = recovery_score(&self.context, self.sleep_score, &self.config);

        let mut alerts: Vec<HealthAlert> = Vec::new();
        if probability > self.config.illness_alert_threshold {
            alerts.push(HealthAlert::IllnessRisk);
        }
        alerts.extend(factors.iter().map(|f| f.alert));

        let score_change = (self.evaluations > 0).then(|| score - self.status.overall_score);
        let status = HealthStatus {
            overall_score: score,
            illness_probability: probability,
            recovery_state: recovery_state(score, &self.config),
            stress_level: ((1.0 - score / 100.0) * 100.0).clamp(0.0, 100.0),
            trend_improving: score > self.config.trend_threshold,
            score_change,
            sleep_score: self.sleep_score,
            hrv_deviation: self.context.hrv_deviation,
            rhr_deviation: self.context.rhr_deviation,
            alerts,
        };

        if status.recovery_state != self.status.recovery_state || self.evaluations == 0 {
            log::info!(
                "health status: {} (score {:.1}, illness {:.2})",
                status.recovery_state.as_str(),
                score,
                probability
            );
        }
        self.evaluations += 1;
        self.status = status.clone();
        status
    }

    pub fn reset(&mut self) {
        self.baselines.reset();
        self.context = BaselineContext::default();
        self.last_vitals = None;
        self.last_sleep = None;
        self.sleep_score = None;
        self.status = HealthStatus::default();
        self.evaluations = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn healthy_sleep() -> SleepRecord {
        SleepRecord {
            total_sleep_minutes: 480.0,
            deep_sleep_minutes: 96.0,
            rem_sleep_minutes: 96.0,
            light_sleep_minutes: 240.0,
            awake_minutes: 48.0,
            efficiency: 90.0,
            wake_episodes: 2,
            ..Default::default()
        }
    }

    fn poor_sleep() -> SleepRecord {
        SleepRecord {
            total_sleep_minutes: 420.0,
            deep_sleep_minutes: 42.0,
            rem_sleep_minutes: 63.0,
            light_sleep_minutes: 252.0,
            awake_minutes: 63.0,
            efficiency: 75.0,
            wake_episodes: 5,
            ..Default::default()
        }
    }

    fn context(hrv: Option<f64>, rhr: Option<f64>, temp: Option<f64>) -> BaselineContext {
        BaselineContext {
            hrv_deviation: hrv,
            rhr_deviation: rhr,
            temperature_c: temp,
            ..Default::default()
        }
    }

    #[test]
    fn test_sleep_score_reference_nights() {
        assert_eq!(sleep_score(&healthy_sleep()), 100.0);
        assert!((sleep_score(&poor_sleep()) - 62.5).abs() < 1e-9);
        assert_eq!(sleep_score(&SleepRecord::default()), 0.0);
    }

    #[test]
    fn test_sleep_score_window_and_monotonicity() {
        let mut previous = f64::INFINITY;
        for minutes in [360.0, 330.0, 300.0, 240.0, 120.0, 30.0] {
            let night = SleepRecord {
                total_sleep_minutes: minutes,
                deep_sleep_minutes: minutes * 0.2,
                rem_sleep_minutes: minutes * 0.2,
                efficiency: 90.0,
                ..Default::default()
            };
            let score = sleep_score(&night);
            assert!((0.0..=100.0).contains(&score));
            if minutes < 360.0 {
                assert!(score < previous, "{} min scored {}", minutes, score);
            }
            previous = score;
        }

        // worse efficiency never scores higher
        let mut previous = f64::INFINITY;
        for efficiency in [95.0, 85.0, 80.0, 60.0, 20.0] {
            let night = SleepRecord {
                efficiency,
                ..healthy_sleep()
            };
            let score = sleep_score(&night);
            assert!(score <= previous);
            previous = score;
        }

        let terrible = SleepRecord {
            total_sleep_minutes: 20.0,
            efficiency: 10.0,
            wake_episodes: 30,
            ..Default::default()
        };
        assert_eq!(sleep_score(&terrible), 0.0);
    }

    #[test]
    fn test_illness_zero_at_baseline() {
        let ctx = context(Some(0.0), Some(0.0), Some(36.6));
        let factors = illness_factors(&ctx, Some(100.0), &HealthConfig::default());
        assert!(factors.is_empty());
        assert_eq!(illness_probability(&factors), 0.0);
    }

    #[test]
    fn test_hrv_drop_alone_is_positive() {
        let ctx = context(Some(-0.4), None, None);
        let factors = illness_factors(&ctx, None, &HealthConfig::default());
        let p = illness_probability(&factors);
        assert!(p > 0.0 && p <= 1.0);
        assert_eq!(factors[0].alert, HealthAlert::LowHrv);
        assert!((p - (0.5 + 0.5 * 0.1 / 0.3)).abs() < 1e-9);
    }

    #[test]
    fn test_contributions_saturate() {
        let ctx = context(Some(-0.95), Some(1.0), Some(41.0));
        let factors = illness_factors(&ctx, Some(0.0), &HealthConfig::default());
        assert_eq!(factors.len(), 4);
        assert_eq!(illness_probability(&factors), 1.0);
    }

    #[test]
    fn test_recovery_blend_skips_missing_factors() {
        let config = HealthConfig::default();
        let empty = BaselineContext::default();
        assert_eq!(recovery_score(&empty, None, &config), 85.0);
        // only sleep: 85·0.7 + 100·0.3
        assert!((recovery_score(&empty, Some(100.0), &config) - 89.5).abs() < 1e-9);

        let sick = context(Some(-0.4), Some(0.25), None);
        let score = recovery_score(&sick, Some(62.5), &config);
        assert!((score - 59.91).abs() < 0.01);
        assert_eq!(recovery_state(score, &config), RecoveryState::Compromised);
    }

    #[test]
    fn test_recovery_state_boundaries() {
        let config = HealthConfig::default();
        assert_eq!(recovery_state(85.0, &config), RecoveryState::Optimal);
        assert_eq!(recovery_state(84.99, &config), RecoveryState::Adequate);
        assert_eq!(recovery_state(70.0, &config), RecoveryState::Adequate);
        assert_eq!(recovery_state(69.99, &config), RecoveryState::Compromised);
    }

    #[test]
    fn test_monitor_recomputes_on_sleep() {
        let mut monitor = HealthMonitor::default();
        let first = monitor.update_vitals(&VitalsRecord {
            hrv_ms: 50.0,
            resting_hr_bpm: 60.0,
            temperature_c: 36.5,
            ..Default::default()
        });
        assert_eq!(first.overall_score, 85.0);
        assert_eq!(first.score_change, None);

        let after_sleep = monitor.update_sleep(&poor_sleep()).unwrap();
        assert!((after_sleep.overall_score - (85.0 * 0.7 + 62.5 * 0.3)).abs() < 1e-9);
        assert!(after_sleep.score_change.unwrap() < 0.0);
        assert!(after_sleep.alerts.contains(&HealthAlert::PoorSleep));
        assert_eq!(monitor.sleep_score(), Some(62.5));
    }

    #[test]
    fn test_fever_alert_and_stress() {
        let mut monitor = HealthMonitor::default();
        let status = monitor.update_vitals(&VitalsRecord {
            temperature_c: 39.0,
            ..Default::default()
        });
        assert_eq!(status.alerts, vec![HealthAlert::IllnessRisk, HealthAlert::Fever]);
        assert!((status.illness_probability - 1.0).abs() < 1e-12);
        assert!((status.stress_level - 15.0).abs() < 1e-9);
        assert!(status.trend_improving);
    }

    #[test]
    fn test_invalid_sleep_rejected() {
        let mut monitor = HealthMonitor::default();
        let bad = SleepRecord {
            total_sleep_minutes: -5.0,
            ..Default::default()
        };
        assert!(matches!(
            monitor.update_sleep(&bad),
            Err(ComputeError::InvalidSample(_))
        ));
        assert_eq!(monitor.sleep_score(), None);
    }

    #[test]
    fn test_each_sleep_criterion_lowers_score() {
        let reference = sleep_score(&healthy_sleep());
        assert_eq!(reference, 100.0);

        let short = SleepRecord {
            total_sleep_minutes: 300.0,
            deep_sleep_minutes: 60.0,
            rem_sleep_minutes: 60.0,
            ..healthy_sleep()
        };
        let long = SleepRecord {
            total_sleep_minutes: 720.0,
            deep_sleep_minutes: 144.0,
            rem_sleep_minutes: 144.0,
            ..healthy_sleep()
        };
        let inefficient = SleepRecord {
            efficiency: 80.0,
            ..healthy_sleep()
        };
        let little_deep = SleepRecord {
            deep_sleep_minutes: 48.0,
            ..healthy_sleep()
        };
        let little_rem = SleepRecord {
            rem_sleep_minutes: 48.0,
            ..healthy_sleep()
        };
        let restless = SleepRecord {
            wake_episodes: 5,
            ..healthy_sleep()
        };

        for (label, night, expected) in [
            ("short", short, 90.0),
            ("long", long, 90.0),
            ("efficiency", inefficient, 95.0),
            ("deep", little_deep, 90.0),
            ("rem", little_rem, 85.0),
            ("wake episodes", restless, 90.0),
        ] {
            let score = sleep_score(&night);
            assert!(score < reference, "{} scored {}", label, score);
            assert!((score - expected).abs() < 1e-9, "{} scored {}", label, score);

            // pushing the same criterion further keeps lowering the score
            let worse = match label {
                "short" => SleepRecord {
                    total_sleep_minutes: 240.0,
                    deep_sleep_minutes: 48.0,
                    rem_sleep_minutes: 48.0,
                    ..night
                },
                "long" => SleepRecord {
                    total_sleep_minutes: 780.0,
                    deep_sleep_minutes: 156.0,
                    rem_sleep_minutes: 156.0,
                    ..night
                },
                "efficiency" => SleepRecord {
                    efficiency: 70.0,
                    ..night
                },
                "deep" => SleepRecord {
                    deep_sleep_minutes: 24.0,
                    ..night
                },
                "rem" => SleepRecord {
                    rem_sleep_minutes: 24.0,
                    ..night
                },
                _ => SleepRecord {
                    wake_episodes: 7,
                    ..night
                },
            };
            assert!(sleep_score(&worse) < score, "{} did not keep falling", label);
        }
    }

    #[test]
    fn test_missing_hrv_reading_is_not_illness() {
        let mut monitor = HealthMonitor::default();
        let healthy = VitalsRecord {
            hrv_ms: 50.0,
            resting_hr_bpm: 60.0,
            temperature_c: 36.5,
            ..Default::default()
        };
        for _ in 0..7 {
            monitor.update_vitals(&healthy);
        }
        let status = monitor.update_vitals(&VitalsRecord {
            hrv_ms: 0.0,
            ..healthy
        });
        assert_eq!(status.hrv_deviation, None);
        assert_eq!(status.illness_probability, 0.0);
        assert!(status.alerts.is_empty());
        assert_eq!(status.recovery_state, RecoveryState::Optimal);
    }

    #[test]
    fn test_recovery_gains_and_alert_threshold_are_configurable() {
        let config = HealthConfig {
            hrv_score_gain: 50.0,
            rhr_score_gain: 100.0,
            ..HealthConfig::default()
        };
        config.validate().unwrap();
        // HRV factor 85 - 20 = 65, RHR factor 85 - 25 = 60
        let sick = context(Some(-0.4), Some(0.25), None);
        let expected = (85.0 * 0.6 + 65.0 * 0.4) * 0.7 + 60.0 * 0.3;
        assert!((recovery_score(&sick, None, &config) - expected).abs() < 1e-9);

        let mut monitor = HealthMonitor::new(HealthConfig {
            illness_alert_threshold: 1.0,
            ..HealthConfig::default()
        })
        .unwrap();
        let status = monitor.update_vitals(&VitalsRecord {
            temperature_c: 39.0,
            ..Default::default()
        });
        assert_eq!(status.alerts, vec![HealthAlert::Fever]);

        let bad = HealthConfig {
            illness_alert_threshold: 1.5,
            ..HealthConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
