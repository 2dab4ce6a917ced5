//! Built-in stage algorithms
//!
//! Every algorithm works per channel on interleaved frames and is a pure
//! function of its input buffer and parameters.

use crate::signal::stage::{StageAlgorithm, StageOutput, TuningParam};
use crate::types::SignalBuffer;
use std::f64::consts::PI;

/// Smoothing factor of a one-pole low-pass with the given cutoff
fn ema_alpha(cutoff_hz: f64, sample_rate_hz: f64) -> f64 {
    let dt = 1.0 / sample_rate_hz;
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    (dt / (rc + dt)).clamp(0.0, 1.0)
}

fn channel_mean(input: &SignalBuffer, channel: usize) -> f64 {
    let n = input.len();
    if n == 0 {
        return 0.0;
    }
    input.channel(channel).sum::<f64>() / n as f64
}

fn channel_std(input: &SignalBuffer, channel: usize, mean: f64) -> f64 {
    let n = input.len();
    if n < 2 {
        return 0.0;
    }
    let var = input
        .channel(channel)
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    var.sqrt()
}

/// Apply `f` to every channel independently, writing into a buffer of the
/// same shape
fn map_channels<F>(input: &SignalBuffer, mut f: F) -> Vec<f64>
where
    F: FnMut(usize, &mut dyn Iterator<Item = f64>, &mut dyn FnMut(f64)),
{
    let channels = input.channels;
    let mut out = vec![0.0; input.samples.len()];
    for c in 0..channels {
        let mut source = input.channel(c);
        let mut frame = 0usize;
        let mut sink = |v: f64| {
            out[frame * channels + c] = v;
            frame += 1;
        };
        f(c, &mut source, &mut sink);
    }
    out
}

fn require_rate(input: &SignalBuffer) -> Result<(), String> {
    if input.sample_rate_hz > 0.0 && input.sample_rate_hz.is_finite() {
        Ok(())
    } else {
        Err(format!("invalid sample rate {}", input.sample_rate_hz))
    }
}

/// Scale raw ADC counts, apply gain/offset and repair non-finite samples
///
/// Params: `[scale, offset, adc_full_scale]`. A zero full scale leaves values
/// unscaled. Saturated and repaired samples lower quality.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalize;

impl StageAlgorithm for Normalize {
    fn id(&self) -> &'static str {
        "normalize"
    }

    fn defaults(&self) -> Vec<f64> {
        vec![1.0, 0.0, 0.0]
    }

    fn validate(&self, params: &[f64]) -> Result<(), String> {
        if params[0] == 0.0 {
            return Err("scale must be nonzero".to_string());
        }
        if params[2] < 0.0 {
            return Err("ADC full scale must not be negative".to_string());
        }
        Ok(())
    }

    fn process(&self, input: &SignalBuffer, params: &[f64]) -> Result<StageOutput, String> {
        let (scale, offset, full_scale) = (params[0], params[1], params[2]);
        let mut flagged = 0usize;
        let mut finite = 0usize;

        let samples = map_channels(input, |_, source, sink| {
            let mut last_good = 0.0;
            for v in source {
                let raw = if v.is_finite() {
                    finite += 1;
                    last_good = v;
                    if full_scale > 0.0 && v >= full_scale {
                        flagged += 1;
                    }
                    v
                } else {
                    flagged += 1;
                    last_good
                };
                let scaled = if full_scale > 0.0 { raw / full_scale } else { raw };
                sink(scaled * scale + offset);
            }
        });

        if finite == 0 {
            return Err("no finite samples".to_string());
        }
        let quality = input.quality * (1.0 - flagged as f64 / input.samples.len() as f64);
        Ok(StageOutput {
            buffer: input.with_samples(samples),
            quality,
        })
    }
}

/// DC blocker `y[n] = x[n] - x[n-1] + R·y[n-1]` followed by EMA smoothing
///
/// Params: `[pole R, smoothing alpha]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcRemoval;

impl StageAlgorithm for DcRemoval {
    fn id(&self) -> &'static str {
        "dc_removal"
    }

    fn defaults(&self) -> Vec<f64> {
        vec![0.98, 1.0]
    }

    fn validate(&self, params: &[f64]) -> Result<(), String> {
        if !(params[0] > 0.0 && params[0] < 1.0) {
            return Err("pole must be in (0, 1)".to_string());
        }
        if !(params[1] > 0.0 && params[1] <= 1.0) {
            return Err("smoothing must be in (0, 1]".to_string());
        }
        Ok(())
    }

    fn process(&self, input: &SignalBuffer, params: &[f64]) -> Result<StageOutput, String> {
        let (pole, smoothing) = (params[0], params[1]);
        let means: Vec<f64> = (0..input.channels).map(|c| channel_mean(input, c)).collect();

        let samples = map_channels(input, |c, source, sink| {
            let mut prev_x: Option<f64> = None;
            let mut y = 0.0;
            let mut smoothed = 0.0;
            for x in source {
                y = match prev_x {
                    Some(px) => x - px + pole * y,
                    None => x - means[c],
                };
                smoothed = if prev_x.is_none() {
                    y
                } else {
                    smoothing * y + (1.0 - smoothing) * smoothed
                };
                prev_x = Some(x);
                sink(smoothed);
            }
        });

        Ok(StageOutput {
            buffer: input.with_samples(samples),
            quality: input.quality,
        })
    }
}

/// Band-pass built from a fast and a slow EMA: `fast - slow`
///
/// Params: `[low_cut_hz, high_cut_hz]`. The slow tracker starts at the
/// channel mean so the first beats are not swamped by a start-up transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bandpass;

impl StageAlgorithm for Bandpass {
    fn id(&self) -> &'static str {
        "bandpass"
    }

    fn defaults(&self) -> Vec<f64> {
        vec![0.5, 4.0]
    }

    fn validate(&self, params: &[f64]) -> Result<(), String> {
        if !(params[0] > 0.0 && params[0] < params[1]) {
            return Err("band edges must satisfy 0 < low < high".to_string());
        }
        Ok(())
    }

    fn process(&self, input: &SignalBuffer, params: &[f64]) -> Result<StageOutput, String> {
        require_rate(input)?;
        let slow_alpha = ema_alpha(params[0], input.sample_rate_hz);
        let fast_alpha = ema_alpha(params[1], input.sample_rate_hz);
        let means: Vec<f64> = (0..input.channels).map(|c| channel_mean(input, c)).collect();

        let samples = map_channels(input, |c, source, sink| {
            let mut fast: Option<f64> = None;
            let mut slow = means[c];
            for x in source {
                let f = match fast {
                    Some(f) => f + fast_alpha * (x - f),
                    None => x,
                };
                fast = Some(f);
                slow += slow_alpha * (x - slow);
                sink(f - slow);
            }
        });

        Ok(StageOutput {
            buffer: input.with_samples(samples),
            quality: input.quality,
        })
    }
}

/// Replace samples further than `k` standard deviations from the channel mean
///
/// Params: `[k]`. Quality drops by the fraction of replaced samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionGate;

impl StageAlgorithm for MotionGate {
    fn id(&self) -> &'static str {
        "motion_gate"
    }

    fn defaults(&self) -> Vec<f64> {
        vec![3.0]
    }

    fn validate(&self, params: &[f64]) -> Result<(), String> {
        if params[0] <= 0.0 {
            return Err("threshold must be positive".to_string());
        }
        Ok(())
    }

    fn process(&self, input: &SignalBuffer, params: &[f64]) -> Result<StageOutput, String> {
        let k = params[0];
        let stats: Vec<(f64, f64)> = (0..input.channels)
            .map(|c| {
                let mean = channel_mean(input, c);
                (mean, channel_std(input, c, mean))
            })
            .collect();
        let mut flagged = 0usize;

        let samples = map_channels(input, |c, source, sink| {
            let (mean, std) = stats[c];
            let limit = k * std;
            let mut last_clean = mean;
            for v in source {
                if std > 0.0 && (v - mean).abs() > limit {
                    flagged += 1;
                    sink(last_clean);
                } else {
                    last_clean = v;
                    sink(v);
                }
            }
        });

        let quality = input.quality * (1.0 - flagged as f64 / input.samples.len() as f64);
        Ok(StageOutput {
            buffer: input.with_samples(samples),
            quality,
        })
    }

    fn tuning_param(&self) -> Option<TuningParam> {
        Some(TuningParam {
            index: 0,
            min: 1.5,
            max: 8.0,
            step: 0.5,
            raises_quality: true,
        })
    }
}

/// Rescale each channel to 0..1 between its minimum and maximum
///
/// Params: `[min_range]`. A channel flatter than `min_range` carries no
/// pulsatile component and fails the stage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Envelope;

impl StageAlgorithm for Envelope {
    fn id(&self) -> &'static str {
        "envelope"
    }

    fn defaults(&self) -> Vec<f64> {
        vec![1e-9]
    }

    fn validate(&self, params: &[f64]) -> Result<(), String> {
        if params[0] < 0.0 {
            return Err("min range must not be negative".to_string());
        }
        Ok(())
    }

    fn process(&self, input: &SignalBuffer, params: &[f64]) -> Result<StageOutput, String> {
        let min_range = params[0];
        let mut bounds = Vec::with_capacity(input.channels);
        for c in 0..input.channels {
            let (lo, hi) = input
                .channel(c)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            if hi - lo <= min_range {
                return Err(format!("flat signal on channel {}", c));
            }
            bounds.push((lo, hi - lo));
        }

        let samples = map_channels(input, |c, source, sink| {
            let (lo, range) = bounds[c];
            for v in source {
                sink((v - lo) / range);
            }
        });

        Ok(StageOutput {
            buffer: input.with_samples(samples),
            quality: input.quality,
        })
    }
}

/// Subtract a per-axis bias and apply a common scale
///
/// Params: `[bias_x, bias_y, bias_z, scale]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiasCorrection;

impl StageAlgorithm for BiasCorrection {
    fn id(&self) -> &'static str {
        "bias_correction"
    }

    fn defaults(&self) -> Vec<f64> {
        vec![0.0, 0.0, 0.0, 1.0]
    }

    fn validate(&self, params: &[f64]) -> Result<(), String> {
        if params[3] == 0.0 {
            return Err("scale must be nonzero".to_string());
        }
        Ok(())
    }

    fn process(&self, input: &SignalBuffer, params: &[f64]) -> Result<StageOutput, String> {
        let scale = params[3];
        let samples = map_channels(input, |c, source, sink| {
            let bias = if c < 3 { params[c] } else { 0.0 };
            for v in source {
                sink((v - bias) * scale);
            }
        });
        Ok(StageOutput {
            buffer: input.with_samples(samples),
            quality: input.quality,
        })
    }
}

/// One-pole low-pass per channel
///
/// Params: `[cutoff_hz]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lowpass;

impl StageAlgorithm for Lowpass {
    fn id(&self) -> &'static str {
        "lowpass"
    }

    fn defaults(&self) -> Vec<f64> {
        vec![20.0]
    }

    fn validate(&self, params: &[f64]) -> Result<(), String> {
        if params[0] <= 0.0 {
            return Err("cutoff must be positive".to_string());
        }
        Ok(())
    }

    fn process(&self, input: &SignalBuffer, params: &[f64]) -> Result<StageOutput, String> {
        require_rate(input)?;
        let alpha = ema_alpha(params[0], input.sample_rate_hz);
        let samples = map_channels(input, |_, source, sink| {
            let mut state: Option<f64> = None;
            for x in source {
                let y = match state {
                    Some(s) => s + alpha * (x - s),
                    None => x,
                };
                state = Some(y);
                sink(y);
            }
        });
        Ok(StageOutput {
            buffer: input.with_samples(samples),
            quality: input.quality,
        })
    }
}

/// Clamp samples to the sensor's measurement range
///
/// Params: `[max_abs]`. Quality drops by the fraction of clamped samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpikeClamp;

impl StageAlgorithm for SpikeClamp {
    fn id(&self) -> &'static str {
        "spike_clamp"
    }

    fn defaults(&self) -> Vec<f64> {
        // ±4 g
        vec![39.24]
    }

    fn validate(&self, params: &[f64]) -> Result<(), String> {
        if params[0] <= 0.0 {
            return Err("range must be positive".to_string());
        }
        Ok(())
    }

    fn process(&self, input: &SignalBuffer, params: &[f64]) -> Result<StageOutput, String> {
        let limit = params[0];
        let mut clamped = 0usize;
        let samples = input
            .samples
            .iter()
            .map(|&v| {
                if v.abs() > limit {
                    clamped += 1;
                }
                v.clamp(-limit, limit)
            })
            .collect();
        let quality = input.quality * (1.0 - clamped as f64 / input.samples.len() as f64);
        Ok(StageOutput {
            buffer: input.with_samples(samples),
            quality,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_hz: f64, rate: f64, n: usize, offset: f64) -> Vec<f64> {
        (0..n)
            .map(|i| offset + (2.0 * PI * freq_hz * i as f64 / rate).sin())
            .collect()
    }

    #[test]
    fn test_normalize_scales_and_repairs() {
        let input = SignalBuffer::mono(vec![1024.0, f64::NAN, 2048.0, 4096.0], 100.0, 0);
        let out = Normalize
            .process(&input, &[1.0, 0.0, 4096.0])
            .unwrap();
        assert_eq!(out.buffer.samples, vec![0.25, 0.25, 0.5, 1.0]);
        // one repaired, one saturated
        assert!((out.quality - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_all_nan_fails() {
        let input = SignalBuffer::mono(vec![f64::NAN; 4], 100.0, 0);
        assert!(Normalize.process(&input, &[1.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_bandpass_removes_offset() {
        let input = SignalBuffer::mono(sine(1.2, 100.0, 1000, 50.0), 100.0, 0);
        let out = Bandpass.process(&input, &[0.5, 4.0]).unwrap();
        let tail = &out.buffer.samples[500..];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        assert!(mean.abs() < 0.2, "mean {}", mean);
        let peak = tail.iter().cloned().fold(f64::MIN, f64::max);
        assert!(peak > 0.3);
    }

    #[test]
    fn test_dc_removal_centers_signal() {
        let input = SignalBuffer::mono(sine(1.0, 100.0, 1000, 10.0), 100.0, 0);
        let out = DcRemoval.process(&input, &[0.98, 1.0]).unwrap();
        let tail = &out.buffer.samples[500..];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        assert!(mean.abs() < 0.2, "mean {}", mean);
    }

    #[test]
    fn test_motion_gate_replaces_outliers() {
        let mut samples = sine(1.0, 50.0, 200, 0.0);
        samples[100] = 40.0;
        let input = SignalBuffer::mono(samples, 50.0, 0);
        let out = MotionGate.process(&input, &[3.0]).unwrap();
        assert_eq!(out.buffer.samples[100], out.buffer.samples[99]);
        assert!((out.quality - (1.0 - 1.0 / 200.0)).abs() < 1e-12);
    }

    #[test]
    fn test_envelope_rescales_and_rejects_flat() {
        let input = SignalBuffer::mono(vec![2.0, 4.0, 6.0], 50.0, 0);
        let out = Envelope.process(&input, &[1e-9]).unwrap();
        assert_eq!(out.buffer.samples, vec![0.0, 0.5, 1.0]);

        let flat = SignalBuffer::mono(vec![3.0; 10], 50.0, 0);
        assert!(Envelope.process(&flat, &[1e-9]).is_err());
    }

    #[test]
    fn test_bias_correction_per_axis() {
        let input = SignalBuffer::new(vec![1.0, 2.0, 10.0, 1.5, 2.5, 10.5], 3, 50.0, 0);
        let out = BiasCorrection
            .process(&input, &[0.5, 0.5, 0.5, 2.0])
            .unwrap();
        assert_eq!(out.buffer.samples, vec![1.0, 3.0, 19.0, 2.0, 4.0, 20.0]);
    }

    #[test]
    fn test_lowpass_keeps_channels_apart() {
        let input = SignalBuffer::new(vec![0.0, 10.0, 0.0, 10.0, 0.0, 10.0], 2, 50.0, 0);
        let out = Lowpass.process(&input, &[5.0]).unwrap();
        assert!(out.buffer.channel(0).all(|v| v == 0.0));
        assert!(out.buffer.channel(1).all(|v| (v - 10.0).abs() < 1e-12));
    }

    #[test]
    fn test_spike_clamp() {
        let input = SignalBuffer::mono(vec![1.0, 50.0, -60.0, 2.0], 50.0, 0);
        let out = SpikeClamp.process(&input, &[39.24]).unwrap();
        assert_eq!(out.buffer.samples, vec![1.0, 39.24, -39.24, 2.0]);
        assert!((out.quality - 0.5).abs() < 1e-12);
    }
}
