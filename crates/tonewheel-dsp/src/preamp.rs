//! Overdrive preamp: gain stage plus an asymmetric tube-style waveshaper.
//!
//! Signal flow in drive mode, per base-rate sample:
//!   x * gain -> 2x upsample -> shape -> 2x downsample -> DC block
//!
//! The shaping curve is a biased tanh normalised to unity small-signal
//! slope, so quiet passages pass at the same level as clean mode and only
//! peaks compress. The bias makes the curve asymmetric (even harmonics);
//! the DC it introduces is removed after decimation.
//!
//! Clean mode is a plain multiply: out = in * gain, bit for bit.

use crate::filters::DcBlocker;
use crate::oversampler::Oversampler;

/// Steepness of the shaping curve.
const DRIVE: f32 = 2.0;
/// Operating-point offset; sets the even-harmonic content.
const BIAS: f32 = 0.15;

/// Swappable saturation model.
pub trait PreampModel {
    fn process_sample(&mut self, input: f32) -> f32;
    fn reset(&mut self);
}

/// Biased-tanh tube overdrive, 2x oversampled.
pub struct TubeOverdrive {
    oversampler: Oversampler,
    dc_block: DcBlocker,
    tanh_bias: f32,
    /// 1 / (DRIVE * sech^2(BIAS)), the slope normaliser
    norm: f32,
}

impl TubeOverdrive {
    pub fn new(sample_rate: f64) -> Self {
        let tanh_bias = BIAS.tanh();
        let sech2 = 1.0 - tanh_bias * tanh_bias;
        Self {
            oversampler: Oversampler::new(),
            dc_block: DcBlocker::new(sample_rate),
            tanh_bias,
            norm: 1.0 / (DRIVE * sech2),
        }
    }

    /// Static transfer curve. shape(0) == 0 and shape'(0) == 1.
    #[inline]
    pub fn shape(&self, u: f32) -> f32 {
        ((DRIVE * u + BIAS).tanh() - self.tanh_bias) * self.norm
    }
}

impl PreampModel for TubeOverdrive {
    fn process_sample(&mut self, input: f32) -> f32 {
        let [a, b] = self.oversampler.upsample(input);
        let y = self.oversampler.downsample([self.shape(a), self.shape(b)]);
        self.dc_block.process(y)
    }

    fn reset(&mut self) {
        self.oversampler.reset();
        self.dc_block.reset();
    }
}

pub struct Preamp {
    model: Box<dyn PreampModel + Send>,
    gain: f32,
    clean: bool,
}

impl Preamp {
    pub fn new(sample_rate: f64) -> Self {
        Self::with_model(Box::new(TubeOverdrive::new(sample_rate)))
    }

    /// Preamp around any saturation model.
    pub fn with_model(model: Box<dyn PreampModel + Send>) -> Self {
        Self {
            model,
            gain: 1.0,
            clean: true,
        }
    }

    pub fn set_gain(&mut self, multiplier: f32) {
        self.gain = multiplier;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Clean mode skips the saturation model. Switching back to drive
    /// starts the model from rest.
    pub fn set_clean(&mut self, clean: bool) {
        if clean && !self.clean {
            self.model.reset();
        }
        self.clean = clean;
    }

    pub fn is_clean(&self) -> bool {
        self.clean
    }

    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let gain = self.gain;
        if self.clean {
            for (x, y) in input.iter().zip(output.iter_mut()) {
                *y = *x * gain;
            }
        } else {
            for (x, y) in input.iter().zip(output.iter_mut()) {
                *y = self.model.process_sample(*x * gain);
            }
        }
    }

    pub fn reset(&mut self) {
        self.model.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const SR: f64 = 48000.0;

    fn sine(freq: f64, amp: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * PI * freq * i as f64 / SR).sin() as f32)
            .collect()
    }

    fn dft_magnitude(signal: &[f32], freq: f64) -> f64 {
        let (mut re, mut im) = (0.0, 0.0);
        for (i, &s) in signal.iter().enumerate() {
            let w = 2.0 * PI * freq * i as f64 / SR;
            re += s as f64 * w.cos();
            im -= s as f64 * w.sin();
        }
        (re * re + im * im).sqrt() * 2.0 / signal.len() as f64
    }

    #[test]
    fn test_clean_is_exact_gain() {
        let mut pre = Preamp::new(SR);
        assert!(pre.is_clean(), "preamp should start clean");
        pre.set_gain(1.5);
        assert_eq!(pre.gain(), 1.5);
        let input = sine(440.0, 0.8, 512);
        let mut out = vec![0.0f32; 512];
        pre.process(&input, &mut out);
        for (x, y) in input.iter().zip(&out) {
            assert_eq!(*y, *x * 1.5);
        }
    }

    #[test]
    fn test_shape_unity_slope() {
        let od = TubeOverdrive::new(SR);
        assert_eq!(od.shape(0.0), 0.0);
        let slope = (od.shape(1e-3) - od.shape(-1e-3)) / 2e-3;
        assert!((slope - 1.0).abs() < 1e-3, "small-signal slope {slope}");
    }

    #[test]
    fn test_overdrive_small_signal_near_unity() {
        let mut pre = Preamp::new(SR);
        pre.set_clean(false);
        let n = 9600;
        let input = sine(1000.0, 0.01, n);
        let mut out = vec![0.0f32; n];
        pre.process(&input, &mut out);
        let mag = dft_magnitude(&out[n / 2..], 1000.0);
        let db = 20.0 * (mag / 0.01).log10();
        assert!(db.abs() < 1.0, "small-signal gain {db:.2} dB");
    }

    #[test]
    fn test_overdrive_adds_harmonics_and_compresses() {
        let mut pre = Preamp::new(SR);
        pre.set_clean(false);
        pre.set_gain(2.0);
        let n = 9600;
        let input = sine(500.0, 0.8, n);
        let mut out = vec![0.0f32; n];
        pre.process(&input, &mut out);
        let tail = &out[n / 2..];

        let peak = tail.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!(peak < 1.0, "overdrive did not compress: peak {peak}");

        let h1 = dft_magnitude(tail, 500.0);
        let h2 = dft_magnitude(tail, 1000.0);
        let h3 = dft_magnitude(tail, 1500.0);
        assert!(h2 / h1 > 0.01, "no even harmonic: H2/H1 = {:.4}", h2 / h1);
        assert!(h3 / h1 > 0.01, "no odd harmonic: H3/H1 = {:.4}", h3 / h1);

        let mean = tail.iter().sum::<f32>() / tail.len() as f32;
        assert!(mean.abs() < 0.01, "DC left after blocker: {mean}");
    }

    #[test]
    fn test_silence_stays_silent() {
        let mut pre = Preamp::new(SR);
        pre.set_clean(false);
        let input = [0.0f32; 256];
        let mut out = [1.0f32; 256];
        pre.process(&input, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
