//! Shared filter primitives for the organ signal chain.
//!
//! All filters: constructor from (freq, sample_rate), `process(sample) -> sample`,
//! `reset()`. Sample path is f32; coefficients are designed in f64.

use std::f64::consts::PI;

/// 1-pole high-pass filter: y[n] = alpha * (y[n-1] + x[n] - x[n-1])
pub struct OnePoleHpf {
    alpha: f32,
    prev_x: f32,
    prev_y: f32,
}

impl OnePoleHpf {
    pub fn new(cutoff_hz: f64, sample_rate: f64) -> Self {
        let rc = 1.0 / (2.0 * PI * cutoff_hz);
        let dt = 1.0 / sample_rate;
        Self {
            alpha: (rc / (rc + dt)) as f32,
            prev_x: 0.0,
            prev_y: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.alpha * (self.prev_y + x - self.prev_x);
        self.prev_x = x;
        self.prev_y = y;
        y
    }

    pub fn reset(&mut self) {
        self.prev_x = 0.0;
        self.prev_y = 0.0;
    }
}

/// DC blocker: 1-pole HPF at 10 Hz. Removes the offset the asymmetric
/// overdrive curve introduces.
pub struct DcBlocker {
    hpf: OnePoleHpf,
}

impl DcBlocker {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            hpf: OnePoleHpf::new(10.0, sample_rate),
        }
    }

    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        self.hpf.process(x)
    }

    pub fn reset(&mut self) {
        self.hpf.reset();
    }
}

/// Biquad filter, Direct Form II Transposed, Audio EQ Cookbook designs.
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    s1: f32,
    s2: f32,
}

impl Biquad {
    fn from_coeffs(b0: f64, b1: f64, b2: f64, a0: f64, a1: f64, a2: f64) -> Self {
        Self {
            b0: (b0 / a0) as f32,
            b1: (b1 / a0) as f32,
            b2: (b2 / a0) as f32,
            a1: (a1 / a0) as f32,
            a2: (a2 / a0) as f32,
            s1: 0.0,
            s2: 0.0,
        }
    }

    /// Low-pass filter.
    pub fn lowpass(cutoff_hz: f64, q: f64, sample_rate: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();

        let b1 = 1.0 - cos_w0;
        let b0 = b1 / 2.0;
        Self::from_coeffs(b0, b1, b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    /// High-pass filter.
    pub fn highpass(cutoff_hz: f64, q: f64, sample_rate: f64) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();

        let b1 = -(1.0 + cos_w0);
        let b0 = -b1 / 2.0;
        Self::from_coeffs(b0, b1, b0, 1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha)
    }

    /// Process one sample (Direct Form II Transposed).
    #[inline]
    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.s1;
        self.s1 = self.b1 * x - self.a1 * y + self.s2;
        self.s2 = self.b2 * x - self.a2 * y;
        y
    }

    pub fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }
}
