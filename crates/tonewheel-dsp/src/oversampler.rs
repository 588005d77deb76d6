//! 2x polyphase IIR half-band oversampler for the overdrive waveshaper.
//!
//! Two parallel branches of first-order allpass sections (Regalia-Mitra
//! half-band decomposition). The overdrive runs its curve at twice the
//! sample rate so the odd harmonics it generates above Nyquist are rejected
//! before decimation.
//!
//! Works one base-rate sample at a time with fixed-size state, so it can sit
//! inside the per-fragment loop without scratch buffers.

/// Half-band allpass coefficients, three sections per branch.
const BRANCH_A_COEFFS: [f32; 3] = [0.036_681_503, 0.248_030_92, 0.643_184_6];
const BRANCH_B_COEFFS: [f32; 3] = [0.110_377_634, 0.420_399_3, 0.854_640_1];

/// First-order allpass section: y = (a + z^-1) / (1 + a*z^-1)
#[derive(Clone, Copy)]
struct AllpassSection {
    a: f32,
    state: f32,
}

impl AllpassSection {
    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let y = self.a * x + self.state;
        self.state = x - self.a * y;
        y
    }
}

#[derive(Clone, Copy)]
struct AllpassBranch {
    sections: [AllpassSection; 3],
}

impl AllpassBranch {
    fn new(coeffs: [f32; 3]) -> Self {
        Self {
            sections: coeffs.map(|a| AllpassSection { a, state: 0.0 }),
        }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        self.sections.iter_mut().fold(x, |y, s| s.process(y))
    }

    fn reset(&mut self) {
        for s in &mut self.sections {
            s.state = 0.0;
        }
    }
}

pub struct Oversampler {
    up_a: AllpassBranch,
    up_b: AllpassBranch,
    down_a: AllpassBranch,
    down_b: AllpassBranch,
    /// One-sample delay aligning branch B on the way down
    down_delay: f32,
}

impl Oversampler {
    pub fn new() -> Self {
        Self {
            up_a: AllpassBranch::new(BRANCH_A_COEFFS),
            up_b: AllpassBranch::new(BRANCH_B_COEFFS),
            down_a: AllpassBranch::new(BRANCH_A_COEFFS),
            down_b: AllpassBranch::new(BRANCH_B_COEFFS),
            down_delay: 0.0,
        }
    }

    /// One base-rate sample in, two oversampled samples out.
    #[inline]
    pub fn upsample(&mut self, x: f32) -> [f32; 2] {
        [self.up_a.process(x), self.up_b.process(x)]
    }

    /// Two oversampled samples in, one base-rate sample out.
    #[inline]
    pub fn downsample(&mut self, pair: [f32; 2]) -> f32 {
        let a = self.down_a.process(pair[0]);
        let b = self.down_b.process(pair[1]);
        let out = (a + self.down_delay) * 0.5;
        self.down_delay = b;
        out
    }

    pub fn reset(&mut self) {
        self.up_a.reset();
        self.up_b.reset();
        self.down_a.reset();
        self.down_b.reset();
        self.down_delay = 0.0;
    }
}

impl Default for Oversampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_passband_roundtrip() {
        let mut os = Oversampler::new();
        let sr = 48000.0;
        let n = 4096;
        let mut out_peak = 0.0f32;
        for i in 0..n {
            let x = (2.0 * PI * 1000.0 * i as f64 / sr).sin() as f32;
            let up = os.upsample(x);
            let y = os.downsample(up);
            if i > n * 3 / 4 {
                out_peak = out_peak.max(y.abs());
            }
        }
        let error_db = (20.0 * out_peak.log10()).abs();
        assert!(error_db < 0.5, "1 kHz roundtrip deviates {error_db:.2} dB");
    }

    #[test]
    fn test_stopband_rejection() {
        let mut os = Oversampler::new();
        let sr_2x = 96000.0;
        let n = 4096;
        let mut out_peak = 0.0f32;
        for i in 0..n {
            let t0 = (2 * i) as f64 / sr_2x;
            let t1 = (2 * i + 1) as f64 / sr_2x;
            let pair = [
                (2.0 * PI * 33000.0 * t0).sin() as f32,
                (2.0 * PI * 33000.0 * t1).sin() as f32,
            ];
            let y = os.downsample(pair);
            if i > n / 2 {
                out_peak = out_peak.max(y.abs());
            }
        }
        let atten_db = 20.0 * out_peak.log10();
        assert!(atten_db < -20.0, "33 kHz not rejected: {atten_db:.1} dB");
    }
}
