//! Mono Schroeder/Freeverb-style reverb with one dry/wet control.
//!
//! Four damped feedback combs in parallel, then two allpass diffusers in
//! series. Delay lengths are the classic 44.1 kHz tunings scaled to the
//! running sample rate and allocated once at construction.
//!
//! out = (1 - wet) * in + wet * reverb(in), so wet = 0 returns the input
//! unchanged and wet = 1 returns only the reverberated signal.

const COMB_TUNINGS: [usize; 4] = [1116, 1188, 1277, 1356];
const ALLPASS_TUNINGS: [usize; 2] = [556, 441];

const COMB_FEEDBACK: f32 = 0.84;
const COMB_DAMPING: f32 = 0.2;
const ALLPASS_FEEDBACK: f32 = 0.5;
const INPUT_GAIN: f32 = 0.15;
const COMB_SUM_SCALE: f32 = 0.25;

struct Comb {
    buffer: Box<[f32]>,
    pos: usize,
    /// One-pole lowpass state in the feedback path
    store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)].into_boxed_slice(),
            pos: 0,
            store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let y = self.buffer[self.pos];
        self.store = y * (1.0 - COMB_DAMPING) + self.store * COMB_DAMPING;
        self.buffer[self.pos] = x + self.store * COMB_FEEDBACK;
        self.pos += 1;
        if self.pos == self.buffer.len() {
            self.pos = 0;
        }
        y
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
        self.store = 0.0;
    }
}

struct Allpass {
    buffer: Box<[f32]>,
    pos: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)].into_boxed_slice(),
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, x: f32) -> f32 {
        let b = self.buffer[self.pos];
        self.buffer[self.pos] = x + b * ALLPASS_FEEDBACK;
        self.pos += 1;
        if self.pos == self.buffer.len() {
            self.pos = 0;
        }
        b - x
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.pos = 0;
    }
}

pub struct Reverb {
    combs: [Comb; 4],
    allpasses: [Allpass; 2],
    wet: f32,
}

impl Reverb {
    pub fn new(sample_rate: f64) -> Self {
        let scale = sample_rate / 44100.0;
        let len = |tuning: usize| (tuning as f64 * scale).round() as usize;
        Self {
            combs: COMB_TUNINGS.map(|t| Comb::new(len(t))),
            allpasses: ALLPASS_TUNINGS.map(|t| Allpass::new(len(t))),
            wet: 0.0,
        }
    }

    /// Dry/wet balance, clamped to [0, 1].
    pub fn set_mix(&mut self, wet: f32) {
        self.wet = if wet.is_nan() { 0.0 } else { wet.clamp(0.0, 1.0) };
    }

    pub fn mix(&self) -> f32 {
        self.wet
    }

    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        let wet = self.wet;
        let dry = 1.0 - wet;
        for (x, y) in input.iter().zip(output.iter_mut()) {
            let x = *x;
            let feed = x * INPUT_GAIN;
            let comb_sum: f32 = self.combs.iter_mut().map(|c| c.process(feed)).sum();
            let mut rev = comb_sum * COMB_SUM_SCALE;
            for ap in &mut self.allpasses {
                rev = ap.process(rev);
            }
            *y = dry * x + wet * rev;
        }
    }

    pub fn reset(&mut self) {
        for c in &mut self.combs {
            c.clear();
        }
        for ap in &mut self.allpasses {
            ap.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f64 = 48000.0;

    fn impulse_response(wet: f32, n: usize) -> Vec<f32> {
        let mut rv = Reverb::new(SR);
        rv.set_mix(wet);
        let mut input = vec![0.0f32; n];
        input[0] = 1.0;
        let mut out = vec![0.0f32; n];
        rv.process(&input, &mut out);
        out
    }

    fn energy(s: &[f32]) -> f64 {
        s.iter().map(|&x| (x as f64) * (x as f64)).sum()
    }

    #[test]
    fn test_dry_is_bit_exact() {
        let mut rv = Reverb::new(SR);
        rv.set_mix(0.0);
        let input: Vec<f32> = (0..4096).map(|i| ((i * 37) % 101) as f32 / 50.0 - 1.0).collect();
        let mut out = vec![0.0f32; 4096];
        rv.process(&input, &mut out);
        assert_eq!(input, out);
    }

    #[test]
    fn test_full_wet_has_no_direct_path() {
        let out = impulse_response(1.0, 48000);
        let shortest_comb = (1116.0 * SR / 44100.0).round() as usize;
        // Nothing reaches the output before the shortest comb has cycled once.
        assert!(out[..shortest_comb].iter().all(|&s| s == 0.0));
        assert!(energy(&out[shortest_comb..]) > 1e-4, "no reverb tail");
    }

    #[test]
    fn test_tail_decays() {
        let out = impulse_response(1.0, 3 * 48000);
        let early = energy(&out[..48000]);
        let late = energy(&out[2 * 48000..]);
        assert!(late < early * 0.01, "tail not decaying: early {early:.3e}, late {late:.3e}");
    }

    #[test]
    fn test_mix_clamped() {
        let mut rv = Reverb::new(SR);
        rv.set_mix(1.7);
        assert_eq!(rv.mix(), 1.0);
        rv.set_mix(-0.3);
        assert_eq!(rv.mix(), 0.0);
        rv.set_mix(f32::NAN);
        assert_eq!(rv.mix(), 0.0);
    }

    #[test]
    fn test_reset_clears_tail() {
        let mut rv = Reverb::new(SR);
        rv.set_mix(1.0);
        let input = vec![0.5f32; 2048];
        let mut out = vec![0.0f32; 2048];
        rv.process(&input, &mut out);
        rv.reset();
        let silence = vec![0.0f32; 2048];
        rv.process(&silence, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
