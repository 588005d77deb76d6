//! Rotary speaker cabinet: treble horn and bass drum rotors.
//!
//! Signal flow:
//!   input -> crossover -> HP -> horn rotor -> L/R
//!                      -> LP -> drum rotor -> L/R
//!
//! Each rotor writes its band into a short delay line and two microphones
//! (left at -90 degrees, right at +90) read it back at a delay that follows
//! the rotor's distance to the mic (Doppler), scaled by a directional gain
//! (tremolo). Both mics share the rotor angle, so the stereo image comes
//! from the phase offset between them.
//!
//! Rotor inertia: angular velocity moves toward the target speed once per
//! processed block, by at most `accel * n / sample_rate` (or `decel` when
//! slowing). A speed change therefore ramps over many fragments.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::config::WhirlConfig;
use crate::filters::Biquad;

const SPEED_OF_SOUND: f64 = 343.0;
const DELAY_LEN: usize = 1024;
const DELAY_MASK: usize = DELAY_LEN - 1;
/// Mic positions as fractions of a rotation.
const MIC_LEFT: f64 = -0.25;
const MIC_RIGHT: f64 = 0.25;
const HORN_AM_DEPTH: f64 = 0.6;
const DRUM_AM_DEPTH: f64 = 0.3;
const CROSSOVER_Q: f64 = 0.707;

/// Rotor speed switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RotarySpeed {
    #[default]
    Slow,
    Stop,
    Fast,
}

struct Rotor {
    /// Rotation angle in revolutions, [0, 1)
    angle: f64,
    /// Rotations per second
    velocity: f64,
    target: f64,
    slow_hz: f64,
    fast_hz: f64,
    accel: f64,
    decel: f64,
    /// Doppler excursion, samples
    depth: f64,
    am_depth: f64,
    delay: Box<[f32; DELAY_LEN]>,
    write_pos: usize,
}

impl Rotor {
    fn new(
        slow_hz: f64,
        fast_hz: f64,
        accel: f64,
        decel: f64,
        radius_m: f64,
        am_depth: f64,
        sample_rate: f64,
    ) -> Self {
        Self {
            angle: 0.0,
            velocity: slow_hz,
            target: slow_hz,
            slow_hz,
            fast_hz,
            accel,
            decel,
            depth: radius_m / SPEED_OF_SOUND * sample_rate,
            am_depth,
            delay: Box::new([0.0; DELAY_LEN]),
            write_pos: 0,
        }
    }

    fn set_speed(&mut self, speed: RotarySpeed) {
        self.target = match speed {
            RotarySpeed::Slow => self.slow_hz,
            RotarySpeed::Stop => 0.0,
            RotarySpeed::Fast => self.fast_hz,
        };
    }

    /// Largest velocity change one block of `n` samples may apply.
    fn max_step(&self, n: usize, sample_rate: f64) -> f64 {
        self.accel.max(self.decel) * n as f64 / sample_rate
    }

    fn ramp(&mut self, n: usize, sample_rate: f64) {
        let diff = self.target - self.velocity;
        let rate = if self.target > self.velocity {
            self.accel
        } else {
            self.decel
        };
        let step = rate * n as f64 / sample_rate;
        if diff.abs() <= step {
            self.velocity = self.target;
        } else {
            self.velocity += step.copysign(diff);
        }
    }

    /// Distance-driven delay (samples) and directional gain for a mic.
    #[inline]
    fn tap(&self, mic: f64) -> (f64, f32) {
        let c = (TAU * (self.angle - mic)).cos();
        // Facing the mic (c = 1) is the nearest point and the loudest.
        let delay = self.depth * (1.0 - c) + 2.0;
        let gain = 1.0 - self.am_depth * (0.5 - 0.5 * c);
        (delay, gain as f32)
    }

    #[inline]
    fn read(&self, delay: f64) -> f32 {
        let pos = self.write_pos as f64 + DELAY_LEN as f64 - delay;
        let i = pos.floor();
        let frac = (pos - i) as f32;
        let i = i as usize;
        let a = self.delay[i & DELAY_MASK];
        let b = self.delay[(i + 1) & DELAY_MASK];
        a + (b - a) * frac
    }

    /// Push one sample, return the (left, right) mic pickups.
    #[inline]
    fn process(&mut self, x: f32, sample_rate: f64) -> (f32, f32) {
        self.delay[self.write_pos] = x;
        let (dl, gl) = self.tap(MIC_LEFT);
        let (dr, gr) = self.tap(MIC_RIGHT);
        let out = (self.read(dl) * gl, self.read(dr) * gr);

        self.write_pos = (self.write_pos + 1) & DELAY_MASK;
        self.angle += self.velocity / sample_rate;
        if self.angle >= 1.0 {
            self.angle -= 1.0;
        }
        out
    }

    fn reset(&mut self) {
        self.delay.fill(0.0);
        self.write_pos = 0;
        self.angle = 0.0;
    }
}

pub struct Whirl {
    horn: Rotor,
    drum: Rotor,
    horn_hpf: Biquad,
    drum_lpf: Biquad,
    speed: RotarySpeed,
    sample_rate: f64,
}

impl Whirl {
    pub fn new(sample_rate: f64, cfg: &WhirlConfig) -> Self {
        Self {
            horn: Rotor::new(
                cfg.horn_slow_hz,
                cfg.horn_fast_hz,
                cfg.horn_accel,
                cfg.horn_decel,
                cfg.horn_radius_m,
                HORN_AM_DEPTH,
                sample_rate,
            ),
            drum: Rotor::new(
                cfg.drum_slow_hz,
                cfg.drum_fast_hz,
                cfg.drum_accel,
                cfg.drum_decel,
                cfg.drum_radius_m,
                DRUM_AM_DEPTH,
                sample_rate,
            ),
            horn_hpf: Biquad::highpass(cfg.crossover_hz, CROSSOVER_Q, sample_rate),
            drum_lpf: Biquad::lowpass(cfg.crossover_hz, CROSSOVER_Q, sample_rate),
            speed: RotarySpeed::Slow,
            sample_rate,
        }
    }

    /// Select a target speed. The rotors ramp toward it from the next
    /// processed block on.
    pub fn set_speed(&mut self, speed: RotarySpeed) {
        self.speed = speed;
        self.horn.set_speed(speed);
        self.drum.set_speed(speed);
    }

    pub fn speed(&self) -> RotarySpeed {
        self.speed
    }

    /// Horn angular velocity, rotations per second.
    pub fn horn_velocity(&self) -> f64 {
        self.horn.velocity
    }

    /// Drum angular velocity, rotations per second.
    pub fn drum_velocity(&self) -> f64 {
        self.drum.velocity
    }

    /// Per-block velocity change limits for (horn, drum) at block size `n`.
    pub fn max_velocity_step(&self, n: usize) -> (f64, f64) {
        (
            self.horn.max_step(n, self.sample_rate),
            self.drum.max_step(n, self.sample_rate),
        )
    }

    /// Process one block. `drum_l`/`drum_r` are scratch space for the drum
    /// pickups and must be at least as long as `input`; the block length
    /// is the shortest of all five slices.
    pub fn process(
        &mut self,
        input: &[f32],
        out_l: &mut [f32],
        out_r: &mut [f32],
        drum_l: &mut [f32],
        drum_r: &mut [f32],
    ) {
        let n = input
            .len()
            .min(out_l.len())
            .min(out_r.len())
            .min(drum_l.len())
            .min(drum_r.len());
        self.horn.ramp(n, self.sample_rate);
        self.drum.ramp(n, self.sample_rate);

        let sr = self.sample_rate;
        for i in 0..n {
            let x = input[i];
            (out_l[i], out_r[i]) = self.horn.process(self.horn_hpf.process(x), sr);
            (drum_l[i], drum_r[i]) = self.drum.process(self.drum_lpf.process(x), sr);
        }
        for i in 0..n {
            out_l[i] += drum_l[i];
            out_r[i] += drum_r[i];
        }
    }

    /// Clear delay lines and filters. Rotor speeds are kept.
    pub fn reset(&mut self) {
        self.horn.reset();
        self.drum.reset();
        self.horn_hpf.reset();
        self.drum_lpf.reset();
    }
}
