//! Tonewheel oscillator bank.
//!
//! 91 sine generators (one per wheel) run continuously. Keys and drawbars
//! only decide how much of each wheel reaches the three summing buses:
//!
//!   vibrato bus    -> scanner -> +
//!   dry bus        ------------> + -> swell * trim -> out
//!   percussion bus -> envelope -> +
//!
//! Wheel gains are recomputed only when keys, registrations, routing or
//! percussion change, and move linearly from the previous fragment's value
//! to the new target across one fragment. Key events are latched at the
//! start of `generate_fragment`, never in the middle of one.

use std::f64::consts::TAU;

use crate::FRAGMENT_SIZE;
use crate::config::ScannerConfig;
use crate::scanner::{Scanner, VibratoMode};
use crate::state::{PercussionSettings, Registration};
use crate::tables::{
    DRAWBAR_1FT, DRAWBAR_2_2_3FT, DRAWBAR_4FT, KEY_SPACE, Manual, NUM_WHEELS, drawbar_gain,
    key_wheel, wheel_freq,
};

const SINE_BITS: u32 = 11;
const SINE_LEN: usize = 1 << SINE_BITS;
const PHASE_FRAC_BITS: u32 = 32 - SINE_BITS;
const PHASE_FRAC_SCALE: f32 = 1.0 / (1u32 << PHASE_FRAC_BITS) as f32;

/// Amplitude of one wheel tap at full drawbar.
const TAP_GAIN: f32 = 0.08;
const PERC_NORMAL: f32 = 1.0;
/// -6 dB
const PERC_SOFT: f32 = 0.501_187;
const PERC_FAST_SECONDS: f64 = 1.0;
const PERC_SLOW_SECONDS: f64 = 4.0;
/// Envelope level treated as fully decayed.
const PERC_FLOOR: f32 = 1e-6;

const BUS_VIBRATO: usize = 0;
const BUS_DRY: usize = 1;
const BUS_PERC: usize = 2;
const NUM_BUSES: usize = 3;

/// Bits of the upper-manual word that correspond to wired keys.
const UPPER_WIRED: u64 = (1 << 61) - 1;

/// 160-key bitset, one u64 word per manual.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct KeySet([u64; 3]);

impl KeySet {
    #[inline]
    fn insert(&mut self, key: u8) {
        self.0[(key >> 6) as usize] |= 1 << (key & 63);
    }

    #[inline]
    fn remove(&mut self, key: u8) {
        self.0[(key >> 6) as usize] &= !(1 << (key & 63));
    }

    fn contains(&self, key: u8) -> bool {
        self.0[(key >> 6) as usize] & (1 << (key & 63)) != 0
    }

    fn manual_bits(&self, manual: Manual) -> u64 {
        self.0[manual.index()]
    }

    fn len(&self) -> u32 {
        self.0.iter().map(|w| w.count_ones()).sum()
    }
}

/// Linear-interpolated lookup, top bits index the table.
#[inline]
fn sine_at(table: &[f32; SINE_LEN + 1], phase: u32) -> f32 {
    let idx = (phase >> PHASE_FRAC_BITS) as usize;
    let frac = (phase & ((1 << PHASE_FRAC_BITS) - 1)) as f32 * PHASE_FRAC_SCALE;
    let a = table[idx];
    a + (table[idx + 1] - a) * frac
}

pub struct ToneGenerator {
    sine: Box<[f32; SINE_LEN + 1]>,
    phases: [u32; NUM_WHEELS],
    increments: [u32; NUM_WHEELS],
    /// Per-bus wheel gains reached at the end of the last fragment
    current: [[f32; NUM_WHEELS]; NUM_BUSES],
    target: [[f32; NUM_WHEELS]; NUM_BUSES],
    targets_dirty: bool,

    pending_keys: KeySet,
    active_keys: KeySet,

    registrations: [Registration; 3],
    vibrato_upper: bool,
    vibrato_lower: bool,
    scanner: Scanner,

    percussion: PercussionSettings,
    perc_env: f32,
    perc_decay_fast: f32,
    perc_decay_slow: f32,

    swell: f32,
    swell_current: f32,
    output_trim: f32,

    buses: [[f32; FRAGMENT_SIZE]; NUM_BUSES],
    scanned: [f32; FRAGMENT_SIZE],
}

impl ToneGenerator {
    pub fn new(sample_rate: f64, scanner: &ScannerConfig, output_trim: f32) -> Self {
        let mut sine = Box::new([0.0f32; SINE_LEN + 1]);
        for (i, s) in sine.iter_mut().enumerate() {
            *s = (TAU * i as f64 / SINE_LEN as f64).sin() as f32;
        }

        let mut increments = [0u32; NUM_WHEELS];
        for (w, inc) in increments.iter_mut().enumerate() {
            *inc = (wheel_freq(w) / sample_rate * 4_294_967_296.0).round() as u32;
        }

        let decay = |seconds: f64| (0.001f64.ln() / (seconds * sample_rate)).exp() as f32;

        Self {
            sine,
            phases: [0; NUM_WHEELS],
            increments,
            current: [[0.0; NUM_WHEELS]; NUM_BUSES],
            target: [[0.0; NUM_WHEELS]; NUM_BUSES],
            targets_dirty: false,
            pending_keys: KeySet::default(),
            active_keys: KeySet::default(),
            registrations: [Registration::SILENT; 3],
            vibrato_upper: false,
            vibrato_lower: false,
            scanner: Scanner::new(scanner.frequency_hz, scanner.modulation_hz, sample_rate),
            percussion: PercussionSettings::default(),
            perc_env: 0.0,
            perc_decay_fast: decay(PERC_FAST_SECONDS),
            perc_decay_slow: decay(PERC_SLOW_SECONDS),
            swell: 1.0,
            swell_current: 1.0,
            output_trim,
            buses: [[0.0; FRAGMENT_SIZE]; NUM_BUSES],
            scanned: [0.0; FRAGMENT_SIZE],
        }
    }

    /// Press a key (index into the 160-key space). Out-of-range indices
    /// are ignored. Takes effect at the next fragment.
    pub fn key_on(&mut self, key: u8) {
        if (key as usize) < KEY_SPACE {
            self.pending_keys.insert(key);
        }
    }

    pub fn key_off(&mut self, key: u8) {
        if (key as usize) < KEY_SPACE {
            self.pending_keys.remove(key);
        }
    }

    pub fn all_keys_off(&mut self) {
        self.pending_keys = KeySet::default();
    }

    /// Whether `key` sounds in the current fragment.
    pub fn is_key_active(&self, key: u8) -> bool {
        (key as usize) < KEY_SPACE && self.active_keys.contains(key)
    }

    pub fn active_key_count(&self) -> u32 {
        self.active_keys.len()
    }

    pub fn set_registration(&mut self, manual: Manual, reg: Registration) {
        self.registrations[manual.index()] = reg;
        self.targets_dirty = true;
    }

    pub fn set_vibrato_mode(&mut self, mode: VibratoMode) {
        let was_enabled = self.scanner.is_enabled();
        self.scanner.set_mode(mode);
        if !was_enabled && self.scanner.is_enabled() {
            self.scanner.reset();
        }
        self.targets_dirty = true;
    }

    /// Route the upper and lower manuals through the scanner. The pedals
    /// are never routed.
    pub fn set_vibrato_routing(&mut self, upper: bool, lower: bool) {
        self.vibrato_upper = upper;
        self.vibrato_lower = lower;
        self.targets_dirty = true;
    }

    pub fn set_scan_frequency(&mut self, hz: f64) {
        self.scanner.set_scan_frequency(hz);
    }

    pub fn set_modulation_depth(&mut self, tier: usize, hz: f64) {
        self.scanner.set_modulation_depth(tier, hz);
    }

    pub fn set_percussion(&mut self, settings: PercussionSettings) {
        if !settings.enabled {
            self.perc_env = 0.0;
        }
        self.percussion = settings;
        self.targets_dirty = true;
    }

    /// Current percussion envelope level, 0..1.
    pub fn percussion_envelope(&self) -> f32 {
        self.perc_env
    }

    /// Expression level, ramped across the next fragment.
    pub fn set_swell(&mut self, gain: f32) {
        self.swell = gain;
    }

    fn routed(&self, manual: Manual) -> bool {
        match manual {
            Manual::Upper => self.vibrato_upper,
            Manual::Lower => self.vibrato_lower,
            Manual::Pedal => false,
        }
    }

    /// Copy pending keys into the active set; fire percussion on the first
    /// upper key after all upper keys were released.
    fn latch_keys(&mut self) {
        if self.pending_keys == self.active_keys {
            return;
        }
        let upper_was_held = self.active_keys.manual_bits(Manual::Upper) & UPPER_WIRED != 0;
        self.active_keys = self.pending_keys;
        let upper_held = self.active_keys.manual_bits(Manual::Upper) & UPPER_WIRED != 0;
        if self.percussion.enabled && upper_held && !upper_was_held {
            self.perc_env = 1.0;
        }
        self.targets_dirty = true;
    }

    fn update_targets(&mut self) {
        self.target = [[0.0; NUM_WHEELS]; NUM_BUSES];
        let scanner_on = self.scanner.is_enabled();
        let perc = self.percussion;
        let perc_drawbar = if perc.first {
            DRAWBAR_4FT
        } else {
            DRAWBAR_2_2_3FT
        };
        let perc_gain = (if perc.soft { PERC_SOFT } else { PERC_NORMAL }) * TAP_GAIN;

        for manual in Manual::ALL {
            let bus = if scanner_on && self.routed(manual) {
                BUS_VIBRATO
            } else {
                BUS_DRY
            };
            let mut levels = *self.registrations[manual.index()].levels();
            let with_perc = manual == Manual::Upper && perc.enabled;
            if with_perc {
                levels[DRAWBAR_1FT] = 0;
            }

            let mut bits = self.active_keys.manual_bits(manual);
            while bits != 0 {
                let key = bits.trailing_zeros() as u8;
                bits &= bits - 1;
                if key >= manual.key_count() {
                    continue;
                }
                for (drawbar, &level) in levels.iter().enumerate() {
                    if level > 0 {
                        self.target[bus][key_wheel(key, drawbar)] += drawbar_gain(level) * TAP_GAIN;
                    }
                }
                if with_perc {
                    self.target[BUS_PERC][key_wheel(key, perc_drawbar)] += perc_gain;
                }
            }
        }
    }

    /// Render one fragment of `out.len()` samples (at most `FRAGMENT_SIZE`).
    pub fn generate_fragment(&mut self, out: &mut [f32]) {
        let n = out.len().min(FRAGMENT_SIZE);
        if n == 0 {
            return;
        }
        self.latch_keys();
        if self.targets_dirty {
            self.update_targets();
            self.targets_dirty = false;
        }

        for bus in &mut self.buses {
            bus[..n].fill(0.0);
        }

        let inv_n = 1.0 / n as f32;
        let sine = &*self.sine;
        let [vib, dry, perc] = &mut self.buses;
        for w in 0..NUM_WHEELS {
            let inc = self.increments[w];
            let g0 = [
                self.current[BUS_VIBRATO][w],
                self.current[BUS_DRY][w],
                self.current[BUS_PERC][w],
            ];
            let g1 = [
                self.target[BUS_VIBRATO][w],
                self.target[BUS_DRY][w],
                self.target[BUS_PERC][w],
            ];
            if g0 == [0.0; 3] && g1 == [0.0; 3] {
                self.phases[w] = self.phases[w].wrapping_add(inc.wrapping_mul(n as u32));
                continue;
            }
            let d = [
                (g1[0] - g0[0]) * inv_n,
                (g1[1] - g0[1]) * inv_n,
                (g1[2] - g0[2]) * inv_n,
            ];
            let mut phase = self.phases[w];
            for i in 0..n {
                let s = sine_at(sine, phase);
                let t = i as f32;
                vib[i] += s * (g0[0] + d[0] * t);
                dry[i] += s * (g0[1] + d[1] * t);
                perc[i] += s * (g0[2] + d[2] * t);
                phase = phase.wrapping_add(inc);
            }
            self.phases[w] = phase;
        }
        self.current = self.target;

        if self.scanner.is_enabled() {
            self.scanner.process(&vib[..n], &mut self.scanned[..n]);
        } else {
            self.scanned[..n].copy_from_slice(&vib[..n]);
        }

        let decay = if self.percussion.fast {
            self.perc_decay_fast
        } else {
            self.perc_decay_slow
        };
        let swell_step = (self.swell - self.swell_current) * inv_n;
        let mut env = self.perc_env;
        for i in 0..n {
            let swell = self.swell_current + swell_step * i as f32;
            out[i] = (dry[i] + self.scanned[i] + perc[i] * env) * swell * self.output_trim;
            env *= decay;
        }
        self.perc_env = if env < PERC_FLOOR { 0.0 } else { env };
        self.swell_current = self.swell;
    }

    /// Silence all keys and clear scanner and envelope state. Wheel phases
    /// keep running.
    pub fn reset(&mut self) {
        self.pending_keys = KeySet::default();
        self.active_keys = KeySet::default();
        self.current = [[0.0; NUM_WHEELS]; NUM_BUSES];
        self.targets_dirty = true;
        self.perc_env = 0.0;
        self.swell_current = self.swell;
        self.scanner.reset();
    }
}
