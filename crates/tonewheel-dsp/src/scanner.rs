//! Vibrato/chorus scanner: a time-varying delay line with fixed-point writes.
//!
//! Models the mechanical scanner (a capacitive pickup swept across a
//! line-box delay network by the generator motor). Instead of reading a
//! delay line at a varying tap, the scanner WRITES each input sample at a
//! varying distance ahead of a steadily advancing read cursor:
//!
//!   j = (out_pos << 16) + offset_table[stator >> 16]     (16.16 fixed point)
//!   h = j >> 16,  f = (j & 0xFFFF) / 65536
//!   buf[h]   += x * (1 - f)
//!   buf[h+1] += x * f
//!   y = buf[out_pos]           (chorus: (x + buf[out_pos]) / sqrt(2))
//!   buf[out_pos] = 0
//!
//! The linear-interpolated write spreads one input sample over two adjacent
//! cells. Shrinking offsets compress energy into fewer output samples (pitch
//! up); growing offsets stretch it (pitch down). The read clears its cell, so
//! nothing recirculates.
//!
//! Offsets must stay below 2.0 cells of change per sample or writes skip
//! cells; the 0-12 Hz modulation window keeps them far inside that.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Entries per offset table (one full scanner revolution).
pub const OFFSET_TABLE_SIZE: usize = 2048;
/// Delay cells.
pub const BUFFER_SIZE: usize = 1024;

const FIXED_ONE: f64 = 65536.0;
const BUFFER_MASK: u32 = (BUFFER_SIZE - 1) as u32;
/// Fixed-point write-position space: BUFFER_SIZE cells in 16.16.
const POSITION_MASK: u32 = ((BUFFER_SIZE as u32) << 16) - 1;
/// Fixed-point stator space: OFFSET_TABLE_SIZE entries in 16.16.
const STATOR_MASK: u32 = ((OFFSET_TABLE_SIZE as u32) << 16) - 1;
/// Equal-power dry/wet weight for chorus.
const CHORUS_MIX: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Scanner frequency window accepted from configuration.
pub const SCAN_HZ_RANGE: (f64, f64) = (4.0, 22.0);
/// Modulation depth window accepted from configuration.
pub const DEPTH_HZ_RANGE: (f64, f64) = (0.0, 12.0);

/// Vibrato/chorus knob position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VibratoMode {
    #[default]
    Off,
    V1,
    V2,
    V3,
    C1,
    C2,
    C3,
}

impl VibratoMode {
    /// Offset-table tier (0..3) or `None` when the scanner is off.
    pub fn tier(self) -> Option<usize> {
        match self {
            VibratoMode::Off => None,
            VibratoMode::V1 | VibratoMode::C1 => Some(0),
            VibratoMode::V2 | VibratoMode::C2 => Some(1),
            VibratoMode::V3 | VibratoMode::C3 => Some(2),
        }
    }

    /// Whether the dry signal is mixed back in.
    pub fn is_chorus(self) -> bool {
        matches!(self, VibratoMode::C1 | VibratoMode::C2 | VibratoMode::C3)
    }
}

/// Increment of the 16.16 stator accumulator for a scan frequency.
pub fn stator_increment(scan_hz: f64, sample_rate: f64) -> u32 {
    (scan_hz * OFFSET_TABLE_SIZE as f64 / sample_rate * FIXED_ONE).round() as u32
}

pub struct Scanner {
    offset_tables: [Box<[u32; OFFSET_TABLE_SIZE]>; 3],
    depth_hz: [f64; 3],
    buffer: Box<[f32; BUFFER_SIZE]>,
    /// Tier selected by the current mode (meaningless while `enabled` is false)
    tier: usize,
    enabled: bool,
    chorus: bool,
    stator: u32,
    stator_increment: u32,
    out_pos: u32,
    scan_hz: f64,
    sample_rate: f64,
}

impl Scanner {
    /// Create a scanner with the given scan frequency and per-tier
    /// modulation depths (Hz). Values are taken as given; range checks
    /// belong to the configuration layer.
    pub fn new(scan_hz: f64, depth_hz: [f64; 3], sample_rate: f64) -> Self {
        let mut s = Self {
            offset_tables: [
                Box::new([0; OFFSET_TABLE_SIZE]),
                Box::new([0; OFFSET_TABLE_SIZE]),
                Box::new([0; OFFSET_TABLE_SIZE]),
            ],
            depth_hz,
            buffer: Box::new([0.0; BUFFER_SIZE]),
            tier: 0,
            enabled: false,
            chorus: false,
            stator: 0,
            stator_increment: 0,
            out_pos: BUFFER_MASK / 2,
            scan_hz,
            sample_rate,
        };
        s.set_scan_frequency(scan_hz);
        for tier in 0..3 {
            s.fill_offset_table(tier);
        }
        s
    }

    /// Set the scanner rotation frequency in Hz.
    pub fn set_scan_frequency(&mut self, hz: f64) {
        self.scan_hz = hz;
        self.stator_increment = stator_increment(hz, self.sample_rate);
    }

    /// Set the modulation depth for one tier (0..3) and rebuild its table.
    /// Out-of-range tiers are ignored.
    pub fn set_modulation_depth(&mut self, tier: usize, hz: f64) {
        if tier < 3 {
            self.depth_hz[tier] = hz;
            self.fill_offset_table(tier);
        }
    }

    /// The delay offset runs ahead of the reader by `1 + depth` cells on
    /// average and swings `depth` cells either way.
    fn fill_offset_table(&mut self, tier: usize) {
        let depth = self.depth_hz[tier];
        for (i, entry) in self.offset_tables[tier].iter_mut().enumerate() {
            let m = (2.0 * PI * i as f64 / OFFSET_TABLE_SIZE as f64).sin();
            *entry = ((1.0 + depth + m * depth) * FIXED_ONE) as u32;
        }
    }

    pub fn set_mode(&mut self, mode: VibratoMode) {
        match mode.tier() {
            Some(tier) => {
                self.tier = tier;
                self.enabled = true;
            }
            None => self.enabled = false,
        }
        self.chorus = mode.is_chorus();
    }

    /// Whether a tier is selected. The oscillator bank bypasses the scanner
    /// entirely while this is false.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stator_increment(&self) -> u32 {
        self.stator_increment
    }

    pub fn scan_frequency(&self) -> f64 {
        self.scan_hz
    }

    pub fn offset_table(&self, tier: usize) -> &[u32; OFFSET_TABLE_SIZE] {
        &self.offset_tables[tier]
    }

    /// Current delay cells, for inspection.
    pub fn delay_cells(&self) -> &[f32; BUFFER_SIZE] {
        &self.buffer
    }

    pub fn read_position(&self) -> usize {
        self.out_pos as usize
    }

    /// Run the scanner over `input`, writing the same number of samples to
    /// `output`. Runs the selected tier even if the mode is off; callers
    /// decide whether to route through it.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        const FNORM: f32 = 1.0 / 65536.0;
        let table = &self.offset_tables[self.tier];
        let buf = &mut self.buffer;

        for (x, y) in input.iter().zip(output.iter_mut()) {
            let x = *x;
            let j = (self.out_pos << 16).wrapping_add(table[(self.stator >> 16) as usize])
                & POSITION_MASK;
            let h = (j >> 16) as usize;
            let k = (h + 1) & BUFFER_MASK as usize;
            let f = FNORM * (j & 0xFFFF) as f32;
            let g = f * x;

            buf[h] += x - g;
            buf[k] += g;

            let read = self.out_pos as usize;
            *y = if self.chorus {
                (x + buf[read]) * CHORUS_MIX
            } else {
                buf[read]
            };
            buf[read] = 0.0;

            self.out_pos = (self.out_pos + 1) & BUFFER_MASK;
            self.stator = self.stator.wrapping_add(self.stator_increment) & STATOR_MASK;
        }
    }

    /// Clear the delay line and rewind both cursors.
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.stator = 0;
        self.out_pos = BUFFER_MASK / 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SR: f64 = 48000.0;

    fn scanner_v1() -> Scanner {
        let mut s = Scanner::new(7.25, [3.0, 6.0, 9.0], SR);
        s.set_mode(VibratoMode::V1);
        s
    }

    #[test]
    fn test_stator_increment_value() {
        // 7.25 * 2048 / 48000 * 65536 = 20272.47
        assert_eq!(stator_increment(7.25, SR), 20272);
    }

    proptest! {
        #[test]
        fn stator_increment_monotonic(a in 4.0f64..22.0, b in 4.0f64..22.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(stator_increment(lo, SR) <= stator_increment(hi, SR));
        }
    }

    #[test]
    fn test_stator_increment_strictly_increasing_on_grid() {
        let mut prev = 0;
        for step in 0..=36 {
            let hz = 4.0 + 0.5 * step as f64;
            let inc = stator_increment(hz, SR);
            assert!(inc > prev, "{hz} Hz: {inc} <= {prev}");
            prev = inc;
        }
    }

    #[test]
    fn test_offset_table_shape() {
        let s = scanner_v1();
        let t = s.offset_table(0);
        // (1 + 3 + 3 sin) cells: 4.0 at index 0, 7.0 at a quarter turn, 1.0 at three quarters.
        assert_eq!(t[0], 4 << 16);
        assert_eq!(t[OFFSET_TABLE_SIZE / 4], 7 << 16);
        let low = t[3 * OFFSET_TABLE_SIZE / 4];
        assert!(low.abs_diff(1 << 16) <= 1, "trough {low:#x}");
    }

    #[test]
    fn test_constant_input_scenario() {
        let mut s = scanner_v1();
        assert_eq!(s.read_position(), BUFFER_SIZE / 2 - 1);

        let input = vec![1.0f32; 4096];
        let mut output = vec![0.0f32; 4096];
        s.process(&input, &mut output);

        // Writes land 4 cells ahead of the reader at stator 0.
        assert!(output[..4].iter().all(|&y| y == 0.0), "{:?}", &output[..8]);
        assert!(output[4] > 0.99, "first delayed sample {}", output[4]);
        for (i, &y) in output.iter().enumerate() {
            assert!((-1.05..=1.05).contains(&y), "sample {i} out of bounds: {y}");
        }
        let tail_mean = output[1024..].iter().sum::<f32>() / (4096 - 1024) as f32;
        assert!((tail_mean - 1.0).abs() < 0.01, "steady level {tail_mean}");
    }

    #[test]
    fn test_buffer_drains_after_silence() {
        let mut s = scanner_v1();
        let noise: Vec<f32> = (0..3000).map(|i| ((i * 7919) % 200) as f32 / 100.0 - 1.0).collect();
        let mut out = vec![0.0f32; 3000];
        s.process(&noise, &mut out);
        assert!(s.delay_cells().iter().any(|&c| c != 0.0));

        let silence = vec![0.0f32; BUFFER_SIZE];
        let mut out = vec![0.0f32; BUFFER_SIZE];
        s.process(&silence, &mut out);
        assert!(
            s.delay_cells().iter().all(|&c| c == 0.0),
            "delay line not drained after one buffer of silence"
        );
    }

    #[test]
    fn test_read_cell_is_cleared() {
        let mut s = scanner_v1();
        let input = [0.5f32; 16];
        let mut out = [0.0f32; 16];
        s.process(&input, &mut out);
        // The last cell read sits just behind the cursor.
        let last_read = (s.read_position() + BUFFER_SIZE - 1) % BUFFER_SIZE;
        assert_eq!(s.delay_cells()[last_read], 0.0);
    }

    #[test]
    fn test_chorus_mixes_dry() {
        let mut s = Scanner::new(7.25, [3.0, 6.0, 9.0], SR);
        s.set_mode(VibratoMode::C1);
        let input = [1.0f32; 8];
        let mut out = [0.0f32; 8];
        s.process(&input, &mut out);
        // Before any delayed sample reaches the reader, output is dry / sqrt(2).
        assert!((out[0] - CHORUS_MIX).abs() < 1e-7);
        // Once the wet path arrives: (1 + 1) / sqrt(2).
        assert!((out[5] - 2.0 * CHORUS_MIX).abs() < 0.02, "{}", out[5]);
    }

    #[test]
    fn test_vibrato_shifts_pitch_both_ways() {
        // Measure instantaneous period of a 1 kHz tone across a scanner cycle:
        // it must both shorten and lengthen relative to the dry period.
        let mut s = Scanner::new(7.25, [3.0, 6.0, 12.0], SR);
        s.set_mode(VibratoMode::V3);
        let n = 48000;
        let input: Vec<f32> = (0..n)
            .map(|i| (2.0 * PI * 1000.0 * i as f64 / SR).sin() as f32)
            .collect();
        let mut out = vec![0.0f32; n];
        s.process(&input, &mut out);

        let mut crossings = Vec::new();
        for i in 2048..n {
            if out[i - 1] < 0.0 && out[i] >= 0.0 {
                let frac = out[i - 1] / (out[i - 1] - out[i]);
                crossings.push(i as f64 - 1.0 + frac as f64);
            }
        }
        let periods: Vec<f64> = crossings.windows(2).map(|w| w[1] - w[0]).collect();
        let min = periods.iter().cloned().fold(f64::MAX, f64::min);
        let max = periods.iter().cloned().fold(0.0, f64::max);
        assert!(min < 47.9 && max > 48.1, "period range {min:.3}..{max:.3} samples");
    }

    #[test]
    fn test_scan_frequency_change() {
        let mut s = scanner_v1();
        assert_eq!(s.scan_frequency(), 7.25);
        s.set_scan_frequency(14.5);
        assert_eq!(s.scan_frequency(), 14.5);
        assert_eq!(s.stator_increment(), stator_increment(14.5, SR));
        // Twice the rate, twice the step (within rounding).
        assert!(s.stator_increment().abs_diff(2 * 20272) <= 1);
    }

    #[test]
    fn test_depth_change_rebuilds_only_that_tier() {
        let mut s = scanner_v1();
        let before = *s.offset_table(1);
        s.set_modulation_depth(0, 0.0);
        assert!(s.offset_table(0).iter().all(|&o| o == 1 << 16));
        assert_eq!(*s.offset_table(1), before);
        s.set_modulation_depth(3, 5.0);
        assert_eq!(*s.offset_table(1), before);
    }
}
