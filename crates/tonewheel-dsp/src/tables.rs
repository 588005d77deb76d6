//! Tonewheel, drawbar and key-map tables.
//!
//! The generator has 91 wheels tuned in equal temperament from C1 (32.70 Hz,
//! wheel 1) to F#8 (5919.9 Hz, wheel 91). Each key on a manual taps nine
//! wheels, one per drawbar footage; taps that run off either end of the
//! wheel range fold back by an octave, as on the real generator.
//!
//! Key-index space (160 entries):
//!   0..64    upper manual (0..61 wired)
//!   64..128  lower manual (64..125 wired)
//!   128..160 pedalboard   (128..160 wired)

use serde::{Deserialize, Serialize};

pub const NUM_WHEELS: usize = 91;
pub const NUM_DRAWBARS: usize = 9;
pub const MAX_DRAWBAR_LEVEL: u8 = 8;
pub const KEY_SPACE: usize = 160;

/// Wheel index (0-based) of A4 = 440 Hz.
const A440_WHEEL: i32 = 45;

/// Wheel index (0-based) sounded by manual key 0 at 8' pitch (C2).
const KEY0_WHEEL_8FT: i32 = 12;

/// Semitone offset of each drawbar relative to the 8' fundamental:
/// 16', 5 1/3', 8', 4', 2 2/3', 2', 1 3/5', 1 1/3', 1'.
pub const FOOTAGE_SEMITONES: [i32; NUM_DRAWBARS] = [-12, 7, 0, 12, 19, 24, 28, 31, 36];

/// Drawbar index of the 4' (second harmonic) stop.
pub const DRAWBAR_4FT: usize = 3;
/// Drawbar index of the 2 2/3' (third harmonic) stop.
pub const DRAWBAR_2_2_3FT: usize = 4;
/// Drawbar index of the 1' stop, cancelled while percussion is on.
pub const DRAWBAR_1FT: usize = 8;

/// Keyboard division.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Manual {
    Upper,
    Lower,
    Pedal,
}

impl Manual {
    pub const ALL: [Manual; 3] = [Manual::Upper, Manual::Lower, Manual::Pedal];

    /// Position in per-manual arrays.
    pub fn index(self) -> usize {
        match self {
            Manual::Upper => 0,
            Manual::Lower => 1,
            Manual::Pedal => 2,
        }
    }

    /// First key index of this manual in the 160-entry key space.
    pub fn key_offset(self) -> u8 {
        match self {
            Manual::Upper => 0,
            Manual::Lower => 64,
            Manual::Pedal => 128,
        }
    }

    /// Number of wired keys.
    pub fn key_count(self) -> u8 {
        match self {
            Manual::Upper | Manual::Lower => 61,
            Manual::Pedal => 32,
        }
    }

    /// MIDI note number played by the lowest key.
    pub fn lowest_midi_note(self) -> u8 {
        match self {
            Manual::Upper | Manual::Lower => 36,
            Manual::Pedal => 24,
        }
    }

    /// Translate a MIDI note into this manual's key index, if the manual has
    /// a key for it.
    pub fn key_for_midi_note(self, midi_note: u8) -> Option<u8> {
        let rel = midi_note.checked_sub(self.lowest_midi_note())?;
        (rel < self.key_count()).then(|| self.key_offset() + rel)
    }

    /// Resolve a key index into (manual, key-within-manual). Unwired slots
    /// and indices past the key space resolve to `None`.
    pub fn from_key(key: u8) -> Option<(Manual, u8)> {
        let manual = match key {
            0..=63 => Manual::Upper,
            64..=127 => Manual::Lower,
            128..=159 => Manual::Pedal,
            _ => return None,
        };
        let rel = key - manual.key_offset();
        (rel < manual.key_count()).then_some((manual, rel))
    }
}

/// Frequency of a wheel (0-based index), equal temperament, A440.
pub fn wheel_freq(wheel: usize) -> f64 {
    440.0 * f64::powf(2.0, (wheel as i32 - A440_WHEEL) as f64 / 12.0)
}

/// Wheel tapped by `key` (within its manual) for drawbar `drawbar`,
/// with octave foldback at both ends of the generator.
pub fn key_wheel(key: u8, drawbar: usize) -> usize {
    let mut w = KEY0_WHEEL_8FT + key as i32 + FOOTAGE_SEMITONES[drawbar];
    while w < 0 {
        w += 12;
    }
    while w >= NUM_WHEELS as i32 {
        w -= 12;
    }
    w as usize
}

/// Linear gain for a drawbar level: 0 is silent, each step below 8 is -3 dB.
pub fn drawbar_gain(level: u8) -> f32 {
    const GAINS: [f32; 9] = [
        0.0, 0.089_125, 0.125_893, 0.177_828, 0.251_189, 0.354_813, 0.501_187, 0.707_946, 1.0,
    ];
    GAINS[level.min(MAX_DRAWBAR_LEVEL) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_range() {
        assert!((wheel_freq(0) - 32.703).abs() < 0.01);
        assert!((wheel_freq(45) - 440.0).abs() < 1e-9);
        assert!((wheel_freq(90) - 5919.9).abs() < 0.1);
    }

    #[test]
    fn test_key_wheel_fundamental() {
        // Key 0 at 8' is C2, key 33 is A4.
        assert_eq!(key_wheel(0, 2), 12);
        assert_eq!(key_wheel(33, 2), A440_WHEEL as usize);
        // 16' on the lowest key is the lowest wheel.
        assert_eq!(key_wheel(0, 0), 0);
    }

    #[test]
    fn test_key_wheel_foldback() {
        for key in 0..61u8 {
            for d in 0..NUM_DRAWBARS {
                let w = key_wheel(key, d);
                assert!(w < NUM_WHEELS, "key {key} drawbar {d} -> wheel {w}");
            }
        }
        // Top key, 1' stop would be wheel 108: folds down twice to 84.
        assert_eq!(key_wheel(60, 8), 84);
    }

    #[test]
    fn test_drawbar_gain_steps() {
        assert_eq!(drawbar_gain(0), 0.0);
        assert_eq!(drawbar_gain(8), 1.0);
        for level in 1..8u8 {
            let ratio_db = 20.0 * (drawbar_gain(level + 1) / drawbar_gain(level)).log10();
            assert!((ratio_db - 3.0).abs() < 0.05, "level {level}: step {ratio_db:.2} dB");
        }
    }

    #[test]
    fn test_key_map() {
        assert_eq!(Manual::from_key(0), Some((Manual::Upper, 0)));
        assert_eq!(Manual::from_key(61), None);
        assert_eq!(Manual::from_key(64), Some((Manual::Lower, 0)));
        assert_eq!(Manual::from_key(159), Some((Manual::Pedal, 31)));
        assert_eq!(Manual::from_key(160), None);
        assert_eq!(Manual::Lower.key_for_midi_note(60), Some(64 + 24));
        assert_eq!(Manual::Pedal.key_for_midi_note(23), None);
        assert_eq!(Manual::Upper.key_for_midi_note(97), None);
    }
}
