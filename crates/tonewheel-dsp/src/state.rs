//! Instrument state: everything a player can set on the console.
//!
//! The engine keeps two copies, pending and committed. Setters write the
//! pending copy; the render path commits it at the next fragment boundary.
//! The whole struct is `Copy` so that commit never allocates.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::ScannerConfig;
use crate::error::{EngineError, EngineResult};
use crate::scanner::{DEPTH_HZ_RANGE, SCAN_HZ_RANGE, VibratoMode};
use crate::tables::{MAX_DRAWBAR_LEVEL, Manual, NUM_DRAWBARS};
use crate::whirl::RotarySpeed;

/// Input gain window accepted at the control boundary.
pub const INPUT_GAIN_RANGE: (f32, f32) = (0.0, 4.0);

/// Nine validated drawbar levels (16' through 1').
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Registration([u8; NUM_DRAWBARS]);

impl Registration {
    pub const SILENT: Registration = Registration([0; NUM_DRAWBARS]);

    /// Validate a slice of drawbar levels: exactly nine entries, each 0-8.
    pub fn new(levels: &[u8]) -> EngineResult<Self> {
        if levels.len() != NUM_DRAWBARS {
            return Err(EngineError::RegistrationLength {
                expected: NUM_DRAWBARS,
                found: levels.len(),
            });
        }
        let mut out = [0u8; NUM_DRAWBARS];
        for (index, (&level, slot)) in levels.iter().zip(out.iter_mut()).enumerate() {
            if level > MAX_DRAWBAR_LEVEL {
                return Err(EngineError::DrawbarLevel { index, level });
            }
            *slot = level;
        }
        Ok(Self(out))
    }

    pub fn levels(&self) -> &[u8; NUM_DRAWBARS] {
        &self.0
    }

    pub fn level(&self, drawbar: usize) -> u8 {
        self.0[drawbar]
    }
}

impl Default for Registration {
    fn default() -> Self {
        Self::SILENT
    }
}

/// Parses the usual nine-digit console notation, e.g. `"888000000"`.
impl FromStr for Registration {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let levels = s
            .trim()
            .chars()
            .map(|c| {
                c.to_digit(10).map(|d| d as u8).ok_or_else(|| {
                    let message = format!("'{c}' is not a drawbar digit");
                    EngineError::invalid_config("registration", message)
                })
            })
            .collect::<EngineResult<Vec<u8>>>()?;
        Self::new(&levels)
    }
}

impl TryFrom<Vec<u8>> for Registration {
    type Error = EngineError;

    fn try_from(levels: Vec<u8>) -> Result<Self, Self::Error> {
        Self::new(&levels)
    }
}

impl From<Registration> for Vec<u8> {
    fn from(reg: Registration) -> Self {
        reg.0.to_vec()
    }
}

/// Upper-manual percussion tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PercussionSettings {
    pub enabled: bool,
    /// Fast decay (1 s to -60 dB) instead of slow (4 s)
    pub fast: bool,
    /// Second harmonic (4') instead of third (2 2/3')
    pub first: bool,
    /// -6 dB percussion level
    pub soft: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentState {
    pub upper: Registration,
    pub lower: Registration,
    pub pedal: Registration,
    pub vibrato_mode: VibratoMode,
    pub vibrato_upper: bool,
    pub vibrato_lower: bool,
    pub percussion: PercussionSettings,
    pub preamp_clean: bool,
    pub input_gain: f32,
    pub reverb_mix: f32,
    pub rotary_speed: RotarySpeed,
    pub swell: f32,
    pub scanner: ScannerConfig,
}

impl Default for InstrumentState {
    fn default() -> Self {
        Self {
            upper: Registration([8, 8, 6, 0, 0, 0, 0, 0, 0]),
            lower: Registration([8, 8, 8, 8, 0, 0, 0, 0, 8]),
            pedal: Registration([8, 0, 0, 0, 0, 0, 0, 0, 0]),
            vibrato_mode: VibratoMode::Off,
            vibrato_upper: false,
            vibrato_lower: false,
            percussion: PercussionSettings::default(),
            preamp_clean: true,
            input_gain: 1.0,
            reverb_mix: 0.2,
            rotary_speed: RotarySpeed::Slow,
            swell: 0.75,
            scanner: ScannerConfig::default(),
        }
    }
}

impl InstrumentState {
    pub fn registration(&self, manual: Manual) -> Registration {
        match manual {
            Manual::Upper => self.upper,
            Manual::Lower => self.lower,
            Manual::Pedal => self.pedal,
        }
    }

    pub fn set_registration(&mut self, manual: Manual, reg: Registration) {
        match manual {
            Manual::Upper => self.upper = reg,
            Manual::Lower => self.lower = reg,
            Manual::Pedal => self.pedal = reg,
        }
    }

    /// Clamp every continuous value into its accepted range. Non-finite
    /// values fall back to the default.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        self.input_gain = clamp_or(self.input_gain, INPUT_GAIN_RANGE, d.input_gain);
        self.reverb_mix = clamp_or(self.reverb_mix, (0.0, 1.0), d.reverb_mix);
        self.swell = clamp_or(self.swell, (0.0, 1.0), d.swell);
        self.scanner.frequency_hz =
            clamp_or_f64(self.scanner.frequency_hz, SCAN_HZ_RANGE, d.scanner.frequency_hz);
        for (depth, default) in self
            .scanner
            .modulation_hz
            .iter_mut()
            .zip(d.scanner.modulation_hz)
        {
            *depth = clamp_or_f64(*depth, DEPTH_HZ_RANGE, default);
        }
        self
    }
}

/// Clamp into `range`, substituting `fallback` for NaN/inf.
pub(crate) fn clamp_or(value: f32, (lo, hi): (f32, f32), fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        fallback
    }
}

pub(crate) fn clamp_or_f64(value: f64, (lo, hi): (f64, f64), fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_registration_parse() {
        let reg: Registration = "888000000".parse().unwrap();
        assert_eq!(reg.levels(), &[8, 8, 8, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(
            "88800000".parse::<Registration>(),
            Err(EngineError::RegistrationLength { expected: 9, found: 8 })
        ));
        assert!(matches!(
            "888090000".parse::<Registration>(),
            Err(EngineError::DrawbarLevel { index: 4, level: 9 })
        ));
        assert!("88x000000".parse::<Registration>().is_err());
    }

    #[test]
    fn test_default_registrations() {
        let state = InstrumentState::default();
        assert_eq!(state.upper.levels(), &[8, 8, 6, 0, 0, 0, 0, 0, 0]);
        assert_eq!(state.upper.level(2), 6);
        assert_eq!(state.lower.levels(), &[8, 8, 8, 8, 0, 0, 0, 0, 8]);
        assert_eq!(state.pedal.level(0), 8);
        assert!(state.pedal.levels()[1..].iter().all(|&l| l == 0));
        assert_eq!(Registration::default().levels(), Registration::SILENT.levels());
    }

    proptest! {
        #[test]
        fn registration_accepts_exactly_valid_input(
            levels in prop::collection::vec(0u8..=12, 0..14)
        ) {
            let valid =
                levels.len() == NUM_DRAWBARS && levels.iter().all(|&l| l <= MAX_DRAWBAR_LEVEL);
            match Registration::new(&levels) {
                Ok(reg) => {
                    prop_assert!(valid);
                    prop_assert_eq!(&reg.levels()[..], &levels[..]);
                }
                Err(_) => prop_assert!(!valid),
            }
        }
    }

    #[test]
    fn test_state_serde_roundtrip() {
        let mut state = InstrumentState::default();
        state.vibrato_mode = VibratoMode::C3;
        state.vibrato_upper = true;
        state.percussion.enabled = true;
        state.rotary_speed = RotarySpeed::Fast;
        state.set_registration(Manual::Pedal, "850000000".parse().unwrap());

        let json = serde_json::to_string(&state).unwrap();
        let back: InstrumentState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_state_deserialize_rejects_bad_registration() {
        let json = r#"{ "upper": [8, 8, 9, 0, 0, 0, 0, 0, 0] }"#;
        assert!(serde_json::from_str::<InstrumentState>(json).is_err());
    }

    #[test]
    fn test_sanitized_clamps() {
        let mut state = InstrumentState::default();
        state.reverb_mix = 1.7;
        state.swell = f32::NAN;
        state.input_gain = -2.0;
        state.scanner.frequency_hz = 40.0;
        state.scanner.modulation_hz = [-1.0, 6.0, 20.0];
        let s = state.sanitized();
        assert_eq!(s.reverb_mix, 1.0);
        assert_eq!(s.swell, 0.75);
        assert_eq!(s.input_gain, 0.0);
        assert_eq!(s.scanner.frequency_hz, 22.0);
        assert_eq!(s.scanner.modulation_hz, [0.0, 6.0, 12.0]);
    }
}
