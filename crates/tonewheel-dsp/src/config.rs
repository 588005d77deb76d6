//! Construction-time engine configuration.
//!
//! Every field has a working default; loading from a file is left to the
//! host (the serde derives are there for that). `validate()` runs once in
//! `OrganEngine::new` and rejects anything outside the documented ranges.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::scanner::{DEPTH_HZ_RANGE, SCAN_HZ_RANGE};

/// Vibrato scanner tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Scanner rotation rate (4-22 Hz)
    pub frequency_hz: f64,
    /// Modulation depth per vibrato tier V1/V2/V3 (0-12 Hz)
    pub modulation_hz: [f64; 3],
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 7.25,
            modulation_hz: [3.0, 6.0, 9.0],
        }
    }
}

impl ScannerConfig {
    pub fn validate(&self) -> EngineResult<()> {
        check_range("scanner.frequency_hz", self.frequency_hz, SCAN_HZ_RANGE, "Hz")?;
        for (tier, &depth) in self.modulation_hz.iter().enumerate() {
            check_range(&format!("scanner.modulation_hz[{tier}]"), depth, DEPTH_HZ_RANGE, "Hz")?;
        }
        Ok(())
    }
}

/// Rotary cabinet mechanics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhirlConfig {
    pub horn_slow_hz: f64,
    pub horn_fast_hz: f64,
    pub drum_slow_hz: f64,
    pub drum_fast_hz: f64,
    /// Spin-up rate, rotations per second gained per second
    pub horn_accel: f64,
    pub horn_decel: f64,
    pub drum_accel: f64,
    pub drum_decel: f64,
    /// Effective radius of the horn mouth, metres
    pub horn_radius_m: f64,
    /// Effective radius of the drum baffle, metres
    pub drum_radius_m: f64,
    /// Horn/drum crossover frequency
    pub crossover_hz: f64,
}

impl Default for WhirlConfig {
    fn default() -> Self {
        Self {
            horn_slow_hz: 0.8,
            horn_fast_hz: 6.7,
            drum_slow_hz: 0.67,
            drum_fast_hz: 5.67,
            horn_accel: 6.0,
            horn_decel: 4.5,
            drum_accel: 1.2,
            drum_decel: 0.9,
            horn_radius_m: 0.15,
            drum_radius_m: 0.22,
            crossover_hz: 800.0,
        }
    }
}

impl WhirlConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let rates = [
            ("whirl.horn_slow_hz", self.horn_slow_hz),
            ("whirl.horn_fast_hz", self.horn_fast_hz),
            ("whirl.drum_slow_hz", self.drum_slow_hz),
            ("whirl.drum_fast_hz", self.drum_fast_hz),
            ("whirl.horn_accel", self.horn_accel),
            ("whirl.horn_decel", self.horn_decel),
            ("whirl.drum_accel", self.drum_accel),
            ("whirl.drum_decel", self.drum_decel),
        ];
        for (name, value) in rates {
            if !(value.is_finite() && value > 0.0) {
                return Err(EngineError::invalid_config(
                    name,
                    format!("must be positive, got {value}"),
                ));
            }
        }
        check_range("whirl.horn_radius_m", self.horn_radius_m, (0.01, 0.5), "m")?;
        check_range("whirl.drum_radius_m", self.drum_radius_m, (0.01, 0.5), "m")?;
        check_range("whirl.crossover_hz", self.crossover_hz, (100.0, 4000.0), "Hz")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scanner: ScannerConfig,
    pub whirl: WhirlConfig,
    /// Fixed gain applied to the summed tonewheels, (0, 1]
    pub output_trim: f32,
    /// Capacity of the cross-thread control queue
    pub control_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scanner: ScannerConfig::default(),
            whirl: WhirlConfig::default(),
            output_trim: 0.7,
            control_queue_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Check every field against its documented range.
    pub fn validate(&self) -> EngineResult<()> {
        self.scanner.validate()?;
        self.whirl.validate()?;
        if !(self.output_trim.is_finite() && self.output_trim > 0.0 && self.output_trim <= 1.0) {
            return Err(EngineError::invalid_config(
                "output_trim",
                format!("must be in (0, 1], got {}", self.output_trim),
            ));
        }
        if self.control_queue_capacity == 0 {
            return Err(EngineError::invalid_config(
                "control_queue_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

fn check_range(name: &str, value: f64, (lo, hi): (f64, f64), unit: &str) -> EngineResult<()> {
    if (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::invalid_config(
            name,
            format!("must be {lo}-{hi} {unit}, got {value}"),
        ))
    }
}
