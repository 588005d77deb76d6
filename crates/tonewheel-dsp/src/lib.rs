//! Tonewheel organ DSP library: oscillator bank, vibrato/chorus scanner,
//! overdrive, reverb and rotary speaker behind a fragment-based engine.
//!
//! Pure DSP with no audio framework dependencies. Hosts drive
//! [`engine::OrganEngine`] and pull stereo frames with `render`.

/// Samples synthesised per full pass of the signal chain.
pub const FRAGMENT_SIZE: usize = 128;

// Tone generation
pub mod filters;
pub mod oscillator;
pub mod scanner;
pub mod tables;

// Effects chain
pub mod oversampler;
pub mod preamp;
pub mod reverb;
pub mod whirl;

// Engine and control
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod state;

pub use config::EngineConfig;
pub use control::{ControlEvent, Controller};
pub use engine::OrganEngine;
pub use error::{EngineError, EngineResult};
pub use scanner::VibratoMode;
pub use state::{InstrumentState, Registration};
pub use tables::Manual;
pub use whirl::RotarySpeed;
