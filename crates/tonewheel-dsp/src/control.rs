//! Control events and the cross-thread controller handle.
//!
//! Every parameter change is a `ControlEvent`. The engine applies events
//! from its own setters directly and drains events posted by `Controller`
//! handles at each fragment boundary. A drawbar registration travels as one
//! value inside one event, so the render side never sees half of an update.
//!
//! The `*_from_controller` functions turn 0-127 MIDI controller values into
//! console settings through range tables.

use crossbeam_channel::{Sender, TrySendError};
use log::warn;

use crate::error::{EngineError, EngineResult};
use crate::scanner::VibratoMode;
use crate::state::Registration;
use crate::tables::Manual;
use crate::whirl::RotarySpeed;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    NoteOn(u8),
    NoteOff(u8),
    AllNotesOff,
    Drawbars(Manual, Registration),
    VibratoMode(VibratoMode),
    VibratoUpper(bool),
    VibratoLower(bool),
    PercussionEnabled(bool),
    PercussionFast(bool),
    PercussionFirst(bool),
    PercussionSoft(bool),
    PreampClean(bool),
    InputGain(f32),
    SwellGain(f32),
    ReverbMix(f32),
    RotarySpeed(RotarySpeed),
    ScanFrequency(f64),
    ModulationDepth { tier: usize, hz: f64 },
}

/// Cloneable handle for posting control events from another thread.
/// Sends never block; a full queue drops the event and reports it.
#[derive(Debug, Clone)]
pub struct Controller {
    tx: Sender<ControlEvent>,
}

impl Controller {
    pub(crate) fn new(tx: Sender<ControlEvent>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: ControlEvent) -> EngineResult<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                warn!("control queue full, dropping {event:?}");
                Err(EngineError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(EngineError::Disconnected),
        }
    }

    pub fn note_on(&self, key: u8) -> EngineResult<()> {
        self.send(ControlEvent::NoteOn(key))
    }

    pub fn note_off(&self, key: u8) -> EngineResult<()> {
        self.send(ControlEvent::NoteOff(key))
    }

    /// Validate and post a registration. Invalid levels are rejected here,
    /// on the calling thread.
    pub fn set_drawbars(&self, manual: Manual, levels: &[u8]) -> EngineResult<()> {
        let reg = Registration::new(levels)?;
        self.send(ControlEvent::Drawbars(manual, reg))
    }

    pub fn set_vibrato_mode(&self, mode: VibratoMode) -> EngineResult<()> {
        self.send(ControlEvent::VibratoMode(mode))
    }

    pub fn set_rotary_speed(&self, speed: RotarySpeed) -> EngineResult<()> {
        self.send(ControlEvent::RotarySpeed(speed))
    }

    pub fn set_swell_gain(&self, gain: f32) -> EngineResult<()> {
        self.send(ControlEvent::SwellGain(gain))
    }

    pub fn set_reverb_mix(&self, wet: f32) -> EngineResult<()> {
        self.send(ControlEvent::ReverbMix(wet))
    }
}

// ── Controller value maps ───────────────────────────────────────────────

/// Which manuals pass through the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VibratoRouting {
    pub upper: bool,
    pub lower: bool,
}

/// Inclusive upper bound of each controller range, with its setting.
const VIBRATO_KNOB: [(u8, VibratoMode); 6] = [
    (22, VibratoMode::V1),
    (45, VibratoMode::C1),
    (68, VibratoMode::V2),
    (91, VibratoMode::C2),
    (114, VibratoMode::V3),
    (127, VibratoMode::C3),
];

const VIBRATO_ROUTING: [(u8, VibratoRouting); 4] = [
    (31, VibratoRouting { upper: false, lower: false }),
    (63, VibratoRouting { upper: false, lower: true }),
    (95, VibratoRouting { upper: true, lower: false }),
    (127, VibratoRouting { upper: true, lower: true }),
];

const ROTARY_SWITCH: [(u8, RotarySpeed); 3] = [
    (42, RotarySpeed::Slow),
    (85, RotarySpeed::Stop),
    (127, RotarySpeed::Fast),
];

/// First entry whose bound covers `value`; values past 127 land in the
/// last range.
fn lookup<T: Copy>(table: &[(u8, T)], value: u8, last: T) -> T {
    table
        .iter()
        .find(|(upper, _)| value <= *upper)
        .map_or(last, |&(_, setting)| setting)
}

pub fn vibrato_mode_from_controller(value: u8) -> VibratoMode {
    lookup(&VIBRATO_KNOB, value, VibratoMode::C3)
}

pub fn vibrato_routing_from_controller(value: u8) -> VibratoRouting {
    lookup(&VIBRATO_ROUTING, value, VibratoRouting { upper: true, lower: true })
}

pub fn rotary_speed_from_controller(value: u8) -> RotarySpeed {
    lookup(&ROTARY_SWITCH, value, RotarySpeed::Fast)
}
