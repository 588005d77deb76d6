//! OrganEngine: fragment-based render pipeline.
//!
//! The signal chain runs in fixed fragments of `FRAGMENT_SIZE` samples:
//!
//!   ToneGenerator (incl. scanner) -> Preamp -> Reverb -> Whirl -> L/R
//!
//! `render` hands out any number of frames by copying from the current
//! fragment and synthesising the next one exactly when the cursor reaches
//! the end. Output therefore depends only on the total frame count, not on
//! how the host splits its requests.
//!
//! Parameter flow: setters write a pending `InstrumentState`; control
//! events from `Controller` handles queue up in a bounded channel. Both are
//! applied at the fragment boundary, immediately before synthesis.

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info};

use crate::FRAGMENT_SIZE;
use crate::config::EngineConfig;
use crate::control::{ControlEvent, Controller};
use crate::error::{EngineError, EngineResult};
use crate::oscillator::ToneGenerator;
use crate::preamp::Preamp;
use crate::reverb::Reverb;
use crate::scanner::{DEPTH_HZ_RANGE, SCAN_HZ_RANGE, VibratoMode};
use crate::state::{INPUT_GAIN_RANGE, InstrumentState, Registration, clamp_or, clamp_or_f64};
use crate::tables::Manual;
use crate::whirl::{RotarySpeed, Whirl};

/// Supported sample-rate window, Hz.
pub const SAMPLE_RATE_RANGE: (f64, f64) = (8_000.0, 192_000.0);

pub struct OrganEngine {
    sample_rate: f64,
    tone: ToneGenerator,
    preamp: Preamp,
    reverb: Reverb,
    whirl: Whirl,

    pending: InstrumentState,
    committed: InstrumentState,

    control_tx: Sender<ControlEvent>,
    control_rx: Receiver<ControlEvent>,
    /// Most events drained per boundary
    drain_limit: usize,

    fragment: [f32; FRAGMENT_SIZE],
    stage: [f32; FRAGMENT_SIZE],
    out_l: [f32; FRAGMENT_SIZE],
    out_r: [f32; FRAGMENT_SIZE],
    scratch_l: [f32; FRAGMENT_SIZE],
    scratch_r: [f32; FRAGMENT_SIZE],
    /// Read position inside the current fragment; FRAGMENT_SIZE means exhausted
    cursor: usize,
}

impl OrganEngine {
    /// Build every stage for `sample_rate`. Fails without side effects if
    /// the rate or any configuration value is out of range.
    pub fn new(sample_rate: f64, config: &EngineConfig) -> EngineResult<Self> {
        let (min, max) = SAMPLE_RATE_RANGE;
        if !(min..=max).contains(&sample_rate) {
            return Err(EngineError::InvalidSampleRate {
                rate: sample_rate,
                min,
                max,
            });
        }
        config.validate()?;
        debug!("engine config: {config:?}");

        let tone = ToneGenerator::new(sample_rate, &config.scanner, config.output_trim);
        info!(
            "oscillator bank ready: scanner {:.2} Hz, depths {:?} Hz",
            config.scanner.frequency_hz, config.scanner.modulation_hz
        );
        let preamp = Preamp::new(sample_rate);
        info!("overdrive preamp ready (2x oversampled)");
        let reverb = Reverb::new(sample_rate);
        info!("reverb ready");
        let whirl = Whirl::new(sample_rate, &config.whirl);
        info!(
            "rotary speaker ready: crossover {:.0} Hz, horn {}/{} Hz, drum {}/{} Hz",
            config.whirl.crossover_hz,
            config.whirl.horn_slow_hz,
            config.whirl.horn_fast_hz,
            config.whirl.drum_slow_hz,
            config.whirl.drum_fast_hz
        );

        let (control_tx, control_rx) = bounded(config.control_queue_capacity);
        let state = InstrumentState {
            scanner: config.scanner,
            ..InstrumentState::default()
        };

        let mut engine = Self {
            sample_rate,
            tone,
            preamp,
            reverb,
            whirl,
            pending: state,
            committed: state,
            control_tx,
            control_rx,
            drain_limit: config.control_queue_capacity,
            fragment: [0.0; FRAGMENT_SIZE],
            stage: [0.0; FRAGMENT_SIZE],
            out_l: [0.0; FRAGMENT_SIZE],
            out_r: [0.0; FRAGMENT_SIZE],
            scratch_l: [0.0; FRAGMENT_SIZE],
            scratch_r: [0.0; FRAGMENT_SIZE],
            cursor: FRAGMENT_SIZE,
        };
        engine.push_state(None);
        info!("organ engine ready at {sample_rate} Hz, {FRAGMENT_SIZE}-sample fragments");
        Ok(engine)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    // ── Rendering ───────────────────────────────────────────────────────

    /// Fill `out_l`/`out_r` with the next frames. Renders
    /// `min(out_l.len(), out_r.len())` frames.
    pub fn render(&mut self, out_l: &mut [f32], out_r: &mut [f32]) {
        let n = out_l.len().min(out_r.len());
        let mut done = 0;
        while done < n {
            if self.cursor == FRAGMENT_SIZE {
                self.synthesize_fragment();
                self.cursor = 0;
            }
            let take = (n - done).min(FRAGMENT_SIZE - self.cursor);
            let src = self.cursor..self.cursor + take;
            out_l[done..done + take].copy_from_slice(&self.out_l[src.clone()]);
            out_r[done..done + take].copy_from_slice(&self.out_r[src]);
            self.cursor += take;
            done += take;
        }
    }

    fn synthesize_fragment(&mut self) {
        self.drain_controls();
        if self.pending != self.committed {
            let previous = self.committed;
            self.committed = self.pending;
            self.push_state(Some(&previous));
        }

        self.tone.generate_fragment(&mut self.fragment);
        self.preamp.process(&self.fragment, &mut self.stage);
        self.reverb.process(&self.stage, &mut self.fragment);
        self.whirl.process(
            &self.fragment,
            &mut self.out_l,
            &mut self.out_r,
            &mut self.scratch_l,
            &mut self.scratch_r,
        );
    }

    fn drain_controls(&mut self) {
        for _ in 0..self.drain_limit {
            match self.control_rx.try_recv() {
                Ok(event) => self.apply(event),
                Err(_) => break,
            }
        }
    }

    /// Hand the committed state to the stages. With a previous state only
    /// the fields that changed are pushed.
    fn push_state(&mut self, previous: Option<&InstrumentState>) {
        let s = self.committed;

        for manual in Manual::ALL {
            if previous.is_none_or(|p| p.registration(manual) != s.registration(manual)) {
                self.tone.set_registration(manual, s.registration(manual));
            }
        }
        if previous.is_none_or(|p| p.vibrato_mode != s.vibrato_mode) {
            self.tone.set_vibrato_mode(s.vibrato_mode);
        }
        let routing = |st: &InstrumentState| (st.vibrato_upper, st.vibrato_lower);
        if previous.is_none_or(|p| routing(p) != routing(&s)) {
            self.tone.set_vibrato_routing(s.vibrato_upper, s.vibrato_lower);
        }
        if previous.is_none_or(|p| p.percussion != s.percussion) {
            self.tone.set_percussion(s.percussion);
        }
        if previous.is_none_or(|p| p.preamp_clean != s.preamp_clean) {
            self.preamp.set_clean(s.preamp_clean);
        }
        if previous.is_none_or(|p| p.input_gain != s.input_gain) {
            self.preamp.set_gain(s.input_gain);
        }
        if previous.is_none_or(|p| p.reverb_mix != s.reverb_mix) {
            self.reverb.set_mix(s.reverb_mix);
        }
        if previous.is_none_or(|p| p.rotary_speed != s.rotary_speed) {
            self.whirl.set_speed(s.rotary_speed);
        }
        if previous.is_none_or(|p| p.swell != s.swell) {
            self.tone.set_swell(s.swell);
        }
        if previous.is_none_or(|p| p.scanner.frequency_hz != s.scanner.frequency_hz) {
            self.tone.set_scan_frequency(s.scanner.frequency_hz);
        }
        for tier in 0..3 {
            let hz = s.scanner.modulation_hz[tier];
            if previous.is_some_and(|p| p.scanner.modulation_hz[tier] != hz) {
                self.tone.set_modulation_depth(tier, hz);
            }
        }
    }

    // ── Control ─────────────────────────────────────────────────────────

    /// Apply one control event. Note events go straight to the oscillator
    /// bank's pending key set; everything else updates the pending state.
    /// Nothing becomes audible before the next fragment boundary.
    pub fn apply(&mut self, event: ControlEvent) {
        let p = &mut self.pending;
        match event {
            ControlEvent::NoteOn(key) => self.tone.key_on(key),
            ControlEvent::NoteOff(key) => self.tone.key_off(key),
            ControlEvent::AllNotesOff => self.tone.all_keys_off(),
            ControlEvent::Drawbars(manual, reg) => p.set_registration(manual, reg),
            ControlEvent::VibratoMode(mode) => p.vibrato_mode = mode,
            ControlEvent::VibratoUpper(on) => p.vibrato_upper = on,
            ControlEvent::VibratoLower(on) => p.vibrato_lower = on,
            ControlEvent::PercussionEnabled(on) => p.percussion.enabled = on,
            ControlEvent::PercussionFast(on) => p.percussion.fast = on,
            ControlEvent::PercussionFirst(on) => p.percussion.first = on,
            ControlEvent::PercussionSoft(on) => p.percussion.soft = on,
            ControlEvent::PreampClean(on) => p.preamp_clean = on,
            ControlEvent::InputGain(g) => {
                p.input_gain = clamp_or(g, INPUT_GAIN_RANGE, p.input_gain);
            }
            ControlEvent::SwellGain(g) => p.swell = clamp_or(g, (0.0, 1.0), p.swell),
            ControlEvent::ReverbMix(w) => p.reverb_mix = clamp_or(w, (0.0, 1.0), p.reverb_mix),
            ControlEvent::RotarySpeed(speed) => p.rotary_speed = speed,
            ControlEvent::ScanFrequency(hz) => {
                p.scanner.frequency_hz = clamp_or_f64(hz, SCAN_HZ_RANGE, p.scanner.frequency_hz);
            }
            ControlEvent::ModulationDepth { tier, hz } => {
                if let Some(depth) = p.scanner.modulation_hz.get_mut(tier) {
                    *depth = clamp_or_f64(hz, DEPTH_HZ_RANGE, *depth);
                }
            }
        }
    }

    /// Handle for posting events from another thread.
    pub fn controller(&self) -> Controller {
        Controller::new(self.control_tx.clone())
    }

    /// Press a key in the 160-key index space; indices past it are ignored.
    pub fn note_on(&mut self, key: u8) {
        self.apply(ControlEvent::NoteOn(key));
    }

    pub fn note_off(&mut self, key: u8) {
        self.apply(ControlEvent::NoteOff(key));
    }

    pub fn all_notes_off(&mut self) {
        self.apply(ControlEvent::AllNotesOff);
    }

    /// Play a MIDI note on one manual. Notes outside the manual's compass
    /// are ignored.
    pub fn manual_note_on(&mut self, manual: Manual, midi_note: u8) {
        if let Some(key) = manual.key_for_midi_note(midi_note) {
            self.note_on(key);
        }
    }

    pub fn manual_note_off(&mut self, manual: Manual, midi_note: u8) {
        if let Some(key) = manual.key_for_midi_note(midi_note) {
            self.note_off(key);
        }
    }

    /// Set a manual's drawbars. Rejects anything but nine levels in 0-8 and
    /// leaves the current registration untouched on error.
    pub fn set_drawbars(&mut self, manual: Manual, levels: &[u8]) -> EngineResult<()> {
        let reg = Registration::new(levels)?;
        self.apply(ControlEvent::Drawbars(manual, reg));
        Ok(())
    }

    pub fn set_vibrato_upper_enabled(&mut self, on: bool) {
        self.apply(ControlEvent::VibratoUpper(on));
    }

    pub fn set_vibrato_lower_enabled(&mut self, on: bool) {
        self.apply(ControlEvent::VibratoLower(on));
    }

    pub fn set_vibrato_mode(&mut self, mode: VibratoMode) {
        self.apply(ControlEvent::VibratoMode(mode));
    }

    pub fn set_percussion_enabled(&mut self, on: bool) {
        self.apply(ControlEvent::PercussionEnabled(on));
    }

    pub fn set_percussion_fast(&mut self, on: bool) {
        self.apply(ControlEvent::PercussionFast(on));
    }

    pub fn set_percussion_first(&mut self, on: bool) {
        self.apply(ControlEvent::PercussionFirst(on));
    }

    pub fn set_percussion_soft(&mut self, on: bool) {
        self.apply(ControlEvent::PercussionSoft(on));
    }

    pub fn set_preamp_clean(&mut self, clean: bool) {
        self.apply(ControlEvent::PreampClean(clean));
    }

    /// Preamp gain multiplier, clamped to 0-4.
    pub fn set_input_gain(&mut self, gain: f32) {
        self.apply(ControlEvent::InputGain(gain));
    }

    /// Expression pedal, clamped to 0-1.
    pub fn set_swell_gain(&mut self, gain: f32) {
        self.apply(ControlEvent::SwellGain(gain));
    }

    /// Reverb wet level, clamped to 0-1.
    pub fn set_reverb_mix(&mut self, wet: f32) {
        self.apply(ControlEvent::ReverbMix(wet));
    }

    pub fn set_rotary_speed(&mut self, speed: RotarySpeed) {
        self.apply(ControlEvent::RotarySpeed(speed));
    }

    /// Scanner rotation rate, clamped to 4-22 Hz.
    pub fn set_scan_frequency(&mut self, hz: f64) {
        self.apply(ControlEvent::ScanFrequency(hz));
    }

    /// Modulation depth of one vibrato tier (0-2), clamped to 0-12 Hz.
    pub fn set_modulation_depth(&mut self, tier: usize, hz: f64) {
        self.apply(ControlEvent::ModulationDepth { tier, hz });
    }

    // ── State ───────────────────────────────────────────────────────────

    /// Snapshot of the pending state, including changes not yet rendered.
    pub fn state(&self) -> InstrumentState {
        self.pending
    }

    /// Replace the whole console state; takes effect at the next fragment.
    pub fn apply_state(&mut self, state: &InstrumentState) {
        self.pending = state.sanitized();
    }

    /// Read-only view of the rotary speaker, for rotor diagnostics.
    pub fn whirl(&self) -> &Whirl {
        &self.whirl
    }

    /// Release all keys, clear every delay line and filter, and discard
    /// the rest of the current fragment. Console settings are kept.
    pub fn reset(&mut self) {
        self.tone.reset();
        self.preamp.reset();
        self.reverb.reset();
        self.whirl.reset();
        self.cursor = FRAGMENT_SIZE;
    }
}
