//! Organ Renderer: offline driver for the tonewheel engine.
//!
//! Renders held chords to 24-bit stereo WAV, prints rotor ramp profiles as
//! CSV and reports scanner statistics for a constant input.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use tonewheel_dsp::config::ScannerConfig;
use tonewheel_dsp::engine::SAMPLE_RATE_RANGE;
use tonewheel_dsp::scanner::{BUFFER_SIZE, Scanner};
use tonewheel_dsp::{
    EngineConfig, FRAGMENT_SIZE, Manual, OrganEngine, Registration, RotarySpeed, VibratoMode,
};

/// Tonewheel organ offline renderer
#[derive(Parser)]
#[command(name = "organ-renderer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hold a chord and render it to a stereo WAV file
    Render {
        /// MIDI note(s) to hold, comma separated
        #[arg(short, long, value_delimiter = ',', default_value = "60")]
        notes: Vec<u8>,

        /// Manual the notes are played on
        #[arg(short, long, value_enum, default_value_t = ManualArg::Upper)]
        manual: ManualArg,

        /// Nine drawbar digits, 16' through 1'
        #[arg(short, long, default_value = "886000000")]
        registration: String,

        /// Vibrato/chorus setting (routes the chosen manual when not off)
        #[arg(long, value_enum, default_value_t = VibratoArg::Off)]
        vibrato: VibratoArg,

        /// Rotary speaker speed
        #[arg(long, value_enum, default_value_t = RotaryArg::Slow)]
        rotary: RotaryArg,

        /// Drive the preamp instead of running it clean
        #[arg(long)]
        overdrive: bool,

        /// Preamp input gain
        #[arg(long, default_value_t = 1.0)]
        gain: f32,

        /// Reverb wet level, 0-1
        #[arg(long, default_value_t = 0.2)]
        reverb: f32,

        /// Expression pedal, 0-1
        #[arg(long, default_value_t = 0.75)]
        swell: f32,

        /// Enable upper-manual percussion
        #[arg(long)]
        percussion: bool,

        /// Seconds the keys are held
        #[arg(short, long, default_value_t = 2.0)]
        duration: f64,

        /// Seconds rendered after release
        #[arg(long, default_value_t = 0.5)]
        tail: f64,

        #[arg(long, default_value_t = 48000)]
        sample_rate: u32,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print rotor angular velocity per fragment after a speed change (CSV)
    Rotor {
        #[arg(long, value_enum, default_value_t = RotaryArg::Stop)]
        from: RotaryArg,

        #[arg(long, value_enum, default_value_t = RotaryArg::Fast)]
        to: RotaryArg,

        /// Seconds to trace after the switch
        #[arg(short, long, default_value_t = 6.0)]
        seconds: f64,

        #[arg(long, default_value_t = 48000)]
        sample_rate: u32,
    },

    /// Run the scanner over a constant input and report output statistics
    Scanner {
        /// Scan frequency in Hz
        #[arg(short, long, default_value_t = 7.25)]
        frequency: f64,

        /// Modulation depth of the selected tier, Hz
        #[arg(short, long, default_value_t = 3.0)]
        depth: f64,

        #[arg(short, long, value_enum, default_value_t = VibratoArg::V1)]
        mode: VibratoArg,

        #[arg(long, default_value_t = 4096)]
        samples: usize,

        #[arg(long, default_value_t = 48000)]
        sample_rate: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ManualArg {
    Upper,
    Lower,
    Pedal,
}

impl From<ManualArg> for Manual {
    fn from(m: ManualArg) -> Self {
        match m {
            ManualArg::Upper => Manual::Upper,
            ManualArg::Lower => Manual::Lower,
            ManualArg::Pedal => Manual::Pedal,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum VibratoArg {
    Off,
    V1,
    V2,
    V3,
    C1,
    C2,
    C3,
}

impl From<VibratoArg> for VibratoMode {
    fn from(v: VibratoArg) -> Self {
        match v {
            VibratoArg::Off => VibratoMode::Off,
            VibratoArg::V1 => VibratoMode::V1,
            VibratoArg::V2 => VibratoMode::V2,
            VibratoArg::V3 => VibratoMode::V3,
            VibratoArg::C1 => VibratoMode::C1,
            VibratoArg::C2 => VibratoMode::C2,
            VibratoArg::C3 => VibratoMode::C3,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RotaryArg {
    Slow,
    Stop,
    Fast,
}

impl From<RotaryArg> for RotarySpeed {
    fn from(r: RotaryArg) -> Self {
        match r {
            RotaryArg::Slow => RotarySpeed::Slow,
            RotaryArg::Stop => RotarySpeed::Stop,
            RotaryArg::Fast => RotarySpeed::Fast,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Render {
            notes,
            manual,
            registration,
            vibrato,
            rotary,
            overdrive,
            gain,
            reverb,
            swell,
            percussion,
            duration,
            tail,
            sample_rate,
            output,
        } => {
            let manual = Manual::from(manual);
            let reg: Registration = registration
                .parse()
                .with_context(|| format!("bad registration '{registration}'"))?;
            for &n in &notes {
                if manual.key_for_midi_note(n).is_none() {
                    let lo = manual.lowest_midi_note();
                    let hi = lo + manual.key_count() - 1;
                    bail!("MIDI note {n} is outside the {manual:?} manual ({lo}-{hi})");
                }
            }
            if !(duration > 0.0 && tail >= 0.0) {
                bail!("duration must be positive and tail non-negative");
            }

            let mut engine = OrganEngine::new(sample_rate as f64, &EngineConfig::default())?;
            engine.set_drawbars(manual, reg.levels())?;
            let vibrato = VibratoMode::from(vibrato);
            engine.set_vibrato_mode(vibrato);
            match manual {
                Manual::Upper => engine.set_vibrato_upper_enabled(vibrato != VibratoMode::Off),
                Manual::Lower => engine.set_vibrato_lower_enabled(vibrato != VibratoMode::Off),
                Manual::Pedal => {}
            }
            engine.set_rotary_speed(rotary.into());
            engine.set_preamp_clean(!overdrive);
            engine.set_input_gain(gain);
            engine.set_reverb_mix(reverb);
            engine.set_swell_gain(swell);
            engine.set_percussion_enabled(percussion);

            let held = (duration * sample_rate as f64).round() as usize;
            let released = (tail * sample_rate as f64).round() as usize;
            let mut left = vec![0.0f32; held + released];
            let mut right = vec![0.0f32; held + released];

            info!(
                "rendering {notes:?} on {manual:?} [{registration}], {duration}s + {tail}s tail"
            );
            for &n in &notes {
                engine.manual_note_on(manual, n);
            }
            engine.render(&mut left[..held], &mut right[..held]);
            for &n in &notes {
                engine.manual_note_off(manual, n);
            }
            engine.render(&mut left[held..], &mut right[held..]);

            let peak = left
                .iter()
                .chain(&right)
                .fold(0.0f32, |m, &s| m.max(s.abs()));
            info!("peak amplitude: {peak:.6} ({:.1} dBFS)", 20.0 * peak.log10());

            write_wav(&output, &left, &right, sample_rate)?;
            info!("written: {}", output.display());
        }

        Commands::Rotor {
            from,
            to,
            seconds,
            sample_rate,
        } => {
            let mut engine = OrganEngine::new(sample_rate as f64, &EngineConfig::default())?;
            let mut l = [0.0f32; FRAGMENT_SIZE];
            let mut r = [0.0f32; FRAGMENT_SIZE];

            // Settle at the starting speed before the switch.
            engine.set_rotary_speed(from.into());
            let settle = (10.0 * sample_rate as f64 / FRAGMENT_SIZE as f64) as usize;
            for _ in 0..settle {
                engine.render(&mut l, &mut r);
            }

            engine.set_rotary_speed(to.into());
            let fragments = (seconds * sample_rate as f64 / FRAGMENT_SIZE as f64).ceil() as usize;
            println!("fragment,time_s,horn_hz,drum_hz");
            for i in 0..fragments {
                engine.render(&mut l, &mut r);
                let whirl = engine.whirl();
                let t = ((i + 1) * FRAGMENT_SIZE) as f64 / sample_rate as f64;
                println!(
                    "{},{t:.4},{:.5},{:.5}",
                    i + 1,
                    whirl.horn_velocity(),
                    whirl.drum_velocity()
                );
            }
        }

        Commands::Scanner {
            frequency,
            depth,
            mode,
            samples,
            sample_rate,
        } => {
            let mode = VibratoMode::from(mode);
            let Some(tier) = mode.tier() else {
                bail!("scanner statistics need a vibrato or chorus mode, not off");
            };
            let (min, max) = SAMPLE_RATE_RANGE;
            let rate = sample_rate as f64;
            if !(min..=max).contains(&rate) {
                bail!("sample rate {sample_rate} Hz outside {min}-{max} Hz");
            }
            let mut config = ScannerConfig {
                frequency_hz: frequency,
                ..ScannerConfig::default()
            };
            config.modulation_hz[tier] = depth;
            config.validate()?;

            let mut scanner = Scanner::new(config.frequency_hz, config.modulation_hz, rate);
            scanner.set_mode(mode);

            let input = vec![1.0f32; samples];
            let mut out = vec![0.0f32; samples];
            scanner.process(&input, &mut out);

            let first_sound = out.iter().position(|&s| s != 0.0);
            let peak = out.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
            let steady = &out[samples.min(BUFFER_SIZE)..];
            let mean = if steady.is_empty() {
                0.0
            } else {
                steady.iter().sum::<f32>() / steady.len() as f32
            };
            println!("stator_increment: {}", scanner.stator_increment());
            match first_sound {
                Some(i) => println!("first_nonzero_sample: {i}"),
                None => println!("first_nonzero_sample: none"),
            }
            println!("peak: {peak:.6}");
            println!("steady_mean: {mean:.6}");
        }
    }
    Ok(())
}

fn write_wav(path: &Path, left: &[f32], right: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 24,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let scale = ((1 << 23) - 1) as f32;
    for (&l, &r) in left.iter().zip(right) {
        writer.write_sample((l.clamp(-1.0, 1.0) * scale) as i32)?;
        writer.write_sample((r.clamp(-1.0, 1.0) * scale) as i32)?;
    }
    writer.finalize().context("failed to finalize WAV")?;
    Ok(())
}
