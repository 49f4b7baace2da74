//! Low-level time-stretching engine used by `elastic-rs`.
//!
//! The engine consumes and produces channel-planar `f32` audio, one slice per channel. It does
//! not validate its input: callers are expected to check ratios, channel counts and buffer
//! shapes before calling in.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};

// -------------------------------------------------------------------------------------------------

/// Raw option bitmask. One value per category, see the `OPTION_*` constants and `MASK_*` masks.
/// Zero in every category selects the category's default.
pub type OptionBits = u32;

pub const OPTION_PROCESS_OFFLINE: OptionBits = 0x0000_0000;
pub const OPTION_PROCESS_REAL_TIME: OptionBits = 0x0000_0001;
pub const MASK_PROCESS: OptionBits = 0x0000_0001;

pub const OPTION_TRANSIENTS_CRISP: OptionBits = 0x0000_0000;
pub const OPTION_TRANSIENTS_MIXED: OptionBits = 0x0000_0100;
pub const OPTION_TRANSIENTS_SMOOTH: OptionBits = 0x0000_0200;
pub const MASK_TRANSIENTS: OptionBits = 0x0000_0300;

pub const OPTION_DETECTOR_COMPOUND: OptionBits = 0x0000_0000;
pub const OPTION_DETECTOR_PERCUSSIVE: OptionBits = 0x0000_0400;
pub const OPTION_DETECTOR_SOFT: OptionBits = 0x0000_0800;
pub const MASK_DETECTOR: OptionBits = 0x0000_0c00;

pub const OPTION_PHASE_LAMINAR: OptionBits = 0x0000_0000;
pub const OPTION_PHASE_INDEPENDENT: OptionBits = 0x0000_2000;
pub const MASK_PHASE: OptionBits = 0x0000_2000;

pub const OPTION_THREADING_AUTO: OptionBits = 0x0000_0000;
pub const OPTION_THREADING_NEVER: OptionBits = 0x0001_0000;
pub const OPTION_THREADING_ALWAYS: OptionBits = 0x0002_0000;
pub const MASK_THREADING: OptionBits = 0x0003_0000;

pub const OPTION_WINDOW_STANDARD: OptionBits = 0x0000_0000;
pub const OPTION_WINDOW_SHORT: OptionBits = 0x0010_0000;
pub const OPTION_WINDOW_LONG: OptionBits = 0x0020_0000;
pub const MASK_WINDOW: OptionBits = 0x0030_0000;

pub const OPTION_SMOOTHING_OFF: OptionBits = 0x0000_0000;
pub const OPTION_SMOOTHING_ON: OptionBits = 0x0080_0000;
pub const MASK_SMOOTHING: OptionBits = 0x0080_0000;

pub const OPTION_FORMANT_SHIFTED: OptionBits = 0x0000_0000;
pub const OPTION_FORMANT_PRESERVED: OptionBits = 0x0100_0000;
pub const MASK_FORMANT: OptionBits = 0x0100_0000;

pub const OPTION_PITCH_HIGH_SPEED: OptionBits = 0x0000_0000;
pub const OPTION_PITCH_HIGH_QUALITY: OptionBits = 0x0200_0000;
pub const OPTION_PITCH_HIGH_CONSISTENCY: OptionBits = 0x0400_0000;
pub const MASK_PITCH: OptionBits = 0x0600_0000;

pub const OPTION_CHANNELS_APART: OptionBits = 0x0000_0000;
pub const OPTION_CHANNELS_TOGETHER: OptionBits = 0x1000_0000;
pub const MASK_CHANNELS: OptionBits = 0x1000_0000;

pub const OPTION_ENGINE_FASTER: OptionBits = 0x0000_0000;
pub const OPTION_ENGINE_FINER: OptionBits = 0x2000_0000;
pub const MASK_ENGINE: OptionBits = 0x2000_0000;

/// Union of all category masks. Bits outside of it are not valid options.
pub const MASK_ALL: OptionBits = MASK_PROCESS
    | MASK_TRANSIENTS
    | MASK_DETECTOR
    | MASK_PHASE
    | MASK_THREADING
    | MASK_WINDOW
    | MASK_SMOOTHING
    | MASK_FORMANT
    | MASK_PITCH
    | MASK_CHANNELS
    | MASK_ENGINE;

/// Categories which may be changed on a running engine via [`Parameter::Options`].
pub const MASK_RUNTIME: OptionBits =
    MASK_TRANSIENTS | MASK_DETECTOR | MASK_PHASE | MASK_FORMANT | MASK_PITCH;

pub const PRESET_DEFAULT: OptionBits = 0x0000_0000;
pub const PRESET_PERCUSSIVE: OptionBits = OPTION_WINDOW_SHORT | OPTION_PHASE_INDEPENDENT;

/// Value reported by [`Engine::available`] once all output has been retrieved after the final
/// input chunk. No further output will ever be produced.
pub const AVAILABLE_FINISHED: isize = -1;

/// Formant scale value which selects the automatic formant scale (the reciprocal of the pitch
/// scale when formants are preserved).
pub const FORMANT_SCALE_AUTO: f64 = 0.0;

/// Number of frequency cutoffs accepted by [`Parameter::FrequencyCutoff`].
pub const FREQUENCY_CUTOFF_COUNT: usize = 3;

/// Supported time ratio range. Engines clamp ratios outside of it.
pub const MIN_TIME_RATIO: f64 = 1.0 / 1024.0;
pub const MAX_TIME_RATIO: f64 = 1024.0;

/// Supported pitch scale range, four octaves down and up. Engines clamp scales outside of it.
pub const MIN_PITCH_SCALE: f64 = 1.0 / 16.0;
pub const MAX_PITCH_SCALE: f64 = 16.0;

/// Supported range of `time_ratio * pitch_scale`, the stretch the phase vocoder applies before
/// resampling.
pub const MIN_STRETCH: f64 = 1.0 / 1024.0;
pub const MAX_STRETCH: f64 = 1024.0;

// -------------------------------------------------------------------------------------------------

/// Diagnostic verbosity of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
#[repr(u8)]
pub enum LogLevel {
    /// Report misuse only.
    #[default]
    Errors = 0,
    /// Also report construction and configuration changes.
    Setup = 1,
    /// Also report every study, process and retrieve call.
    Process = 2,
    /// Also report every analysis frame.
    Frames = 3,
}

impl LogLevel {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LogLevel::Errors,
            1 => LogLevel::Setup,
            2 => LogLevel::Process,
            _ => LogLevel::Frames,
        }
    }
}

static DEFAULT_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Errors as u8);

/// Sets the log level that newly created engines start with. Last write wins.
pub fn set_default_log_level(level: LogLevel) {
    DEFAULT_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Returns the log level that newly created engines start with.
pub fn default_log_level() -> LogLevel {
    LogLevel::from_u8(DEFAULT_LOG_LEVEL.load(Ordering::Relaxed))
}

// -------------------------------------------------------------------------------------------------

/// A single engine setting, passed to [`Engine::set_parameter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Parameter {
    /// Output duration relative to the input duration.
    TimeRatio(f64),
    /// Frequency multiplier, 1.0 means no pitch change.
    PitchScale(f64),
    /// Formant envelope scale, or [`FORMANT_SCALE_AUTO`].
    FormantScale(f64),
    /// Replaces the option bits selected by `mask` with `bits`. Only [`MASK_RUNTIME`] categories
    /// are honoured.
    Options { mask: OptionBits, bits: OptionBits },
    /// Sets one of the [`FREQUENCY_CUTOFF_COUNT`] band limits, in Hz.
    FrequencyCutoff { index: usize, hz: f32 },
    /// Total number of input samples that will be processed (offline mode).
    ExpectedInputDuration(usize),
    /// Largest chunk that will be passed to a single `process` call.
    MaxProcessSize(usize),
    /// Input sample position to output sample position map (offline mode).
    KeyFrameMap(BTreeMap<usize, usize>),
    /// Diagnostic verbosity.
    LogLevel(LogLevel),
}

/// Capabilities of a time-stretching engine, as driven by a stretch session.
///
/// Input and output are channel-planar: `input[channel][sample]`. Implementations may assume
/// that all slices have the engine's channel count and equal lengths.
pub trait Engine: Send {
    /// Number of channels the engine was created with.
    fn channel_count(&self) -> usize;

    /// Version of the processing algorithm in use.
    fn engine_version(&self) -> u32;

    /// Number of input samples needed before the next analysis step can run.
    fn samples_required(&self) -> usize;

    /// Current frequency cutoff `index` in Hz, or 0.0 for an unknown index.
    fn frequency_cutoff(&self, index: usize) -> f32;

    /// Number of leading output samples a real-time caller has to discard to align output with
    /// input. Zero for engines which compensate their latency internally.
    fn start_delay(&self) -> usize;

    /// Number of silent samples a real-time caller should feed before the first input sample.
    fn preferred_start_pad(&self) -> usize;

    /// Number of input samples consumed per analysis step.
    fn input_increment(&self) -> usize;

    /// Applies a setting.
    fn set_parameter(&mut self, parameter: Parameter);

    /// Feeds input for the offline analysis pass. Produces no output.
    fn study(&mut self, input: &[&[f32]], final_chunk: bool);

    /// Feeds input for transformation.
    fn process(&mut self, input: &[&[f32]], final_chunk: bool);

    /// Number of output samples ready to be retrieved, or [`AVAILABLE_FINISHED`].
    fn available(&self) -> isize;

    /// Moves up to `output[0].len()` ready samples into `output` and returns how many were
    /// written.
    fn retrieve(&mut self, output: &mut [&mut [f32]]) -> usize;

    /// Forgets all input and output, keeping configuration and parameters.
    fn reset(&mut self);
}

// -------------------------------------------------------------------------------------------------

mod resampler;
mod vocoder;

mod stretcher;
pub use stretcher::Stretcher;

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_masks_are_disjoint() {
        let masks = [
            MASK_PROCESS,
            MASK_TRANSIENTS,
            MASK_DETECTOR,
            MASK_PHASE,
            MASK_THREADING,
            MASK_WINDOW,
            MASK_SMOOTHING,
            MASK_FORMANT,
            MASK_PITCH,
            MASK_CHANNELS,
            MASK_ENGINE,
        ];
        for (i, a) in masks.iter().enumerate() {
            for b in &masks[i + 1..] {
                assert_eq!(a & b, 0, "{a:#x} overlaps {b:#x}");
            }
        }
        assert_eq!(MASK_RUNTIME & !MASK_ALL, 0);
        assert_eq!(PRESET_PERCUSSIVE, 0x0010_2000);
    }

    #[test]
    fn default_log_level_is_process_wide() {
        set_default_log_level(LogLevel::Process);
        assert_eq!(default_log_level(), LogLevel::Process);
        set_default_log_level(LogLevel::Errors);
        assert_eq!(default_log_level(), LogLevel::Errors);
    }
}
