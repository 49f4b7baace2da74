use elastic_engine as engine;
use elastic_engine::OptionBits;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// -------------------------------------------------------------------------------------------------

/// A group of mutually exclusive options, stored in the engine's option bits under `MASK`.
pub trait OptionCategory: Sized + Copy {
    const MASK: OptionBits;

    /// Engine bits of this value.
    fn bits(self) -> OptionBits;

    /// Decodes this category from `bits`. Returns `None` for bit patterns which do not map to
    /// a value of the category.
    fn from_bits(bits: OptionBits) -> Option<Self>;
}

macro_rules! option_category {
    (
        $(#[$meta:meta])*
        $name:ident in $mask:ident {
            $( $(#[$variant_meta:meta])* $variant:ident = $bits:ident ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(rename_all = "kebab-case")]
        pub enum $name {
            $( $(#[$variant_meta])* $variant, )+
        }

        impl OptionCategory for $name {
            const MASK: OptionBits = engine::$mask;

            fn bits(self) -> OptionBits {
                match self {
                    $( $name::$variant => engine::$bits, )+
                }
            }

            fn from_bits(bits: OptionBits) -> Option<Self> {
                match bits & Self::MASK {
                    $( value if value == engine::$bits => Some($name::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

option_category! {
    /// Processing mode. Can only be set on construction.
    ProcessMode in MASK_PROCESS {
        /// Two-pass processing: the whole input may be studied before it is processed.
        #[default]
        Offline = OPTION_PROCESS_OFFLINE,
        /// Single-pass streaming.
        RealTime = OPTION_PROCESS_REAL_TIME,
    }
}

option_category! {
    /// Phase handling at transients.
    Transients in MASK_TRANSIENTS {
        /// Reset all phases at transients.
        #[default]
        Crisp = OPTION_TRANSIENTS_CRISP,
        /// Reset only the phases of higher frequencies.
        Mixed = OPTION_TRANSIENTS_MIXED,
        /// Never reset phases.
        Smooth = OPTION_TRANSIENTS_SMOOTH,
    }
}

option_category! {
    /// Transient detector.
    Detector in MASK_DETECTOR {
        #[default]
        Compound = OPTION_DETECTOR_COMPOUND,
        Percussive = OPTION_DETECTOR_PERCUSSIVE,
        Soft = OPTION_DETECTOR_SOFT,
    }
}

option_category! {
    /// Phase continuity across frequency bins.
    Phase in MASK_PHASE {
        /// Lock bins to the phase of their spectral peak.
        #[default]
        Laminar = OPTION_PHASE_LAMINAR,
        /// Propagate every bin independently.
        Independent = OPTION_PHASE_INDEPENDENT,
    }
}

option_category! {
    /// Whether channels may be processed on worker threads. Can only be set on construction.
    Threading in MASK_THREADING {
        /// Use threads in offline mode with more than one channel.
        #[default]
        Auto = OPTION_THREADING_AUTO,
        Never = OPTION_THREADING_NEVER,
        Always = OPTION_THREADING_ALWAYS,
    }
}

option_category! {
    /// Analysis window length. Can only be set on construction.
    Window in MASK_WINDOW {
        #[default]
        Standard = OPTION_WINDOW_STANDARD,
        Short = OPTION_WINDOW_SHORT,
        Long = OPTION_WINDOW_LONG,
    }
}

option_category! {
    /// Spectral magnitude smoothing. Can only be set on construction.
    Smoothing in MASK_SMOOTHING {
        #[default]
        Off = OPTION_SMOOTHING_OFF,
        On = OPTION_SMOOTHING_ON,
    }
}

option_category! {
    /// Formant handling when pitch shifting.
    Formant in MASK_FORMANT {
        /// Formants move with the pitch.
        #[default]
        Shifted = OPTION_FORMANT_SHIFTED,
        /// Formants keep their position, or follow the session's formant scale.
        Preserved = OPTION_FORMANT_PRESERVED,
    }
}

option_category! {
    /// Pitch shifting method.
    PitchMode in MASK_PITCH {
        #[default]
        HighSpeed = OPTION_PITCH_HIGH_SPEED,
        HighQuality = OPTION_PITCH_HIGH_QUALITY,
        HighConsistency = OPTION_PITCH_HIGH_CONSISTENCY,
    }
}

option_category! {
    /// Stereo channel interaction. Can only be set on construction.
    ChannelMode in MASK_CHANNELS {
        /// Process every channel on its own.
        #[default]
        Apart = OPTION_CHANNELS_APART,
        /// Process stereo input as mid and side channels.
        Together = OPTION_CHANNELS_TOGETHER,
    }
}

option_category! {
    /// Processing engine variant. Can only be set on construction.
    EngineVariant in MASK_ENGINE {
        #[default]
        Faster = OPTION_ENGINE_FASTER,
        /// Higher overlap, reported as engine version 3.
        Finer = OPTION_ENGINE_FINER,
    }
}

// -------------------------------------------------------------------------------------------------

/// Named option combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    #[default]
    Default,
    /// Short window and independent phases.
    Percussive,
}

impl Preset {
    pub fn options(self) -> StretchOptions {
        let bits = match self {
            Preset::Default => engine::PRESET_DEFAULT,
            Preset::Percussive => engine::PRESET_PERCUSSIVE,
        };
        // presets are built from valid category values only
        StretchOptions::from_bits(bits).unwrap_or_default()
    }
}

// -------------------------------------------------------------------------------------------------

/// Stretch options: exactly one value per option category.
///
/// Options are passed to a session on construction. Afterwards, the categories which can be
/// changed on the fly are set via the session's setters.
///
/// ```rust
/// use elastic_rs::{Formant, PitchMode, ProcessMode, StretchOptions};
///
/// let options = StretchOptions::default()
///     .process_mode(ProcessMode::RealTime)
///     .pitch_mode(PitchMode::HighQuality)
///     .formant(Formant::Preserved);
/// assert_eq!(StretchOptions::from_bits(options.bits()), Ok(options));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StretchOptions {
    pub process_mode: ProcessMode,
    pub transients: Transients,
    pub detector: Detector,
    pub phase: Phase,
    pub threading: Threading,
    pub window: Window,
    pub smoothing: Smoothing,
    pub formant: Formant,
    pub pitch_mode: PitchMode,
    pub channel_mode: ChannelMode,
    pub engine: EngineVariant,
}

impl StretchOptions {
    /// Same as [`Preset::options`].
    pub fn preset(preset: Preset) -> Self {
        preset.options()
    }

    pub fn is_real_time(&self) -> bool {
        self.process_mode == ProcessMode::RealTime
    }

    pub fn process_mode(self, process_mode: ProcessMode) -> Self {
        Self {
            process_mode,
            ..self
        }
    }

    pub fn transients(self, transients: Transients) -> Self {
        Self { transients, ..self }
    }

    pub fn detector(self, detector: Detector) -> Self {
        Self { detector, ..self }
    }

    pub fn phase(self, phase: Phase) -> Self {
        Self { phase, ..self }
    }

    pub fn threading(self, threading: Threading) -> Self {
        Self { threading, ..self }
    }

    pub fn window(self, window: Window) -> Self {
        Self { window, ..self }
    }

    pub fn smoothing(self, smoothing: Smoothing) -> Self {
        Self { smoothing, ..self }
    }

    pub fn formant(self, formant: Formant) -> Self {
        Self { formant, ..self }
    }

    pub fn pitch_mode(self, pitch_mode: PitchMode) -> Self {
        Self { pitch_mode, ..self }
    }

    pub fn channel_mode(self, channel_mode: ChannelMode) -> Self {
        Self {
            channel_mode,
            ..self
        }
    }

    pub fn engine(self, engine: EngineVariant) -> Self {
        Self { engine, ..self }
    }

    /// Encodes the options in the engine's bit layout.
    pub fn bits(&self) -> OptionBits {
        self.process_mode.bits()
            | self.transients.bits()
            | self.detector.bits()
            | self.phase.bits()
            | self.threading.bits()
            | self.window.bits()
            | self.smoothing.bits()
            | self.formant.bits()
            | self.pitch_mode.bits()
            | self.channel_mode.bits()
            | self.engine.bits()
    }

    /// Decodes options from the engine's bit layout.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] for bits outside of all categories, or for two values
    /// set in a single category.
    pub fn from_bits(bits: OptionBits) -> Result<Self> {
        fn decode<C: OptionCategory>(bits: OptionBits) -> Result<C> {
            C::from_bits(bits).ok_or(Error::InvalidParameter {
                name: "options",
                value: bits as f64,
            })
        }
        if bits & !engine::MASK_ALL != 0 {
            return Err(Error::InvalidParameter {
                name: "options",
                value: bits as f64,
            });
        }
        Ok(Self {
            process_mode: decode(bits)?,
            transients: decode(bits)?,
            detector: decode(bits)?,
            phase: decode(bits)?,
            threading: decode(bits)?,
            window: decode(bits)?,
            smoothing: decode(bits)?,
            formant: decode(bits)?,
            pitch_mode: decode(bits)?,
            channel_mode: decode(bits)?,
            engine: decode(bits)?,
        })
    }
}

impl From<Preset> for StretchOptions {
    fn from(preset: Preset) -> Self {
        preset.options()
    }
}

// -------------------------------------------------------------------------------------------------
