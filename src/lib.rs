#![doc=include_str!("../README.md")]

// -------------------------------------------------------------------------------------------------

/// Largest supported channel count.
pub const MAX_CHANNELS: usize = 8;

/// Lowest supported sample rate in Hz.
pub const MIN_SAMPLE_RATE: u32 = 8000;
/// Highest supported sample rate in Hz.
pub const MAX_SAMPLE_RATE: u32 = 192_000;

pub use elastic_engine::{Engine, LogLevel, Parameter, FORMANT_SCALE_AUTO};

/// Sets the log level of sessions which get created afterwards. Sessions which already exist
/// keep their level, see [`StretchSession::set_log_level`].
///
/// This is process wide state: the last call wins. The initial level is [`LogLevel::Errors`].
pub fn set_default_logging_level(level: LogLevel) {
    elastic_engine::set_default_log_level(level)
}

// -------------------------------------------------------------------------------------------------

mod error;
pub use error::{Error, Result};

mod buffer;
pub use buffer::{
    allocate_output_buffer, per_channel_slices, per_channel_slices_mut, AudioBuffer,
    ChannelSlices, ChannelSlicesMut, CHANNEL_AXIS, DTYPE_NAME, SAMPLE_AXIS,
};

mod options;
pub use options::{
    ChannelMode, Detector, EngineVariant, Formant, OptionCategory, Phase, PitchMode, Preset,
    ProcessMode, Smoothing, StretchOptions, Threading, Transients, Window,
};

pub mod params;

mod config;
pub use config::SessionConfig;

mod session;
pub use session::{Availability, SessionState, StretchSession};

mod host;
pub use host::{HostGuard, HostLock, SharedSession};
