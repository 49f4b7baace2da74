use std::collections::BTreeMap;

use elastic_engine::{default_log_level, Engine, LogLevel, Parameter, Stretcher};

use crate::buffer::{per_channel_slices, per_channel_slices_mut, AudioBuffer};
use crate::options::{Detector, Formant, OptionCategory, Phase, PitchMode, Transients};
use crate::params::*;
use crate::{Error, Result, SessionConfig, StretchOptions};

// -------------------------------------------------------------------------------------------------

/// Lifecycle state of a [`StretchSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Constructed or reset, no input seen yet.
    Configured,
    /// Offline mode: study chunks were passed, but not the final one.
    Studying,
    /// Offline mode: the final study chunk was passed.
    ReadyToProcess,
    /// Process chunks were passed, but not the final one.
    Processing,
    /// The final process chunk was passed and output is still pending.
    Draining,
    /// All output was retrieved.
    Finished,
}

/// Output availability of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Availability {
    /// Number of samples which can be retrieved right now. More may follow.
    Ready(usize),
    /// All output was retrieved and no further output will ever be produced.
    Finished,
}

impl Availability {
    /// Retrievable samples, with `Finished` counting as zero.
    pub fn sample_count(self) -> usize {
        match self {
            Availability::Ready(count) => count,
            Availability::Finished => 0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A time-stretching and pitch-shifting session, owning one engine instance.
///
/// Input is passed in via [`study`](Self::study) (offline mode only) and
/// [`process`](Self::process), and transformed output is pulled via
/// [`retrieve`](Self::retrieve) until the session is finished.
///
/// ```rust
/// use elastic_rs::{AudioBuffer, Preset, StretchSession};
///
/// let mut session = StretchSession::new(44100, 1, Preset::Default.into(), 2.0, 1.0)?;
/// let input = AudioBuffer::new(1, 4096, 0.0)?;
/// session.process(&input, true)?;
///
/// let mut output_length = 0;
/// while !session.is_finished() {
///     output_length += session.retrieve(1024)?.sample_count();
/// }
/// assert_eq!(output_length, 8192);
/// # Ok::<(), elastic_rs::Error>(())
/// ```
pub struct StretchSession {
    engine: Box<dyn Engine>,
    channels: usize,
    sample_rate: u32,
    options: StretchOptions,
    time_ratio: f64,
    pitch_scale: f64,
    formant_scale: f64,
    log_level: LogLevel,
    max_process_size: Option<usize>,
    expected_input_duration: Option<usize>,
    state: SessionState,
}

impl StretchSession {
    /// Creates a session with the built-in phase vocoder engine.
    ///
    /// # Errors
    /// Returns [`Error::OutOfRange`] for unsupported sample rates,
    /// [`Error::UnsupportedChannelCount`] for channel counts outside of `1..=MAX_CHANNELS` and
    /// [`Error::InvalidParameter`] for ratios outside of their supported ranges, see
    /// [`validate_stretch`](crate::params::validate_stretch).
    pub fn new(
        sample_rate: u32,
        channels: usize,
        options: StretchOptions,
        time_ratio: f64,
        pitch_scale: f64,
    ) -> Result<Self> {
        Self::from_config(&SessionConfig {
            sample_rate,
            channels,
            options,
            time_ratio,
            pitch_scale,
            ..SessionConfig::default()
        })
    }

    /// Creates a session with the built-in phase vocoder engine from a config.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        let engine = Stretcher::new(
            config.sample_rate,
            config.channels,
            config.options.bits(),
            config.time_ratio,
            config.pitch_scale,
        );
        Self::with_engine(config, Box::new(engine))
    }

    /// Creates a session which drives the given engine. The engine must have been created with
    /// the config's channel count and options.
    pub fn with_engine(config: &SessionConfig, mut engine: Box<dyn Engine>) -> Result<Self> {
        config.validate()?;
        if engine.channel_count() != config.channels {
            return Err(Error::UnsupportedChannelCount(engine.channel_count()));
        }

        let log_level = config.log_level.unwrap_or_else(default_log_level);
        engine.set_parameter(Parameter::LogLevel(log_level));
        engine.set_parameter(Parameter::TimeRatio(config.time_ratio));
        engine.set_parameter(Parameter::PitchScale(config.pitch_scale));
        if let Some(samples) = config.max_process_size {
            engine.set_parameter(Parameter::MaxProcessSize(samples));
        }

        tracing::debug!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            options = config.options.bits(),
            time_ratio = config.time_ratio,
            pitch_scale = config.pitch_scale,
            "created stretch session"
        );
        Ok(Self {
            engine,
            channels: config.channels,
            sample_rate: config.sample_rate,
            options: config.options,
            time_ratio: config.time_ratio,
            pitch_scale: config.pitch_scale,
            formant_scale: elastic_engine::FORMANT_SCALE_AUTO,
            log_level,
            max_process_size: config.max_process_size,
            expected_input_duration: None,
            state: SessionState::Configured,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Construction options, with all per-category changes made via setters applied.
    pub fn options(&self) -> StretchOptions {
        self.options
    }

    pub fn time_ratio(&self) -> f64 {
        self.time_ratio
    }

    pub fn pitch_scale(&self) -> f64 {
        self.pitch_scale
    }

    /// Formant scale, or [`FORMANT_SCALE_AUTO`](crate::FORMANT_SCALE_AUTO).
    pub fn formant_scale(&self) -> f64 {
        self.formant_scale
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn max_process_size(&self) -> Option<usize> {
        self.max_process_size
    }

    pub fn expected_input_duration(&self) -> Option<usize> {
        self.expected_input_duration
    }

    /// Version of the engine's processing algorithm.
    pub fn engine_version(&self) -> u32 {
        self.engine.engine_version()
    }

    /// Number of input samples the engine needs before it can produce more output.
    pub fn samples_required(&self) -> usize {
        self.engine.samples_required()
    }

    /// Leading output samples to discard in real-time mode. The built-in engine compensates its
    /// latency itself and reports zero.
    pub fn start_delay(&self) -> usize {
        self.engine.start_delay()
    }

    /// Silent samples which may be fed before the first input sample in real-time mode.
    pub fn preferred_start_pad(&self) -> usize {
        self.engine.preferred_start_pad()
    }

    /// Input samples consumed per analysis step.
    pub fn input_increment(&self) -> usize {
        self.engine.input_increment()
    }

    /// Frequency cutoff `index` (0..3) in Hz.
    pub fn frequency_cutoff(&self, index: usize) -> Result<f32> {
        validate_frequency_cutoff(index, 0.0, self.sample_rate)?;
        Ok(self.engine.frequency_cutoff(index))
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            SessionState::Draining if self.availability() == Availability::Finished => {
                SessionState::Finished
            }
            state => state,
        }
    }

    pub fn availability(&self) -> Availability {
        let available = self.engine.available();
        if available < 0 {
            Availability::Finished
        } else {
            Availability::Ready(available as usize)
        }
    }

    /// Number of samples which can be retrieved right now. Zero once finished.
    pub fn available_sample_count(&self) -> usize {
        self.availability().sample_count()
    }

    /// True once the final chunk was processed and all output was retrieved.
    pub fn is_finished(&self) -> bool {
        self.availability() == Availability::Finished
    }

    fn is_real_time(&self) -> bool {
        self.options.is_real_time()
    }

    fn has_processed(&self) -> bool {
        matches!(
            self.state,
            SessionState::Processing | SessionState::Draining | SessionState::Finished
        )
    }

    fn transition(&mut self, state: SessionState) {
        if self.state != state {
            tracing::trace!(from = ?self.state, to = ?state, "session state");
            self.state = state;
        }
    }

    // ---------------------------------------------------------------------------------------------

    /// Passes input to the offline analysis pass. Produces no output.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOperation`] in real-time mode, once processing started or after
    /// the final study chunk, and [`Error::InvalidShape`] when the buffer's channel count does
    /// not match the session.
    pub fn study(&mut self, input: &AudioBuffer, final_chunk: bool) -> Result<()> {
        if self.is_real_time() {
            return Err(Error::InvalidOperation(
                "study is only available in offline mode",
            ));
        }
        if self.has_processed() {
            return Err(Error::InvalidOperation("study after processing started"));
        }
        if self.state == SessionState::ReadyToProcess {
            return Err(Error::InvalidOperation("study after the final study chunk"));
        }
        let slices = per_channel_slices(input, self.channels)?;
        self.engine.study(&slices, final_chunk);
        self.transition(if final_chunk {
            SessionState::ReadyToProcess
        } else {
            SessionState::Studying
        });
        Ok(())
    }

    /// Passes a chunk of input to the engine. Set `final_chunk` for the last chunk.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOperation`] after the final chunk was processed,
    /// [`Error::InvalidShape`] when the buffer's channel count does not match the session and
    /// [`Error::ProcessSizeExceeded`] for chunks larger than the configured max process size.
    pub fn process(&mut self, input: &AudioBuffer, final_chunk: bool) -> Result<()> {
        if matches!(self.state, SessionState::Draining | SessionState::Finished) {
            return Err(Error::InvalidOperation("process after the final chunk"));
        }
        let slices = per_channel_slices(input, self.channels)?;
        if let Some(max) = self.max_process_size {
            if input.sample_count() > max {
                return Err(Error::ProcessSizeExceeded {
                    size: input.sample_count(),
                    max,
                });
            }
        }
        self.engine.process(&slices, final_chunk);
        self.transition(if final_chunk {
            SessionState::Draining
        } else {
            SessionState::Processing
        });
        Ok(())
    }

    /// Number of samples a call to [`retrieve`](Self::retrieve) with `max_wanted` returns.
    pub fn retrievable(&self, max_wanted: usize) -> usize {
        max_wanted.min(self.available_sample_count())
    }

    /// Moves up to `output.sample_count()` ready samples into `output`. Returns the number of
    /// samples written.
    pub fn retrieve_into(&mut self, output: &mut AudioBuffer) -> Result<usize> {
        let mut slices = per_channel_slices_mut(output, self.channels)?;
        let count = if output_capacity(&slices) == 0 || self.available_sample_count() == 0 {
            0
        } else {
            self.engine.retrieve(&mut slices)
        };
        tracing::trace!(count, "retrieved samples");
        Ok(count)
    }

    /// Pulls up to `max_wanted` samples of output. The returned buffer holds exactly the
    /// samples which were retrieved, which is zero once the session is finished.
    ///
    /// # Errors
    /// Returns [`Error::Allocation`] when the output buffer can not be allocated.
    pub fn retrieve(&mut self, max_wanted: usize) -> Result<AudioBuffer> {
        let count = self.retrievable(max_wanted);
        let mut output = AudioBuffer::new(self.channels, count, 0.0)?;
        let retrieved = self.retrieve_into(&mut output)?;
        debug_assert_eq!(retrieved, count);
        Ok(output)
    }

    /// Drops all input and output and returns to [`SessionState::Configured`]. Channel count,
    /// sample rate, options and parameters are kept.
    pub fn reset(&mut self) {
        self.engine.reset();
        self.transition(SessionState::Configured);
    }

    // ---------------------------------------------------------------------------------------------

    /// Sets the output duration relative to the input duration. In offline mode, the ratio can
    /// only be changed before processing starts.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] for ratios outside of
    /// [`MIN_TIME_RATIO`]..=[`MAX_TIME_RATIO`], or when the product with the current pitch scale
    /// leaves [`MIN_STRETCH`]..=[`MAX_STRETCH`].
    pub fn set_time_ratio(&mut self, ratio: f64) -> Result<()> {
        let (ratio, _) = validate_stretch(ratio, self.pitch_scale)?;
        self.check_not_processing_offline("time ratio can not change while processing offline")?;
        self.engine.set_parameter(Parameter::TimeRatio(ratio));
        self.time_ratio = ratio;
        Ok(())
    }

    /// Sets the pitch as frequency multiplier. In offline mode, the scale can only be changed
    /// before processing starts.
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] for scales outside of
    /// [`MIN_PITCH_SCALE`]..=[`MAX_PITCH_SCALE`], or when the product with the current time ratio
    /// leaves [`MIN_STRETCH`]..=[`MAX_STRETCH`].
    pub fn set_pitch_scale(&mut self, scale: f64) -> Result<()> {
        let (_, scale) = validate_stretch(self.time_ratio, scale)?;
        self.check_not_processing_offline("pitch scale can not change while processing offline")?;
        self.engine.set_parameter(Parameter::PitchScale(scale));
        self.pitch_scale = scale;
        Ok(())
    }

    /// Sets the formant envelope scale used with [`Formant::Preserved`], or
    /// [`FORMANT_SCALE_AUTO`](crate::FORMANT_SCALE_AUTO).
    pub fn set_formant_scale(&mut self, scale: f64) -> Result<()> {
        let scale = validate_formant_scale(scale)?;
        self.engine.set_parameter(Parameter::FormantScale(scale));
        self.formant_scale = scale;
        Ok(())
    }

    /// Real-time mode only.
    pub fn set_transients(&mut self, transients: Transients) -> Result<()> {
        self.check_real_time("transients can only change in real-time mode")?;
        self.set_option(transients);
        self.options.transients = transients;
        Ok(())
    }

    /// Real-time mode only.
    pub fn set_detector(&mut self, detector: Detector) -> Result<()> {
        self.check_real_time("detector can only change in real-time mode")?;
        self.set_option(detector);
        self.options.detector = detector;
        Ok(())
    }

    /// Real-time mode only.
    pub fn set_pitch_mode(&mut self, pitch_mode: PitchMode) -> Result<()> {
        self.check_real_time("pitch mode can only change in real-time mode")?;
        self.set_option(pitch_mode);
        self.options.pitch_mode = pitch_mode;
        Ok(())
    }

    pub fn set_phase(&mut self, phase: Phase) -> Result<()> {
        self.set_option(phase);
        self.options.phase = phase;
        Ok(())
    }

    pub fn set_formant(&mut self, formant: Formant) -> Result<()> {
        self.set_option(formant);
        self.options.formant = formant;
        Ok(())
    }

    /// Sets frequency cutoff `index` (0..3) in Hz, between 0 and the Nyquist frequency.
    pub fn set_frequency_cutoff(&mut self, index: usize, hz: f64) -> Result<()> {
        let hz = validate_frequency_cutoff(index, hz, self.sample_rate)?;
        self.engine
            .set_parameter(Parameter::FrequencyCutoff { index, hz });
        Ok(())
    }

    /// Tells an offline engine how many samples will be processed in total, when no study pass
    /// is done. Only before processing starts.
    pub fn set_expected_input_duration(&mut self, samples: usize) -> Result<()> {
        self.check_offline_setup("expected input duration is only used before processing offline")?;
        self.engine
            .set_parameter(Parameter::ExpectedInputDuration(samples));
        self.expected_input_duration = Some(samples);
        Ok(())
    }

    /// Limits the size of chunks passed to [`process`](Self::process). Only before processing
    /// starts.
    pub fn set_max_process_size(&mut self, samples: usize) -> Result<()> {
        let samples = validate_max_process_size(samples)?;
        if self.has_processed() {
            return Err(Error::InvalidOperation(
                "max process size can only change before processing",
            ));
        }
        self.engine.set_parameter(Parameter::MaxProcessSize(samples));
        self.max_process_size = Some(samples);
        Ok(())
    }

    /// Maps input sample positions to output sample positions, varying the time ratio between
    /// key frames. Offline mode only, before processing starts.
    pub fn set_key_frame_map(&mut self, map: BTreeMap<usize, usize>) -> Result<()> {
        validate_key_frame_map(&map)?;
        self.check_offline_setup("key frames are only used before processing offline")?;
        tracing::debug!(key_frames = map.len(), "setting key frame map");
        self.engine.set_parameter(Parameter::KeyFrameMap(map));
        Ok(())
    }

    /// Overrides the process wide default log level for this session.
    pub fn set_log_level(&mut self, level: LogLevel) {
        self.engine.set_parameter(Parameter::LogLevel(level));
        self.log_level = level;
    }

    fn set_option<C: OptionCategory>(&mut self, value: C) {
        self.engine.set_parameter(Parameter::Options {
            mask: C::MASK,
            bits: value.bits(),
        });
    }

    fn check_real_time(&self, message: &'static str) -> Result<()> {
        if !self.is_real_time() {
            return Err(Error::InvalidOperation(message));
        }
        Ok(())
    }

    fn check_not_processing_offline(&self, message: &'static str) -> Result<()> {
        if !self.is_real_time() && self.has_processed() {
            return Err(Error::InvalidOperation(message));
        }
        Ok(())
    }

    fn check_offline_setup(&self, message: &'static str) -> Result<()> {
        if self.is_real_time() || self.has_processed() {
            return Err(Error::InvalidOperation(message));
        }
        Ok(())
    }
}

impl std::fmt::Debug for StretchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StretchSession")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("options", &self.options)
            .field("time_ratio", &self.time_ratio)
            .field("pitch_scale", &self.pitch_scale)
            .field("state", &self.state())
            .finish()
    }
}

fn output_capacity(slices: &[&mut [f32]]) -> usize {
    slices.iter().map(|slice| slice.len()).min().unwrap_or(0)
}

// -------------------------------------------------------------------------------------------------
