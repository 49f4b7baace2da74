use std::collections::{BTreeMap, VecDeque};

use rayon::prelude::*;
use rustfft::FftPlanner;

use crate::resampler::{Interpolation, Resampler};
use crate::vocoder::{Detector, FrameParams, Vocoder};
use crate::*;

// -------------------------------------------------------------------------------------------------

/// Default band limits in Hz, see [`Parameter::FrequencyCutoff`].
const DEFAULT_FREQUENCY_CUTOFFS: [f32; FREQUENCY_CUTOFF_COUNT] = [600.0, 1200.0, 12000.0];

/// Per-channel processing state.
struct Channel {
    input: VecDeque<f32>,
    vocoder: Vocoder,
    resampler: Resampler,
    synthesised: Vec<f32>,
    output: VecDeque<f32>,
    /// Synthesised samples still to drop to compensate the analysis window's latency.
    start_skip: usize,
}

impl Channel {
    fn new(planner: &mut FftPlanner<f32>, fft_size: usize, hop: usize) -> Self {
        let mut channel = Channel {
            input: VecDeque::with_capacity(fft_size * 2),
            vocoder: Vocoder::new(planner, fft_size, hop),
            resampler: Resampler::new(),
            synthesised: Vec::with_capacity(fft_size),
            output: VecDeque::new(),
            start_skip: 0,
        };
        channel.reset(fft_size);
        channel
    }

    fn reset(&mut self, fft_size: usize) {
        // centre the first analysis frame on the first input sample
        self.input.clear();
        self.input.resize(fft_size / 2, 0.0);
        self.vocoder.reset();
        self.resampler.reset();
        self.synthesised.clear();
        self.output.clear();
        self.start_skip = fft_size / 2;
    }

    fn run_frame(&mut self, fft_size: usize, hop: usize, frame: &FrameParams, pitch: &PitchParams) {
        if self.input.len() < fft_size {
            self.input.resize(fft_size, 0.0);
        }
        self.synthesised.clear();
        let input = self.input.make_contiguous();
        self.vocoder
            .process_frame(&input[..fft_size], frame, &mut self.synthesised);
        self.input.drain(..hop);
        self.emit(pitch);
    }

    fn flush(&mut self, pitch: &PitchParams) {
        self.synthesised.clear();
        self.vocoder.flush(&mut self.synthesised);
        self.emit(pitch);
        self.resampler.flush(&mut self.output);
    }

    fn emit(&mut self, pitch: &PitchParams) {
        let skip = self.start_skip.min(self.synthesised.len());
        self.start_skip -= skip;
        self.resampler.push(
            &self.synthesised[skip..],
            pitch.scale,
            pitch.interpolation,
            &mut self.output,
        );
    }
}

#[derive(Debug, Clone, Copy)]
struct PitchParams {
    scale: f64,
    interpolation: Interpolation,
}

// -------------------------------------------------------------------------------------------------

/// Offline analysis pass over a mono mix of the studied input. Runs the same analysis frames as
/// processing does and records which of them are transients.
struct Study {
    input: VecDeque<f32>,
    vocoder: Vocoder,
    transients: Vec<bool>,
    /// Analysis position of the next frame, in input samples.
    position: usize,
}

impl Study {
    fn new(fft_size: usize, hop: usize) -> Self {
        let mut planner = FftPlanner::new();
        let mut input = VecDeque::with_capacity(fft_size * 2);
        input.resize(fft_size / 2, 0.0);
        Self {
            input,
            vocoder: Vocoder::new(&mut planner, fft_size, hop),
            transients: Vec::new(),
            position: 0,
        }
    }

    fn push(&mut self, input: &[&[f32]], len: usize) {
        let gain = 1.0 / input.len().max(1) as f32;
        for index in 0..len {
            let sum: f32 = input.iter().map(|samples| samples[index]).sum();
            self.input.push_back(sum * gain);
        }
    }

    fn run_frame(&mut self, fft_size: usize, hop: usize, detector: Detector) {
        if self.input.len() < fft_size {
            self.input.resize(fft_size, 0.0);
        }
        let input = self.input.make_contiguous();
        let transient = self.vocoder.analyse(&input[..fft_size], detector);
        self.transients.push(transient);
        self.input.drain(..hop);
        self.position += hop;
    }
}

// -------------------------------------------------------------------------------------------------

/// Phase vocoder time-stretcher and pitch-shifter.
///
/// Pitch shifting stretches by `time_ratio * pitch_scale` and resamples the result by
/// `pitch_scale`. The total output length is the sum of every processed chunk's length times the
/// time ratio that was active when the chunk was processed.
pub struct Stretcher {
    sample_rate: u32,
    options: OptionBits,
    fft_size: usize,
    hop: usize,
    time_ratio: f64,
    pitch_scale: f64,
    formant_scale: f64,
    frequency_cutoffs: [f32; FREQUENCY_CUTOFF_COUNT],
    log_level: LogLevel,
    expected_input_duration: Option<usize>,
    max_process_size: Option<usize>,
    key_frames: BTreeMap<usize, usize>,
    channels: Vec<Channel>,
    studied: usize,
    study: Option<Study>,
    /// Transient flag per analysis frame, available once the final study chunk was passed.
    transient_profile: Option<Vec<bool>>,
    input_total: usize,
    /// Analysis position of the next frame, in input samples.
    analysis_position: usize,
    synthesis_clock: f64,
    synthesis_position: usize,
    output_target: f64,
    retrieved: usize,
    final_chunk: bool,
}

impl Stretcher {
    /// Creates a stretcher. Arguments are not validated, see `elastic-rs` for a checked API.
    pub fn new(
        sample_rate: u32,
        channel_count: usize,
        options: OptionBits,
        time_ratio: f64,
        pitch_scale: f64,
    ) -> Self {
        let time_ratio = clamp_ratio("time ratio", time_ratio, MIN_TIME_RATIO, MAX_TIME_RATIO);
        let pitch_scale = clamp_ratio("pitch scale", pitch_scale, MIN_PITCH_SCALE, MAX_PITCH_SCALE);
        let fft_size = fft_size(options, sample_rate);
        let hop = if options & MASK_ENGINE == OPTION_ENGINE_FINER {
            fft_size / 8
        } else {
            fft_size / 4
        };

        let mut planner = FftPlanner::new();
        let channels = (0..channel_count)
            .map(|_| Channel::new(&mut planner, fft_size, hop))
            .collect();

        let stretcher = Stretcher {
            sample_rate,
            options,
            fft_size,
            hop,
            time_ratio,
            pitch_scale,
            formant_scale: FORMANT_SCALE_AUTO,
            frequency_cutoffs: DEFAULT_FREQUENCY_CUTOFFS,
            log_level: default_log_level(),
            expected_input_duration: None,
            max_process_size: None,
            key_frames: BTreeMap::new(),
            channels,
            studied: 0,
            study: None,
            transient_profile: None,
            input_total: 0,
            analysis_position: 0,
            synthesis_clock: 0.0,
            synthesis_position: 0,
            output_target: 0.0,
            retrieved: 0,
            final_chunk: false,
        };
        if stretcher.log_level >= LogLevel::Setup {
            tracing::debug!(
                sample_rate,
                channel_count,
                options,
                fft_size,
                hop,
                time_ratio,
                pitch_scale,
                "created stretcher"
            );
        }
        stretcher
    }

    /// FFT size used by the analysis window.
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn is_real_time(&self) -> bool {
        self.options & MASK_PROCESS == OPTION_PROCESS_REAL_TIME
    }

    fn channels_together(&self) -> bool {
        self.channels.len() == 2 && self.options & MASK_CHANNELS == OPTION_CHANNELS_TOGETHER
    }

    fn parallel(&self) -> bool {
        if self.channels.len() < 2 {
            return false;
        }
        match self.options & MASK_THREADING {
            OPTION_THREADING_NEVER => false,
            OPTION_THREADING_ALWAYS => true,
            _ => !self.is_real_time(),
        }
    }

    fn detector(&self) -> Detector {
        match self.options & MASK_DETECTOR {
            OPTION_DETECTOR_PERCUSSIVE => Detector::Percussive,
            OPTION_DETECTOR_SOFT => Detector::Soft,
            _ => Detector::Compound,
        }
    }

    /// Studied transient flag for the frame centred on input sample `position`. `None` when
    /// transients are detected while processing.
    fn studied_transient(&self, position: usize) -> Option<bool> {
        if self.is_real_time() {
            return None;
        }
        let profile = self.transient_profile.as_ref()?;
        Some(profile.get(position / self.hop).copied().unwrap_or(false))
    }

    fn bin_of(&self, hz: f32) -> usize {
        (hz * self.fft_size as f32 / self.sample_rate as f32).round() as usize
    }

    /// Time ratio for the frame centred on input sample `position`.
    fn frame_ratio(&self, position: usize) -> f64 {
        if self.key_frames.is_empty() || self.is_real_time() {
            return self.time_ratio;
        }
        let total_in = if self.studied > 0 {
            self.studied
        } else {
            match self.expected_input_duration {
                Some(duration) => duration,
                None => return self.time_ratio,
            }
        };
        let total_out = (total_in as f64 * self.time_ratio).round() as usize;

        let (in0, out0) = self
            .key_frames
            .range(..=position)
            .next_back()
            .map(|(i, o)| (*i, *o))
            .unwrap_or((0, 0));
        let (in1, out1) = self
            .key_frames
            .range(position + 1..)
            .next()
            .map(|(i, o)| (*i, *o))
            .filter(|(i, _)| *i <= total_in)
            .unwrap_or((total_in, total_out));
        if in1 <= in0 || out1 < out0 {
            return self.time_ratio;
        }
        ((out1 - out0) as f64 / (in1 - in0) as f64).max(f64::EPSILON)
    }

    fn frame_params(&mut self) -> (FrameParams, PitchParams) {
        let ratio = self.frame_ratio(self.analysis_position);
        let scale = (ratio * self.pitch_scale).clamp(MIN_STRETCH, MAX_STRETCH);
        self.synthesis_clock += self.hop as f64 * scale;
        let next_position = self.synthesis_clock.round() as usize;
        let synthesis_hop = next_position.saturating_sub(self.synthesis_position);
        self.synthesis_position = next_position;

        let gain = ((self.hop as f64 * scale) / (0.375 * self.fft_size as f64)).min(1.0) as f32;
        let lock_limit = (self.options & MASK_PHASE == OPTION_PHASE_LAMINAR)
            .then(|| self.bin_of(self.frequency_cutoffs[2]));
        let reset_from = match self.options & MASK_TRANSIENTS {
            OPTION_TRANSIENTS_SMOOTH => None,
            OPTION_TRANSIENTS_MIXED => Some(self.bin_of(self.frequency_cutoffs[0])),
            _ => Some(0),
        };
        let formant_warp = if self.options & MASK_FORMANT == OPTION_FORMANT_PRESERVED {
            if self.formant_scale == FORMANT_SCALE_AUTO {
                (1.0 / self.pitch_scale) as f32
            } else {
                self.formant_scale as f32
            }
        } else {
            1.0
        };

        let frame = FrameParams {
            synthesis_hop,
            gain,
            lock_limit,
            reset_from,
            detector: self.detector(),
            transient: self.studied_transient(self.analysis_position),
            smoothing: self.options & MASK_SMOOTHING == OPTION_SMOOTHING_ON,
            formant_warp,
        };
        (frame, self.pitch_params())
    }

    fn pitch_params(&self) -> PitchParams {
        let interpolation = match self.options & MASK_PITCH {
            OPTION_PITCH_HIGH_SPEED => Interpolation::Linear,
            _ => Interpolation::Cubic,
        };
        PitchParams {
            scale: self.pitch_scale,
            interpolation,
        }
    }

    fn push_input(&mut self, input: &[&[f32]], len: usize) {
        if self.channels_together() {
            if let [left, right] = input {
                let (mid, side) = self.channels.split_at_mut(1);
                for (l, r) in left[..len].iter().zip(&right[..len]) {
                    mid[0].input.push_back((l + r) * 0.5);
                    side[0].input.push_back((l - r) * 0.5);
                }
                return;
            }
        }
        for (channel, samples) in self.channels.iter_mut().zip(input) {
            channel.input.extend(&samples[..len]);
        }
    }

    fn run_frames(&mut self) {
        let fft_size = self.fft_size;
        while self
            .channels
            .first()
            .is_some_and(|channel| channel.input.len() >= fft_size)
        {
            self.run_frame();
        }
    }

    fn run_frame(&mut self) {
        let (frame, pitch) = self.frame_params();
        if self.log_level >= LogLevel::Frames {
            tracing::trace!(
                position = self.analysis_position,
                synthesis_hop = frame.synthesis_hop,
                "analysis frame"
            );
        }
        let (fft_size, hop) = (self.fft_size, self.hop);
        let run = |channel: &mut Channel| channel.run_frame(fft_size, hop, &frame, &pitch);
        if self.parallel() {
            self.channels.par_iter_mut().for_each(run);
        } else {
            self.channels.iter_mut().for_each(run);
        }
        self.analysis_position += hop;
    }

    /// Runs the frames covering the tail of the input and trims the output to its final length.
    fn finish(&mut self) {
        // frames are centred on `analysis_position`; continue until the last one touching the
        // input has been synthesised
        while self.analysis_position < self.input_total + self.fft_size / 2 {
            self.run_frame();
        }
        let pitch = self.pitch_params();
        for channel in &mut self.channels {
            channel.flush(&pitch);
        }

        let remaining = self.target_total().saturating_sub(self.retrieved);
        for channel in &mut self.channels {
            channel.output.resize(remaining, 0.0);
        }
        if self.log_level >= LogLevel::Process {
            tracing::debug!(
                input = self.input_total,
                output = self.target_total(),
                "final chunk processed"
            );
        }
    }

    fn target_total(&self) -> usize {
        self.output_target.round() as usize
    }

    fn ready(&self) -> usize {
        let ready = self.channels.first().map_or(0, |channel| channel.output.len());
        ready.min(self.target_total().saturating_sub(self.retrieved))
    }
}

impl Engine for Stretcher {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn engine_version(&self) -> u32 {
        if self.options & MASK_ENGINE == OPTION_ENGINE_FINER {
            3
        } else {
            2
        }
    }

    fn samples_required(&self) -> usize {
        if self.final_chunk {
            return 0;
        }
        self.channels
            .first()
            .map_or(0, |channel| self.fft_size.saturating_sub(channel.input.len()))
    }

    fn frequency_cutoff(&self, index: usize) -> f32 {
        self.frequency_cutoffs.get(index).copied().unwrap_or(0.0)
    }

    fn start_delay(&self) -> usize {
        // the first half window of output is dropped internally
        0
    }

    fn preferred_start_pad(&self) -> usize {
        self.fft_size / 2
    }

    fn input_increment(&self) -> usize {
        self.hop
    }

    fn set_parameter(&mut self, parameter: Parameter) {
        if self.log_level >= LogLevel::Setup {
            tracing::debug!(?parameter, "set parameter");
        }
        match parameter {
            Parameter::TimeRatio(ratio) => {
                self.time_ratio = clamp_ratio("time ratio", ratio, MIN_TIME_RATIO, MAX_TIME_RATIO)
            }
            Parameter::PitchScale(scale) => {
                self.pitch_scale =
                    clamp_ratio("pitch scale", scale, MIN_PITCH_SCALE, MAX_PITCH_SCALE)
            }
            Parameter::FormantScale(scale) => self.formant_scale = scale,
            Parameter::Options { mask, bits } => {
                if mask & !MASK_RUNTIME != 0 {
                    tracing::warn!(
                        mask,
                        "ignoring options which can only be set on construction"
                    );
                }
                let mask = mask & MASK_RUNTIME;
                self.options = (self.options & !mask) | (bits & mask);
            }
            Parameter::FrequencyCutoff { index, hz } => {
                if let Some(cutoff) = self.frequency_cutoffs.get_mut(index) {
                    *cutoff = hz;
                }
            }
            Parameter::ExpectedInputDuration(samples) => {
                self.expected_input_duration = Some(samples)
            }
            Parameter::MaxProcessSize(samples) => self.max_process_size = Some(samples),
            Parameter::KeyFrameMap(map) => self.key_frames = map,
            Parameter::LogLevel(level) => self.log_level = level,
        }
    }

    fn study(&mut self, input: &[&[f32]], final_chunk: bool) {
        if self.is_real_time() {
            tracing::warn!("study called on a real-time stretcher, ignoring");
            return;
        }
        if self.transient_profile.is_some() {
            tracing::warn!("study called after the final study chunk, ignoring");
            return;
        }
        let len = input.iter().map(|samples| samples.len()).min().unwrap_or(0);
        self.studied += len;

        let (fft_size, hop, detector) = (self.fft_size, self.hop, self.detector());
        let study = self.study.get_or_insert_with(|| Study::new(fft_size, hop));
        study.push(input, len);
        while study.input.len() >= fft_size {
            study.run_frame(fft_size, hop, detector);
        }
        if final_chunk {
            while study.position < self.studied + fft_size / 2 {
                study.run_frame(fft_size, hop, detector);
            }
            let profile = std::mem::take(&mut study.transients);
            self.study = None;
            if self.log_level >= LogLevel::Setup {
                tracing::debug!(
                    frames = profile.len(),
                    transients = profile.iter().filter(|transient| **transient).count(),
                    "study finished"
                );
            }
            self.transient_profile = Some(profile);
        }
        if self.log_level >= LogLevel::Process {
            tracing::debug!(samples = len, total = self.studied, final_chunk, "study");
        }
    }

    fn process(&mut self, input: &[&[f32]], final_chunk: bool) {
        if self.final_chunk {
            tracing::warn!("process called after the final chunk, ignoring");
            return;
        }
        let len = input.iter().map(|samples| samples.len()).min().unwrap_or(0);
        if let Some(max) = self.max_process_size.filter(|max| len > *max) {
            tracing::warn!(samples = len, max, "process size exceeds the configured maximum");
        }
        if !self.is_real_time()
            && self.transient_profile.is_none()
            && self.input_total == 0
            && self.log_level >= LogLevel::Setup
        {
            tracing::debug!("processing offline without a completed study pass");
        }

        self.push_input(input, len);
        self.input_total += len;
        self.output_target += len as f64 * self.time_ratio;
        self.run_frames();

        if final_chunk {
            self.final_chunk = true;
            self.finish();
        }
        if self.log_level >= LogLevel::Process {
            tracing::debug!(samples = len, final_chunk, available = self.ready(), "process");
        }
    }

    fn available(&self) -> isize {
        let ready = self.ready();
        if self.final_chunk && ready == 0 {
            AVAILABLE_FINISHED
        } else {
            ready as isize
        }
    }

    fn retrieve(&mut self, output: &mut [&mut [f32]]) -> usize {
        let wanted = output.iter().map(|samples| samples.len()).min().unwrap_or(0);
        let count = wanted.min(self.ready());

        for (channel, samples) in self.channels.iter_mut().zip(output.iter_mut()) {
            for (dst, src) in samples[..count].iter_mut().zip(channel.output.drain(..count)) {
                *dst = src;
            }
        }
        if self.channels_together() {
            if let [left, right] = output {
                for (l, r) in left[..count].iter_mut().zip(right[..count].iter_mut()) {
                    let (mid, side) = (*l, *r);
                    *l = mid + side;
                    *r = mid - side;
                }
            }
        }

        self.retrieved += count;
        if self.log_level >= LogLevel::Process {
            tracing::debug!(wanted, retrieved = count, "retrieve");
        }
        count
    }

    fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset(self.fft_size);
        }
        self.studied = 0;
        self.study = None;
        self.transient_profile = None;
        self.input_total = 0;
        self.analysis_position = 0;
        self.synthesis_clock = 0.0;
        self.synthesis_position = 0;
        self.output_target = 0.0;
        self.retrieved = 0;
        self.final_chunk = false;
        if self.log_level >= LogLevel::Setup {
            tracing::debug!("reset");
        }
    }
}

/// Clamps a ratio to its supported range. NaN falls back to 1.0.
fn clamp_ratio(parameter: &'static str, value: f64, min: f64, max: f64) -> f64 {
    let clamped = if value.is_nan() {
        1.0
    } else {
        value.clamp(min, max)
    };
    if clamped != value {
        tracing::warn!(parameter, value, clamped, "ratio outside of the supported range");
    }
    clamped
}

/// Analysis window size for the window option, scaled to the sample rate.
fn fft_size(options: OptionBits, sample_rate: u32) -> usize {
    let base = match options & MASK_WINDOW {
        OPTION_WINDOW_SHORT => 1024,
        OPTION_WINDOW_LONG => 4096,
        _ => 2048,
    };
    let scaled = base as f64 * sample_rate as f64 / 48000.0;
    (scaled.max(256.0) as usize).next_power_of_two()
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(len: usize, hz: f32, sample_rate: u32) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * hz * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    fn drain(stretcher: &mut Stretcher) -> Vec<Vec<f32>> {
        let channels = stretcher.channel_count();
        let mut result = vec![Vec::new(); channels];
        while stretcher.available() > 0 {
            let count = stretcher.available() as usize;
            let mut buffers = vec![vec![0.0f32; count]; channels];
            let mut slices: Vec<&mut [f32]> =
                buffers.iter_mut().map(|b| b.as_mut_slice()).collect();
            assert_eq!(stretcher.retrieve(&mut slices), count);
            for (all, chunk) in result.iter_mut().zip(buffers) {
                all.extend(chunk);
            }
        }
        result
    }

    fn stretch(stretcher: &mut Stretcher, input: &[Vec<f32>], chunk: usize) -> Vec<Vec<f32>> {
        let len = input[0].len();
        let mut output = vec![Vec::new(); input.len()];
        let mut start = 0;
        loop {
            let end = (start + chunk).min(len);
            let slices: Vec<&[f32]> = input.iter().map(|c| &c[start..end]).collect();
            stretcher.process(&slices, end == len);
            for (all, chunk) in output.iter_mut().zip(drain(stretcher)) {
                all.extend(chunk);
            }
            if end == len {
                break;
            }
            start = end;
        }
        output
    }

    #[test]
    fn fft_size_follows_window_and_rate() {
        assert_eq!(fft_size(OPTION_WINDOW_STANDARD, 48000), 2048);
        assert_eq!(fft_size(OPTION_WINDOW_STANDARD, 44100), 2048);
        assert_eq!(fft_size(OPTION_WINDOW_SHORT, 48000), 1024);
        assert_eq!(fft_size(OPTION_WINDOW_LONG, 96000), 8192);
        assert_eq!(fft_size(OPTION_WINDOW_SHORT, 8000), 256);
    }

    #[test]
    fn finishes_immediately_without_input() {
        let mut stretcher = Stretcher::new(44100, 2, PRESET_DEFAULT, 1.0, 1.0);
        assert_eq!(stretcher.available(), 0);
        let empty: &[f32] = &[];
        stretcher.process(&[empty, empty], true);
        assert_eq!(stretcher.available(), AVAILABLE_FINISHED);
    }

    #[test]
    fn output_length_follows_time_ratio() {
        for (ratio, pitch) in [(1.0, 1.0), (2.0, 1.0), (0.5, 1.0), (1.0, 1.5), (1.3, 0.8)] {
            let mut stretcher = Stretcher::new(44100, 1, PRESET_DEFAULT, ratio, pitch);
            let input = vec![sine(10_000, 440.0, 44100)];
            let output = stretch(&mut stretcher, &input, 1024);
            assert_eq!(
                output[0].len(),
                (10_000.0 * ratio).round() as usize,
                "ratio {ratio}, pitch {pitch}"
            );
            assert_eq!(stretcher.available(), AVAILABLE_FINISHED);
        }
    }

    #[test]
    fn unit_ratio_reproduces_input() {
        let mut stretcher = Stretcher::new(44100, 1, OPTION_PHASE_INDEPENDENT, 1.0, 1.0);
        let input = vec![sine(16_384, 440.0, 44100)];
        let output = stretch(&mut stretcher, &input, 512);
        // compare away from the edges, where the window fades in and out
        for i in 4096..12_288 {
            assert!(
                (output[0][i] - input[0][i]).abs() < 0.05,
                "sample {i}: {} != {}",
                output[0][i],
                input[0][i]
            );
        }
    }

    #[test]
    fn reset_reproduces_output_length() {
        let mut stretcher = Stretcher::new(44100, 2, PRESET_PERCUSSIVE, 1.7, 1.2);
        let input = vec![sine(5_000, 220.0, 44100), sine(5_000, 330.0, 44100)];
        let first = stretch(&mut stretcher, &input, 700);
        stretcher.reset();
        assert_eq!(stretcher.available(), 0);
        let second = stretch(&mut stretcher, &input, 700);
        assert_eq!(first[0].len(), second[0].len());
        assert_eq!(first, second);
    }

    #[test]
    fn threading_does_not_change_output() {
        let input = vec![sine(6_000, 220.0, 48000), sine(6_000, 440.0, 48000)];
        let mut sequential = Stretcher::new(48000, 2, OPTION_THREADING_NEVER, 1.5, 1.0);
        let mut parallel = Stretcher::new(48000, 2, OPTION_THREADING_ALWAYS, 1.5, 1.0);
        assert_eq!(
            stretch(&mut sequential, &input, 1000),
            stretch(&mut parallel, &input, 1000)
        );
    }

    #[test]
    fn channels_together_round_trips_stereo() {
        let mut stretcher = Stretcher::new(44100, 2, OPTION_CHANNELS_TOGETHER, 1.0, 1.0);
        let left = sine(16_384, 440.0, 44100);
        let right: Vec<f32> = left.iter().map(|s| s * 0.5).collect();
        let output = stretch(&mut stretcher, &[left.clone(), right.clone()], 2048);
        assert_eq!(output[0].len(), left.len());
        for i in 4096..12_288 {
            assert!((output[0][i] - left[i]).abs() < 0.05);
            assert!((output[1][i] - right[i]).abs() < 0.05);
        }
    }

    #[test]
    fn time_ratio_changes_apply_to_later_chunks() {
        let mut stretcher = Stretcher::new(16000, 1, OPTION_PROCESS_REAL_TIME, 1.0, 1.0);
        let chunk = vec![0.1f32; 1000];
        stretcher.process(&[chunk.as_slice()], false);
        stretcher.set_parameter(Parameter::TimeRatio(0.5));
        stretcher.process(&[chunk.as_slice()], true);
        let output = drain(&mut stretcher);
        assert_eq!(output[0].len(), 1500);
    }

    #[test]
    fn key_frames_keep_total_length() {
        let mut stretcher = Stretcher::new(44100, 1, OPTION_PROCESS_OFFLINE, 2.0, 1.0);
        let input = vec![sine(20_000, 440.0, 44100)];
        stretcher.study(&[input[0].as_slice()], true);
        stretcher.set_parameter(Parameter::KeyFrameMap(BTreeMap::from([
            (5_000, 5_000),
            (10_000, 30_000),
        ])));
        assert!((stretcher.frame_ratio(2_000) - 1.0).abs() < 1e-9);
        assert!((stretcher.frame_ratio(7_000) - 5.0).abs() < 1e-9);
        assert!((stretcher.frame_ratio(15_000) - 1.0).abs() < 1e-9);

        let output = stretch(&mut stretcher, &input, 4096);
        assert_eq!(output[0].len(), 40_000);
    }

    #[test]
    fn formant_preservation_keeps_length() {
        let options = OPTION_FORMANT_PRESERVED | OPTION_PITCH_HIGH_QUALITY | OPTION_SMOOTHING_ON;
        let mut stretcher = Stretcher::new(44100, 1, options, 1.0, 2.0);
        stretcher.set_parameter(Parameter::FormantScale(0.75));
        let input = vec![sine(8_000, 300.0, 44100)];
        let output = stretch(&mut stretcher, &input, 1024);
        assert_eq!(output[0].len(), 8_000);
        assert!(output[0].iter().all(|sample| sample.is_finite()));
        assert!(output[0].iter().any(|sample| sample.abs() > 0.01));
    }

    #[test]
    fn available_is_zero_until_enough_input() {
        let mut stretcher = Stretcher::new(16000, 1, OPTION_PROCESS_REAL_TIME, 1.0, 1.0);
        let required = stretcher.samples_required();
        assert_eq!(required, stretcher.fft_size() / 2);

        let chunk = vec![0.5f32; required - 1];
        stretcher.process(&[chunk.as_slice()], false);
        assert_eq!(stretcher.available(), 0);
        assert_eq!(stretcher.samples_required(), 1);

        let chunk = vec![0.5f32; stretcher.fft_size() * 2];
        stretcher.process(&[chunk.as_slice()], false);
        assert!(stretcher.available() > 0);

        let mut output = vec![0.0f32; 8];
        assert_eq!(stretcher.retrieve(&mut [output.as_mut_slice()]), 8);
    }

    #[test]
    fn latency_and_increment() {
        let stretcher = Stretcher::new(44100, 1, PRESET_DEFAULT, 1.0, 1.0);
        assert_eq!(stretcher.start_delay(), 0);
        assert_eq!(stretcher.preferred_start_pad(), 1024);
        assert_eq!(stretcher.input_increment(), 512);

        let stretcher = Stretcher::new(44100, 1, OPTION_ENGINE_FINER, 1.0, 1.0);
        assert_eq!(stretcher.input_increment(), 256);
    }

    #[test]
    fn out_of_range_ratios_are_clamped() {
        let mut stretcher = Stretcher::new(44100, 1, PRESET_DEFAULT, 1.0e300, 1.0e-300);
        assert_eq!(stretcher.time_ratio, MAX_TIME_RATIO);
        assert_eq!(stretcher.pitch_scale, MIN_PITCH_SCALE);

        let input = vec![vec![0.25f32; 16]];
        let output = stretch(&mut stretcher, &input, 16);
        assert_eq!(output[0].len(), (16.0 * MAX_TIME_RATIO) as usize);
        assert!(output[0].iter().all(|sample| sample.is_finite()));

        let mut stretcher = Stretcher::new(16000, 1, OPTION_PROCESS_REAL_TIME, 1.0, 1.0);
        stretcher.set_parameter(Parameter::PitchScale(1.0e-300));
        stretcher.set_parameter(Parameter::TimeRatio(f64::NAN));
        assert_eq!(stretcher.pitch_scale, MIN_PITCH_SCALE);
        assert_eq!(stretcher.time_ratio, 1.0);
        let output = stretch(&mut stretcher, &input, 16);
        assert_eq!(output[0].len(), 16);
    }

    #[test]
    fn studied_transients_drive_phase_resets() {
        let len = 16_384;
        let clicks: Vec<f32> = (0..len)
            .map(|i| if i % 4096 == 2048 { 1.0 } else { 0.0 })
            .collect();
        let tone = vec![sine(len, 440.0, 44100)];

        let mut studied = Stretcher::new(44100, 1, OPTION_PROCESS_OFFLINE, 1.5, 1.0);
        studied.study(&[clicks.as_slice()], true);
        let profile = studied.transient_profile.clone().unwrap();
        assert_eq!(profile.len(), (len + 1024).div_ceil(512));
        assert!(profile.iter().any(|transient| *transient));
        assert!(!profile[0]);

        let mut unstudied = Stretcher::new(44100, 1, OPTION_PROCESS_OFFLINE, 1.5, 1.0);
        let with_study = stretch(&mut studied, &tone, 4096);
        let without_study = stretch(&mut unstudied, &tone, 4096);
        assert_eq!(with_study[0].len(), without_study[0].len());
        assert!(with_study[0]
            .iter()
            .zip(&without_study[0])
            .any(|(a, b)| (a - b).abs() > 1.0e-3));

        // reset forgets the profile
        studied.reset();
        assert!(studied.transient_profile.is_none());
    }

    #[test]
    fn runtime_options_ignore_construction_only_categories() {
        let mut stretcher = Stretcher::new(44100, 1, PRESET_DEFAULT, 1.0, 1.0);
        stretcher.set_parameter(Parameter::Options {
            mask: MASK_WINDOW | MASK_TRANSIENTS,
            bits: OPTION_WINDOW_LONG | OPTION_TRANSIENTS_SMOOTH,
        });
        assert_eq!(stretcher.options, OPTION_TRANSIENTS_SMOOTH);
        assert_eq!(stretcher.fft_size(), 2048);
        assert_eq!(stretcher.engine_version(), 2);
    }
}
