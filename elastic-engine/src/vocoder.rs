//! Single channel phase vocoder: STFT analysis, phase propagation and overlap-add synthesis.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

const TWO_PI: f32 = 2.0 * PI;

// -------------------------------------------------------------------------------------------------

/// How transient frames are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Detector {
    Compound,
    Percussive,
    Soft,
}

/// Per-frame settings, shared by all channels of a stretcher.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameParams {
    /// Number of samples the synthesis position advances after this frame.
    pub synthesis_hop: usize,
    /// Overlap-add normalisation.
    pub gain: f32,
    /// Lock bin phases to their nearest peak below this bin.
    pub lock_limit: Option<usize>,
    /// Reset phases above this bin on transients. `None` disables phase resets.
    pub reset_from: Option<usize>,
    pub detector: Detector,
    /// Transient flag from a study pass, which replaces detection when set.
    pub transient: Option<bool>,
    pub smoothing: bool,
    /// Read the spectral envelope at `bin / formant_warp`. 1.0 leaves formants alone.
    pub formant_warp: f32,
}

// -------------------------------------------------------------------------------------------------

pub(crate) struct Vocoder {
    size: usize,
    hop: usize,
    bins: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    fft_scratch: Vec<Complex<f32>>,
    magnitude: Vec<f32>,
    phase: Vec<f32>,
    last_phase: Vec<f32>,
    synthesis_phase: Vec<f32>,
    previous_magnitude: Vec<f32>,
    smoothed_magnitude: Vec<f32>,
    envelope: Vec<f32>,
    peaks: Vec<usize>,
    overlap: Vec<f32>,
    primed: bool,
}

impl Vocoder {
    pub fn new(planner: &mut FftPlanner<f32>, size: usize, hop: usize) -> Self {
        let bins = size / 2 + 1;
        let forward = planner.plan_fft_forward(size);
        let inverse = planner.plan_fft_inverse(size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            size,
            hop,
            bins,
            forward,
            inverse,
            window: hann_window(size),
            spectrum: vec![Complex::default(); size],
            fft_scratch: vec![Complex::default(); scratch_len],
            magnitude: vec![0.0; bins],
            phase: vec![0.0; bins],
            last_phase: vec![0.0; bins],
            synthesis_phase: vec![0.0; bins],
            previous_magnitude: vec![0.0; bins],
            smoothed_magnitude: vec![0.0; bins],
            envelope: vec![0.0; bins],
            peaks: Vec::with_capacity(bins / 4),
            overlap: vec![0.0; size],
            primed: false,
        }
    }

    pub fn reset(&mut self) {
        self.last_phase.fill(0.0);
        self.synthesis_phase.fill(0.0);
        self.previous_magnitude.fill(0.0);
        self.smoothed_magnitude.fill(0.0);
        self.overlap.clear();
        self.overlap.resize(self.size, 0.0);
        self.primed = false;
    }

    /// Analyses `input[..size]`, resynthesises it and appends the `synthesis_hop` samples which
    /// are now complete to `output`.
    pub fn process_frame(&mut self, input: &[f32], params: &FrameParams, output: &mut Vec<f32>) {
        self.transform(input);

        let transient = self.primed
            && params
                .transient
                .unwrap_or_else(|| self.detect_transient(params.detector));
        self.previous_magnitude.copy_from_slice(&self.magnitude);

        if params.smoothing {
            for (magnitude, smoothed) in self.magnitude.iter_mut().zip(&mut self.smoothed_magnitude) {
                *smoothed = 0.5 * (*magnitude + *smoothed);
                *magnitude = *smoothed;
            }
        }

        self.propagate_phases(params, transient);

        if let Some(limit) = params.lock_limit {
            self.lock_phases(limit);
        }

        if (params.formant_warp - 1.0).abs() > 1.0e-3 {
            self.warp_formants(params.formant_warp);
        }

        for k in 0..self.bins {
            self.spectrum[k] = Complex::from_polar(self.magnitude[k], self.synthesis_phase[k]);
        }
        self.spectrum[0].im = 0.0;
        self.spectrum[self.bins - 1].im = 0.0;
        for k in 1..self.bins - 1 {
            self.spectrum[self.size - k] = self.spectrum[k].conj();
        }
        self.inverse
            .process_with_scratch(&mut self.spectrum, &mut self.fft_scratch);

        // overlap-add
        let hop = params.synthesis_hop;
        if self.overlap.len() < self.size.max(hop) {
            self.overlap.resize(self.size.max(hop), 0.0);
        }
        let scale = params.gain / self.size as f32;
        for ((out, bin), window) in self.overlap.iter_mut().zip(&self.spectrum).zip(&self.window) {
            *out += bin.re * scale * window;
        }
        output.extend(self.overlap.drain(..hop));
        self.overlap.resize(self.size, 0.0);

        self.primed = true;
    }

    /// Analyses `input[..size]` without synthesising anything. Returns true for transients.
    pub fn analyse(&mut self, input: &[f32], detector: Detector) -> bool {
        self.transform(input);
        let transient = self.primed && self.detect_transient(detector);
        self.previous_magnitude.copy_from_slice(&self.magnitude);
        self.primed = true;
        transient
    }

    /// Appends everything still held in the overlap-add buffer to `output`.
    pub fn flush(&mut self, output: &mut Vec<f32>) {
        output.append(&mut self.overlap);
        self.overlap.resize(self.size, 0.0);
    }

    fn transform(&mut self, input: &[f32]) {
        debug_assert!(input.len() >= self.size);

        for ((bin, sample), window) in self.spectrum.iter_mut().zip(input).zip(&self.window) {
            *bin = Complex::new(sample * window, 0.0);
        }
        self.forward
            .process_with_scratch(&mut self.spectrum, &mut self.fft_scratch);

        for k in 0..self.bins {
            let (magnitude, phase) = self.spectrum[k].to_polar();
            self.magnitude[k] = magnitude;
            self.phase[k] = phase;
        }
    }

    fn detect_transient(&self, detector: Detector) -> bool {
        let mut energy = 0.0f32;
        let mut flux = 0.0f32;
        let mut rising = 0usize;
        for (&magnitude, &previous) in self.magnitude.iter().zip(&self.previous_magnitude) {
            energy += magnitude;
            if magnitude > previous {
                flux += magnitude - previous;
                if magnitude > 1.0e-6 && magnitude > previous * 1.41 {
                    rising += 1;
                }
            }
        }
        if energy < 1.0e-3 {
            return false;
        }

        let flux = flux / energy;
        let rising = rising as f32 / self.bins as f32;
        match detector {
            Detector::Compound => flux > 0.5 || rising > 0.35,
            Detector::Percussive => rising > 0.35,
            Detector::Soft => flux > 0.6,
        }
    }

    fn propagate_phases(&mut self, params: &FrameParams, transient: bool) {
        let stretch = params.synthesis_hop as f32 / self.hop as f32;
        let reset_from = if transient { params.reset_from } else { None };

        for k in 0..self.bins {
            let phase = self.phase[k];
            if !self.primed || reset_from.is_some_and(|from| k >= from) {
                self.synthesis_phase[k] = phase;
            } else {
                let expected = TWO_PI * k as f32 * self.hop as f32 / self.size as f32;
                let deviation = wrap_phase(phase - self.last_phase[k] - expected);
                self.synthesis_phase[k] =
                    wrap_phase(self.synthesis_phase[k] + (expected + deviation) * stretch);
            }
            self.last_phase[k] = phase;
        }
    }

    /// Identity phase locking: bins keep their analysis phase offset to the nearest peak.
    fn lock_phases(&mut self, limit: usize) {
        let limit = limit.min(self.bins);
        if limit < 5 {
            return;
        }

        self.peaks.clear();
        for k in 2..limit - 2 {
            let magnitude = self.magnitude[k];
            if magnitude > self.magnitude[k - 2]
                && magnitude > self.magnitude[k - 1]
                && magnitude > self.magnitude[k + 1]
                && magnitude > self.magnitude[k + 2]
            {
                self.peaks.push(k);
            }
        }
        if self.peaks.is_empty() {
            return;
        }

        let mut region_start = 0;
        for (i, &peak) in self.peaks.iter().enumerate() {
            let region_end = match self.peaks.get(i + 1) {
                Some(&next) => (peak + next) / 2 + 1,
                None => limit,
            };
            let peak_phase = self.synthesis_phase[peak];
            let peak_analysis = self.phase[peak];
            for k in region_start..region_end {
                if k != peak {
                    self.synthesis_phase[k] =
                        wrap_phase(peak_phase + self.phase[k] - peak_analysis);
                }
            }
            region_start = region_end;
        }
    }

    fn warp_formants(&mut self, warp: f32) {
        // moving average of the magnitude spectrum as envelope
        let half_width = (self.bins / 64).max(2);
        let mut sum: f32 = self.magnitude[..half_width.min(self.bins)].iter().sum();
        for k in 0..self.bins {
            if k + half_width < self.bins {
                sum += self.magnitude[k + half_width];
            }
            if k > half_width {
                sum -= self.magnitude[k - half_width - 1];
            }
            let lo = k.saturating_sub(half_width);
            let hi = (k + half_width).min(self.bins - 1);
            self.envelope[k] = sum.max(0.0) / (hi - lo + 1) as f32;
        }

        let last = (self.bins - 1) as f32;
        for k in 0..self.bins {
            let source = k as f32 / warp;
            let target = if source >= last {
                0.0
            } else {
                let index = source as usize;
                let frac = source - index as f32;
                self.envelope[index] * (1.0 - frac) + self.envelope[index + 1] * frac
            };
            let factor = (target / self.envelope[k].max(1.0e-9)).min(10.0);
            self.magnitude[k] *= factor;
        }
    }
}

// -------------------------------------------------------------------------------------------------

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (TWO_PI * i as f32 / size as f32).cos()))
        .collect()
}

/// Wraps a phase to [-PI, PI].
#[inline]
fn wrap_phase(phase: f32) -> f32 {
    phase - TWO_PI * ((phase + PI) / TWO_PI).floor()
}

// -------------------------------------------------------------------------------------------------
