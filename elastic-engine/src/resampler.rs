use std::collections::VecDeque;

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};

use crate::{MAX_PITCH_SCALE, MIN_PITCH_SCALE};

// -------------------------------------------------------------------------------------------------

/// Input frames consumed by each rubato call.
const CHUNK_SIZE: usize = 256;

/// Relative ratio range the rubato resampler is created with. Rubato rejects ratios which reach
/// the limit, so this lies above the largest pitch scale.
const MAX_RELATIVE_RATIO: f64 = 2.0 * MAX_PITCH_SCALE;

/// Interpolation used when reading between input samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interpolation {
    Linear,
    Cubic,
}

impl Interpolation {
    fn degree(self) -> PolynomialDegree {
        match self {
            Interpolation::Linear => PolynomialDegree::Linear,
            Interpolation::Cubic => PolynomialDegree::Cubic,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Streaming pitch resampler. A scale of 2.0 halves the number of samples and doubles all
/// frequencies.
///
/// Samples pass through untouched until a scale other than 1.0 is seen. From then on they are
/// resampled by rubato, with its delay removed from the start of the output.
pub(crate) struct Resampler {
    inner: Option<FastFixedIn<f32>>,
    interpolation: Interpolation,
    scale: f64,
    pending: Vec<f32>,
    /// Leading output samples still to drop.
    skip: usize,
}

impl Resampler {
    pub fn new() -> Self {
        Self {
            inner: None,
            interpolation: Interpolation::Cubic,
            scale: 1.0,
            pending: Vec::with_capacity(CHUNK_SIZE * 2),
            skip: 0,
        }
    }

    pub fn reset(&mut self) {
        self.inner = None;
        self.scale = 1.0;
        self.pending.clear();
        self.skip = 0;
    }

    /// Appends `input` and writes every output sample that can be produced so far. Scales
    /// outside of the supported pitch range are clamped.
    pub fn push(
        &mut self,
        input: &[f32],
        scale: f64,
        interpolation: Interpolation,
        output: &mut VecDeque<f32>,
    ) {
        if self.inner.is_none() && scale == 1.0 {
            output.extend(input);
            return;
        }
        self.configure(scale, interpolation);
        self.pending.extend_from_slice(input);

        let Some(inner) = &mut self.inner else {
            output.extend(self.pending.drain(..));
            return;
        };
        while self.pending.len() >= inner.input_frames_next() {
            let frames = inner.input_frames_next();
            let chunk = [&self.pending[..frames]];
            match inner.process(&chunk[..], None) {
                Ok(resampled) => emit(&mut self.skip, &resampled[0], output),
                Err(err) => tracing::error!(%err, "pitch resampling failed"),
            }
            self.pending.drain(..frames);
        }
    }

    /// Writes everything still pending, including the resampler's delay line.
    pub fn flush(&mut self, output: &mut VecDeque<f32>) {
        let Some(inner) = &mut self.inner else {
            output.extend(self.pending.drain(..));
            return;
        };
        if !self.pending.is_empty() {
            let chunk = [self.pending.as_slice()];
            match inner.process_partial(Some(&chunk[..]), None) {
                Ok(resampled) => emit(&mut self.skip, &resampled[0], output),
                Err(err) => tracing::error!(%err, "pitch resampling failed"),
            }
            self.pending.clear();
        }
        match inner.process_partial::<&[f32]>(None, None) {
            Ok(resampled) => emit(&mut self.skip, &resampled[0], output),
            Err(err) => tracing::error!(%err, "pitch resampling failed"),
        }
    }

    fn configure(&mut self, scale: f64, interpolation: Interpolation) {
        let scale = scale.clamp(MIN_PITCH_SCALE, MAX_PITCH_SCALE);
        let rebuild = self.inner.is_none() || interpolation != self.interpolation;
        if rebuild {
            match FastFixedIn::<f32>::new(
                1.0,
                MAX_RELATIVE_RATIO,
                interpolation.degree(),
                CHUNK_SIZE,
                1,
            ) {
                Ok(inner) => {
                    self.inner = Some(inner);
                    self.interpolation = interpolation;
                    self.scale = 1.0;
                }
                Err(err) => {
                    tracing::error!(%err, "failed to create the pitch resampler");
                    return;
                }
            }
        }
        let Some(inner) = &mut self.inner else {
            return;
        };
        if scale != self.scale {
            match inner.set_resample_ratio_relative(1.0 / scale, false) {
                Ok(()) => self.scale = scale,
                Err(err) => tracing::warn!(%err, scale, "failed to change the pitch resampler ratio"),
            }
        }
        if rebuild {
            self.skip = inner.output_delay();
        }
    }
}

fn emit(skip: &mut usize, samples: &[f32], output: &mut VecDeque<f32>) {
    let skipped = (*skip).min(samples.len());
    *skip -= skipped;
    output.extend(&samples[skipped..]);
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn unit_scale_passes_samples_through() {
        let mut resampler = Resampler::new();
        let mut output = VecDeque::new();
        let input: Vec<f32> = (0..64).map(|i| i as f32).collect();

        for chunk in input.chunks(10) {
            resampler.push(chunk, 1.0, Interpolation::Cubic, &mut output);
        }
        resampler.flush(&mut output);
        assert!(resampler.inner.is_none());
        assert_eq!(output.iter().copied().collect::<Vec<_>>(), input);
    }

    #[test]
    fn scale_changes_output_length() {
        let mut resampler = Resampler::new();
        let mut output = VecDeque::new();
        let input = vec![0.25f32; 1000];

        // push in uneven chunks to exercise the pending buffer
        for chunk in input.chunks(77) {
            resampler.push(chunk, 2.0, Interpolation::Linear, &mut output);
        }
        assert!((300..=500).contains(&output.len()), "{}", output.len());
        resampler.flush(&mut output);
        assert!(output.len() >= 495, "{}", output.len());
        assert_abs_diff_eq!(output[100], 0.25, epsilon = 1e-3);

        resampler.reset();
        output.clear();
        resampler.push(&input, 0.5, Interpolation::Cubic, &mut output);
        resampler.flush(&mut output);
        assert!(output.len() >= 1995, "{}", output.len());
        assert_abs_diff_eq!(output[1000], 0.25, epsilon = 1e-3);
    }

    #[test]
    fn scales_are_clamped_to_the_supported_range() {
        let mut resampler = Resampler::new();
        let mut output = VecDeque::new();
        let input = vec![0.5f32; 100];

        resampler.push(&input, 1.0e-300, Interpolation::Linear, &mut output);
        resampler.flush(&mut output);
        assert_eq!(resampler.scale, MIN_PITCH_SCALE);
        let upper = (input.len() as f64 / MIN_PITCH_SCALE) as usize + 4 * CHUNK_SIZE * 16;
        assert!((1500..=upper).contains(&output.len()), "{}", output.len());
        assert!(output.iter().all(|sample| sample.is_finite()));
    }
}
