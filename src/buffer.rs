use smallvec::SmallVec;

use crate::{Error, Result, MAX_CHANNELS};

// -------------------------------------------------------------------------------------------------

/// Index of the channel axis in an [`AudioBuffer`]'s shape.
pub const CHANNEL_AXIS: usize = 0;
/// Index of the sample axis in an [`AudioBuffer`]'s shape.
pub const SAMPLE_AXIS: usize = 1;
/// Element type tag of audio buffers: native endian 32-bit float.
pub const DTYPE_NAME: &str = "=f4";

/// Per-channel views into an [`AudioBuffer`], without heap allocations.
pub type ChannelSlices<'a> = SmallVec<[&'a [f32]; MAX_CHANNELS]>;
/// Mutable per-channel views into an [`AudioBuffer`], without heap allocations.
pub type ChannelSlicesMut<'a> = SmallVec<[&'a mut [f32]; MAX_CHANNELS]>;

// -------------------------------------------------------------------------------------------------

/// Channel-planar, contiguous `f32` audio with shape `(channels, samples)`.
///
/// Sample `s` of channel `c` is stored at `c * samples + s`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioBuffer {
    data: Vec<f32>,
    channels: usize,
    samples: usize,
}

impl AudioBuffer {
    /// Allocates a buffer of shape `(channels, samples)` with every sample set to `fill`.
    ///
    /// # Errors
    /// Returns [`Error::Allocation`] when the memory can not be reserved.
    pub fn new(channels: usize, samples: usize, fill: f32) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(channels.saturating_mul(samples))?;
        data.resize(channels * samples, fill);
        Ok(Self {
            data,
            channels,
            samples,
        })
    }

    /// Wraps planar sample data with the given channel count.
    pub fn from_vec(data: Vec<f32>, channels: usize) -> Result<Self> {
        let samples = if channels == 0 { 0 } else { data.len() / channels };
        if channels * samples != data.len() {
            return Err(Error::InvalidShape {
                axis: "sample",
                expected: channels * (samples + 1),
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            channels,
            samples,
        })
    }

    /// Concatenates per-channel sample vectors of equal length.
    pub fn from_channels(channels: &[Vec<f32>]) -> Result<Self> {
        let samples = channels.first().map_or(0, |channel| channel.len());
        if let Some(channel) = channels.iter().find(|channel| channel.len() != samples) {
            return Err(Error::InvalidShape {
                axis: "sample",
                expected: samples,
                actual: channel.len(),
            });
        }
        let mut data = Vec::new();
        data.try_reserve_exact(channels.len() * samples)?;
        for channel in channels {
            data.extend_from_slice(channel);
        }
        Ok(Self {
            data,
            channels: channels.len(),
            samples,
        })
    }

    /// Deinterleaves frame-ordered samples (`[l, r, l, r, ...]`).
    pub fn from_interleaved(interleaved: &[f32], channels: usize) -> Result<Self> {
        if channels == 0 || interleaved.len() % channels != 0 {
            return Err(Error::InvalidShape {
                axis: "channel",
                expected: channels,
                actual: interleaved.len(),
            });
        }
        let samples = interleaved.len() / channels;
        let mut buffer = Self::new(channels, samples, 0.0)?;
        if samples > 0 {
            for (frame_index, frame) in interleaved.chunks_exact(channels).enumerate() {
                for (channel, sample) in frame.iter().enumerate() {
                    buffer.data[channel * samples + frame_index] = *sample;
                }
            }
        }
        Ok(buffer)
    }

    /// Returns the samples in frame order (`[l, r, l, r, ...]`).
    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut interleaved = Vec::with_capacity(self.data.len());
        for frame_index in 0..self.samples {
            for channel in 0..self.channels {
                interleaved.push(self.data[channel * self.samples + frame_index]);
            }
        }
        interleaved
    }

    /// Shape as `[channels, samples]`, indexed by [`CHANNEL_AXIS`] and [`SAMPLE_AXIS`].
    pub fn shape(&self) -> [usize; 2] {
        [self.channels, self.samples]
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Samples of a single channel.
    ///
    /// # Panics
    /// Panics if `index` is not a valid channel index.
    pub fn channel(&self, index: usize) -> &[f32] {
        assert!(index < self.channels, "invalid channel index {index}");
        &self.data[index * self.samples..(index + 1) * self.samples]
    }

    /// Mutable samples of a single channel.
    ///
    /// # Panics
    /// Panics if `index` is not a valid channel index.
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        assert!(index < self.channels, "invalid channel index {index}");
        &mut self.data[index * self.samples..(index + 1) * self.samples]
    }

    /// All samples, channel after channel.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

// -------------------------------------------------------------------------------------------------

/// Allocates an output buffer of shape `(channels, samples)` filled with `fill`.
/// See [`AudioBuffer::new`].
pub fn allocate_output_buffer(channels: usize, samples: usize, fill: f32) -> Result<AudioBuffer> {
    AudioBuffer::new(channels, samples, fill)
}

fn check_channel_axis(buffer: &AudioBuffer, channel_count: usize) -> Result<()> {
    if buffer.channels != channel_count {
        return Err(Error::InvalidShape {
            axis: "channel",
            expected: channel_count,
            actual: buffer.channels,
        });
    }
    Ok(())
}

/// Splits `buffer` into one slice per channel, as consumed by an engine.
///
/// # Errors
/// Returns [`Error::InvalidShape`] when the buffer's channel axis is not `channel_count`.
pub fn per_channel_slices(buffer: &AudioBuffer, channel_count: usize) -> Result<ChannelSlices<'_>> {
    check_channel_axis(buffer, channel_count)?;
    if buffer.samples == 0 {
        // chunks_exact(0) would panic
        return Ok(std::iter::repeat(<&[f32]>::default())
            .take(channel_count)
            .collect());
    }
    Ok(buffer.data.chunks_exact(buffer.samples).collect())
}

/// Splits `buffer` into one mutable slice per channel, as filled by an engine.
///
/// # Errors
/// Returns [`Error::InvalidShape`] when the buffer's channel axis is not `channel_count`.
pub fn per_channel_slices_mut(
    buffer: &mut AudioBuffer,
    channel_count: usize,
) -> Result<ChannelSlicesMut<'_>> {
    check_channel_axis(buffer, channel_count)?;
    if buffer.samples == 0 {
        return Ok(std::iter::repeat_with(<&mut [f32]>::default)
            .take(channel_count)
            .collect());
    }
    let samples = buffer.samples;
    Ok(buffer.data.chunks_exact_mut(samples).collect())
}

// -------------------------------------------------------------------------------------------------
