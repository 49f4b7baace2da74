//! Validation of session parameters. Every value is checked here before an engine observes it.

use std::collections::BTreeMap;

pub use elastic_engine::{
    MAX_PITCH_SCALE, MAX_STRETCH, MAX_TIME_RATIO, MIN_PITCH_SCALE, MIN_STRETCH, MIN_TIME_RATIO,
};
use elastic_engine::{FORMANT_SCALE_AUTO, FREQUENCY_CUTOFF_COUNT};

use crate::{Error, Result, MAX_CHANNELS, MAX_SAMPLE_RATE, MIN_SAMPLE_RATE};

// -------------------------------------------------------------------------------------------------

pub fn validate_sample_rate(sample_rate: u32) -> Result<u32> {
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(Error::OutOfRange {
            name: "sample rate",
            value: sample_rate as u64,
            min: MIN_SAMPLE_RATE as u64,
            max: MAX_SAMPLE_RATE as u64,
        });
    }
    Ok(sample_rate)
}

pub fn validate_channel_count(channels: usize) -> Result<usize> {
    if !(1..=MAX_CHANNELS).contains(&channels) {
        return Err(Error::UnsupportedChannelCount(channels));
    }
    Ok(channels)
}

fn validate_positive(name: &'static str, value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::InvalidParameter { name, value });
    }
    Ok(value)
}

fn validate_bounded(name: &'static str, value: f64, min: f64, max: f64) -> Result<f64> {
    let value = validate_positive(name, value)?;
    if !(min..=max).contains(&value) {
        return Err(Error::InvalidParameter { name, value });
    }
    Ok(value)
}

/// Accepts ratios within [`MIN_TIME_RATIO`]..=[`MAX_TIME_RATIO`].
pub fn validate_time_ratio(ratio: f64) -> Result<f64> {
    validate_bounded("time ratio", ratio, MIN_TIME_RATIO, MAX_TIME_RATIO)
}

/// Accepts scales within [`MIN_PITCH_SCALE`]..=[`MAX_PITCH_SCALE`].
pub fn validate_pitch_scale(scale: f64) -> Result<f64> {
    validate_bounded("pitch scale", scale, MIN_PITCH_SCALE, MAX_PITCH_SCALE)
}

/// Checks a time ratio and pitch scale pair. Besides their own ranges, their product must lie
/// within [`MIN_STRETCH`]..=[`MAX_STRETCH`].
pub fn validate_stretch(time_ratio: f64, pitch_scale: f64) -> Result<(f64, f64)> {
    let time_ratio = validate_time_ratio(time_ratio)?;
    let pitch_scale = validate_pitch_scale(pitch_scale)?;
    let stretch = time_ratio * pitch_scale;
    if !(MIN_STRETCH..=MAX_STRETCH).contains(&stretch) {
        return Err(Error::InvalidParameter {
            name: "time ratio times pitch scale",
            value: stretch,
        });
    }
    Ok((time_ratio, pitch_scale))
}

/// Accepts positive scales and [`FORMANT_SCALE_AUTO`].
pub fn validate_formant_scale(scale: f64) -> Result<f64> {
    if scale == FORMANT_SCALE_AUTO {
        return Ok(scale);
    }
    validate_positive("formant scale", scale)
}

/// Checks a cutoff index and frequency, which must lie between 0 Hz and the Nyquist frequency.
pub fn validate_frequency_cutoff(index: usize, hz: f64, sample_rate: u32) -> Result<f32> {
    if index >= FREQUENCY_CUTOFF_COUNT {
        return Err(Error::InvalidParameter {
            name: "frequency cutoff index",
            value: index as f64,
        });
    }
    if !hz.is_finite() || hz < 0.0 || hz > sample_rate as f64 / 2.0 {
        return Err(Error::InvalidParameter {
            name: "frequency cutoff",
            value: hz,
        });
    }
    Ok(hz as f32)
}

pub fn validate_max_process_size(samples: usize) -> Result<usize> {
    if samples == 0 {
        return Err(Error::InvalidParameter {
            name: "max process size",
            value: 0.0,
        });
    }
    Ok(samples)
}

/// Output positions must not decrease while input positions increase.
pub fn validate_key_frame_map(map: &BTreeMap<usize, usize>) -> Result<()> {
    let mut last_output = 0;
    for (&input, &output) in map {
        if output < last_output {
            return Err(Error::InvalidParameter {
                name: "key frame output position",
                value: input as f64,
            });
        }
        last_output = output;
    }
    Ok(())
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_bounds() {
        assert_eq!(validate_sample_rate(8000), Ok(8000));
        assert_eq!(validate_sample_rate(192_000), Ok(192_000));
        assert!(matches!(
            validate_sample_rate(7999),
            Err(Error::OutOfRange { value: 7999, .. })
        ));
        assert!(validate_sample_rate(192_001).is_err());
    }

    #[test]
    fn channel_count_bounds() {
        assert_eq!(validate_channel_count(1), Ok(1));
        assert_eq!(validate_channel_count(MAX_CHANNELS), Ok(MAX_CHANNELS));
        assert_eq!(
            validate_channel_count(0),
            Err(Error::UnsupportedChannelCount(0))
        );
        assert_eq!(
            validate_channel_count(MAX_CHANNELS + 1),
            Err(Error::UnsupportedChannelCount(MAX_CHANNELS + 1))
        );
    }

    #[test]
    fn ratios_must_be_positive() {
        for invalid in [0.0, -0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(validate_time_ratio(invalid).is_err());
            assert!(validate_pitch_scale(invalid).is_err());
        }
        assert_eq!(validate_time_ratio(0.25), Ok(0.25));
        assert_eq!(validate_pitch_scale(2.0), Ok(2.0));
    }

    #[test]
    fn ratios_are_bounded() {
        assert_eq!(validate_time_ratio(MAX_TIME_RATIO), Ok(MAX_TIME_RATIO));
        assert_eq!(validate_time_ratio(MIN_TIME_RATIO), Ok(MIN_TIME_RATIO));
        assert_eq!(
            validate_time_ratio(1.0e300),
            Err(Error::InvalidParameter {
                name: "time ratio",
                value: 1.0e300
            })
        );
        assert!(validate_time_ratio(1.0e-300).is_err());

        assert_eq!(validate_pitch_scale(MIN_PITCH_SCALE), Ok(MIN_PITCH_SCALE));
        assert!(validate_pitch_scale(1.0e-300).is_err());
        assert!(validate_pitch_scale(MAX_PITCH_SCALE * 2.0).is_err());

        assert_eq!(validate_stretch(2.0, 0.5), Ok((2.0, 0.5)));
        assert!(matches!(
            validate_stretch(MAX_TIME_RATIO, 2.0),
            Err(Error::InvalidParameter {
                name: "time ratio times pitch scale",
                ..
            })
        ));
        assert!(validate_stretch(MIN_TIME_RATIO, 0.5).is_err());
        assert!(validate_stretch(1.0e300, 1.0).is_err());
    }

    #[test]
    fn formant_scale_accepts_auto() {
        assert_eq!(validate_formant_scale(FORMANT_SCALE_AUTO), Ok(0.0));
        assert_eq!(validate_formant_scale(1.5), Ok(1.5));
        assert!(validate_formant_scale(-0.5).is_err());
    }

    #[test]
    fn frequency_cutoffs() {
        assert_eq!(validate_frequency_cutoff(0, 600.0, 44100), Ok(600.0));
        assert!(validate_frequency_cutoff(2, 22050.0, 44100).is_ok());
        assert!(validate_frequency_cutoff(2, 22051.0, 44100).is_err());
        assert!(validate_frequency_cutoff(3, 100.0, 44100).is_err());
        assert!(validate_frequency_cutoff(1, -1.0, 44100).is_err());
    }

    #[test]
    fn key_frame_maps() {
        assert!(validate_key_frame_map(&BTreeMap::new()).is_ok());
        assert!(validate_key_frame_map(&BTreeMap::from([(100, 200), (200, 200), (300, 900)])).is_ok());
        assert!(validate_key_frame_map(&BTreeMap::from([(100, 500), (200, 400)])).is_err());
        assert!(validate_max_process_size(0).is_err());
        assert_eq!(validate_max_process_size(512), Ok(512));
    }
}
