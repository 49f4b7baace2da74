use elastic_engine::LogLevel;
use serde::{Deserialize, Serialize};

use crate::params::{
    validate_channel_count, validate_max_process_size, validate_sample_rate, validate_stretch,
};
use crate::{Result, StretchOptions};

// -------------------------------------------------------------------------------------------------

/// Construction parameters of a [`StretchSession`](crate::StretchSession).
///
/// Missing fields fall back to their defaults when deserialized:
///
/// ```rust
/// use elastic_rs::SessionConfig;
///
/// let config: SessionConfig =
///     serde_json::from_str(r#"{ "sample-rate": 48000, "time-ratio": 1.5 }"#).unwrap();
/// assert_eq!(config.channels, 2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub channels: usize,
    pub options: StretchOptions,
    pub time_ratio: f64,
    pub pitch_scale: f64,
    /// Log level of the session's engine. `None` uses the process wide default, see
    /// [`set_default_logging_level`](crate::set_default_logging_level).
    pub log_level: Option<LogLevel>,
    /// Largest number of samples that will be passed to a single `process` call.
    pub max_process_size: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            options: StretchOptions::default(),
            time_ratio: 1.0,
            pitch_scale: 1.0,
            log_level: None,
            max_process_size: None,
        }
    }
}

impl SessionConfig {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            ..Self::default()
        }
    }

    pub fn with_options(self, options: StretchOptions) -> Self {
        Self { options, ..self }
    }

    pub fn with_time_ratio(self, time_ratio: f64) -> Self {
        Self { time_ratio, ..self }
    }

    pub fn with_pitch_scale(self, pitch_scale: f64) -> Self {
        Self {
            pitch_scale,
            ..self
        }
    }

    pub fn with_log_level(self, log_level: LogLevel) -> Self {
        Self {
            log_level: Some(log_level),
            ..self
        }
    }

    pub fn with_max_process_size(self, samples: usize) -> Self {
        Self {
            max_process_size: Some(samples),
            ..self
        }
    }

    /// Checks all values, in the order a session would check them on construction.
    pub fn validate(&self) -> Result<()> {
        validate_sample_rate(self.sample_rate)?;
        validate_channel_count(self.channels)?;
        validate_stretch(self.time_ratio, self.pitch_scale)?;
        if let Some(samples) = self.max_process_size {
            validate_max_process_size(samples)?;
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Preset, ProcessMode};

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.options, Preset::Default.options());
        assert_eq!(config.time_ratio, 1.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation() {
        assert!(matches!(
            SessionConfig::new(4000, 2).validate(),
            Err(Error::OutOfRange { .. })
        ));
        assert_eq!(
            SessionConfig::new(44100, 9).validate(),
            Err(Error::UnsupportedChannelCount(9))
        );
        assert!(SessionConfig::new(44100, 1)
            .with_time_ratio(0.0)
            .validate()
            .is_err());
        assert!(SessionConfig::new(44100, 1)
            .with_pitch_scale(-2.0)
            .validate()
            .is_err());
        assert!(SessionConfig::new(44100, 1)
            .with_time_ratio(1.0e300)
            .validate()
            .is_err());
        assert!(SessionConfig::new(44100, 1)
            .with_time_ratio(800.0)
            .with_pitch_scale(4.0)
            .validate()
            .is_err());
        assert!(SessionConfig::new(44100, 1)
            .with_max_process_size(0)
            .validate()
            .is_err());
    }

    #[test]
    fn deserializes_nested_options() {
        let config: SessionConfig = serde_json::from_str(
            r#"{
                "channels": 1,
                "options": { "process-mode": "real-time", "formant": "preserved" },
                "log-level": "process",
                "max-process-size": 1024
            }"#,
        )
        .unwrap();
        assert_eq!(config.channels, 1);
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.options.process_mode, ProcessMode::RealTime);
        assert_eq!(config.log_level, Some(LogLevel::Process));
        assert_eq!(config.max_process_size, Some(1024));
    }
}
