//! Option validation against an engine's capability window.

use thiserror::Error;

use super::types::{AudioOptions, ConversionOptions, VideoOptions};
use crate::registry::EngineCapabilities;

/// A rejected option, naming the offending field.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("invalid value for '{field}': {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Validate options against an engine's capability window and fill in
/// defaults for missing keys.
///
/// Returns the fully resolved option set stored on the task. An empty
/// allow-list accepts any value of that dimension; a non-empty list's
/// first entry doubles as the engine default for quality. Resolution
/// and framerate left unset mean "keep source" and stay unset.
pub fn validate(
    options: &ConversionOptions,
    caps: &EngineCapabilities,
) -> Result<ConversionOptions, ValidationError> {
    match options {
        ConversionOptions::Video(video) => validate_video(video, caps).map(ConversionOptions::Video),
        ConversionOptions::Audio(audio) => validate_audio(audio, caps).map(ConversionOptions::Audio),
    }
}

fn validate_video(
    options: &VideoOptions,
    caps: &EngineCapabilities,
) -> Result<VideoOptions, ValidationError> {
    let quality = match options.quality {
        Some(quality) => {
            if !caps.allowed_qualities.is_empty() && !caps.allowed_qualities.contains(&quality) {
                return Err(ValidationError::new(
                    "quality",
                    format!("'{quality}' is not supported by the selected engine"),
                ));
            }
            Some(quality)
        }
        None => caps.allowed_qualities.first().copied(),
    };

    if let Some(resolution) = options.resolution {
        if !caps.allowed_resolutions.is_empty() && !caps.allowed_resolutions.contains(&resolution) {
            return Err(ValidationError::new(
                "resolution",
                format!("'{resolution}' is not supported by the selected engine"),
            ));
        }
    }

    if let Some(framerate) = options.framerate {
        if framerate == 0 {
            return Err(ValidationError::new("framerate", "must be greater than zero"));
        }
        if !caps.allowed_framerates.is_empty() && !caps.allowed_framerates.contains(&framerate) {
            return Err(ValidationError::new(
                "framerate",
                format!("'{framerate}' fps is not supported by the selected engine"),
            ));
        }
    }

    Ok(VideoOptions {
        quality,
        resolution: options.resolution,
        framerate: options.framerate,
    })
}

fn validate_audio(
    options: &AudioOptions,
    caps: &EngineCapabilities,
) -> Result<AudioOptions, ValidationError> {
    let quality = match options.quality {
        Some(quality) => {
            if !caps.allowed_qualities.is_empty() && !caps.allowed_qualities.contains(&quality) {
                return Err(ValidationError::new(
                    "quality",
                    format!("'{quality}' is not supported by the selected engine"),
                ));
            }
            Some(quality)
        }
        None => caps.allowed_qualities.first().copied(),
    };

    if let Some(rate) = options.sample_rate_hz {
        if rate == 0 {
            return Err(ValidationError::new("sample_rate_hz", "must be greater than zero"));
        }
    }

    Ok(AudioOptions {
        quality,
        sample_rate_hz: options.sample_rate_hz,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{QualityPreset, Resolution};

    fn caps() -> EngineCapabilities {
        EngineCapabilities {
            allowed_qualities: vec![QualityPreset::Medium, QualityPreset::High],
            allowed_resolutions: vec![Resolution::R720p, Resolution::R1080p],
            allowed_framerates: vec![10, 24, 30],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_options_pass_through() {
        let options = ConversionOptions::Video(VideoOptions {
            quality: Some(QualityPreset::High),
            resolution: Some(Resolution::R1080p),
            framerate: Some(30),
        });
        let validated = validate(&options, &caps()).unwrap();
        assert_eq!(validated, options);
    }

    #[test]
    fn test_missing_quality_gets_engine_default() {
        let options = ConversionOptions::Video(VideoOptions::default());
        let validated = validate(&options, &caps()).unwrap();
        assert_eq!(validated.quality(), Some(QualityPreset::Medium));
        // keep-source dimensions stay unset
        assert_eq!(validated.resolution(), None);
        assert_eq!(validated.framerate(), None);
    }

    #[test]
    fn test_disallowed_quality_names_field() {
        let options = ConversionOptions::Video(VideoOptions {
            quality: Some(QualityPreset::Low),
            resolution: None,
            framerate: None,
        });
        let err = validate(&options, &caps()).unwrap_err();
        assert_eq!(err.field, "quality");
    }

    #[test]
    fn test_disallowed_framerate_names_field() {
        let options = ConversionOptions::Video(VideoOptions {
            quality: None,
            resolution: None,
            framerate: Some(60),
        });
        let err = validate(&options, &caps()).unwrap_err();
        assert_eq!(err.field, "framerate");
    }

    #[test]
    fn test_zero_framerate_rejected() {
        let options = ConversionOptions::Video(VideoOptions {
            quality: None,
            resolution: None,
            framerate: Some(0),
        });
        let err = validate(&options, &EngineCapabilities::default()).unwrap_err();
        assert_eq!(err.field, "framerate");
    }

    #[test]
    fn test_empty_allow_list_accepts_anything() {
        let options = ConversionOptions::Video(VideoOptions {
            quality: Some(QualityPreset::Low),
            resolution: Some(Resolution::R2160p),
            framerate: Some(144),
        });
        let validated = validate(&options, &EngineCapabilities::default()).unwrap();
        assert_eq!(validated, options);
    }

    #[test]
    fn test_audio_options_validated() {
        let options = ConversionOptions::Audio(AudioOptions {
            quality: None,
            sample_rate_hz: Some(44_100),
        });
        let validated = validate(&options, &caps()).unwrap();
        assert_eq!(validated.quality(), Some(QualityPreset::Medium));
    }
}
