//! Typed conversion option structures.

use serde::{Deserialize, Serialize};

/// Quality preset for a conversion.
///
/// Presets are mapped to encoder-specific settings by the executor
/// (CRF for video encoders, bitrate for audio encoders).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Low,
    Medium,
    High,
}

impl QualityPreset {
    /// Constant Rate Factor used for software video encoders.
    pub fn crf(&self) -> u8 {
        match self {
            QualityPreset::Low => 28,
            QualityPreset::Medium => 23,
            QualityPreset::High => 18,
        }
    }

    /// Audio bitrate in kbps for lossy audio targets.
    pub fn audio_bitrate_kbps(&self) -> u32 {
        match self {
            QualityPreset::Low => 96,
            QualityPreset::Medium => 128,
            QualityPreset::High => 192,
        }
    }
}

impl std::fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityPreset::Low => write!(f, "low"),
            QualityPreset::Medium => write!(f, "medium"),
            QualityPreset::High => write!(f, "high"),
        }
    }
}

/// Output resolution for video conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// 480p (854x480)
    R480p,
    /// 720p (1280x720)
    R720p,
    /// 1080p (1920x1080)
    R1080p,
    /// 4K/2160p (3840x2160)
    R2160p,
}

impl Resolution {
    /// Target height in pixels.
    pub fn height(&self) -> u32 {
        match self {
            Resolution::R480p => 480,
            Resolution::R720p => 720,
            Resolution::R1080p => 1080,
            Resolution::R2160p => 2160,
        }
    }

    /// FFmpeg scale filter expression, preserving aspect ratio.
    pub fn scale_filter(&self) -> String {
        format!("scale=-2:{}", self.height())
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}p", self.height())
    }
}

/// Options for a video conversion.
///
/// Missing keys mean "engine default" (quality) or "keep source"
/// (resolution, framerate); unknown keys are rejected at the serde
/// boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VideoOptions {
    /// Quality preset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityPreset>,
    /// Output resolution (None = keep source resolution).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Output framerate in fps (None = keep source framerate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framerate: Option<u32>,
}

/// Options for an audio conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioOptions {
    /// Quality preset (mapped to bitrate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityPreset>,
    /// Sample rate in Hz (None = keep source rate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate_hz: Option<u32>,
}

/// Conversion options, keyed by the kind of conversion.
///
/// Stored on the task as a validated, immutable snapshot; never
/// re-validated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversionOptions {
    Video(VideoOptions),
    Audio(AudioOptions),
}

impl ConversionOptions {
    /// The quality preset, if one was set.
    pub fn quality(&self) -> Option<QualityPreset> {
        match self {
            ConversionOptions::Video(v) => v.quality,
            ConversionOptions::Audio(a) => a.quality,
        }
    }

    /// The requested resolution, for video conversions.
    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            ConversionOptions::Video(v) => v.resolution,
            ConversionOptions::Audio(_) => None,
        }
    }

    /// The requested framerate, for video conversions.
    pub fn framerate(&self) -> Option<u32> {
        match self {
            ConversionOptions::Video(v) => v.framerate,
            ConversionOptions::Audio(_) => None,
        }
    }
}

impl Default for ConversionOptions {
    fn default() -> Self {
        ConversionOptions::Video(VideoOptions::default())
    }
}
