//! Registry data types.

use serde::{Deserialize, Serialize};

use crate::options::{QualityPreset, Resolution};

/// Media container formats known to the system.
///
/// Adding a format here does not make it convertible; an engine must
/// also declare a [`FormatPair`] for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaFormat {
    // Video containers
    Mov,
    Mp4,
    Mkv,
    Avi,
    Webm,
    // Audio containers
    Mp3,
    Flac,
    Wav,
    Ogg,
    M4a,
}

impl MediaFormat {
    /// File extension for this format, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            MediaFormat::Mov => "mov",
            MediaFormat::Mp4 => "mp4",
            MediaFormat::Mkv => "mkv",
            MediaFormat::Avi => "avi",
            MediaFormat::Webm => "webm",
            MediaFormat::Mp3 => "mp3",
            MediaFormat::Flac => "flac",
            MediaFormat::Wav => "wav",
            MediaFormat::Ogg => "ogg",
            MediaFormat::M4a => "m4a",
        }
    }

    /// Parse a format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mov" => Some(MediaFormat::Mov),
            "mp4" => Some(MediaFormat::Mp4),
            "mkv" => Some(MediaFormat::Mkv),
            "avi" => Some(MediaFormat::Avi),
            "webm" => Some(MediaFormat::Webm),
            "mp3" => Some(MediaFormat::Mp3),
            "flac" => Some(MediaFormat::Flac),
            "wav" => Some(MediaFormat::Wav),
            "ogg" => Some(MediaFormat::Ogg),
            "m4a" => Some(MediaFormat::M4a),
            _ => None,
        }
    }

    /// True for video container formats.
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            MediaFormat::Mov
                | MediaFormat::Mp4
                | MediaFormat::Mkv
                | MediaFormat::Avi
                | MediaFormat::Webm
        )
    }

    /// True for audio container formats.
    pub fn is_audio(&self) -> bool {
        !self.is_video()
    }
}

impl std::fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Stable identifier of a conversion engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineId(pub String);

impl EngineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EngineId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where an engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Subprocess on this host (ffmpeg).
    Local,
    /// HTTP conversion service.
    Remote,
}

/// An input/output format pair an engine can convert between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatPair {
    pub input: MediaFormat,
    pub output: MediaFormat,
}

impl std::fmt::Display for FormatPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.input, self.output)
    }
}

fn default_max_file_size() -> u64 {
    // 2 GiB
    2 * 1024 * 1024 * 1024
}

fn default_timeout_secs() -> u64 {
    600
}

/// Capability window of an engine.
///
/// Empty allow-lists mean "anything goes" for that dimension. The
/// declaration order of an allow-list matters: its first entry is the
/// default used when the caller omits the option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCapabilities {
    /// Largest input the engine accepts, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    /// Quality presets the engine accepts.
    #[serde(default)]
    pub allowed_qualities: Vec<QualityPreset>,
    /// Resolutions the engine accepts.
    #[serde(default)]
    pub allowed_resolutions: Vec<Resolution>,
    /// Framerates the engine accepts, in fps.
    #[serde(default)]
    pub allowed_framerates: Vec<u32>,
    /// Per-attempt execution deadline, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            max_file_size_bytes: default_max_file_size(),
            allowed_qualities: Vec::new(),
            allowed_resolutions: Vec::new(),
            allowed_framerates: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// A configured engine: identity, supported pairs and capability window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEntry {
    pub id: EngineId,
    pub kind: EngineKind,
    /// Lower values win when several engines support the same pair.
    #[serde(default)]
    pub priority: u32,
    pub pairs: Vec<FormatPair>,
    #[serde(default)]
    pub capabilities: EngineCapabilities,
}

impl EngineEntry {
    pub fn supports_pair(&self, input: MediaFormat, output: MediaFormat) -> bool {
        self.pairs
            .iter()
            .any(|p| p.input == input && p.output == output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_extension_round_trip() {
        for format in [
            MediaFormat::Mov,
            MediaFormat::Mp4,
            MediaFormat::Mkv,
            MediaFormat::Webm,
            MediaFormat::Flac,
        ] {
            assert_eq!(MediaFormat::from_extension(format.extension()), Some(format));
        }
        assert_eq!(MediaFormat::from_extension("MOV"), Some(MediaFormat::Mov));
        assert_eq!(MediaFormat::from_extension("xyz"), None);
    }

    #[test]
    fn test_format_kind() {
        assert!(MediaFormat::Mov.is_video());
        assert!(!MediaFormat::Mov.is_audio());
        assert!(MediaFormat::Flac.is_audio());
    }

    #[test]
    fn test_engine_entry_toml() {
        let toml = r#"
            id = "ffmpeg-local"
            kind = "local"
            priority = 10
            pairs = [
                { input = "mov", output = "mp4" },
                { input = "mkv", output = "mp4" },
            ]

            [capabilities]
            max_file_size_bytes = 1073741824
            allowed_qualities = ["medium", "high"]
            allowed_framerates = [10, 24, 30]
            timeout_secs = 300
        "#;
        let entry: EngineEntry = toml::from_str(toml).unwrap();
        assert_eq!(entry.id.as_str(), "ffmpeg-local");
        assert_eq!(entry.kind, EngineKind::Local);
        assert!(entry.supports_pair(MediaFormat::Mov, MediaFormat::Mp4));
        assert!(!entry.supports_pair(MediaFormat::Mp4, MediaFormat::Mov));
        assert_eq!(entry.capabilities.timeout_secs, 300);
        // Unset dimensions fall back to defaults.
        assert!(entry.capabilities.allowed_resolutions.is_empty());
    }
}
