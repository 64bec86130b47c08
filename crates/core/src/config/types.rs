use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::{FfmpegConfig, RemoteEngineConfig};
use crate::options::QualityPreset;
use crate::registry::{
    EngineCapabilities, EngineEntry, EngineId, EngineKind, FormatPair, MediaFormat,
};
use crate::runner::RunnerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub runner: RunnerConfig,
    pub ffmpeg: FfmpegConfig,
    /// Registry entries. Empty means the built-in local ffmpeg engine.
    pub engines: Vec<EngineEntry>,
    /// Connection details for entries of kind `remote`.
    pub remote_engines: Vec<RemoteEngineConfig>,
}

impl Config {
    /// Configured registry entries, or the built-in local ffmpeg
    /// engine covering the common video and audio conversions.
    pub fn registry_entries(&self) -> Vec<EngineEntry> {
        if !self.engines.is_empty() {
            return self.engines.clone();
        }
        vec![default_ffmpeg_entry()]
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Terminal tasks older than this are pruned. Unset disables
    /// pruning.
    #[serde(default)]
    pub prune_terminal_after_secs: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            prune_terminal_after_secs: None,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mediamill.db")
}

/// Built-in registry entry for a host-local ffmpeg.
pub fn default_ffmpeg_entry() -> EngineEntry {
    use MediaFormat::*;
    let video_inputs = [Mov, Mkv, Avi, Webm, Mp4];
    let video_outputs = [Mp4, Mkv, Webm];
    let audio_inputs = [Flac, Wav, Mp3, Ogg, M4a];
    let audio_outputs = [Mp3, Ogg, M4a];

    let mut pairs = Vec::new();
    for input in video_inputs {
        for output in video_outputs {
            if input != output {
                pairs.push(FormatPair { input, output });
            }
        }
    }
    for input in audio_inputs {
        for output in audio_outputs {
            if input != output {
                pairs.push(FormatPair { input, output });
            }
        }
    }

    EngineEntry {
        id: EngineId::from("ffmpeg-local"),
        kind: EngineKind::Local,
        priority: 100,
        pairs,
        capabilities: EngineCapabilities {
            allowed_qualities: vec![
                QualityPreset::Medium,
                QualityPreset::Low,
                QualityPreset::High,
            ],
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.runner.max_attempts, 3);
        assert!(config.engines.is_empty());
        assert!(!config.registry_entries().is_empty());
    }

    #[test]
    fn test_default_engine_pairs() {
        let entry = default_ffmpeg_entry();
        assert!(entry.supports_pair(MediaFormat::Mov, MediaFormat::Mp4));
        assert!(entry.supports_pair(MediaFormat::Flac, MediaFormat::Mp3));
        assert!(!entry.supports_pair(MediaFormat::Mp4, MediaFormat::Mp4));
        // default quality is the first allow-list entry
        assert_eq!(
            entry.capabilities.allowed_qualities.first(),
            Some(&QualityPreset::Medium)
        );
    }
}
