//! Engine resolution.

use std::collections::HashMap;

use thiserror::Error;

use super::types::{EngineCapabilities, EngineEntry, EngineId, FormatPair, MediaFormat};
use crate::options::ConversionOptions;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("no engine supports conversion from {input} to {output}")]
    NotSupported {
        input: MediaFormat,
        output: MediaFormat,
    },
    #[error("input of {size_bytes} bytes exceeds every capable engine's limit")]
    FileTooLarge { size_bytes: u64 },
    #[error("engine not registered: {0}")]
    UnknownEngine(EngineId),
    #[error("duplicate engine id: {0}")]
    DuplicateEngine(EngineId),
}

/// Immutable registry of configured engines.
///
/// Entries are held in priority order (lowest value first, declaration
/// order breaking ties) so resolution is a linear scan that stops at
/// the first fit.
#[derive(Debug)]
pub struct EngineRegistry {
    entries: Vec<EngineEntry>,
    by_id: HashMap<EngineId, usize>,
}

impl EngineRegistry {
    pub fn new(mut entries: Vec<EngineEntry>) -> Result<Self, RegistryError> {
        entries.sort_by_key(|e| e.priority);
        let mut by_id = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            if by_id.insert(entry.id.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateEngine(entry.id.clone()));
            }
        }
        Ok(Self { entries, by_id })
    }

    /// Pick the engine for a conversion.
    ///
    /// Scans engines in priority order and returns the first one whose
    /// declared pairs include the requested conversion and whose
    /// capability window covers the input size and the requested
    /// options. Distinguishes "nobody converts this pair" from "the
    /// pair is convertible but the file is too big for everyone".
    pub fn resolve(
        &self,
        input: MediaFormat,
        output: MediaFormat,
        size_bytes: u64,
        options: &ConversionOptions,
    ) -> Result<&EngineEntry, RegistryError> {
        let mut pair_seen = false;
        for entry in &self.entries {
            if !entry.supports_pair(input, output) {
                continue;
            }
            pair_seen = true;
            if size_bytes > entry.capabilities.max_file_size_bytes {
                continue;
            }
            if !options_within(options, &entry.capabilities) {
                continue;
            }
            return Ok(entry);
        }
        if pair_seen {
            Err(RegistryError::FileTooLarge { size_bytes })
        } else {
            Err(RegistryError::NotSupported { input, output })
        }
    }

    /// Look up an engine by id.
    pub fn get(&self, id: &EngineId) -> Result<&EngineEntry, RegistryError> {
        self.by_id
            .get(id)
            .map(|&idx| &self.entries[idx])
            .ok_or_else(|| RegistryError::UnknownEngine(id.clone()))
    }

    /// Capability window of a configured engine.
    pub fn capabilities(&self, id: &EngineId) -> Result<&EngineCapabilities, RegistryError> {
        self.get(id).map(|e| &e.capabilities)
    }

    /// All distinct format pairs any engine supports, for the formats
    /// listing endpoint.
    pub fn supported_pairs(&self) -> Vec<FormatPair> {
        let mut pairs: Vec<FormatPair> = Vec::new();
        for entry in &self.entries {
            for pair in &entry.pairs {
                if !pairs.contains(pair) {
                    pairs.push(*pair);
                }
            }
        }
        pairs
    }

    pub fn entries(&self) -> &[EngineEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Coarse option check used during resolution.
///
/// The validator reports the precise offending field; here we only need
/// to know whether this engine's window covers the request at all.
pub(crate) fn options_within(options: &ConversionOptions, caps: &EngineCapabilities) -> bool {
    if let Some(quality) = options.quality() {
        if !caps.allowed_qualities.is_empty() && !caps.allowed_qualities.contains(&quality) {
            return false;
        }
    }
    if let Some(resolution) = options.resolution() {
        if !caps.allowed_resolutions.is_empty() && !caps.allowed_resolutions.contains(&resolution) {
            return false;
        }
    }
    if let Some(framerate) = options.framerate() {
        if !caps.allowed_framerates.is_empty() && !caps.allowed_framerates.contains(&framerate) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{QualityPreset, Resolution, VideoOptions};
    use crate::registry::EngineKind;

    fn entry(id: &str, priority: u32, pairs: Vec<FormatPair>, caps: EngineCapabilities) -> EngineEntry {
        EngineEntry {
            id: EngineId::from(id),
            kind: EngineKind::Local,
            priority,
            pairs,
            capabilities: caps,
        }
    }

    fn mov_to_mp4() -> Vec<FormatPair> {
        vec![FormatPair {
            input: MediaFormat::Mov,
            output: MediaFormat::Mp4,
        }]
    }

    fn video_options(quality: QualityPreset) -> ConversionOptions {
        ConversionOptions::Video(VideoOptions {
            quality: Some(quality),
            resolution: None,
            framerate: None,
        })
    }

    #[test]
    fn test_resolve_picks_first_by_priority() {
        let registry = EngineRegistry::new(vec![
            entry("second", 20, mov_to_mp4(), EngineCapabilities::default()),
            entry("first", 10, mov_to_mp4(), EngineCapabilities::default()),
        ])
        .unwrap();

        let resolved = registry
            .resolve(
                MediaFormat::Mov,
                MediaFormat::Mp4,
                1024,
                &ConversionOptions::default(),
            )
            .unwrap();
        assert_eq!(resolved.id.as_str(), "first");
    }

    #[test]
    fn test_resolve_unsupported_pair() {
        let registry =
            EngineRegistry::new(vec![entry("only", 0, mov_to_mp4(), EngineCapabilities::default())])
                .unwrap();
        let err = registry
            .resolve(
                MediaFormat::Avi,
                MediaFormat::Webm,
                1024,
                &ConversionOptions::default(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotSupported {
                input: MediaFormat::Avi,
                output: MediaFormat::Webm,
            }
        );
    }

    #[test]
    fn test_resolve_skips_engine_over_size_limit() {
        let small = EngineCapabilities {
            max_file_size_bytes: 1000,
            ..Default::default()
        };
        let registry = EngineRegistry::new(vec![
            entry("small", 10, mov_to_mp4(), small),
            entry("big", 20, mov_to_mp4(), EngineCapabilities::default()),
        ])
        .unwrap();

        let resolved = registry
            .resolve(
                MediaFormat::Mov,
                MediaFormat::Mp4,
                5000,
                &ConversionOptions::default(),
            )
            .unwrap();
        assert_eq!(resolved.id.as_str(), "big");
    }

    #[test]
    fn test_resolve_all_too_small_is_file_too_large() {
        let small = EngineCapabilities {
            max_file_size_bytes: 1000,
            ..Default::default()
        };
        let registry =
            EngineRegistry::new(vec![entry("small", 0, mov_to_mp4(), small)]).unwrap();
        let err = registry
            .resolve(
                MediaFormat::Mov,
                MediaFormat::Mp4,
                5000,
                &ConversionOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err, RegistryError::FileTooLarge { size_bytes: 5000 });
    }

    #[test]
    fn test_resolve_respects_option_window() {
        let low_only = EngineCapabilities {
            allowed_qualities: vec![QualityPreset::Low],
            ..Default::default()
        };
        let any = EngineCapabilities::default();
        let registry = EngineRegistry::new(vec![
            entry("low-only", 10, mov_to_mp4(), low_only),
            entry("any", 20, mov_to_mp4(), any),
        ])
        .unwrap();

        let resolved = registry
            .resolve(
                MediaFormat::Mov,
                MediaFormat::Mp4,
                1024,
                &video_options(QualityPreset::High),
            )
            .unwrap();
        assert_eq!(resolved.id.as_str(), "any");
    }

    #[test]
    fn test_duplicate_engine_rejected() {
        let err = EngineRegistry::new(vec![
            entry("dup", 0, mov_to_mp4(), EngineCapabilities::default()),
            entry("dup", 1, mov_to_mp4(), EngineCapabilities::default()),
        ])
        .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateEngine(EngineId::from("dup")));
    }

    #[test]
    fn test_supported_pairs_deduplicated() {
        let registry = EngineRegistry::new(vec![
            entry("a", 0, mov_to_mp4(), EngineCapabilities::default()),
            entry("b", 1, mov_to_mp4(), EngineCapabilities::default()),
        ])
        .unwrap();
        assert_eq!(registry.supported_pairs().len(), 1);
    }

    #[test]
    fn test_options_within_empty_lists_allow_anything() {
        let caps = EngineCapabilities::default();
        let options = ConversionOptions::Video(VideoOptions {
            quality: Some(QualityPreset::High),
            resolution: Some(Resolution::R2160p),
            framerate: Some(120),
        });
        assert!(options_within(&options, &caps));
    }
}
