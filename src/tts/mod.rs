pub mod edge;
pub mod google;

use crate::config::VoiceConfig;
use crate::error::{DubError, DubResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Trait for pluggable TTS backends.
///
/// Implementations are synchronous (blocking HTTP or subprocess calls). The
/// synthesis gateway runs them on the blocking thread pool so the scheduling
/// loop is never stalled.
pub trait TtsEngine: Send + Sync {
    /// Synthesize `text` and write the audio next to `output_path` (the engine
    /// picks the extension). Returns the path actually written.
    fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice: Option<&str>,
        speed: f32,
        output_path: &Path,
    ) -> DubResult<PathBuf>;

    fn engine_name(&self) -> &str;
}

/// Factory: create a TTS engine from the voice config.
pub fn create_engine(config: &VoiceConfig) -> DubResult<Box<dyn TtsEngine>> {
    match config.engine.as_str() {
        "google" => {
            let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
            Ok(Box::new(google::GoogleTtsEngine::new(timeout)))
        }
        "edge" => {
            let engine = edge::EdgeTtsEngine::new()?;
            Ok(Box::new(engine))
        }
        other => Err(DubError::Tts(format!(
            "Unknown TTS engine: '{other}'. Supported: google, edge"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_engine_google() {
        let config = VoiceConfig::default();
        let engine = create_engine(&config).unwrap();
        assert_eq!(engine.engine_name(), "google");
    }

    #[test]
    fn test_create_engine_edge() {
        let config = VoiceConfig {
            engine: "edge".into(),
            ..Default::default()
        };
        // edge-tts may or may not be installed; test the factory dispatch
        if let Ok(engine) = create_engine(&config) {
            assert_eq!(engine.engine_name(), "edge");
        }
    }

    #[test]
    fn test_create_engine_unknown() {
        let config = VoiceConfig {
            engine: "nonexistent".into(),
            ..Default::default()
        };
        let result = create_engine(&config);
        assert!(result.is_err());
    }
}
