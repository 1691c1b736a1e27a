//! Uniform request/result contract around the TTS engine.
//!
//! Engines are blocking, so every call runs on the blocking pool and races a
//! cancellation token. One failed attempt is retried after a backoff; a second
//! failure is surfaced as [`DubError::SynthesisFailed`] and the cue is skipped.

use crate::error::{DubError, DubResult};
use crate::store::AudioArtifact;
use crate::tts::TtsEngine;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use whatlang::Lang;

/// Characters of subtitle text fed to language detection.
pub const LANGUAGE_SAMPLE_CHARS: usize = 2000;

const MAX_ATTEMPTS: usize = 2;

pub struct SynthesisGateway {
    engine: Arc<dyn TtsEngine>,
    language: String,
    voice: Option<String>,
    artifact_dir: PathBuf,
    retry_backoff: Duration,
    sequence: AtomicU64,
}

impl SynthesisGateway {
    pub fn new(
        engine: Arc<dyn TtsEngine>,
        language: String,
        voice: Option<String>,
        artifact_dir: PathBuf,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            engine,
            language,
            voice,
            artifact_dir,
            retry_backoff,
            sequence: AtomicU64::new(0),
        }
    }

    /// Session language, fixed at startup.
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn engine_name(&self) -> &str {
        self.engine.engine_name()
    }

    /// Synthesize one cue. Blank text is a no-op (`Ok(None)`, no request).
    pub async fn synthesize(
        &self,
        cue_index: usize,
        text: &str,
        speed: f32,
        cancel: &CancellationToken,
    ) -> DubResult<Option<AudioArtifact>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let mut last_error = None;
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DubError::Cancelled(cue_index)),
                    _ = tokio::time::sleep(self.retry_backoff) => {}
                }
                debug!("Retrying synthesis for cue {cue_index}");
            }
            match self.attempt(cue_index, text, speed, cancel).await {
                Ok(artifact) => return Ok(Some(artifact)),
                Err(DubError::Cancelled(i)) => return Err(DubError::Cancelled(i)),
                Err(e) => {
                    warn!("Synthesis attempt {} for cue {cue_index} failed: {e}", attempt + 1);
                    last_error = Some(e);
                }
            }
        }

        Err(DubError::SynthesisFailed {
            cue: cue_index,
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn attempt(
        &self,
        cue_index: usize,
        text: &str,
        speed: f32,
        cancel: &CancellationToken,
    ) -> DubResult<AudioArtifact> {
        // A unique name per attempt, so a cancelled call that still finishes
        // in the background never overwrites a later attempt's file.
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let output = self.artifact_dir.join(format!("cue-{cue_index:05}-{seq}"));

        let engine = Arc::clone(&self.engine);
        let text = text.to_string();
        let language = self.language.clone();
        let voice = self.voice.clone();
        let mut job = tokio::task::spawn_blocking(move || {
            engine.synthesize(&text, &language, voice.as_deref(), speed, &output)
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // The engine call cannot be interrupted; delete whatever it
                // writes once it returns.
                tokio::spawn(async move {
                    if let Ok(Ok(path)) = job.await {
                        AudioArtifact::new(path, speed).release();
                    }
                });
                Err(DubError::Cancelled(cue_index))
            }
            joined = &mut job => {
                let path = joined
                    .map_err(|e| DubError::Tts(format!("Synthesis worker failed: {e}")))??;
                if cancel.is_cancelled() {
                    AudioArtifact::new(path, speed).release();
                    return Err(DubError::Cancelled(cue_index));
                }
                Ok(AudioArtifact::new(path, speed))
            }
        }
    }
}

/// Detect the subtitle language as a two-letter code, falling back to
/// `fallback` when detection fails or yields a language the TTS services
/// cannot be addressed with.
pub fn detect_language(sample: &str, fallback: &str) -> String {
    match whatlang::detect(sample) {
        Some(info) => match iso_639_1(info.lang()) {
            Some(code) => {
                debug!(
                    "Detected {code} (confidence {:.2}, reliable: {})",
                    info.confidence(),
                    info.is_reliable()
                );
                code.to_string()
            }
            None => {
                warn!(
                    "Detected language {} has no TTS mapping, using '{fallback}'",
                    info.lang().code()
                );
                fallback.to_string()
            }
        },
        None => {
            warn!("Language detection failed, using '{fallback}'");
            fallback.to_string()
        }
    }
}

fn iso_639_1(lang: Lang) -> Option<&'static str> {
    Some(match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Rus => "ru",
        Lang::Ukr => "uk",
        Lang::Pol => "pl",
        Lang::Ces => "cs",
        Lang::Slk => "sk",
        Lang::Nld => "nl",
        Lang::Swe => "sv",
        Lang::Dan => "da",
        Lang::Nob => "no",
        Lang::Fin => "fi",
        Lang::Hun => "hu",
        Lang::Ron => "ro",
        Lang::Bul => "bg",
        Lang::Ell => "el",
        Lang::Tur => "tr",
        Lang::Ara => "ar",
        Lang::Heb => "iw",
        Lang::Hin => "hi",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        Lang::Cmn => "zh-CN",
        Lang::Vie => "vi",
        Lang::Tha => "th",
        Lang::Ind => "id",
        Lang::Cat => "ca",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeEngine;

    fn gateway(engine: Arc<FakeEngine>, dir: &std::path::Path) -> SynthesisGateway {
        SynthesisGateway::new(
            engine,
            "en".into(),
            None,
            dir.to_path_buf(),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn test_blank_text_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let gw = gateway(Arc::clone(&engine), dir.path());
        let result = gw.synthesize(0, "  \n ", 1.0, &CancellationToken::new()).await;
        assert!(result.unwrap().is_none());
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_success_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let gw = gateway(Arc::clone(&engine), dir.path());
        let artifact = gw
            .synthesize(4, "Hello", 1.5, &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(artifact.path.starts_with(dir.path()));
        assert!(artifact.path.is_file());
        assert_eq!(artifact.speed, 1.5);
        assert_eq!(engine.calls(), 1);
        assert_eq!(engine.last_language().as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_single_retry_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new().failing_first(1));
        let gw = gateway(Arc::clone(&engine), dir.path());
        let result = gw.synthesize(0, "Hi", 1.0, &CancellationToken::new()).await;
        assert!(result.unwrap().is_some());
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_two_failures_surface_synthesis_failed() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new().failing_text("Hi"));
        let gw = gateway(Arc::clone(&engine), dir.path());
        let result = gw.synthesize(2, "Hi", 1.0, &CancellationToken::new()).await;
        assert!(matches!(result, Err(DubError::SynthesisFailed { cue: 2, .. })));
        assert_eq!(engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let gw = gateway(Arc::clone(&engine), dir.path());
        let token = CancellationToken::new();
        token.cancel();
        let result = gw.synthesize(1, "Hi", 1.0, &token).await;
        assert!(matches!(result, Err(DubError::Cancelled(1))));
    }

    #[tokio::test]
    async fn test_cancel_during_slow_request() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new().slow_text("Hi", Duration::from_millis(300)));
        let gw = gateway(Arc::clone(&engine), dir.path());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let started = std::time::Instant::now();
        let result = gw.synthesize(0, "Hi", 1.0, &token).await;
        assert!(matches!(result, Err(DubError::Cancelled(0))));
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_detect_language() {
        let english = "I don't know what you are talking about. We should leave \
                       before it gets dark, the road is long and the night is cold.";
        assert_eq!(detect_language(english, "xx"), "en");

        let spanish = "No sé de qué estás hablando. Deberíamos irnos antes de que \
                       oscurezca, el camino es largo y la noche es fría.";
        assert_eq!(detect_language(spanish, "xx"), "es");
    }

    #[test]
    fn test_detect_language_falls_back() {
        assert_eq!(detect_language("", "de"), "de");
        assert_eq!(detect_language("123 456", "de"), "de");
    }
}
