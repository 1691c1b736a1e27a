use crate::error::{DubError, DubResult};
use crate::tts::TtsEngine;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const ENDPOINT: &str = "https://translate.google.com/translate_tts";
/// The endpoint rejects longer inputs.
const MAX_CHUNK_CHARS: usize = 100;
const SLOW_SPEED: &str = "0.24";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) subdub";

/// TTS engine backed by the Google Translate speech endpoint.
///
/// No API key. Returns MP3. The service only knows a normal and a slow
/// voice, so any speed below 1.0 selects the slow voice and anything faster
/// plays at normal speed.
pub struct GoogleTtsEngine {
    agent: ureq::Agent,
}

impl GoogleTtsEngine {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }
}

impl TtsEngine for GoogleTtsEngine {
    fn synthesize(
        &self,
        text: &str,
        language: &str,
        _voice: Option<&str>,
        speed: f32,
        output_path: &Path,
    ) -> DubResult<PathBuf> {
        let chunks = split_chunks(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Err(DubError::Tts("Nothing to synthesize".into()));
        }
        let ttsspeed = if speed < 1.0 { SLOW_SPEED } else { "1" };
        let total = chunks.len().to_string();

        // MP3 frames concatenate cleanly, so chunk responses are appended.
        let mut audio = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            let response = self
                .agent
                .get(ENDPOINT)
                .query("ie", "UTF-8")
                .query("client", "tw-ob")
                .query("tl", language)
                .query("q", chunk)
                .query("total", &total)
                .query("idx", idx.to_string())
                .query("textlen", chunk.chars().count().to_string())
                .query("ttsspeed", ttsspeed)
                .header("User-Agent", USER_AGENT)
                .call()
                .map_err(|e| DubError::Tts(format!("Google TTS request failed: {e}")))?;

            let bytes = response
                .into_body()
                .read_to_vec()
                .map_err(|e| DubError::Tts(format!("Failed to read Google TTS response: {e}")))?;
            audio.extend_from_slice(&bytes);
        }

        if audio.is_empty() {
            return Err(DubError::Tts("Google TTS returned no audio".into()));
        }

        let mp3_path = output_path.with_extension("mp3");
        std::fs::write(&mp3_path, &audio)
            .map_err(|e| DubError::Tts(format!("Failed to write MP3: {e}")))?;
        debug!(
            "Google TTS wrote {} bytes ({} chunk(s)) to {}",
            audio.len(),
            chunks.len(),
            mp3_path.display()
        );
        Ok(mp3_path)
    }

    fn engine_name(&self) -> &str {
        "google"
    }
}

/// Split text into chunks of at most `max_chars` characters, breaking on
/// whitespace where possible. Words longer than the limit are hard-split.
fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        let needed = if current.is_empty() { word_len } else { word_len + 1 };
        if current_len + needed <= max_chars {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            current_len += needed;
            continue;
        }
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if word_len <= max_chars {
            current.push_str(word);
            current_len = word_len;
        } else {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_text_single_chunk() {
        assert_eq!(split_chunks("Hello world", 100), vec!["Hello world"]);
    }

    #[test]
    fn test_split_on_word_boundaries() {
        let chunks = split_chunks("one two three four", 9);
        assert_eq!(chunks, vec!["one two", "three", "four"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9));
    }

    #[test]
    fn test_split_long_word() {
        let chunks = split_chunks("abcdefghij xy", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij", "xy"]);
    }

    #[test]
    fn test_split_counts_chars_not_bytes() {
        let text = "žluťoučký kůň";
        assert_eq!(split_chunks(text, 13), vec![text]);
    }

    #[test]
    fn test_split_empty() {
        assert!(split_chunks("   \n ", 100).is_empty());
    }

    #[test]
    fn test_synthesize_empty_text_errors_without_request() {
        let engine = GoogleTtsEngine::new(Duration::from_secs(1));
        let dir = tempfile::tempdir().unwrap();
        let result = engine.synthesize(" ", "en", None, 1.0, &dir.path().join("x"));
        assert!(result.is_err());
    }
}
