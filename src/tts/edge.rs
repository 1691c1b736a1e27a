use crate::error::{DubError, DubResult};
use crate::tts::TtsEngine;
use std::path::{Path, PathBuf};
use std::process::Command;

/// TTS engine using Microsoft Edge's neural TTS via the `edge-tts` Python CLI.
///
/// Requires `pip install edge-tts` and internet access. Unlike the Google
/// engine it honors the full speed range through `--rate`.
pub struct EdgeTtsEngine;

impl EdgeTtsEngine {
    /// Create a new EdgeTtsEngine, verifying `edge-tts` is on PATH.
    pub fn new() -> DubResult<Self> {
        let check = Command::new("which")
            .arg("edge-tts")
            .output()
            .map_err(|e| DubError::Tts(format!("Failed to check for 'edge-tts': {e}")))?;

        if !check.status.success() {
            return Err(DubError::Tts(
                "edge-tts not found. Install with: pip install edge-tts".into(),
            ));
        }

        Ok(Self)
    }
}

/// Convert a speed multiplier to an edge-tts `--rate` string.
///
/// `1.0` → `"+0%"`, `1.2` → `"+20%"`, `0.8` → `"-20%"`.
fn speed_to_rate(speed: f32) -> String {
    let pct = ((speed - 1.0) * 100.0).round() as i32;
    if pct >= 0 {
        format!("+{pct}%")
    } else {
        format!("{pct}%")
    }
}

/// Default neural voice for a two-letter language code.
fn default_voice_for(language: &str) -> &'static str {
    match language.split('-').next().unwrap_or_default() {
        "de" => "de-DE-KatjaNeural",
        "es" => "es-ES-ElviraNeural",
        "fr" => "fr-FR-DeniseNeural",
        "it" => "it-IT-ElsaNeural",
        "ja" => "ja-JP-NanamiNeural",
        "ko" => "ko-KR-SunHiNeural",
        "nl" => "nl-NL-ColetteNeural",
        "pl" => "pl-PL-ZofiaNeural",
        "pt" => "pt-BR-FranciscaNeural",
        "ru" => "ru-RU-SvetlanaNeural",
        "tr" => "tr-TR-EmelNeural",
        "uk" => "uk-UA-PolinaNeural",
        "zh" => "zh-CN-XiaoxiaoNeural",
        _ => "en-US-AriaNeural",
    }
}

impl TtsEngine for EdgeTtsEngine {
    fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice: Option<&str>,
        speed: f32,
        output_path: &Path,
    ) -> DubResult<PathBuf> {
        let voice = voice.unwrap_or_else(|| default_voice_for(language));
        let rate = speed_to_rate(speed);
        let mp3_path = output_path.with_extension("mp3");

        let output = Command::new("edge-tts")
            .args(["--voice", voice])
            .args(["--rate", &rate])
            .args(["--text", text])
            .arg("--write-media")
            .arg(&mp3_path)
            .output()
            .map_err(|e| DubError::Tts(format!("Failed to run 'edge-tts': {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let _ = std::fs::remove_file(&mp3_path);
            return Err(DubError::Tts(format!("'edge-tts' failed: {stderr}")));
        }

        Ok(mp3_path)
    }

    fn engine_name(&self) -> &str {
        "edge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_to_rate() {
        assert_eq!(speed_to_rate(1.0), "+0%");
        assert_eq!(speed_to_rate(1.2), "+20%");
        assert_eq!(speed_to_rate(0.8), "-20%");
        assert_eq!(speed_to_rate(0.5), "-50%");
        assert_eq!(speed_to_rate(2.0), "+100%");
    }

    #[test]
    fn test_default_voice_for_language() {
        assert_eq!(default_voice_for("de"), "de-DE-KatjaNeural");
        assert_eq!(default_voice_for("en"), "en-US-AriaNeural");
        assert_eq!(default_voice_for("zh-CN"), "zh-CN-XiaoxiaoNeural");
        assert_eq!(default_voice_for("xx"), "en-US-AriaNeural");
    }
}
