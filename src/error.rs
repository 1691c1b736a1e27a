use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DubError {
    #[error("Video file not found: {0}")]
    VideoNotFound(PathBuf),

    #[error("Subtitle file not found: {path}")]
    SubtitlesNotFound {
        path: PathBuf,
        /// Other `.srt` files next to the video, best name match first.
        candidates: Vec<String>,
    },

    #[error("Failed to parse subtitles in {path} (line {line}): {message}")]
    SubtitleParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("No subtitles found in {0}")]
    NoCues(PathBuf),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to parse config: {0}")]
    ConfigParse(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Player error: {0}")]
    Player(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Synthesis failed for cue {cue}: {message}")]
    SynthesisFailed { cue: usize, message: String },

    #[error("Synthesis cancelled for cue {0}")]
    Cancelled(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl DubError {
    /// Return an actionable hint for the user, if applicable.
    pub fn hint(&self) -> Option<String> {
        match self {
            DubError::VideoNotFound(_) => {
                Some("Check the path. Relative paths are resolved from the current directory.".into())
            }
            DubError::SubtitlesNotFound { candidates, .. } => {
                if candidates.is_empty() {
                    Some("Pass --subs <file.srt>, or place an .srt with the same base name next to the video.".into())
                } else {
                    Some(format!(
                        "Found other subtitle files nearby, pass one with --subs: {}",
                        candidates.join(", ")
                    ))
                }
            }
            DubError::SubtitleParse { .. } => Some(
                "Only SubRip (.srt) files are supported. Check that every block has a 'HH:MM:SS,mmm --> HH:MM:SS,mmm' line and that the file is UTF-8.".into(),
            ),
            DubError::NoCues(_) => Some("The subtitle file contains no usable cues.".into()),
            DubError::ConfigNotFound(_) => {
                Some("Omit --config to use built-in defaults, or check the path.".into())
            }
            DubError::ConfigParse(_) => Some(
                "Check TOML syntax. Known sections: [sync], [voice], [player].".into(),
            ),
            DubError::AudioDevice(_) => Some(
                "Ensure an audio output device is available (on Linux: check ALSA/PulseAudio/PipeWire).".into(),
            ),
            DubError::Player(_) => Some(
                "Ensure mpv is installed and on your PATH. Install via: brew install mpv (macOS) or apt install mpv (Linux).".into(),
            ),
            DubError::Tts(_) => Some(
                "The default 'google' engine needs internet access. For 'edge': pip install edge-tts.".into(),
            ),
            _ => None,
        }
    }
}

pub type DubResult<T> = Result<T, DubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtitles_hint_lists_candidates() {
        let err = DubError::SubtitlesNotFound {
            path: PathBuf::from("movie.srt"),
            candidates: vec!["movie.en.srt".into(), "other.srt".into()],
        };
        let hint = err.hint().unwrap();
        assert!(hint.contains("movie.en.srt, other.srt"));
    }

    #[test]
    fn test_subtitles_hint_without_candidates() {
        let err = DubError::SubtitlesNotFound {
            path: PathBuf::from("movie.srt"),
            candidates: vec![],
        };
        assert!(err.hint().unwrap().contains("--subs"));
    }

    #[test]
    fn test_recoverable_errors_have_no_hint() {
        assert!(DubError::Cancelled(3).hint().is_none());
        let err = DubError::SynthesisFailed {
            cue: 1,
            message: "timeout".into(),
        };
        assert!(err.hint().is_none());
        assert_eq!(err.to_string(), "Synthesis failed for cue 1: timeout");
    }
}
