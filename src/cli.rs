use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "subdub",
    about = "Dub a video live by speaking its subtitles in sync with playback",
    version,
    after_help = "\x1b[1mExamples:\x1b[0m
  subdub movie.mkv                      Speak movie.srt while movie.mkv plays
  subdub movie.mkv --subs other.srt     Use a specific subtitle file
  subdub movie.mkv --precache           Synthesize everything before playing
  subdub movie.mkv --speed 1.25 --lang de --engine edge"
)]
pub struct Cli {
    /// Video file to play
    pub video: PathBuf,

    /// Subtitle file (default: the video's name with an .srt extension)
    #[arg(long)]
    pub subs: Option<PathBuf>,

    /// Synthesize speech for every subtitle before playback starts
    #[arg(long)]
    pub precache: bool,

    /// Speech speed factor, clamped to 0.5-2.0
    #[arg(long, allow_negative_numbers = true)]
    pub speed: Option<f32>,

    /// Settings file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Speech language code, skipping detection (e.g. "en", "de")
    #[arg(long)]
    pub lang: Option<String>,

    /// TTS engine: google, edge
    #[arg(long)]
    pub engine: Option<String>,

    /// Engine-specific voice name
    #[arg(long)]
    pub voice: Option<String>,

    /// Upcoming subtitles to synthesize ahead of the playhead
    #[arg(long)]
    pub lookahead: Option<usize>,
}
