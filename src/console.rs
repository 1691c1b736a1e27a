//! User-facing status output on stderr.
//!
//! The key reader puts the terminal in raw mode, where `\n` no longer returns
//! the carriage, so every line is written as `\r...\r\n`. The cue line and the
//! precache progress overwrite themselves in place.

use colored::*;
use std::fmt::Display;
use std::io::Write;

const CUE_PREVIEW_CHARS: usize = 50;

/// Erase to end of line.
const CLEAR_EOL: &str = "\x1b[K";

pub fn notice(msg: impl Display) {
    eprint!("\r{} {msg}{CLEAR_EOL}\r\n", "dub:".cyan().bold());
}

pub fn warning(msg: impl Display) {
    eprint!("\r{} {msg}{CLEAR_EOL}\r\n", "warning:".yellow().bold());
}

pub fn done(msg: impl Display) {
    eprint!("\r{} {msg}{CLEAR_EOL}\r\n", "done:".green().bold());
}

pub fn precache_progress(done: usize, total: usize) {
    let pct = if total > 0 {
        done as f64 / total as f64 * 100.0
    } else {
        100.0
    };
    eprint!(
        "\r{} Generating audio {done}/{total} ({pct:.0}%){CLEAR_EOL}",
        "dub:".cyan().bold()
    );
    let _ = std::io::stderr().flush();
    if done == total {
        eprint!("\r\n");
    }
}

/// Show the cue that is being spoken, replacing the previous one.
pub fn cue_line(position: usize, total: usize, text: &str) {
    eprint!(
        "\r{} {}{CLEAR_EOL}",
        format!("[{position}/{total}]").dimmed(),
        preview(text, CUE_PREVIEW_CHARS)
    );
    let _ = std::io::stderr().flush();
}

pub fn controls_banner() {
    let keys = [
        ("s", "stop dubbing (video keeps playing)"),
        ("q", "quit"),
        ("m", "mute/unmute speech"),
        ("[ ]", "slower/faster speech for upcoming lines"),
        ("space, arrows", "pause and seek in the player window"),
    ];
    eprint!("\r{}\r\n", "Controls:".bold());
    for (key, action) in keys {
        eprint!("\r  {} {action}\r\n", format!("{key:<14}").bold());
    }
}

/// Single-line preview: newlines folded, cut at `max` characters.
fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max).collect();
    format!("{cut}...")
}
