use crate::error::{DubError, DubResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// A single subtitle cue. Immutable once the timeline is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    /// Ordinal inside the sorted timeline (0-based). Identity of the cue.
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

impl Cue {
    /// Text as it should be spoken: markup removed, lines joined.
    pub fn speech_text(&self) -> String {
        let stripped = strip_markup(&self.text);
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Remove `<i>`-style HTML tags and `{\an8}`-style ASS override blocks.
/// A bracket without its closer is ordinary text ("I <3 you").
fn strip_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(['<', '{']) {
        let close = if rest[open..].starts_with('<') { '>' } else { '}' };
        out.push_str(&rest[..open]);
        match rest[open + 1..].find(close) {
            Some(len) => rest = &rest[open + 1 + len + 1..],
            None => {
                out.push_str(&rest[open..open + 1]);
                rest = &rest[open + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Read and parse a SubRip file.
pub fn load_srt(path: &Path) -> DubResult<Vec<Cue>> {
    let bytes = std::fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    let cues = parse_srt(&content).map_err(|(line, message)| DubError::SubtitleParse {
        path: path.to_path_buf(),
        line,
        message,
    })?;
    if cues.is_empty() {
        return Err(DubError::NoCues(path.to_path_buf()));
    }
    debug!("Parsed {} cues from {}", cues.len(), path.display());
    Ok(cues)
}

/// Parse SubRip content into cues in file order.
///
/// Errors carry the 1-based line number. Cues with `start >= end` are dropped
/// with a warning. Indices are provisional; `Timeline::new` renumbers them.
pub fn parse_srt(content: &str) -> Result<Vec<Cue>, (usize, String)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut cues = Vec::new();
    let mut lines = content.lines().enumerate().peekable();

    loop {
        // Skip blank lines between blocks.
        while matches!(lines.peek(), Some((_, l)) if l.trim().is_empty()) {
            lines.next();
        }
        let Some((first_no, first)) = lines.next() else {
            break;
        };

        // The numeric counter line is optional in practice.
        let (timing_no, timing) = if first.contains("-->") {
            (first_no, first)
        } else {
            match lines.next() {
                Some((no, l)) if l.contains("-->") => (no, l),
                Some((no, _)) => return Err((no + 1, "expected a timing line".into())),
                None => return Err((first_no + 1, "unexpected end of file".into())),
            }
        };
        let (start, end) = parse_timing(timing).map_err(|m| (timing_no + 1, m))?;

        let mut text_lines = Vec::new();
        while let Some((_, l)) = lines.peek() {
            if l.trim().is_empty() {
                break;
            }
            text_lines.push(l.trim_end().to_string());
            lines.next();
        }

        if start >= end {
            warn!(
                "Dropping cue at line {}: start {:?} is not before end {:?}",
                timing_no + 1,
                start,
                end
            );
            continue;
        }
        cues.push(Cue {
            index: cues.len(),
            start,
            end,
            text: text_lines.join("\n"),
        });
    }

    Ok(cues)
}

/// Parse `"00:00:01,000 --> 00:00:02,500 X1:..."`.
fn parse_timing(line: &str) -> Result<(Duration, Duration), String> {
    let (left, right) = line
        .split_once("-->")
        .ok_or_else(|| "missing '-->'".to_string())?;
    let start = parse_srt_time(left.trim())?;
    let end_token = right.split_whitespace().next().unwrap_or("");
    let end = parse_srt_time(end_token)?;
    Ok((start, end))
}

/// Parse SRT timestamp `"HH:MM:SS,mmm"`. Also accepts `.` before the
/// milliseconds and a missing hours field.
fn parse_srt_time(s: &str) -> Result<Duration, String> {
    let bad = || format!("invalid timestamp '{s}'");
    let (clock, frac) = match s.rsplit_once([',', '.']) {
        Some((c, f)) => (c, f),
        None => (s, "0"),
    };
    if frac.is_empty() || frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    // "5" means 500ms, "05" means 50ms.
    let millis = frac.parse::<u64>().map_err(|_| bad())? * 10u64.pow(3 - frac.len() as u32);

    let parts: Vec<&str> = clock.split(':').collect();
    let (h, m, sec) = match parts.as_slice() {
        [h, m, sec] => (*h, *m, *sec),
        [m, sec] => ("0", *m, *sec),
        _ => return Err(bad()),
    };
    let parse = |v: &str| v.trim().parse::<u64>().map_err(|_| bad());
    let (h, m, sec) = (parse(h)?, parse(m)?, parse(sec)?);
    if m >= 60 || sec >= 60 {
        return Err(bad());
    }
    let total = h
        .checked_mul(3600)
        .and_then(|v| v.checked_add(m * 60 + sec))
        .and_then(|v| v.checked_mul(1000))
        .and_then(|v| v.checked_add(millis))
        .ok_or_else(bad)?;
    Ok(Duration::from_millis(total))
}

/// Format a position as SRT timestamp: "HH:MM:SS,mmm"
pub fn format_srt_time(position: Duration) -> String {
    let total_ms = position.as_millis() as u64;
    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;
    let s = total_s % 60;
    let total_m = total_s / 60;
    let m = total_m % 60;
    let h = total_m / 60;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Pick the subtitle file for a video: the explicit path if given, else the
/// sibling `<video stem>.srt`.
pub fn resolve_subtitle_path(video: &Path, explicit: Option<&Path>) -> DubResult<PathBuf> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => video.with_extension("srt"),
    };
    if path.is_file() {
        return Ok(path);
    }
    Err(DubError::SubtitlesNotFound {
        candidates: nearby_subtitles(video, &path),
        path,
    })
}

/// Other `.srt` files in the video's directory, best name match first.
fn nearby_subtitles(video: &Path, exclude: &Path) -> Vec<String> {
    let dir = match video.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let video_stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut scored: Vec<(f64, String)> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("srt"))
                && p != exclude
        })
        .filter_map(|p| {
            let name = p.file_name()?.to_string_lossy().into_owned();
            let stem = p.file_stem()?.to_string_lossy().into_owned();
            Some((name_similarity(&video_stem, &stem), name))
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, name)| name).collect()
}

/// Fraction of shared words between two file names, after lowercasing and
/// splitting on anything non-alphanumeric.
fn name_similarity(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> Vec<String> {
        s.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect()
    };
    let (wa, wb) = (words(a), words(b));
    let longest = wa.len().max(wb.len());
    if longest == 0 {
        return 0.0;
    }
    let shared = wa.iter().filter(|w| wb.contains(w)).count();
    shared as f64 / longest as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    /// Write cues back out as SRT.
    fn to_srt(cues: &[Cue]) -> String {
        let mut out = String::new();
        for cue in cues {
            out.push_str(&format!("{}\n", cue.index + 1));
            out.push_str(&format!(
                "{} --> {}\n",
                format_srt_time(cue.start),
                format_srt_time(cue.end),
            ));
            out.push_str(&cue.text);
            out.push_str("\n\n");
        }
        out
    }

    const SAMPLE: &str = "\
1
00:00:01,000 --> 00:00:02,500
Hello there

2
00:00:03,000 --> 00:00:05,000
<i>Two lines</i>
of text
";

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(ms(0)), "00:00:00,000");
        assert_eq!(format_srt_time(ms(65_500)), "00:01:05,500");
        assert_eq!(format_srt_time(ms(3_661_123)), "01:01:01,123");
    }

    #[test]
    fn test_parse_srt_time_variants() {
        assert_eq!(parse_srt_time("00:01:05,500"), Ok(ms(65_500)));
        assert_eq!(parse_srt_time("00:01:05.500"), Ok(ms(65_500)));
        assert_eq!(parse_srt_time("01:05,5"), Ok(ms(65_500)));
        assert_eq!(parse_srt_time("1:00:00,000"), Ok(ms(3_600_000)));
        assert!(parse_srt_time("00:61:00,000").is_err());
        assert!(parse_srt_time("garbage").is_err());
    }

    #[test]
    fn test_parse_srt_time_huge_hours_is_error() {
        assert!(parse_srt_time("99999999999999999:00:00,000").is_err());
        assert!(parse_srt_time("18446744073709551615:00:00,000").is_err());
    }

    #[test]
    fn test_strip_markup_keeps_unmatched_brackets() {
        assert_eq!(strip_markup("I <3 you so much"), "I <3 you so much");
        assert_eq!(strip_markup("5 < 6, ok"), "5 < 6, ok");
        assert_eq!(strip_markup("a { b"), "a { b");
        assert_eq!(strip_markup("<b>bold</b> and 1 < 2"), "bold and 1 < 2");
        assert_eq!(strip_markup("{\\i1}x{ y"), "x{ y");
    }

    #[test]
    fn test_parse_basic() {
        let cues = parse_srt(SAMPLE).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].start, ms(1000));
        assert_eq!(cues[0].end, ms(2500));
        assert_eq!(cues[0].text, "Hello there");
        assert_eq!(cues[1].text, "<i>Two lines</i>\nof text");
        assert_eq!(cues[1].speech_text(), "Two lines of text");
    }

    #[test]
    fn test_parse_crlf_bom_and_missing_counter() {
        let content = "\u{feff}00:00:01,000 --> 00:00:02,000\r\nNo counter\r\n\r\n\r\n7\r\n00:00:04,000 --> 00:00:05,000 X1:10 X2:20\r\nSeven\r\n";
        let cues = parse_srt(content).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "No counter");
        assert_eq!(cues[1].end, ms(5000));
        assert_eq!(cues[1].text, "Seven");
    }

    #[test]
    fn test_parse_reports_line_number() {
        let content = "1\n00:00:01,000 --> 00:00:02,000\nok\n\n2\nnot a timing line\n";
        let err = parse_srt(content).unwrap_err();
        assert_eq!(err.0, 6);
    }

    #[test]
    fn test_parse_drops_inverted_cue() {
        let content = "1\n00:00:05,000 --> 00:00:04,000\nbackwards\n\n2\n00:00:06,000 --> 00:00:07,000\nfine\n";
        let cues = parse_srt(content).unwrap();
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "fine");
    }

    #[test]
    fn test_roundtrip_preserves_cues() {
        let cues = parse_srt(SAMPLE).unwrap();
        let reparsed = parse_srt(&to_srt(&cues)).unwrap();
        assert_eq!(cues, reparsed);
    }

    #[test]
    fn test_speech_text_strips_ass_tags() {
        let cue = Cue {
            index: 0,
            start: ms(0),
            end: ms(1),
            text: "{\\an8}Top\n  line ".into(),
        };
        assert_eq!(cue.speech_text(), "Top line");
    }

    #[test]
    fn test_load_srt_empty_file_is_no_cues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.srt");
        std::fs::write(&path, "\n\n").unwrap();
        assert!(matches!(load_srt(&path), Err(DubError::NoCues(_))));
    }

    #[test]
    fn test_resolve_sibling_srt() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("movie.mkv");
        std::fs::write(&video, b"").unwrap();
        std::fs::write(dir.path().join("movie.srt"), SAMPLE).unwrap();
        let resolved = resolve_subtitle_path(&video, None).unwrap();
        assert_eq!(resolved, dir.path().join("movie.srt"));
    }

    #[test]
    fn test_resolve_missing_lists_ranked_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("The.Movie.2020.mkv");
        std::fs::write(&video, b"").unwrap();
        std::fs::write(dir.path().join("unrelated.srt"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("the movie 2020 en.srt"), SAMPLE).unwrap();

        match resolve_subtitle_path(&video, None) {
            Err(DubError::SubtitlesNotFound { candidates, .. }) => {
                assert_eq!(candidates, vec!["the movie 2020 en.srt", "unrelated.srt"]);
            }
            other => panic!("expected SubtitlesNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_explicit_missing() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("movie.mkv");
        let subs = dir.path().join("nope.srt");
        assert!(resolve_subtitle_path(&video, Some(&subs)).is_err());
    }
}
