//! Immutable, position-indexed view over a session's subtitle cues.
//!
//! Lookups are logarithmic: a binary search over start times, plus a
//! prefix-maximum of end times so that overlapping cues (which well-formed
//! SRT never has, but real files sometimes do) still resolve to the
//! earliest-starting cue that covers the position.

use crate::subtitle::Cue;
use std::ops::Range;
use std::time::Duration;

#[derive(Debug)]
pub struct Timeline {
    cues: Vec<Cue>,
    /// `max_end[i]` is the latest end time among `cues[..=i]`.
    max_end: Vec<Duration>,
}

impl Timeline {
    /// Sort cues by start (stable, so file order breaks ties) and renumber
    /// them so that `cue.index` is the position in the timeline.
    pub fn new(mut cues: Vec<Cue>) -> Self {
        cues.sort_by_key(|c| c.start);
        let mut max_end = Vec::with_capacity(cues.len());
        let mut running = Duration::ZERO;
        for (i, cue) in cues.iter_mut().enumerate() {
            cue.index = i;
            running = running.max(cue.end);
            max_end.push(running);
        }
        Self { cues, max_end }
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Cue> {
        self.cues.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cue> {
        self.cues.iter()
    }

    /// The cue whose `[start, end)` contains `position`.
    pub fn lookup(&self, position: Duration) -> Option<&Cue> {
        // Cues that have started by `position`.
        let started = self.cues.partition_point(|c| c.start <= position);
        // First cue whose end lies beyond `position`; earlier ones all ended.
        let first_open = self.max_end.partition_point(|&end| end <= position);
        if first_open < started {
            Some(&self.cues[first_open])
        } else {
            None
        }
    }

    /// Index range of the look-ahead window at `position`: the active cue
    /// (if any) followed by up to `lookahead` cues that start later.
    pub fn window(&self, position: Duration, lookahead: usize) -> Range<usize> {
        let next = self.next_after(position).map_or(self.cues.len(), |c| c.index);
        let begin = self.lookup(position).map_or(next, |c| c.index);
        let end = next.saturating_add(lookahead).min(self.cues.len());
        begin..end.max(begin)
    }

    /// Up to `max_chars` of cue text drawn evenly from the whole file.
    pub fn text_sample(&self, max_chars: usize) -> String {
        if self.cues.is_empty() {
            return String::new();
        }
        let total: usize = self.cues.iter().map(|c| c.text.len() + 1).sum();
        let stride = (total / max_chars.max(1)).max(1);
        let mut sample = String::new();
        for cue in self.cues.iter().step_by(stride) {
            if sample.len() >= max_chars {
                break;
            }
            let text = cue.speech_text();
            if text.is_empty() {
                continue;
            }
            if !sample.is_empty() {
                sample.push(' ');
            }
            sample.push_str(&text);
        }
        sample
    }

    /// The earliest cue that starts strictly after `position`.
    pub fn next_after(&self, position: Duration) -> Option<&Cue> {
        let next = self.cues.partition_point(|c| c.start <= position);
        self.cues.get(next)
    }
}
