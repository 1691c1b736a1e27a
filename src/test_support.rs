//! In-memory stand-ins for the player, the speaker and the TTS service.

use crate::audio::AudioBackend;
use crate::clock::{ClockSample, PlaybackClock};
use crate::error::{DubError, DubResult};
use crate::tts::TtsEngine;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct FakeEngine {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    failing: Vec<String>,
    slow: Vec<(String, Duration)>,
    per_text: Mutex<HashMap<String, usize>>,
    last_language: Mutex<Option<String>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` calls regardless of text.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Always fail for this text.
    pub fn failing_text(mut self, text: &str) -> Self {
        self.failing.push(text.to_string());
        self
    }

    /// Block for `delay` before answering this text.
    pub fn slow_text(mut self, text: &str, delay: Duration) -> Self {
        self.slow.push((text.to_string(), delay));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.per_text
            .lock()
            .unwrap()
            .get(text)
            .copied()
            .unwrap_or(0)
    }

    pub fn last_language(&self) -> Option<String> {
        self.last_language.lock().unwrap().clone()
    }
}

impl TtsEngine for FakeEngine {
    fn synthesize(
        &self,
        text: &str,
        language: &str,
        _voice: Option<&str>,
        _speed: f32,
        output_path: &Path,
    ) -> DubResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.per_text.lock().unwrap().entry(text.to_string()).or_default() += 1;
        *self.last_language.lock().unwrap() = Some(language.to_string());

        if let Some((_, delay)) = self.slow.iter().find(|(t, _)| t == text) {
            std::thread::sleep(*delay);
        }
        let scripted_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure || self.failing.iter().any(|t| t == text) {
            return Err(DubError::Tts(format!("fake failure for '{text}'")));
        }

        let path = output_path.with_extension("mp3");
        std::fs::write(&path, text.as_bytes())?;
        Ok(path)
    }

    fn engine_name(&self) -> &str {
        "fake"
    }
}

#[derive(Debug, Default)]
struct BackendState {
    started: Vec<PathBuf>,
    halts: usize,
    busy: bool,
}

/// Shared view of what a [`FakeBackend`] was asked to do.
#[derive(Clone, Default)]
pub struct AudioLog(Arc<Mutex<BackendState>>);

impl AudioLog {
    pub fn started(&self) -> Vec<PathBuf> {
        self.0.lock().unwrap().started.clone()
    }

    pub fn halts(&self) -> usize {
        self.0.lock().unwrap().halts
    }

    pub fn busy(&self) -> bool {
        self.0.lock().unwrap().busy
    }

    /// Simulate the current clip running out.
    pub fn finish(&self) {
        self.0.lock().unwrap().busy = false;
    }
}

#[derive(Default)]
pub struct FakeBackend {
    log: AudioLog,
    fail: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn log(&self) -> AudioLog {
        self.log.clone()
    }
}

impl AudioBackend for FakeBackend {
    fn start(&mut self, path: &Path) -> DubResult<()> {
        if self.fail {
            return Err(DubError::AudioDevice("fake device error".into()));
        }
        let mut state = self.log.0.lock().unwrap();
        state.started.push(path.to_path_buf());
        state.busy = true;
        Ok(())
    }

    fn halt(&mut self) {
        let mut state = self.log.0.lock().unwrap();
        state.halts += 1;
        state.busy = false;
    }

    fn is_busy(&self) -> bool {
        self.log.busy()
    }
}

#[derive(Debug, Default)]
struct ClockState {
    sample: ClockSample,
    pause_calls: Vec<bool>,
    restored: bool,
    released: Option<bool>,
}

/// A player whose position is set by the test. Clones share state.
#[derive(Clone, Default)]
pub struct FakeClock(Arc<Mutex<ClockState>>);

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position_secs(&self, secs: f64) {
        self.0.lock().unwrap().sample.position = Some(Duration::from_secs_f64(secs));
    }

    pub fn set_finished(&self) {
        self.0.lock().unwrap().sample.finished = true;
    }

    pub fn pause_calls(&self) -> Vec<bool> {
        self.0.lock().unwrap().pause_calls.clone()
    }

    pub fn restored(&self) -> bool {
        self.0.lock().unwrap().restored
    }

    pub fn released(&self) -> Option<bool> {
        self.0.lock().unwrap().released
    }
}

#[async_trait]
impl PlaybackClock for FakeClock {
    async fn sample(&mut self) -> DubResult<ClockSample> {
        Ok(self.0.lock().unwrap().sample)
    }

    async fn set_paused(&mut self, paused: bool) -> DubResult<()> {
        let mut state = self.0.lock().unwrap();
        state.pause_calls.push(paused);
        state.sample.paused = paused;
        Ok(())
    }

    async fn restore_audio(&mut self) -> DubResult<()> {
        self.0.lock().unwrap().restored = true;
        Ok(())
    }

    async fn release(&mut self, terminate: bool) -> DubResult<()> {
        self.0.lock().unwrap().released = Some(terminate);
        Ok(())
    }
}
