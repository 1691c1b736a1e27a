//! The scheduling loop that keeps dubbed speech in step with the video.
//!
//! One controller owns the [`PlaybackState`]. It polls the clock at a fixed
//! interval, resolves the active cue, asks the synthesis gateway for speech in
//! the background and plays it when its cue begins. User commands arrive over
//! a channel and are applied between ticks, so nothing else ever writes the
//! state.
//!
//! The tick never awaits synthesis itself. The only waits are the clock read,
//! audio commands, and a bounded grace wait for a cue that is about to play.

use crate::audio::{AudioBackend, AudioOutput};
use crate::clock::{is_discontinuity, PlaybackClock};
use crate::config::{DubConfig, MAX_SPEED, MIN_SPEED};
use crate::console;
use crate::error::DubError;
use crate::input::DubCommand;
use crate::store::{AssetState, AssetStore};
use crate::subtitle::format_srt_time;
use crate::synthesis::SynthesisGateway;
use crate::timeline::Timeline;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SPEED_STEP: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DubMode {
    /// Synthesize a small window around the playhead as the video plays.
    OnDemand,
    /// Synthesize every cue before playback starts.
    Precache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Precaching,
    Playing,
    Seeking,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StopDub,
    Quit,
    EndOfVideo,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub mode: DubMode,
    pub current_cue: Option<usize>,
    pub muted: bool,
    pub speed: f32,
    pub running: bool,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    pub grace: Duration,
    pub lookahead: usize,
    pub evict_behind: Duration,
    pub precache_workers: usize,
    pub ondemand_workers: usize,
}

impl ControllerSettings {
    pub fn from_config(config: &DubConfig) -> Self {
        Self {
            poll_interval: config.sync.poll_interval(),
            grace: config.sync.grace(),
            lookahead: config.sync.lookahead,
            evict_behind: config.sync.evict_behind(),
            precache_workers: config.voice.precache_workers.max(1),
            ondemand_workers: config.voice.ondemand_workers.max(1),
        }
    }
}

pub struct DubController<C: PlaybackClock, B: AudioBackend> {
    timeline: Arc<Timeline>,
    store: Arc<AssetStore>,
    gateway: Arc<SynthesisGateway>,
    clock: C,
    output: AudioOutput<B>,
    commands: mpsc::Receiver<DubCommand>,
    commands_open: bool,
    settings: ControllerSettings,
    state: PlaybackState,
    phase: Phase,
    /// Bounds concurrent on-demand requests.
    permits: Arc<Semaphore>,
    /// Parent of every request's token; cancelled on shutdown.
    session: CancellationToken,
    in_flight: HashMap<usize, CancellationToken>,
    tasks: JoinSet<()>,
    /// Last clock position and when it was read.
    last_sample: Option<(Duration, Instant)>,
    stop_reason: Option<StopReason>,
}

impl<C: PlaybackClock, B: AudioBackend> DubController<C, B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timeline: Arc<Timeline>,
        store: Arc<AssetStore>,
        gateway: Arc<SynthesisGateway>,
        clock: C,
        backend: B,
        commands: mpsc::Receiver<DubCommand>,
        settings: ControllerSettings,
        mode: DubMode,
        speed: f32,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.ondemand_workers.max(1)));
        Self {
            timeline,
            store,
            gateway,
            clock,
            output: AudioOutput::new(backend),
            commands,
            commands_open: true,
            settings,
            state: PlaybackState {
                mode,
                current_cue: None,
                muted: false,
                speed,
                running: false,
            },
            phase: Phase::Idle,
            permits,
            session: CancellationToken::new(),
            in_flight: HashMap::new(),
            tasks: JoinSet::new(),
            last_sample: None,
            stop_reason: None,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Synthesize every cue before playback. Returns early if the user stops
    /// or quits; [`run`](Self::run) then returns that reason immediately.
    pub async fn precache(&mut self) {
        if self.phase != Phase::Idle {
            return;
        }
        self.phase = Phase::Precaching;
        let jobs: Vec<(usize, String)> = self
            .timeline
            .iter()
            .map(|cue| (cue.index, cue.speech_text()))
            .filter(|(_, text)| !text.is_empty())
            .collect();
        let total = jobs.len();
        console::notice(format!(
            "Generating speech for {total} subtitle(s) with {}",
            self.gateway.engine_name()
        ));
        for (index, _) in &jobs {
            self.store.get_or_create(*index, self.gateway.language());
        }

        let gateway = Arc::clone(&self.gateway);
        let store = Arc::clone(&self.store);
        let cancel = self.session.clone();
        let speed = self.state.speed;
        let mut pending = std::pin::pin!(stream::iter(jobs)
            .map(|(index, text)| {
                let gateway = Arc::clone(&gateway);
                let store = Arc::clone(&store);
                let cancel = cancel.clone();
                async move { run_synthesis(&gateway, &store, index, &text, speed, &cancel).await }
            })
            .buffer_unordered(self.settings.precache_workers));

        let mut done = 0;
        console::precache_progress(done, total);
        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some(()) => {
                        done += 1;
                        console::precache_progress(done, total);
                    }
                    None => break,
                },
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(cmd) => {
                        self.handle_command(cmd);
                        if self.stop_reason.is_some() {
                            eprint!("\r\n");
                            self.session.cancel();
                            break;
                        }
                    }
                    None => self.commands_open = false,
                },
            }
        }

        let failed = self
            .store
            .cue_indices()
            .into_iter()
            .filter(|&i| self.store.state(i) == Some(AssetState::Failed))
            .count();
        if self.stop_reason.is_none() {
            console::done(format!(
                "Speech ready for {} of {total} subtitle(s)",
                total - failed
            ));
        }
    }

    /// Drive playback until the user stops, quits, or the video ends.
    pub async fn run(&mut self) -> StopReason {
        if let Some(reason) = self.stop_reason {
            return reason;
        }
        self.phase = Phase::Playing;
        self.state.running = true;

        if self.state.mode == DubMode::OnDemand {
            self.request_window(Duration::ZERO);
        }
        if let Err(e) = self.clock.set_paused(false).await {
            warn!("Could not start playback: {e}");
        }

        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                cmd = self.commands.recv(), if self.commands_open => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => self.commands_open = false,
                },
            }
            if let Some(reason) = self.stop_reason {
                return reason;
            }
        }
    }

    /// One poll of the clock and everything that follows from it.
    pub async fn tick(&mut self) {
        self.reap_tasks();

        let sample = match self.clock.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                debug!("Clock read failed: {e}");
                return;
            }
        };
        if sample.finished {
            info!("Playback finished");
            self.stop_reason = Some(StopReason::EndOfVideo);
            return;
        }
        let Some(position) = sample.position else {
            return;
        };

        let now = Instant::now();
        if let Some((previous, at)) = self.last_sample {
            let expected = if sample.paused {
                Duration::ZERO
            } else {
                now.duration_since(at).mul_f64(sample.rate.max(0.0))
            };
            if is_discontinuity(previous, position, expected, self.settings.poll_interval) {
                self.handle_seek(previous, position);
            }
        }
        self.last_sample = Some((position, now));

        self.sync_finished_clip();
        if self.state.mode == DubMode::OnDemand {
            self.request_window(position);
            self.evict_stale(position);
        }

        let active = self.timeline.lookup(position).map(|c| c.index);
        if active != self.state.current_cue {
            self.enter_cue(active).await;
        }
    }

    fn handle_seek(&mut self, from: Duration, to: Duration) {
        self.phase = Phase::Seeking;
        debug!("Seek {} -> {}", format_srt_time(from), format_srt_time(to));
        self.stop_output();
        if self.state.mode == DubMode::OnDemand {
            let window = self.timeline.window(to, self.settings.lookahead);
            self.cancel_outside(&window);
        }
        self.state.current_cue = None;
        self.phase = Phase::Playing;
    }

    /// React to the playhead entering `cue` (or leaving all cues).
    async fn enter_cue(&mut self, cue: Option<usize>) {
        self.stop_output();
        let Some(index) = cue else {
            self.state.current_cue = None;
            return;
        };
        let Some(text) = self.timeline.get(index).map(|c| c.speech_text()) else {
            return;
        };
        if !text.is_empty() {
            let settled = match self.state.mode {
                DubMode::OnDemand => self.store.wait_settled(index, self.settings.grace).await,
                DubMode::Precache => self.store.state(index),
            };
            match settled {
                Some(AssetState::Ready) => self.play_cue(index, &text),
                Some(AssetState::Failed) => debug!("No speech for cue {index}, staying silent"),
                Some(state) if state.is_in_flight() => {
                    debug!("Speech for cue {index} not ready in time, skipping")
                }
                _ => {}
            }
        }
        self.state.current_cue = Some(index);
    }

    fn play_cue(&mut self, index: usize, text: &str) {
        if self.state.muted {
            return;
        }
        let Some(path) = self.store.audio_path(index) else {
            return;
        };
        match self.output.play(index, &path) {
            Ok(true) => {
                self.store.mark_playing(index);
                debug!(
                    "Playing cue {index} ({})",
                    self.store.language(index).unwrap_or_default()
                );
                console::cue_line(index + 1, self.timeline.len(), text);
            }
            Ok(false) => {}
            Err(e) => warn!("Could not play speech for cue {index}: {e}"),
        }
    }

    fn stop_output(&mut self) {
        self.output.stop();
        if let Some(index) = self.store.playing() {
            self.store.mark_finished(index);
        }
    }

    /// Return a clip that ran out on its own to `Ready`.
    fn sync_finished_clip(&mut self) {
        if let Some(index) = self.store.playing() {
            if self.output.sounding() != Some(index) {
                self.store.mark_finished(index);
            }
        }
    }

    fn request_window(&mut self, position: Duration) {
        for index in self.timeline.window(position, self.settings.lookahead) {
            self.request(index);
        }
    }

    /// Start background synthesis for a cue unless the store already has it.
    fn request(&mut self, index: usize) {
        let Some(text) = self.timeline.get(index).map(|c| c.speech_text()) else {
            return;
        };
        if text.is_empty() {
            return;
        }
        if !self.store.get_or_create(index, self.gateway.language()).created {
            return;
        }

        let token = self.session.child_token();
        self.in_flight.insert(index, token.clone());
        let gateway = Arc::clone(&self.gateway);
        let store = Arc::clone(&self.store);
        let permits = Arc::clone(&self.permits);
        let speed = self.state.speed;
        self.tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            run_synthesis(&gateway, &store, index, &text, speed, &token).await;
        });
    }

    /// Cancel requests the new position can no longer reach.
    fn cancel_outside(&mut self, window: &Range<usize>) {
        let stale: Vec<usize> = self
            .in_flight
            .keys()
            .copied()
            .filter(|i| !window.contains(i))
            .collect();
        for index in stale {
            if let Some(token) = self.in_flight.remove(&index) {
                token.cancel();
            }
            if self.store.state(index).is_some_and(AssetState::is_in_flight) {
                self.store.evict(index);
                debug!("Cancelled synthesis for cue {index}");
            }
        }
    }

    /// Drop speech for cues that ended well behind the playhead.
    fn evict_stale(&mut self, position: Duration) {
        let Some(horizon) = position.checked_sub(self.settings.evict_behind) else {
            return;
        };
        for index in self.store.cue_indices() {
            let ended_long_ago = self.timeline.get(index).is_some_and(|c| c.end < horizon);
            if !ended_long_ago || Some(index) == self.state.current_cue {
                continue;
            }
            if self.store.state(index) == Some(AssetState::Playing) {
                continue;
            }
            if let Some(token) = self.in_flight.remove(&index) {
                token.cancel();
            }
            self.store.evict(index);
        }
    }

    fn reap_tasks(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            if let Err(e) = joined {
                if e.is_panic() {
                    warn!("Synthesis task panicked: {e}");
                }
            }
        }
        let store = &self.store;
        self.in_flight
            .retain(|index, _| store.state(*index).is_some_and(AssetState::is_in_flight));
    }

    pub(crate) fn handle_command(&mut self, cmd: DubCommand) {
        match cmd {
            DubCommand::StopDub => {
                console::notice("Dubbing stopped");
                self.stop_reason = Some(StopReason::StopDub);
            }
            DubCommand::Quit => {
                console::notice("Quitting");
                self.stop_reason = Some(StopReason::Quit);
            }
            DubCommand::ToggleMute => {
                self.state.muted = !self.state.muted;
                self.output.set_muted(self.state.muted);
                if self.state.muted {
                    if let Some(index) = self.store.playing() {
                        self.store.mark_finished(index);
                    }
                    console::notice("Speech muted");
                } else {
                    console::notice("Speech unmuted");
                }
            }
            DubCommand::Faster | DubCommand::Slower => {
                let step = if cmd == DubCommand::Faster {
                    SPEED_STEP
                } else {
                    -SPEED_STEP
                };
                self.state.speed = (self.state.speed + step).clamp(MIN_SPEED, MAX_SPEED);
                console::notice(format!(
                    "Speech speed {:.2}x for upcoming lines",
                    self.state.speed
                ));
            }
        }
    }

    /// Enter `Stopped`: cancel all synthesis, silence the output, delete
    /// every artifact and give the player its own audio back.
    pub async fn shutdown(&mut self) {
        if self.phase == Phase::Stopped {
            return;
        }
        self.phase = Phase::Stopped;
        self.state.running = false;
        self.session.cancel();
        self.in_flight.clear();
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}

        self.output.stop();
        self.store.clear();
        self.state.current_cue = None;
        if let Err(e) = self.clock.restore_audio().await {
            warn!("Could not restore player volume: {e}");
        }
    }

    /// Hand the clock back once the controller is done with it.
    pub fn into_clock(self) -> C {
        self.clock
    }
}

/// Synthesize one cue and record the outcome in the store.
async fn run_synthesis(
    gateway: &SynthesisGateway,
    store: &AssetStore,
    index: usize,
    text: &str,
    speed: f32,
    cancel: &CancellationToken,
) {
    if !store.mark_generating(index) {
        return;
    }
    match gateway.synthesize(index, text, speed, cancel).await {
        Ok(Some(artifact)) => {
            if let Err(orphan) = store.mark_ready(index, artifact) {
                orphan.release();
            }
        }
        Ok(None) | Err(DubError::Cancelled(_)) => {
            store.evict(index);
        }
        Err(e) => {
            warn!("{e}");
            store.mark_failed(index);
        }
    }
}
