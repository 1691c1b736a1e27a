use crate::console;
use crate::error::{DubError, DubResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DubConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub player: PlayerConfig,
}

/// Scheduling knobs for the dub controller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a due cue may wait for its audio before it is skipped.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Upcoming cues synthesized ahead of playback in on-demand mode.
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,
    /// On-demand assets whose cue ended this long ago are released.
    #[serde(default = "default_evict_behind_secs")]
    pub evict_behind_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VoiceConfig {
    #[serde(default = "default_voice_engine")]
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Used when language detection fails.
    #[serde(default = "default_language")]
    pub default_language: String,
    #[serde(default = "default_voice_speed")]
    pub speed: f32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_precache_workers")]
    pub precache_workers: usize,
    #[serde(default = "default_ondemand_workers")]
    pub ondemand_workers: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Volume (0-100) for the original soundtrack while dubbing is active.
    /// Restored when dubbing stops. Unset leaves the volume alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dub_volume: Option<f64>,
}

// Defaults
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_grace_ms() -> u64 {
    400
}
fn default_lookahead() -> usize {
    3
}
fn default_evict_behind_secs() -> u64 {
    30
}
fn default_voice_engine() -> String {
    "google".into()
}
fn default_language() -> String {
    "en".into()
}
fn default_voice_speed() -> f32 {
    1.0
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_request_timeout_secs() -> u64 {
    15
}
fn default_precache_workers() -> usize {
    4
}
fn default_ondemand_workers() -> usize {
    2
}
fn default_player_command() -> String {
    "mpv".into()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            grace_ms: default_grace_ms(),
            lookahead: default_lookahead(),
            evict_behind_secs: default_evict_behind_secs(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            engine: default_voice_engine(),
            voice: None,
            default_language: default_language(),
            speed: default_voice_speed(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            precache_workers: default_precache_workers(),
            ondemand_workers: default_ondemand_workers(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player_command(),
            args: Vec::new(),
            dub_volume: None,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn evict_behind(&self) -> Duration {
        Duration::from_secs(self.evict_behind_secs)
    }
}

impl VoiceConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Clamp a speech speed factor into `[MIN_SPEED, MAX_SPEED]`.
/// Non-finite input falls back to normal speed.
pub fn clamp_speed(speed: f32) -> f32 {
    if !speed.is_finite() {
        console::warning(format!("speed {speed} is not a number, using 1.0"));
        return 1.0;
    }
    let clamped = speed.clamp(MIN_SPEED, MAX_SPEED);
    if clamped != speed {
        console::warning(format!(
            "speed {speed} outside {MIN_SPEED}-{MAX_SPEED}, clamped to {clamped}"
        ));
    }
    clamped
}

impl DubConfig {
    /// Normalize values that would otherwise stall or misconfigure a session.
    pub fn validate(&mut self) {
        self.voice.speed = clamp_speed(self.voice.speed);
        self.voice.precache_workers = self.voice.precache_workers.max(1);
        self.voice.ondemand_workers = self.voice.ondemand_workers.max(1);
        if let Some(volume) = self.player.dub_volume {
            self.player.dub_volume = Some(volume.clamp(0.0, 100.0));
        }
    }
}

/// Load a TOML config file. `None` yields the built-in defaults.
pub fn load_config(path: Option<&Path>) -> DubResult<DubConfig> {
    let Some(path) = path else {
        return Ok(DubConfig::default());
    };
    if !path.exists() {
        return Err(DubError::ConfigNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| DubError::ConfigParse(e.to_string()))
}
