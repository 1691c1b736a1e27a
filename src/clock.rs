use crate::error::DubResult;
use async_trait::async_trait;
use std::time::Duration;

/// One observation of the player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    /// Media position; `None` while the player has not loaded the file yet.
    pub position: Option<Duration>,
    pub paused: bool,
    /// Playback rate; 1.0 is normal speed.
    pub rate: f64,
    /// The player exited or reached the end of the media.
    pub finished: bool,
}

impl Default for ClockSample {
    fn default() -> Self {
        Self {
            position: None,
            paused: false,
            rate: 1.0,
            finished: false,
        }
    }
}

/// The narrow view of the video player the controller depends on.
#[async_trait]
pub trait PlaybackClock: Send {
    async fn sample(&mut self) -> DubResult<ClockSample>;

    async fn set_paused(&mut self, paused: bool) -> DubResult<()>;

    /// Undo anything the dub did to the player's own audio (volume ducking).
    async fn restore_audio(&mut self) -> DubResult<()>;

    /// Let go of the player. With `terminate` the player is closed;
    /// otherwise this waits until the user closes it.
    async fn release(&mut self, terminate: bool) -> DubResult<()>;
}

/// Whether the jump from `previous` to `current` is a seek rather than
/// ordinary playback.
///
/// `expected` is how far the media should have advanced since `previous`
/// (zero while paused). Any backwards step larger than `tolerance`, or a
/// forward step exceeding `expected + tolerance`, counts.
pub fn is_discontinuity(
    previous: Duration,
    current: Duration,
    expected: Duration,
    tolerance: Duration,
) -> bool {
    if current + tolerance < previous {
        return true;
    }
    current > previous + expected + tolerance
}
