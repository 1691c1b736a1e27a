//! Per-cue synthesized speech and its lifecycle.
//!
//! The store is shared between the controller and every synthesis task, so
//! all access goes through one mutex. Tasks report completion by calling the
//! `mark_*` transitions; anyone waiting for a cue is woken through a
//! [`Notify`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Lifecycle of one cue's speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetState {
    Pending,
    Generating,
    Ready,
    Playing,
    Failed,
}

impl AssetState {
    /// Whether the asset still waits on synthesis.
    pub fn is_in_flight(self) -> bool {
        matches!(self, AssetState::Pending | AssetState::Generating)
    }
}

/// A synthesized audio file owned by the store. Releasing it deletes the file.
#[derive(Debug)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub speed: f32,
}

impl AudioArtifact {
    pub fn new(path: PathBuf, speed: f32) -> Self {
        Self { path, speed }
    }

    /// Delete the backing file.
    pub fn release(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {e}", self.path.display()),
        }
    }
}

#[derive(Debug)]
pub struct SpeechAsset {
    pub cue_index: usize,
    pub state: AssetState,
    pub language: String,
    /// Present iff the state is `Ready` or `Playing`.
    artifact: Option<AudioArtifact>,
}

/// Result of [`AssetStore::get_or_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetTicket {
    pub state: AssetState,
    /// True only for the call that created the entry; that caller owns the
    /// synthesis request.
    pub created: bool,
}

#[derive(Default)]
pub struct AssetStore {
    assets: Mutex<HashMap<usize, SpeechAsset>>,
    changed: Notify,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<usize, SpeechAsset>> {
        // A panicked holder leaves the map consistent: every transition is a
        // single field write.
        self.assets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the existing entry for a cue or create one in `Pending`.
    pub fn get_or_create(&self, cue_index: usize, language: &str) -> AssetTicket {
        let mut assets = self.lock();
        if let Some(asset) = assets.get(&cue_index) {
            return AssetTicket {
                state: asset.state,
                created: false,
            };
        }
        assets.insert(
            cue_index,
            SpeechAsset {
                cue_index,
                state: AssetState::Pending,
                language: language.to_string(),
                artifact: None,
            },
        );
        AssetTicket {
            state: AssetState::Pending,
            created: true,
        }
    }

    pub fn state(&self, cue_index: usize) -> Option<AssetState> {
        self.lock().get(&cue_index).map(|a| a.state)
    }

    pub fn language(&self, cue_index: usize) -> Option<String> {
        self.lock().get(&cue_index).map(|a| a.language.clone())
    }

    /// Path of the audio for a `Ready` or `Playing` cue.
    pub fn audio_path(&self, cue_index: usize) -> Option<PathBuf> {
        self.lock()
            .get(&cue_index)
            .and_then(|a| a.artifact.as_ref())
            .map(|art| art.path.clone())
    }

    /// All cue indices currently held, in ascending order.
    pub fn cue_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.lock().keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// `Pending → Generating`. Returns false if the entry is gone or has
    /// already moved on.
    pub fn mark_generating(&self, cue_index: usize) -> bool {
        let mut assets = self.lock();
        match assets.get_mut(&cue_index) {
            Some(asset) if asset.state == AssetState::Pending => {
                asset.state = AssetState::Generating;
                true
            }
            _ => false,
        }
    }

    /// Attach finished audio. If the entry was evicted or is not in flight,
    /// the artifact is handed back so the caller can release it.
    pub fn mark_ready(&self, cue_index: usize, artifact: AudioArtifact) -> Result<(), AudioArtifact> {
        {
            let mut assets = self.lock();
            match assets.get_mut(&cue_index) {
                Some(asset) if asset.state.is_in_flight() => {
                    debug!("Speech for cue {cue_index} ready ({:.2}x)", artifact.speed);
                    asset.state = AssetState::Ready;
                    asset.artifact = Some(artifact);
                }
                _ => return Err(artifact),
            }
        }
        self.changed.notify_waiters();
        Ok(())
    }

    pub fn mark_failed(&self, cue_index: usize) {
        {
            let mut assets = self.lock();
            if let Some(asset) = assets.get_mut(&cue_index) {
                if asset.state.is_in_flight() {
                    asset.state = AssetState::Failed;
                }
            }
        }
        self.changed.notify_waiters();
    }

    /// `Ready → Playing`. Any other playing asset drops back to `Ready`, so at
    /// most one asset is ever `Playing`.
    pub fn mark_playing(&self, cue_index: usize) -> bool {
        let mut assets = self.lock();
        if assets.get(&cue_index).map(|a| a.state) != Some(AssetState::Ready) {
            return false;
        }
        for asset in assets.values_mut() {
            if asset.state == AssetState::Playing {
                asset.state = AssetState::Ready;
            }
        }
        if let Some(asset) = assets.get_mut(&cue_index) {
            asset.state = AssetState::Playing;
        }
        true
    }

    /// `Playing → Ready` once the clip has finished or was stopped.
    pub fn mark_finished(&self, cue_index: usize) {
        if let Some(asset) = self.lock().get_mut(&cue_index) {
            if asset.state == AssetState::Playing {
                asset.state = AssetState::Ready;
            }
        }
    }

    /// The cue currently marked `Playing`, if any.
    pub fn playing(&self) -> Option<usize> {
        self.lock()
            .values()
            .find(|a| a.state == AssetState::Playing)
            .map(|a| a.cue_index)
    }

    /// Remove the entry and delete its audio. Returns the state it had.
    pub fn evict(&self, cue_index: usize) -> Option<AssetState> {
        let removed = self.lock().remove(&cue_index);
        let state = removed.map(|asset| {
            if let Some(artifact) = asset.artifact {
                artifact.release();
            }
            asset.state
        });
        if state.is_some() {
            debug!("Evicted speech for cue {cue_index}");
            self.changed.notify_waiters();
        }
        state
    }

    /// Release every artifact and empty the store.
    pub fn clear(&self) {
        let drained: Vec<SpeechAsset> = self.lock().drain().map(|(_, a)| a).collect();
        let count = drained.len();
        for asset in drained {
            if let Some(artifact) = asset.artifact {
                artifact.release();
            }
        }
        if count > 0 {
            debug!("Released {count} speech asset(s)");
        }
        self.changed.notify_waiters();
    }

    /// Wait up to `grace` for a cue to leave `Pending`/`Generating`.
    /// Returns the state at the end of the wait (`None` if the entry is gone).
    pub async fn wait_settled(&self, cue_index: usize, grace: Duration) -> Option<AssetState> {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not lost.
            notified.as_mut().enable();

            let state = self.state(cue_index);
            match state {
                Some(s) if s.is_in_flight() => {}
                _ => return state,
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.state(cue_index);
            }
        }
    }
}

impl Drop for AssetStore {
    fn drop(&mut self) {
        self.clear();
    }
}
