//! Local playback of synthesized speech.
//!
//! `rodio::OutputStream` is `!Send`, so the device lives on its own OS thread
//! and [`RodioBackend`] proxies commands to it over a channel. The controller
//! only sees [`AudioOutput`], which adds the mute gate and tracks which cue is
//! sounding.

use crate::error::{DubError, DubResult};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, warn};

/// A device that plays one clip at a time.
pub trait AudioBackend: Send {
    /// Stop whatever is playing and start `path`.
    fn start(&mut self, path: &Path) -> DubResult<()>;

    /// Stop playback immediately.
    fn halt(&mut self);

    /// Whether a clip is still sounding.
    fn is_busy(&self) -> bool;
}

pub struct AudioOutput<B: AudioBackend> {
    backend: B,
    muted: bool,
    current: Option<usize>,
}

impl<B: AudioBackend> AudioOutput<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            muted: false,
            current: None,
        }
    }

    /// Play the audio of cue `cue_index`, replacing any current clip.
    /// Returns false (and plays nothing) while muted.
    pub fn play(&mut self, cue_index: usize, path: &Path) -> DubResult<bool> {
        self.stop();
        if self.muted {
            return Ok(false);
        }
        self.backend.start(path)?;
        self.current = Some(cue_index);
        Ok(true)
    }

    pub fn stop(&mut self) {
        if self.current.take().is_some() || self.backend.is_busy() {
            self.backend.halt();
        }
    }

    /// Muting silences the current clip at once.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if muted {
            self.stop();
        }
    }

    /// The cue whose clip is still sounding, if any.
    pub fn sounding(&mut self) -> Option<usize> {
        if self.current.is_some() && !self.backend.is_busy() {
            self.current = None;
        }
        self.current
    }
}

enum AudioCommand {
    Play {
        path: PathBuf,
        reply: mpsc::Sender<DubResult<()>>,
    },
    Stop,
    IsBusy {
        reply: mpsc::Sender<bool>,
    },
    Shutdown,
}

/// Speaker output through rodio on a dedicated thread.
pub struct RodioBackend {
    cmd_tx: mpsc::Sender<AudioCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl RodioBackend {
    /// Open the default output device. Fails if there is none.
    pub fn spawn() -> DubResult<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<AudioCommand>();
        let (init_tx, init_rx) = mpsc::channel::<DubResult<()>>();

        let thread = thread::Builder::new()
            .name("subdub-audio".into())
            .spawn(move || Self::run(cmd_rx, init_tx))
            .map_err(|e| DubError::AudioDevice(format!("failed to spawn audio thread: {e}")))?;

        init_rx
            .recv()
            .map_err(|_| DubError::AudioDevice("audio thread died during startup".into()))??;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
        })
    }

    fn run(cmd_rx: mpsc::Receiver<AudioCommand>, init_tx: mpsc::Sender<DubResult<()>>) {
        let (_stream, handle) = match rodio::OutputStream::try_default() {
            Ok(pair) => pair,
            Err(e) => {
                let _ = init_tx.send(Err(DubError::AudioDevice(e.to_string())));
                return;
            }
        };
        let _ = init_tx.send(Ok(()));
        debug!("Audio output opened");

        let mut sink: Option<rodio::Sink> = None;
        while let Ok(cmd) = cmd_rx.recv() {
            match cmd {
                AudioCommand::Play { path, reply } => {
                    if let Some(old) = sink.take() {
                        old.stop();
                    }
                    let result = open_sink(&handle, &path).map(|s| sink = Some(s));
                    let _ = reply.send(result);
                }
                AudioCommand::Stop => {
                    if let Some(old) = sink.take() {
                        old.stop();
                    }
                }
                AudioCommand::IsBusy { reply } => {
                    let busy = sink.as_ref().is_some_and(|s| !s.empty());
                    let _ = reply.send(busy);
                }
                AudioCommand::Shutdown => break,
            }
        }
        if let Some(old) = sink.take() {
            old.stop();
        }
        debug!("Audio thread exiting");
    }
}

fn open_sink(handle: &rodio::OutputStreamHandle, path: &Path) -> DubResult<rodio::Sink> {
    let file = File::open(path)?;
    let source = rodio::Decoder::new(BufReader::new(file))
        .map_err(|e| DubError::AudioDevice(format!("cannot decode {}: {e}", path.display())))?;
    let sink = rodio::Sink::try_new(handle).map_err(|e| DubError::AudioDevice(e.to_string()))?;
    sink.append(source);
    Ok(sink)
}

impl AudioBackend for RodioBackend {
    fn start(&mut self, path: &Path) -> DubResult<()> {
        let (reply, rx) = mpsc::channel();
        self.cmd_tx
            .send(AudioCommand::Play {
                path: path.to_path_buf(),
                reply,
            })
            .map_err(|_| DubError::AudioDevice("audio thread is gone".into()))?;
        rx.recv()
            .map_err(|_| DubError::AudioDevice("audio thread is gone".into()))?
    }

    fn halt(&mut self) {
        let _ = self.cmd_tx.send(AudioCommand::Stop);
    }

    fn is_busy(&self) -> bool {
        let (reply, rx) = mpsc::channel();
        if self.cmd_tx.send(AudioCommand::IsBusy { reply }).is_err() {
            return false;
        }
        rx.recv().unwrap_or(false)
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(AudioCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBackend;

    #[test]
    fn test_play_and_finish() {
        let backend = FakeBackend::new();
        let log = backend.log();
        let mut output = AudioOutput::new(backend);

        assert!(output.play(0, Path::new("/tmp/a.mp3")).unwrap());
        assert_eq!(output.sounding(), Some(0));
        assert_eq!(log.started(), vec![PathBuf::from("/tmp/a.mp3")]);

        log.finish();
        assert_eq!(output.sounding(), None);
    }

    #[test]
    fn test_play_replaces_current() {
        let backend = FakeBackend::new();
        let log = backend.log();
        let mut output = AudioOutput::new(backend);

        output.play(0, Path::new("a.mp3")).unwrap();
        output.play(1, Path::new("b.mp3")).unwrap();
        assert_eq!(output.sounding(), Some(1));
        assert_eq!(log.halts(), 1);
        assert_eq!(log.started().len(), 2);
    }

    #[test]
    fn test_mute_stops_and_suppresses() {
        let backend = FakeBackend::new();
        let log = backend.log();
        let mut output = AudioOutput::new(backend);

        output.play(0, Path::new("a.mp3")).unwrap();
        output.set_muted(true);
        assert_eq!(output.sounding(), None);
        assert!(!log.busy());

        assert!(!output.play(1, Path::new("b.mp3")).unwrap());
        assert_eq!(log.started().len(), 1);

        output.set_muted(false);
        assert!(output.play(1, Path::new("b.mp3")).unwrap());
    }

    #[test]
    fn test_start_failure_leaves_nothing_sounding() {
        let backend = FakeBackend::new().failing();
        let mut output = AudioOutput::new(backend);
        assert!(output.play(0, Path::new("a.mp3")).is_err());
        assert_eq!(output.sounding(), None);
    }

    #[test]
    fn test_stop_when_idle_does_not_halt() {
        let backend = FakeBackend::new();
        let log = backend.log();
        let mut output = AudioOutput::new(backend);
        output.stop();
        assert_eq!(log.halts(), 0);
    }
}
