//! Terminal key handling.
//!
//! Keys are read in raw mode on a plain OS thread (crossterm's reader is
//! blocking) and forwarded to the controller as [`DubCommand`]s. The player's
//! own window keeps its native bindings for pause, seek and volume.

use crate::error::{DubError, DubResult};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DubCommand {
    /// End dubbing; the video keeps playing without it.
    StopDub,
    /// End dubbing and close the player.
    Quit,
    ToggleMute,
    Faster,
    Slower,
}

pub fn map_key(key: &KeyEvent) -> Option<DubCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(DubCommand::Quit)
        }
        KeyCode::Char('s') | KeyCode::Char('S') => Some(DubCommand::StopDub),
        KeyCode::Char('q') | KeyCode::Char('Q') => Some(DubCommand::Quit),
        KeyCode::Char('m') | KeyCode::Char('M') => Some(DubCommand::ToggleMute),
        KeyCode::Char(']') => Some(DubCommand::Faster),
        KeyCode::Char('[') => Some(DubCommand::Slower),
        _ => None,
    }
}

/// Owns the raw-mode terminal and the reader thread. Dropping it restores
/// the terminal.
pub struct KeyListener {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl KeyListener {
    /// Start reading keys. Returns `Ok(None)` when stdin is not a terminal.
    pub fn spawn(tx: mpsc::Sender<DubCommand>) -> DubResult<Option<Self>> {
        if !std::io::stdin().is_terminal() {
            debug!("stdin is not a terminal, keyboard controls disabled");
            return Ok(None);
        }
        terminal::enable_raw_mode()?;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("subdub-keys".into())
            .spawn(move || read_keys(&tx, &flag));
        match thread {
            Ok(handle) => Ok(Some(Self {
                stop,
                thread: Some(handle),
            })),
            Err(e) => {
                let _ = terminal::disable_raw_mode();
                Err(DubError::Other(format!("failed to spawn key reader: {e}")))
            }
        }
    }
}

fn read_keys(tx: &mpsc::Sender<DubCommand>, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        match event::poll(POLL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                warn!("Keyboard input failed: {e}");
                return;
            }
        }
        let key = match event::read() {
            Ok(Event::Key(key)) => key,
            Ok(_) => continue,
            Err(e) => {
                warn!("Keyboard input failed: {e}");
                return;
            }
        };
        if let Some(cmd) = map_key(&key) {
            if tx.blocking_send(cmd).is_err() {
                return;
            }
        }
    }
}

impl Drop for KeyListener {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("Could not restore terminal: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_map_keys() {
        let none = KeyModifiers::NONE;
        assert_eq!(map_key(&press(KeyCode::Char('s'), none)), Some(DubCommand::StopDub));
        assert_eq!(map_key(&press(KeyCode::Char('q'), none)), Some(DubCommand::Quit));
        assert_eq!(map_key(&press(KeyCode::Char('m'), none)), Some(DubCommand::ToggleMute));
        assert_eq!(map_key(&press(KeyCode::Char(']'), none)), Some(DubCommand::Faster));
        assert_eq!(map_key(&press(KeyCode::Char('['), none)), Some(DubCommand::Slower));
        assert_eq!(
            map_key(&press(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(DubCommand::Quit)
        );
        assert_eq!(map_key(&press(KeyCode::Char('c'), none)), None);
        assert_eq!(map_key(&press(KeyCode::Char(' '), none)), None);
    }

    #[test]
    fn test_release_events_ignored() {
        let release = KeyEvent {
            code: KeyCode::Char('q'),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        };
        assert_eq!(map_key(&release), None);
    }
}
