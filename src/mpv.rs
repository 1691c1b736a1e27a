//! mpv as the playback clock, driven over its JSON IPC socket.
//!
//! Every request carries a `request_id`; unsolicited event lines are skipped
//! while waiting for the matching reply. The endpoint is a Unix socket, or a
//! named pipe on Windows.

use crate::clock::{ClockSample, PlaybackClock};
use crate::config::PlayerConfig;
use crate::error::{DubError, DubResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(6);
const CONNECT_RETRY: Duration = Duration::from_millis(100);
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

type IpcReader = Box<dyn AsyncRead + Send + Unpin>;
type IpcWriter = Box<dyn AsyncWrite + Send + Unpin>;

struct MpvIpc {
    reader: BufReader<IpcReader>,
    writer: IpcWriter,
    next_id: u64,
}

impl MpvIpc {
    fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(Box::new(read)),
            writer: Box::new(write),
            next_id: 0,
        }
    }

    /// Send one command and return its `data` (`None` for null data or an
    /// unavailable property).
    async fn command(&mut self, args: Value) -> DubResult<Option<Value>> {
        self.next_id += 1;
        let id = self.next_id;
        let mut line = json!({ "command": args, "request_id": id }).to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;

        let reply = tokio::time::timeout(REPLY_TIMEOUT, self.read_reply(id))
            .await
            .map_err(|_| DubError::Player("mpv did not answer in time".into()))??;
        reply_data(reply)
    }

    async fn read_reply(&mut self, id: u64) -> DubResult<Value> {
        let mut buf = String::new();
        loop {
            buf.clear();
            if self.reader.read_line(&mut buf).await? == 0 {
                return Err(DubError::Player("mpv closed the IPC connection".into()));
            }
            let Ok(msg) = serde_json::from_str::<Value>(buf.trim()) else {
                continue;
            };
            if msg.get("request_id").and_then(Value::as_u64) == Some(id) {
                return Ok(msg);
            }
        }
    }

    async fn get_property(&mut self, name: &str) -> DubResult<Option<Value>> {
        self.command(json!(["get_property", name])).await
    }

    async fn set_property(&mut self, name: &str, value: Value) -> DubResult<()> {
        self.command(json!(["set_property", name, value])).await?;
        Ok(())
    }
}

fn reply_data(reply: Value) -> DubResult<Option<Value>> {
    match reply.get("error").and_then(Value::as_str) {
        Some("success") => Ok(reply.get("data").filter(|d| !d.is_null()).cloned()),
        Some("property unavailable") => Ok(None),
        Some(other) => Err(DubError::Player(format!("mpv: {other}"))),
        None => Err(DubError::Player(format!("malformed mpv reply: {reply}"))),
    }
}

/// Where mpv should listen for IPC, given the session's scratch directory.
pub fn ipc_endpoint(scratch: &Path) -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(format!(r"\\.\pipe\subdub-{}", std::process::id()))
    } else {
        scratch.join("mpv.sock")
    }
}

#[cfg(unix)]
async fn open_endpoint(endpoint: &Path) -> io::Result<tokio::net::UnixStream> {
    tokio::net::UnixStream::connect(endpoint).await
}

#[cfg(windows)]
async fn open_endpoint(
    endpoint: &Path,
) -> io::Result<tokio::net::windows::named_pipe::NamedPipeClient> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(endpoint)
}

#[cfg(not(any(unix, windows)))]
async fn open_endpoint(_endpoint: &Path) -> io::Result<tokio::io::DuplexStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "mpv IPC needs Unix sockets or Windows named pipes",
    ))
}

pub struct MpvPlayer {
    child: Child,
    ipc: MpvIpc,
    /// Player volume before ducking, restored when the dub stops.
    original_volume: Option<f64>,
}

impl MpvPlayer {
    /// Start mpv paused on `video` and connect to its IPC socket.
    pub async fn launch(
        config: &PlayerConfig,
        video: &Path,
        subtitles: &Path,
        socket: &Path,
    ) -> DubResult<Self> {
        let mut child = Command::new(&config.command)
            .arg(format!("--input-ipc-server={}", socket.display()))
            .arg(format!("--sub-file={}", subtitles.display()))
            .args(["--pause", "--osc", "--no-terminal", "--ytdl=yes"])
            .args(&config.args)
            .arg("--")
            .arg(video)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DubError::Player(format!("failed to start '{}': {e}", config.command)))?;

        let ipc = connect(socket, &mut child).await?;
        info!("Connected to {} at {}", config.command, socket.display());

        let mut player = Self {
            child,
            ipc,
            original_volume: None,
        };
        if let Some(volume) = config.dub_volume {
            player.duck(volume).await;
        }
        Ok(player)
    }

    async fn duck(&mut self, volume: f64) {
        match self.ipc.get_property("volume").await {
            Ok(original) => {
                self.original_volume = original.as_ref().and_then(Value::as_f64);
                if let Err(e) = self.ipc.set_property("volume", json!(volume)).await {
                    warn!("Could not lower player volume: {e}");
                    self.original_volume = None;
                }
            }
            Err(e) => warn!("Could not read player volume: {e}"),
        }
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

async fn connect(socket: &Path, child: &mut Child) -> DubResult<MpvIpc> {
    let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
    loop {
        match open_endpoint(socket).await {
            Ok(stream) => return Ok(MpvIpc::new(stream)),
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {
                return Err(DubError::Player(e.to_string()));
            }
            Err(e) => {
                if let Some(status) = child.try_wait()? {
                    return Err(DubError::Player(format!(
                        "player exited before accepting commands ({status})"
                    )));
                }
                if tokio::time::Instant::now() >= deadline {
                    return Err(DubError::Player(format!(
                        "could not connect to {}: {e}",
                        socket.display()
                    )));
                }
                tokio::time::sleep(CONNECT_RETRY).await;
            }
        }
    }
}

/// Assemble a sample from raw property values.
fn build_sample(
    time_pos: Option<Value>,
    pause: Option<Value>,
    speed: Option<Value>,
    eof: Option<Value>,
) -> ClockSample {
    let position = time_pos
        .as_ref()
        .and_then(Value::as_f64)
        .filter(|secs| secs.is_finite())
        .map(|secs| Duration::from_secs_f64(secs.max(0.0)));
    ClockSample {
        position,
        paused: pause.as_ref().and_then(Value::as_bool).unwrap_or(false),
        rate: speed.as_ref().and_then(Value::as_f64).unwrap_or(1.0),
        finished: eof.as_ref().and_then(Value::as_bool).unwrap_or(false),
    }
}

#[async_trait]
impl PlaybackClock for MpvPlayer {
    async fn sample(&mut self) -> DubResult<ClockSample> {
        if self.has_exited() {
            return Ok(ClockSample {
                finished: true,
                ..Default::default()
            });
        }
        let polled = async {
            let time_pos = self.ipc.get_property("time-pos").await?;
            let pause = self.ipc.get_property("pause").await?;
            let speed = self.ipc.get_property("speed").await?;
            let eof = self.ipc.get_property("eof-reached").await?;
            Ok::<_, DubError>(build_sample(time_pos, pause, speed, eof))
        }
        .await;

        match polled {
            Ok(sample) => Ok(sample),
            // The socket goes away when the user closes the window.
            Err(_) if self.has_exited() => Ok(ClockSample {
                finished: true,
                ..Default::default()
            }),
            Err(e) => Err(e),
        }
    }

    async fn set_paused(&mut self, paused: bool) -> DubResult<()> {
        self.ipc.set_property("pause", json!(paused)).await
    }

    async fn restore_audio(&mut self) -> DubResult<()> {
        if let Some(volume) = self.original_volume.take() {
            if !self.has_exited() {
                self.ipc.set_property("volume", json!(volume)).await?;
            }
        }
        Ok(())
    }

    async fn release(&mut self, terminate: bool) -> DubResult<()> {
        if !terminate {
            let status = self.child.wait().await?;
            debug!("Player exited ({status})");
            return Ok(());
        }
        if self.has_exited() {
            return Ok(());
        }
        if let Err(e) = self.ipc.command(json!(["quit"])).await {
            debug!("quit command not acknowledged: {e}");
        }
        match tokio::time::timeout(QUIT_TIMEOUT, self.child.wait()).await {
            Ok(status) => {
                debug!("Player exited ({})", status?);
            }
            Err(_) => {
                warn!("Player did not quit, killing it");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}
