//! mpv player adapter over its JSON IPC socket.
//!
//! mpv is started paused with `--input-ipc-server`. Once the socket accepts
//! connections the adapter binds the ready key, observes `time-pos`,
//! `speed`, `pause` and `duration`, and from then on runs two tasks:
//!
//! - the writer turns [`PlayerCommand`]s into IPC requests
//! - the reader turns IPC events into [`PlayerEvent`]s
//!
//! The event stream ends when the socket closes, which happens when mpv
//! exits. The socket file is removed and the child killed on drop.

use crate::errors::ClientError;
use crate::player::{PlayerAdapter, PlayerCommand, PlayerEvent, READY_SIGNAL};

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay between attempts to connect to the IPC socket.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connection attempts before giving up on the IPC socket.
const SOCKET_POLL_ATTEMPTS: u32 = 100;

/// Key bound to the ready toggle.
const READY_KEY: &str = "F1";

/// How long on-screen messages stay visible.
const OSD_DURATION_MS: u64 = 3_000;

const COMMAND_QUEUE: usize = 256;
const EVENT_QUEUE: usize = 256;
const MAX_IPC_LINE: usize = 64 * 1024;

/// A running mpv instance.
pub struct MpvPlayer {
    commands: mpsc::Sender<PlayerCommand>,
    events: Option<mpsc::Receiver<PlayerEvent>>,
    cancel_token: CancellationToken,
    socket_path: Option<PathBuf>,
    _child: Option<Child>,
}

impl MpvPlayer {
    /// Start `binary` on `media` and attach to its IPC socket.
    ///
    /// # Errors
    ///
    /// - [`ClientError::PlayerSpawn`] if the process cannot be started
    /// - [`ClientError::PlayerIpc`] if the socket does not come up in time
    pub async fn launch(binary: &str, media: &Path, runtime_dir: &Path) -> Result<Self, ClientError> {
        let socket_path = runtime_dir.join(format!("lockstep-{}.socket", std::process::id()));
        // A leftover socket from a crashed run would accept nothing.
        let _ = std::fs::remove_file(&socket_path);

        let child = Command::new(binary)
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .arg("--pause")
            .arg(media)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClientError::PlayerSpawn(format!("{binary}: {e}")))?;

        info!(
            target: "lockstep.client.player",
            binary = %binary,
            media = %media.display(),
            socket = %socket_path.display(),
            "Player started"
        );

        let stream = match connect_socket(&socket_path).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = std::fs::remove_file(&socket_path);
                return Err(e);
            }
        };
        let (read_half, write_half) = stream.into_split();

        Ok(Self::start(read_half, write_half, Some(socket_path), Some(child)))
    }

    /// Speak the IPC protocol over an already connected stream.
    pub fn attach<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(reader, writer, None, None)
    }

    fn start<R, W>(reader: R, writer: W, socket_path: Option<PathBuf>, child: Option<Child>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);
        let cancel_token = CancellationToken::new();

        tokio::spawn(write_loop(writer, command_rx, cancel_token.clone()));
        tokio::spawn(read_loop(reader, event_tx, cancel_token.clone()));

        Self {
            commands: command_tx,
            events: Some(event_rx),
            cancel_token,
            socket_path,
            _child: child,
        }
    }
}

impl PlayerAdapter for MpvPlayer {
    fn issue(&mut self, command: PlayerCommand) {
        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                warn!(target: "lockstep.client.player", command = ?command, "Player command queue full, dropping");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(target: "lockstep.client.player", "Player gone, dropping command");
            }
        }
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<PlayerEvent>> {
        self.events.take()
    }
}

impl Drop for MpvPlayer {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        if let Some(path) = &self.socket_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

async fn connect_socket(path: &Path) -> Result<UnixStream, ClientError> {
    let mut last_error = None;
    for _ in 0..SOCKET_POLL_ATTEMPTS {
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
        tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
    }

    Err(ClientError::PlayerIpc(format!(
        "{} did not accept connections: {}",
        path.display(),
        last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
    )))
}

async fn write_loop<W>(writer: W, mut commands: mpsc::Receiver<PlayerCommand>, cancel_token: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());

    for request in init_requests() {
        if let Err(e) = sink.send(request.to_string()).await {
            warn!(target: "lockstep.client.player", error = %e, "Player setup failed");
            return;
        }
    }

    loop {
        let command = tokio::select! {
            () = cancel_token.cancelled() => break,
            command = commands.recv() => command,
        };
        let Some(command) = command else {
            break;
        };

        debug!(target: "lockstep.client.player", command = ?command, "Player command");
        if let Err(e) = sink.send(request_for(&command).to_string()).await {
            warn!(target: "lockstep.client.player", error = %e, "Player IPC write failed");
            break;
        }
    }
}

async fn read_loop<R>(reader: R, events: mpsc::Sender<PlayerEvent>, cancel_token: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_IPC_LINE));
    let mut parser = MpvEventParser::default();

    loop {
        let line = tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next() => line,
        };

        match line {
            None => {
                info!(target: "lockstep.client.player", "Player IPC closed");
                break;
            }
            Some(Err(e)) => {
                warn!(target: "lockstep.client.player", error = %e, "Player IPC read failed");
                break;
            }
            Some(Ok(line)) => {
                if let Some(event) = parser.parse_line(&line) {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Requests sent once after connecting.
fn init_requests() -> Vec<Value> {
    vec![
        json!({ "command": ["keybind", READY_KEY, format!("script-message {READY_SIGNAL}")] }),
        json!({ "command": ["observe_property", 1, "time-pos"] }),
        json!({ "command": ["observe_property", 2, "speed"] }),
        json!({ "command": ["observe_property", 3, "pause"] }),
        json!({ "command": ["observe_property", 4, "duration"] }),
    ]
}

fn request_for(command: &PlayerCommand) -> Value {
    match command {
        PlayerCommand::Pause => json!({ "command": ["set_property", "pause", true] }),
        PlayerCommand::Unpause => json!({ "command": ["set_property", "pause", false] }),
        PlayerCommand::Seek(position) => json!({ "command": ["set_property", "time-pos", position] }),
        PlayerCommand::SetSpeed(speed) => json!({ "command": ["set_property", "speed", speed] }),
        PlayerCommand::ShowText(text) => json!({ "command": ["show-text", text, OSD_DURATION_MS] }),
    }
}

/// One line from mpv. Replies carry `error`, events carry `event`.
#[derive(Debug, Deserialize)]
struct IpcMessage {
    event: Option<String>,
    name: Option<String>,
    data: Option<Value>,
    #[serde(default)]
    args: Vec<Value>,
    error: Option<String>,
}

/// Turns IPC lines into player events.
///
/// A `seek` event followed by `playback-restart` marks the next `time-pos`
/// as a discontinuity; every other `time-pos` is plain progress. The
/// `playback-restart` of the initial file load is not preceded by a seek and
/// so is not reported as one.
#[derive(Debug, Default)]
pub struct MpvEventParser {
    seeking: bool,
    restarted: bool,
}

impl MpvEventParser {
    /// Parse one line. Replies, unknown events and garbage yield `None`.
    pub fn parse_line(&mut self, line: &str) -> Option<PlayerEvent> {
        let message: IpcMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                debug!(target: "lockstep.client.player", error = %e, "Unparseable IPC line");
                return None;
            }
        };

        let Some(event) = message.event.as_deref() else {
            if let Some(error) = message.error.as_deref().filter(|e| *e != "success") {
                warn!(target: "lockstep.client.player", error = %error, "Player rejected a command");
            }
            return None;
        };

        match event {
            "seek" => {
                self.seeking = true;
                None
            }
            "playback-restart" => {
                if std::mem::take(&mut self.seeking) {
                    self.restarted = true;
                }
                None
            }
            "client-message" => message
                .args
                .first()
                .and_then(Value::as_str)
                .map(|name| PlayerEvent::UserSignal(name.to_string())),
            "property-change" => self.property_change(message.name.as_deref(), message.data.as_ref()),
            _ => None,
        }
    }

    fn property_change(&mut self, name: Option<&str>, data: Option<&Value>) -> Option<PlayerEvent> {
        match name? {
            "time-pos" => {
                let position = data.and_then(Value::as_f64);
                if std::mem::take(&mut self.restarted) {
                    Some(PlayerEvent::PositionChanged(position))
                } else {
                    position.map(PlayerEvent::Progress)
                }
            }
            "speed" => data.and_then(Value::as_f64).map(PlayerEvent::SpeedChanged),
            "pause" => data.and_then(Value::as_bool).map(PlayerEvent::PauseChanged),
            "duration" => data.and_then(Value::as_f64).map(PlayerEvent::DurationChanged),
            _ => None,
        }
    }
}
