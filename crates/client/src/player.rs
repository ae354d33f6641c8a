//! Capability surface of the local media player.
//!
//! The session never talks to a concrete player. It issues
//! [`PlayerCommand`]s and consumes [`PlayerEvent`]s through a
//! [`PlayerAdapter`]; [`crate::mpv::MpvPlayer`] is the production
//! implementation.

use tokio::sync::mpsc;

/// Command sent to the player. Fire-and-forget.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCommand {
    Pause,
    Unpause,
    /// Jump to an absolute position in seconds.
    Seek(f64),
    SetSpeed(f64),
    /// On-screen message.
    ShowText(String),
}

/// Something the player observed.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// Pause state changed, for any reason.
    PauseChanged(bool),
    /// Playback position jumped (seek). `None` when no file is loaded.
    PositionChanged(Option<f64>),
    /// Continuous playback progress.
    Progress(f64),
    /// Playback speed changed.
    SpeedChanged(f64),
    /// Length of the loaded media in seconds.
    DurationChanged(f64),
    /// A named user action, such as the ready key.
    UserSignal(String),
}

/// Name of the signal the ready key produces.
pub const READY_SIGNAL: &str = "ready_pressed";

/// A running player.
pub trait PlayerAdapter: Send + 'static {
    /// Send a command. Never blocks; commands to a dead player are dropped.
    fn issue(&mut self, command: PlayerCommand);

    /// Take the event stream. Returns `None` after the first call.
    ///
    /// The stream ends when the player process exits.
    fn take_events(&mut self) -> Option<mpsc::Receiver<PlayerEvent>>;
}
