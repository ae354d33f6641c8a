//! `ClientSession` - one viewer's local state machine.
//!
//! The session is pure: [`ClientSession::handle`] takes one
//! [`SessionInput`] and returns the [`Effect`]s to perform, in order. The
//! runtime owns the only instance, so inputs from the player, the transport
//! and the heartbeat timer are applied one at a time.
//!
//! ```text
//!                   ready key                 gate allowed
//!   PAUSED_WAITING ----------> PAUSED_READY ---------------> PLAYING
//!         ^   ^                 |      ^                        |
//!         |   +-- ready key ----+      +------ gate stopped ----+
//!         +-------------- local pause / ready key ---------------+
//! ```
//!
//! # Echo suppression
//!
//! Every remote seek gets a generation number and is queued with its target.
//! A `PositionChanged` within [`SEEK_ECHO_TOLERANCE`] of a queued target is
//! the player applying that seek: it is swallowed and clears that generation
//! and every older one. Any other `PositionChanged` is a local seek and is
//! sent to the coordinator. Speed changes use a single remembered target.
//!
//! A target past the end of the media is clamped by the player, so its echo
//! is any position within [`END_OF_MEDIA_TOLERANCE`] of the known duration.
//! Queued targets expire [`SEEK_ECHO_WINDOW`] after the heartbeat tick that
//! first saw them, and all of them are dropped when the player unloads the
//! file.
//!
//! Pause reports are compared against the pause state the session last
//! commanded, so the player confirming a command is never mistaken for the
//! user pressing pause.

use common::types::PeerId;
use std::collections::VecDeque;
use std::time::Duration;
use sync_protocol::Event;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::player::{PlayerCommand, PlayerEvent, READY_SIGNAL};

/// Max distance, in seconds, between a remote seek target and the position
/// the player reports for it.
pub const SEEK_ECHO_TOLERANCE: f64 = 0.5;

/// Shown when the gate stops a ready client: only a fresh ready edge
/// re-arms playback.
pub const RESUME_HINT: &str = "press F1 twice to resume once everyone is back";

/// Max distance, in seconds, between the media duration and the position
/// reported for a remote seek past the end.
pub const END_OF_MEDIA_TOLERANCE: f64 = 5.0;

/// How long a remote seek waits for its position notification.
pub const SEEK_ECHO_WINDOW: Duration = Duration::from_secs(3);

/// Max difference between a remote speed and the reported speed.
pub const SPEED_ECHO_TOLERANCE: f64 = 0.001;

/// Remote seeks remembered while waiting for their notification.
const MAX_PENDING_SEEKS: usize = 16;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Paused and not ready.
    PausedWaiting,
    /// Ready, paused until the coordinator allows playback.
    PausedReady,
    Playing,
}

/// Everything the session reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Player(PlayerEvent),
    /// Message from the coordinator.
    Remote(Event),
    /// Transport connected and sent `Hello`.
    Connected,
    /// Transport lost the connection.
    Disconnected,
    /// Heartbeat timer fired.
    HeartbeatTick(Instant),
}

/// Work for the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send to the coordinator; dropped while disconnected.
    Send(Event),
    Player(PlayerCommand),
    /// Drop the connection and dial again.
    Reconnect,
}

#[derive(Debug, Clone, Copy)]
struct PendingSeek {
    generation: u64,
    target: f64,
    /// Target was past the end and `target` holds the duration instead.
    clamped: bool,
    /// First heartbeat tick that saw this seek.
    seen_at: Option<Instant>,
}

impl PendingSeek {
    fn answered_by(&self, position: f64) -> bool {
        if self.clamped {
            position >= self.target - END_OF_MEDIA_TOLERANCE
        } else {
            (self.target - position).abs() <= SEEK_ECHO_TOLERANCE
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OutstandingPing {
    nonce: u64,
    sent_at: Instant,
}

/// Per-peer session state.
#[derive(Debug)]
pub struct ClientSession {
    peer_id: PeerId,
    heartbeat_timeout: Duration,

    local_ready: bool,
    local_paused: bool,
    remote_permission: bool,
    last_known_position: Option<f64>,
    media_duration: Option<f64>,
    connected: bool,

    seek_generation: u64,
    pending_seeks: VecDeque<PendingSeek>,
    pending_speed: Option<f64>,

    next_nonce: u64,
    outstanding_pings: VecDeque<OutstandingPing>,
}

impl ClientSession {
    /// New session. The player starts paused and the viewer not ready.
    #[must_use]
    pub fn new(peer_id: PeerId, heartbeat_timeout: Duration) -> Self {
        Self {
            peer_id,
            heartbeat_timeout,
            local_ready: false,
            local_paused: true,
            remote_permission: false,
            last_known_position: None,
            media_duration: None,
            connected: false,
            seek_generation: 0,
            pending_seeks: VecDeque::new(),
            pending_speed: None,
            next_nonce: 0,
            outstanding_pings: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        match (self.local_paused, self.local_ready) {
            (false, _) => SessionState::Playing,
            (true, true) => SessionState::PausedReady,
            (true, false) => SessionState::PausedWaiting,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.local_ready
    }

    #[must_use]
    pub fn has_permission(&self) -> bool {
        self.remote_permission
    }

    #[must_use]
    pub fn last_known_position(&self) -> Option<f64> {
        self.last_known_position
    }

    /// Generation of the most recent remote seek.
    #[must_use]
    pub fn seek_generation(&self) -> u64 {
        self.seek_generation
    }

    /// Remote seeks still waiting for their position notification.
    #[must_use]
    pub fn pending_seeks(&self) -> usize {
        self.pending_seeks.len()
    }

    /// Apply one input.
    pub fn handle(&mut self, input: SessionInput) -> Vec<Effect> {
        let mut effects = Vec::new();
        match input {
            SessionInput::Player(event) => self.on_player(event, &mut effects),
            SessionInput::Remote(event) => self.on_remote(event, &mut effects),
            SessionInput::Connected => self.on_connected(&mut effects),
            SessionInput::Disconnected => self.on_disconnected(&mut effects),
            SessionInput::HeartbeatTick(now) => self.on_heartbeat_tick(now, &mut effects),
        }
        effects
    }

    fn on_player(&mut self, event: PlayerEvent, effects: &mut Vec<Effect>) {
        match event {
            PlayerEvent::UserSignal(name) if name == READY_SIGNAL => self.toggle_ready(effects),
            PlayerEvent::UserSignal(name) => {
                debug!(target: "lockstep.client.session", signal = %name, "Ignoring user signal");
            }
            PlayerEvent::PauseChanged(paused) => self.on_pause_changed(paused, effects),
            PlayerEvent::PositionChanged(Some(position)) => {
                self.last_known_position = Some(position);
                if !self.take_seek_echo(position) {
                    info!(target: "lockstep.client.session", position, "Local seek");
                    effects.push(Effect::Send(Event::SeekRequest { position }));
                }
            }
            PlayerEvent::PositionChanged(None) => {
                if !self.pending_seeks.is_empty() {
                    debug!(
                        target: "lockstep.client.session",
                        dropped = self.pending_seeks.len(),
                        "Media unloaded, dropping pending remote seeks"
                    );
                    self.pending_seeks.clear();
                }
            }
            PlayerEvent::DurationChanged(duration) => self.media_duration = Some(duration),
            PlayerEvent::Progress(position) => self.last_known_position = Some(position),
            PlayerEvent::SpeedChanged(speed) => {
                let is_echo = self
                    .pending_speed
                    .is_some_and(|target| (target - speed).abs() <= SPEED_ECHO_TOLERANCE);
                if is_echo {
                    self.pending_speed = None;
                } else {
                    info!(target: "lockstep.client.session", speed, "Local speed change");
                    effects.push(Effect::Send(Event::SpeedChange { speed }));
                }
            }
        }
    }

    fn toggle_ready(&mut self, effects: &mut Vec<Effect>) {
        self.local_ready = !self.local_ready;
        effects.push(Effect::Send(Event::ReadyChanged {
            ready: self.local_ready,
        }));

        if self.local_ready {
            effects.push(show("ready, waiting for others"));
        } else {
            effects.push(show("not ready"));
            if !self.local_paused {
                self.local_paused = true;
                effects.push(Effect::Player(PlayerCommand::Pause));
            }
        }

        info!(
            target: "lockstep.client.session",
            ready = self.local_ready,
            "Local ready toggled"
        );
    }

    fn on_pause_changed(&mut self, paused: bool, effects: &mut Vec<Effect>) {
        if paused == self.local_paused {
            // Confirmation of the state we already hold.
            return;
        }

        if paused {
            // Nothing we commanded: the user paused.
            self.local_paused = true;
            if self.local_ready {
                self.local_ready = false;
                effects.push(Effect::Send(Event::ReadyChanged { ready: false }));
                effects.push(show("not ready: local pause"));
            }
            info!(target: "lockstep.client.session", "Local pause");
            return;
        }

        if self.local_ready && self.remote_permission {
            self.local_paused = false;
            return;
        }

        let text = if self.local_ready {
            "waiting for others"
        } else {
            "not ready"
        };
        debug!(target: "lockstep.client.session", reason = text, "Suppressing local unpause");
        effects.push(Effect::Player(PlayerCommand::Pause));
        effects.push(show(text));
    }

    fn on_remote(&mut self, event: Event, effects: &mut Vec<Effect>) {
        match event {
            Event::PlaybackGate { allowed, reason } => self.on_gate(allowed, reason, effects),
            Event::SeekRequest { position } => {
                self.seek_generation += 1;
                if self.pending_seeks.len() == MAX_PENDING_SEEKS {
                    self.pending_seeks.pop_front();
                }
                let end = self.media_duration.filter(|d| position > *d);
                self.pending_seeks.push_back(PendingSeek {
                    generation: self.seek_generation,
                    target: end.unwrap_or(position),
                    clamped: end.is_some(),
                    seen_at: None,
                });
                self.last_known_position = Some(end.unwrap_or(position));
                effects.push(Effect::Player(PlayerCommand::Seek(position)));
                debug!(
                    target: "lockstep.client.session",
                    position,
                    generation = self.seek_generation,
                    "Applying remote seek"
                );
            }
            Event::SpeedChange { speed } => {
                self.pending_speed = Some(speed);
                effects.push(Effect::Player(PlayerCommand::SetSpeed(speed)));
            }
            Event::Ping { nonce } => effects.push(Effect::Send(Event::Pong { nonce })),
            Event::Pong { nonce } => {
                while self
                    .outstanding_pings
                    .front()
                    .is_some_and(|p| p.nonce <= nonce)
                {
                    self.outstanding_pings.pop_front();
                }
            }
            other @ (Event::Hello { .. }
            | Event::ReadyChanged { .. }
            | Event::PositionReport { .. }) => {
                warn!(
                    target: "lockstep.client.session",
                    kind = other.kind(),
                    "Ignoring client-only message from coordinator"
                );
            }
        }
    }

    fn on_gate(&mut self, allowed: bool, reason: Option<String>, effects: &mut Vec<Effect>) {
        if allowed {
            if !self.local_ready {
                debug!(target: "lockstep.client.session", "Ignoring gate while not ready");
                return;
            }
            self.remote_permission = true;
            if self.local_paused {
                self.local_paused = false;
                effects.push(Effect::Player(PlayerCommand::Unpause));
            }
            effects.push(show(&format!(
                "go: {}",
                reason.as_deref().unwrap_or("everyone is ready")
            )));
        } else {
            self.remote_permission = false;
            if !self.local_paused {
                self.local_paused = true;
                effects.push(Effect::Player(PlayerCommand::Pause));
            }
            let why = reason.as_deref().unwrap_or("waiting for others");
            if self.local_ready {
                effects.push(show(&format!("stopped: {why}\n{RESUME_HINT}")));
            } else {
                effects.push(show(&format!("stopped: {why}")));
            }
        }

        info!(
            target: "lockstep.client.session",
            allowed,
            reason = reason.as_deref().unwrap_or(""),
            "Playback gate"
        );
    }

    fn on_connected(&mut self, effects: &mut Vec<Effect>) {
        self.connected = true;
        self.remote_permission = false;
        self.outstanding_pings.clear();

        effects.push(Effect::Send(Event::ReadyChanged {
            ready: self.local_ready,
        }));
        if let Some(position) = self.last_known_position {
            effects.push(Effect::Send(Event::PositionReport { position }));
        }
        effects.push(show("connected"));
    }

    fn on_disconnected(&mut self, effects: &mut Vec<Effect>) {
        self.connected = false;
        self.outstanding_pings.clear();
        self.lose_permission("connection lost, reconnecting", effects);
    }

    fn on_heartbeat_tick(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        self.expire_seeks(now);
        if !self.connected {
            return;
        }

        let timed_out = self
            .outstanding_pings
            .front()
            .is_some_and(|p| now.duration_since(p.sent_at) >= self.heartbeat_timeout);
        if timed_out {
            warn!(
                target: "lockstep.client.session",
                timeout_ms = self.heartbeat_timeout.as_millis(),
                "Coordinator stopped answering pings"
            );
            self.connected = false;
            self.outstanding_pings.clear();
            self.lose_permission("coordinator not responding", effects);
            effects.push(Effect::Reconnect);
            return;
        }

        self.next_nonce += 1;
        self.outstanding_pings.push_back(OutstandingPing {
            nonce: self.next_nonce,
            sent_at: now,
        });
        effects.push(Effect::Send(Event::Ping {
            nonce: self.next_nonce,
        }));
        // Repeated every tick so a record marked unready by the coordinator
        // recovers once pongs flow again.
        effects.push(Effect::Send(Event::ReadyChanged {
            ready: self.local_ready,
        }));
        if let Some(position) = self.last_known_position {
            effects.push(Effect::Send(Event::PositionReport { position }));
        }
    }

    fn lose_permission(&mut self, text: &str, effects: &mut Vec<Effect>) {
        self.remote_permission = false;
        if !self.local_paused {
            self.local_paused = true;
            effects.push(Effect::Player(PlayerCommand::Pause));
        }
        effects.push(show(text));
    }

    fn expire_seeks(&mut self, now: Instant) {
        for seek in &mut self.pending_seeks {
            seek.seen_at.get_or_insert(now);
        }

        let before = self.pending_seeks.len();
        self.pending_seeks.retain(|p| {
            p.seen_at
                .is_some_and(|seen| now.duration_since(seen) < SEEK_ECHO_WINDOW)
        });
        let expired = before - self.pending_seeks.len();
        if expired > 0 {
            debug!(
                target: "lockstep.client.session",
                expired,
                "Remote seeks never reported by the player"
            );
        }
    }

    /// Swallow `position` if it answers a pending remote seek.
    fn take_seek_echo(&mut self, position: f64) -> bool {
        let matched = self
            .pending_seeks
            .iter()
            .rev()
            .find(|p| p.answered_by(position))
            .map(|p| p.generation);

        match matched {
            Some(generation) => {
                self.pending_seeks.retain(|p| p.generation > generation);
                debug!(
                    target: "lockstep.client.session",
                    position,
                    generation,
                    "Swallowed remote seek echo"
                );
                true
            }
            None => false,
        }
    }
}

fn show(text: &str) -> Effect {
    Effect::Player(PlayerCommand::ShowText(text.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(1_500);

    fn session() -> ClientSession {
        ClientSession::new(PeerId::parse("alice").unwrap(), TIMEOUT)
    }

    fn sent(effects: &[Effect]) -> Vec<Event> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn commands(effects: &[Effect]) -> Vec<PlayerCommand> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Player(PlayerCommand::ShowText(_)) => None,
                Effect::Player(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    fn press_ready(s: &mut ClientSession) -> Vec<Effect> {
        s.handle(SessionInput::Player(PlayerEvent::UserSignal(
            READY_SIGNAL.to_string(),
        )))
    }

    fn gate(allowed: bool) -> SessionInput {
        SessionInput::Remote(Event::gate(allowed, "test"))
    }

    fn position_changed(p: f64) -> SessionInput {
        SessionInput::Player(PlayerEvent::PositionChanged(Some(p)))
    }

    /// Ready, allowed and playing.
    fn playing() -> ClientSession {
        let mut s = session();
        s.handle(SessionInput::Connected);
        press_ready(&mut s);
        s.handle(gate(true));
        assert_eq!(s.state(), SessionState::Playing);
        s
    }

    #[test]
    fn test_ready_toggle_emits_ready_changed() {
        let mut s = session();
        assert_eq!(s.state(), SessionState::PausedWaiting);

        let effects = press_ready(&mut s);
        assert_eq!(sent(&effects), vec![Event::ReadyChanged { ready: true }]);
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Player(PlayerCommand::ShowText(_)))));
        assert_eq!(s.state(), SessionState::PausedReady);

        let effects = press_ready(&mut s);
        assert_eq!(sent(&effects), vec![Event::ReadyChanged { ready: false }]);
        assert!(commands(&effects).is_empty());
        assert_eq!(s.state(), SessionState::PausedWaiting);
    }

    #[test]
    fn test_unready_while_playing_pauses() {
        let mut s = playing();
        let effects = press_ready(&mut s);
        assert_eq!(sent(&effects), vec![Event::ReadyChanged { ready: false }]);
        assert_eq!(commands(&effects), vec![PlayerCommand::Pause]);
        assert_eq!(s.state(), SessionState::PausedWaiting);
    }

    #[test]
    fn test_gate_allowed_only_when_ready() {
        let mut s = session();
        let effects = s.handle(gate(true));
        assert!(effects.is_empty());
        assert_eq!(s.state(), SessionState::PausedWaiting);
        assert!(!s.has_permission());

        press_ready(&mut s);
        let effects = s.handle(gate(true));
        assert_eq!(commands(&effects), vec![PlayerCommand::Unpause]);
        assert_eq!(s.state(), SessionState::Playing);
    }

    #[test]
    fn test_gate_stop_pauses_and_keeps_ready() {
        let mut s = playing();
        let effects = s.handle(gate(false));
        assert_eq!(commands(&effects), vec![PlayerCommand::Pause]);
        assert!(sent(&effects).is_empty());
        assert!(s.is_ready());
        assert_eq!(s.state(), SessionState::PausedReady);

        // The player confirming the pause is not a local pause.
        let effects = s.handle(SessionInput::Player(PlayerEvent::PauseChanged(true)));
        assert!(effects.is_empty());
        assert!(s.is_ready());
    }

    #[test]
    fn test_gate_stop_tells_ready_user_how_to_resume() {
        let mut s = playing();
        let effects = s.handle(gate(false));
        assert!(effects.contains(&show(&format!("stopped: test\n{RESUME_HINT}"))));

        // Not ready: nothing to re-arm, so no hint.
        let mut s = session();
        s.handle(SessionInput::Connected);
        let effects = s.handle(gate(false));
        assert!(effects.contains(&show("stopped: test")));
    }

    #[test]
    fn test_user_pause_is_implicit_unready() {
        let mut s = playing();
        // Confirmation of the unpause command.
        assert!(s
            .handle(SessionInput::Player(PlayerEvent::PauseChanged(false)))
            .is_empty());

        let effects = s.handle(SessionInput::Player(PlayerEvent::PauseChanged(true)));
        assert_eq!(sent(&effects), vec![Event::ReadyChanged { ready: false }]);
        assert_eq!(s.state(), SessionState::PausedWaiting);
    }

    #[test]
    fn test_unauthorized_unpause_is_repaused() {
        let mut s = session();
        let effects = s.handle(SessionInput::Player(PlayerEvent::PauseChanged(false)));
        assert_eq!(commands(&effects), vec![PlayerCommand::Pause]);
        assert!(effects.contains(&show("not ready")));
        assert_eq!(s.state(), SessionState::PausedWaiting);

        press_ready(&mut s);
        let effects = s.handle(SessionInput::Player(PlayerEvent::PauseChanged(false)));
        assert_eq!(commands(&effects), vec![PlayerCommand::Pause]);
        assert!(effects.contains(&show("waiting for others")));
    }

    #[test]
    fn test_remote_seek_echo_is_swallowed() {
        let mut s = session();

        let effects = s.handle(SessionInput::Remote(Event::SeekRequest { position: 42.0 }));
        assert_eq!(commands(&effects), vec![PlayerCommand::Seek(42.0)]);
        assert_eq!(s.seek_generation(), 1);
        assert_eq!(s.pending_seeks(), 1);

        assert!(sent(&s.handle(position_changed(42.0))).is_empty());
        assert_eq!(s.pending_seeks(), 0);

        assert_eq!(
            sent(&s.handle(position_changed(50.0))),
            vec![Event::SeekRequest { position: 50.0 }]
        );
    }

    #[test]
    fn test_echo_within_tolerance() {
        let mut s = session();
        s.handle(SessionInput::Remote(Event::SeekRequest { position: 42.0 }));
        assert!(sent(&s.handle(position_changed(42.3))).is_empty());
    }

    #[test]
    fn test_concurrent_local_and_remote_seeks() {
        let mut s = session();

        // Remote seek issued, then the user seeks before the player reports it.
        s.handle(SessionInput::Remote(Event::SeekRequest { position: 42.0 }));
        assert_eq!(
            sent(&s.handle(position_changed(50.0))),
            vec![Event::SeekRequest { position: 50.0 }]
        );
        assert_eq!(s.pending_seeks(), 1);

        // The late notification for the remote seek is still swallowed.
        assert!(sent(&s.handle(position_changed(42.0))).is_empty());
        assert_eq!(s.pending_seeks(), 0);
    }

    #[test]
    fn test_superseded_remote_seeks_are_cleared() {
        let mut s = session();
        s.handle(SessionInput::Remote(Event::SeekRequest { position: 10.0 }));
        s.handle(SessionInput::Remote(Event::SeekRequest { position: 60.0 }));
        assert_eq!(s.seek_generation(), 2);

        // The player only reports the last one.
        assert!(sent(&s.handle(position_changed(60.0))).is_empty());
        assert_eq!(s.pending_seeks(), 0);

        // A later local seek to the first target is genuine.
        assert_eq!(
            sent(&s.handle(position_changed(10.0))),
            vec![Event::SeekRequest { position: 10.0 }]
        );
    }

    #[test]
    fn test_remote_seek_past_end_matches_clamped_position() {
        let mut s = session();
        s.handle(SessionInput::Player(PlayerEvent::DurationChanged(3_600.0)));

        let effects = s.handle(SessionInput::Remote(Event::SeekRequest { position: 5_000.0 }));
        assert_eq!(commands(&effects), vec![PlayerCommand::Seek(5_000.0)]);

        // The player stops at the end instead of the requested target.
        assert!(sent(&s.handle(position_changed(3_598.5))).is_empty());
        assert_eq!(s.pending_seeks(), 0);
    }

    #[test]
    fn test_remote_seek_inside_media_is_not_clamped() {
        let mut s = session();
        s.handle(SessionInput::Player(PlayerEvent::DurationChanged(3_600.0)));
        s.handle(SessionInput::Remote(Event::SeekRequest { position: 3_000.0 }));

        assert_eq!(
            sent(&s.handle(position_changed(3_599.0))),
            vec![Event::SeekRequest { position: 3_599.0 }]
        );
        assert_eq!(s.pending_seeks(), 1);
    }

    #[test]
    fn test_unloaded_media_drops_pending_seeks() {
        let mut s = session();
        s.handle(SessionInput::Remote(Event::SeekRequest { position: 42.0 }));

        assert!(s
            .handle(SessionInput::Player(PlayerEvent::PositionChanged(None)))
            .is_empty());
        assert_eq!(s.pending_seeks(), 0);

        assert_eq!(
            sent(&s.handle(position_changed(42.2))),
            vec![Event::SeekRequest { position: 42.2 }]
        );
    }

    #[test]
    fn test_progress_only_updates_position() {
        let mut s = session();
        let effects = s.handle(SessionInput::Player(PlayerEvent::Progress(12.5)));
        assert!(effects.is_empty());
        assert_eq!(s.last_known_position(), Some(12.5));
    }

    #[test]
    fn test_speed_echo_suppression() {
        let mut s = session();
        let effects = s.handle(SessionInput::Remote(Event::SpeedChange { speed: 1.5 }));
        assert_eq!(commands(&effects), vec![PlayerCommand::SetSpeed(1.5)]);

        assert!(s
            .handle(SessionInput::Player(PlayerEvent::SpeedChanged(1.5)))
            .is_empty());
        assert_eq!(
            sent(&s.handle(SessionInput::Player(PlayerEvent::SpeedChanged(2.0)))),
            vec![Event::SpeedChange { speed: 2.0 }]
        );
    }

    #[test]
    fn test_server_ping_is_answered() {
        let mut s = session();
        let effects = s.handle(SessionInput::Remote(Event::Ping { nonce: 9 }));
        assert_eq!(effects, vec![Effect::Send(Event::Pong { nonce: 9 })]);
    }

    #[test]
    fn test_connected_resyncs_ready_and_position() {
        let mut s = session();
        press_ready(&mut s);
        s.handle(SessionInput::Player(PlayerEvent::Progress(30.0)));

        let effects = s.handle(SessionInput::Connected);
        assert_eq!(
            sent(&effects),
            vec![
                Event::ReadyChanged { ready: true },
                Event::PositionReport { position: 30.0 },
            ]
        );
    }

    #[test]
    fn test_disconnect_pauses_without_losing_ready() {
        let mut s = playing();
        let effects = s.handle(SessionInput::Disconnected);
        assert_eq!(commands(&effects), vec![PlayerCommand::Pause]);
        assert!(s.is_ready());
        assert!(!s.has_permission());
        assert_eq!(s.state(), SessionState::PausedReady);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_and_reports_position() {
        let mut s = session();
        s.handle(SessionInput::Connected);
        s.handle(SessionInput::Player(PlayerEvent::Progress(3.0)));

        let effects = s.handle(SessionInput::HeartbeatTick(Instant::now()));
        assert_eq!(
            sent(&effects),
            vec![
                Event::Ping { nonce: 1 },
                Event::ReadyChanged { ready: false },
                Event::PositionReport { position: 3.0 },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_repeats_readiness() {
        let mut s = playing();
        let start = Instant::now();

        for tick in [start, start + TIMEOUT / 3] {
            let effects = s.handle(SessionInput::HeartbeatTick(tick));
            assert!(sent(&effects).contains(&Event::ReadyChanged { ready: true }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreported_remote_seek_expires() {
        let mut s = session();
        let start = Instant::now();

        s.handle(SessionInput::Remote(Event::SeekRequest { position: 42.0 }));
        s.handle(SessionInput::HeartbeatTick(start));
        assert_eq!(s.pending_seeks(), 1);
        s.handle(SessionInput::HeartbeatTick(start + SEEK_ECHO_WINDOW / 2));
        assert_eq!(s.pending_seeks(), 1);
        s.handle(SessionInput::HeartbeatTick(start + SEEK_ECHO_WINDOW));
        assert_eq!(s.pending_seeks(), 0);

        // Much later the user seeks near the old target.
        assert_eq!(
            sent(&s.handle(position_changed(42.2))),
            vec![Event::SeekRequest { position: 42.2 }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_silent_while_disconnected() {
        let mut s = session();
        assert!(s
            .handle(SessionInput::HeartbeatTick(Instant::now()))
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_requests_reconnect() {
        let mut s = playing();
        let start = Instant::now();

        s.handle(SessionInput::HeartbeatTick(start));
        let effects = s.handle(SessionInput::HeartbeatTick(start + TIMEOUT / 2));
        assert!(!effects.contains(&Effect::Reconnect));

        let effects = s.handle(SessionInput::HeartbeatTick(start + TIMEOUT));
        assert!(effects.contains(&Effect::Reconnect));
        assert_eq!(commands(&effects), vec![PlayerCommand::Pause]);
        assert_eq!(s.state(), SessionState::PausedReady);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_clears_outstanding_pings() {
        let mut s = session();
        s.handle(SessionInput::Connected);
        let start = Instant::now();

        s.handle(SessionInput::HeartbeatTick(start));
        s.handle(SessionInput::HeartbeatTick(start + TIMEOUT / 2));
        s.handle(SessionInput::Remote(Event::Pong { nonce: 2 }));

        let effects = s.handle(SessionInput::HeartbeatTick(start + TIMEOUT));
        assert!(!effects.contains(&Effect::Reconnect));
    }
}
