//! `SessionActor` - owns the [`ClientSession`] and performs its effects.
//!
//! Three sources feed the session: the player's event stream, the
//! transport (via the session mailbox) and the heartbeat timer. The actor
//! applies them one at a time and routes every resulting [`Effect`] to the
//! player or the transport.
//!
//! The player's event stream ending means the player process exited, which
//! ends the session with [`ClientError::PlayerExited`].

use crate::config::Config;
use crate::errors::ClientError;
use crate::player::{PlayerAdapter, PlayerCommand, PlayerEvent};
use crate::session::{ClientSession, Effect, SessionInput, SessionState};
use crate::transport::{TransportActor, TransportHandle};

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Session mailbox capacity.
const SESSION_CHANNEL_BUFFER: usize = 256;

/// Shown when the player comes up.
const WELCOME_TEXT: &str = "lockstep: press F1 when ready";

/// The `SessionActor` implementation.
pub struct SessionActor<P> {
    session: ClientSession,
    player: P,
    player_events: mpsc::Receiver<PlayerEvent>,
    inbox: mpsc::Receiver<SessionInput>,
    transport: TransportHandle,
    heartbeat_interval: Duration,
    cancel_token: CancellationToken,
}

impl<P: PlayerAdapter> SessionActor<P> {
    /// Run a client session until cancelled or the player exits.
    ///
    /// Spawns the transport as a child of `cancel_token`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::PlayerExited`] when the player's event stream ends
    /// - [`ClientError::Internal`] if the player's events were already taken
    pub async fn run(
        config: Config,
        mut player: P,
        cancel_token: CancellationToken,
    ) -> Result<(), ClientError> {
        let player_events = player
            .take_events()
            .ok_or_else(|| ClientError::Internal("player events already taken".to_string()))?;

        let (inbox_tx, inbox) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let (transport, transport_task) =
            TransportActor::spawn(&config, inbox_tx, cancel_token.child_token());

        let actor = Self {
            session: ClientSession::new(config.peer_id.clone(), config.heartbeat_timeout),
            player,
            player_events,
            inbox,
            transport: transport.clone(),
            heartbeat_interval: config.heartbeat_interval,
            cancel_token,
        };

        let result = actor.run_loop().await;

        transport.cancel();
        let _ = transport_task.await;
        result
    }

    #[instrument(skip_all, name = "lockstep.client.session", fields(peer_id = %self.session.peer_id()))]
    async fn run_loop(mut self) -> Result<(), ClientError> {
        info!(target: "lockstep.client.session", "SessionActor started");
        self.player
            .issue(PlayerCommand::ShowText(WELCOME_TEXT.to_string()));

        let mut heartbeat = tokio::time::interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "lockstep.client.session", "SessionActor received cancellation signal");
                    break Ok(());
                }

                event = self.player_events.recv() => {
                    let Some(event) = event else {
                        error!(target: "lockstep.client.session", "Player exited, ending session");
                        break Err(ClientError::PlayerExited);
                    };
                    self.apply(SessionInput::Player(event));
                }

                input = self.inbox.recv() => {
                    let Some(input) = input else {
                        break Err(ClientError::Internal("transport stopped".to_string()));
                    };
                    self.apply(input);
                }

                _ = heartbeat.tick() => self.apply(SessionInput::HeartbeatTick(Instant::now())),
            }
        };

        info!(
            target: "lockstep.client.session",
            state = ?self.session.state(),
            "SessionActor stopped"
        );
        result
    }

    fn apply(&mut self, input: SessionInput) {
        let before = self.session.state();

        for effect in self.session.handle(input) {
            match effect {
                Effect::Send(event) => self.transport.send(event),
                Effect::Player(command) => self.player.issue(command),
                Effect::Reconnect => self.transport.reconnect(),
            }
        }

        let after = self.session.state();
        if before != after {
            log_transition(before, after);
        }
    }
}

fn log_transition(from: SessionState, to: SessionState) {
    info!(
        target: "lockstep.client.session",
        from = ?from,
        to = ?to,
        "Session state changed"
    );
}
