//! Scripted player for client tests.
//!
//! `MockPlayer` goes to the code under test; the paired
//! `MockPlayerController` stays with the test to emit player events and
//! assert on the commands the session issued.

use crate::EXPECT_TIMEOUT;
use lockstep_client::player::{PlayerAdapter, PlayerCommand, PlayerEvent, READY_SIGNAL};
use std::time::Duration;
use tokio::sync::mpsc;

/// Player half, handed to the session.
pub struct MockPlayer {
    commands: mpsc::UnboundedSender<PlayerCommand>,
    events: Option<mpsc::Receiver<PlayerEvent>>,
}

/// Test half.
pub struct MockPlayerController {
    commands: mpsc::UnboundedReceiver<PlayerCommand>,
    events: Option<mpsc::Sender<PlayerEvent>>,
}

/// Create a connected player and controller.
pub fn mock_player() -> (MockPlayer, MockPlayerController) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::channel(64);
    (
        MockPlayer {
            commands: commands_tx,
            events: Some(events_rx),
        },
        MockPlayerController {
            commands: commands_rx,
            events: Some(events_tx),
        },
    )
}

impl PlayerAdapter for MockPlayer {
    fn issue(&mut self, command: PlayerCommand) {
        let _ = self.commands.send(command);
    }

    fn take_events(&mut self) -> Option<mpsc::Receiver<PlayerEvent>> {
        self.events.take()
    }
}

impl MockPlayerController {
    /// Report a player event to the session.
    ///
    /// # Panics
    ///
    /// Panics if the player already exited or the session is gone.
    pub async fn emit(&self, event: PlayerEvent) {
        let events = self.events.as_ref().expect("player already exited");
        events.send(event).await.expect("session stopped reading player events");
    }

    /// Press the ready key.
    pub async fn press_ready(&self) {
        self.emit(PlayerEvent::UserSignal(READY_SIGNAL.to_string()))
            .await;
    }

    /// Simulate the player process exiting.
    pub fn exit(&mut self) {
        self.events = None;
    }

    /// Next playback command, skipping on-screen text.
    ///
    /// # Panics
    ///
    /// Panics if none arrives within [`EXPECT_TIMEOUT`].
    pub async fn expect_command(&mut self) -> PlayerCommand {
        match tokio::time::timeout(EXPECT_TIMEOUT, self.next_playback_command()).await {
            Ok(Some(command)) => command,
            Ok(None) => panic!("session dropped the player"),
            Err(_) => panic!("no player command within {EXPECT_TIMEOUT:?}"),
        }
    }

    /// Assert that no playback command arrives for `window`.
    /// On-screen text is ignored.
    ///
    /// # Panics
    ///
    /// Panics on any playback command.
    pub async fn expect_no_command(&mut self, window: Duration) {
        if let Ok(Some(command)) = tokio::time::timeout(window, self.next_playback_command()).await
        {
            panic!("expected no player command, got {command:?}");
        }
    }

    /// Wait for an on-screen message containing `needle`.
    ///
    /// # Panics
    ///
    /// Panics if none arrives within [`EXPECT_TIMEOUT`].
    pub async fn expect_text(&mut self, needle: &str) {
        let found = tokio::time::timeout(EXPECT_TIMEOUT, async {
            while let Some(command) = self.commands.recv().await {
                if matches!(&command, PlayerCommand::ShowText(text) if text.contains(needle)) {
                    return true;
                }
            }
            false
        })
        .await;
        assert!(
            matches!(found, Ok(true)),
            "no on-screen text containing {needle:?}"
        );
    }

    async fn next_playback_command(&mut self) -> Option<PlayerCommand> {
        loop {
            match self.commands.recv().await? {
                PlayerCommand::ShowText(_) => {}
                command => return Some(command),
            }
        }
    }
}
