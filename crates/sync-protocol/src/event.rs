//! Protocol events.

use common::types::PeerId;
use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

/// One protocol message.
///
/// Serialized with an internal `"type"` tag:
///
/// ```text
/// {"type":"hello","peer_id":"alice"}
/// {"type":"playback_gate","allowed":true,"reason":"everyone is ready"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// First message on every connection (client → server).
    Hello { peer_id: PeerId },

    /// The sender's ready flag changed (client → server).
    ReadyChanged { ready: bool },

    /// Periodic playback position in seconds (client → server).
    PositionReport { position: f64 },

    /// Jump to an absolute position in seconds (relayed to every other peer).
    SeekRequest { position: f64 },

    /// Playback speed multiplier changed (relayed to every other peer).
    SpeedChange { speed: f64 },

    /// Liveness probe (either direction).
    Ping { nonce: u64 },

    /// Answer to a [`Event::Ping`], echoing its nonce.
    Pong { nonce: u64 },

    /// Global playback permission (server → client).
    PlaybackGate {
        allowed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Event {
    /// Short stable name, used for log fields and metric labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Event::Hello { .. } => "hello",
            Event::ReadyChanged { .. } => "ready_changed",
            Event::PositionReport { .. } => "position_report",
            Event::SeekRequest { .. } => "seek_request",
            Event::SpeedChange { .. } => "speed_change",
            Event::Ping { .. } => "ping",
            Event::Pong { .. } => "pong",
            Event::PlaybackGate { .. } => "playback_gate",
        }
    }

    /// Build a gate message with a human readable reason.
    #[must_use]
    pub fn gate(allowed: bool, reason: impl Into<String>) -> Self {
        Event::PlaybackGate {
            allowed,
            reason: Some(reason.into()),
        }
    }

    /// Check the field constraints that JSON typing cannot express.
    ///
    /// # Errors
    ///
    /// - [`CodecError::EmptyPeerId`] for a `Hello` without a usable id
    /// - [`CodecError::InvalidField`] for negative or non-finite positions and
    ///   non-positive or non-finite speeds
    pub fn validate(&self) -> Result<(), CodecError> {
        match self {
            Event::Hello { peer_id } if !peer_id.is_valid() => Err(CodecError::EmptyPeerId),
            Event::PositionReport { position } | Event::SeekRequest { position }
                if !position.is_finite() || *position < 0.0 =>
            {
                Err(CodecError::InvalidField(format!(
                    "{}: position must be a finite value >= 0, got {position}",
                    self.kind()
                )))
            }
            Event::SpeedChange { speed } if !speed.is_finite() || *speed <= 0.0 => {
                Err(CodecError::InvalidField(format!(
                    "speed_change: speed must be a finite value > 0, got {speed}"
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let hello = Event::Hello {
            peer_id: PeerId::parse("alice").unwrap(),
        };
        assert_eq!(
            serde_json::to_string(&hello).unwrap(),
            r#"{"type":"hello","peer_id":"alice"}"#
        );

        let gate = Event::PlaybackGate {
            allowed: false,
            reason: None,
        };
        assert_eq!(
            serde_json::to_string(&gate).unwrap(),
            r#"{"type":"playback_gate","allowed":false}"#
        );
    }

    #[test]
    fn test_validate_positions() {
        assert!(Event::SeekRequest { position: 0.0 }.validate().is_ok());
        assert!(Event::SeekRequest { position: -0.5 }.validate().is_err());
        assert!(Event::PositionReport { position: f64::NAN }
            .validate()
            .is_err());
        assert!(Event::SpeedChange { speed: 0.0 }.validate().is_err());
        assert!(Event::SpeedChange { speed: 1.5 }.validate().is_ok());
    }

    #[test]
    fn test_validate_hello() {
        let empty: Event = serde_json::from_str(r#"{"type":"hello","peer_id":""}"#).unwrap();
        assert!(matches!(empty.validate(), Err(CodecError::EmptyPeerId)));
    }

    #[test]
    fn test_gate_reason_is_optional_on_decode() {
        let gate: Event = serde_json::from_str(r#"{"type":"playback_gate","allowed":true}"#).unwrap();
        assert_eq!(
            gate,
            Event::PlaybackGate {
                allowed: true,
                reason: None
            }
        );
    }
}
