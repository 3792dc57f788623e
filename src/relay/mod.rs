//! Broadcast relay between participants.
//!
//! Every participant (web client, game-engine client, live session, chat
//! path) sees the same stream of [`RelayEvent`]s.  The core only depends on
//! the [`RelayPublisher`] trait; [`RelayHub`] is the in-process fan-out built
//! on `tokio::sync::broadcast`.
//!
//! ```rust
//! use live_relay::relay::{RelayEvent, RelayHub, RelayPublisher};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hub = RelayHub::new(16);
//! let mut rx = hub.subscribe();
//! hub.publish(RelayEvent::text("user", "hello"));
//! assert_eq!(rx.recv().await.unwrap().text, "hello");
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::turn::{Coalesced, Speaker};

// ---------------------------------------------------------------------------
// RelayEvent
// ---------------------------------------------------------------------------

/// Event fanned out to every participant.
///
/// Serialises as `{sender, text, audio?, audioUrl?, isLive?, isUpdate?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEvent {
    pub sender: String,
    pub text: String,
    /// Base64 audio attached to the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Set on events produced by the live session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_live: Option<bool>,
    /// `Some(true)` when this event replaces the previous live bubble of the
    /// same sender rather than starting a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_update: Option<bool>,
}

impl RelayEvent {
    /// Plain text message.
    pub fn text(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            audio: None,
            audio_url: None,
            is_live: None,
            is_update: None,
        }
    }

    /// Live event carrying the coalesced turn text.
    pub fn live_turn(coalesced: &Coalesced, names: &SenderNames) -> Self {
        Self {
            is_live: Some(true),
            is_update: Some(coalesced.is_update),
            audio: coalesced.turn.audio_ref.clone(),
            ..Self::text(names.name_of(&coalesced.turn.sender), coalesced.turn.text.clone())
        }
    }
}

/// Human-typed message arriving from a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub text: String,
}

// ---------------------------------------------------------------------------
// SenderNames
// ---------------------------------------------------------------------------

/// Maps speakers to the sender strings used on the relay.
#[derive(Debug, Clone)]
pub struct SenderNames {
    pub assistant: String,
}

impl SenderNames {
    pub fn new(assistant: impl Into<String>) -> Self {
        Self {
            assistant: assistant.into(),
        }
    }

    pub fn name_of(&self, speaker: &Speaker) -> String {
        match speaker {
            Speaker::Assistant => self.assistant.clone(),
            other => other.to_string(),
        }
    }
}

impl Default for SenderNames {
    fn default() -> Self {
        Self::new("gemini")
    }
}

// ---------------------------------------------------------------------------
// RelayPublisher / RelayHub
// ---------------------------------------------------------------------------

/// Where the core sends events for fan-out.
pub trait RelayPublisher: Send + Sync {
    fn publish(&self, event: RelayEvent);
}

/// In-process broadcast hub.
#[derive(Debug, Clone)]
pub struct RelayHub {
    tx: broadcast::Sender<RelayEvent>,
}

impl RelayHub {
    /// `capacity` events are buffered per subscriber; slower subscribers
    /// lag and skip ahead.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl RelayPublisher for RelayHub {
    fn publish(&self, event: RelayEvent) {
        log::debug!("relay: {} → {:?}", event.sender, event.text);
        // No subscribers is not an error; the event simply has no audience.
        let _ = self.tx.send(event);
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Publisher that records everything it is given.
    #[derive(Default)]
    pub struct RecordingRelay {
        pub events: Mutex<Vec<RelayEvent>>,
    }

    impl RecordingRelay {
        pub fn events(&self) -> Vec<RelayEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl RelayPublisher for RecordingRelay {
        fn publish(&self, event: RelayEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
