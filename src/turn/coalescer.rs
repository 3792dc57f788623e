//! Merging of word-level fragments into speech bubbles.
//!
//! The live model streams transcripts a few words at a time.  Publishing each
//! fragment as its own message would explode one utterance into dozens of
//! relay events, so [`TurnCoalescer`] grows a single open turn for as long as
//! the same speaker keeps talking.

use std::fmt;

// ---------------------------------------------------------------------------
// Speaker
// ---------------------------------------------------------------------------

/// Who a turn is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Speaker {
    User,
    Assistant,
    System,
    /// Another participant on the relay, e.g. the game-engine client.
    Participant(String),
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::User => f.write_str("user"),
            Speaker::Assistant => f.write_str("assistant"),
            Speaker::System => f.write_str("system"),
            Speaker::Participant(name) => f.write_str(name),
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationTurn / Fragment
// ---------------------------------------------------------------------------

/// One uninterrupted span of text from a single speaker.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub sender: Speaker,
    pub text: String,
    /// Opaque reference to audio attached to the turn, if any.
    pub audio_ref: Option<String>,
    /// `true` when the turn came from the live session.
    pub is_live: bool,
}

/// An incremental piece of text belonging to an in-progress turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub sender: Speaker,
    pub text: String,
}

impl Fragment {
    pub fn new(sender: Speaker, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
        }
    }
}

/// Result of absorbing one fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Coalesced {
    /// Snapshot of the open turn after the fragment was applied.
    pub turn: ConversationTurn,
    /// `true` when `turn` replaces the previously emitted turn instead of
    /// starting a new one.
    pub is_update: bool,
}

// ---------------------------------------------------------------------------
// TurnCoalescer
// ---------------------------------------------------------------------------

/// Holds at most one open turn.  Never merges across a speaker change.
#[derive(Debug, Default)]
pub struct TurnCoalescer {
    open: Option<ConversationTurn>,
}

impl TurnCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `fragment` to the open turn when the speaker matches, otherwise
    /// close it and open a new one.
    ///
    /// ```rust
    /// use live_relay::turn::{Fragment, Speaker, TurnCoalescer};
    ///
    /// let mut c = TurnCoalescer::new();
    /// assert!(!c.absorb(Fragment::new(Speaker::Assistant, "Hel")).is_update);
    /// let out = c.absorb(Fragment::new(Speaker::Assistant, "lo"));
    /// assert!(out.is_update);
    /// assert_eq!(out.turn.text, "Hello");
    /// ```
    pub fn absorb(&mut self, fragment: Fragment) -> Coalesced {
        let same_speaker = self
            .open
            .as_mut()
            .filter(|turn| turn.sender == fragment.sender);
        if let Some(turn) = same_speaker {
            turn.text.push_str(&fragment.text);
            return Coalesced {
                turn: turn.clone(),
                is_update: true,
            };
        }

        if let Some(previous) = self.open.take() {
            log::trace!(
                "turn: closed {} turn ({} chars)",
                previous.sender,
                previous.text.len()
            );
        }
        let turn = ConversationTurn {
            sender: fragment.sender,
            text: fragment.text,
            audio_ref: None,
            is_live: true,
        };
        self.open = Some(turn.clone());
        Coalesced {
            turn,
            is_update: false,
        }
    }

    /// Close the open turn; the next fragment starts a new one even from
    /// the same speaker.
    pub fn complete(&mut self) -> Option<ConversationTurn> {
        self.open.take()
    }

    pub fn open_turn(&self) -> Option<&ConversationTurn> {
        self.open.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_speaker_fragments_concatenate() {
        let mut c = TurnCoalescer::new();
        let words = ["The", " branch", " opens", " at", " nine."];
        let flags: Vec<bool> = words
            .iter()
            .map(|w| c.absorb(Fragment::new(Speaker::User, *w)).is_update)
            .collect();

        assert_eq!(flags, vec![false, true, true, true, true]);
        let open = c.open_turn().unwrap();
        assert_eq!(open.text, words.concat());
        assert_eq!(open.sender, Speaker::User);
    }

    #[test]
    fn hello_there_is_one_turn_with_two_updates() {
        let mut c = TurnCoalescer::new();
        let outs: Vec<Coalesced> = ["Hello", ",", " there"]
            .into_iter()
            .map(|t| c.absorb(Fragment::new(Speaker::Assistant, t)))
            .collect();

        assert_eq!(outs.iter().filter(|o| o.is_update).count(), 2);
        assert_eq!(outs.last().unwrap().turn.text, "Hello, there");
    }

    #[test]
    fn speaker_change_opens_new_turn() {
        let mut c = TurnCoalescer::new();
        c.absorb(Fragment::new(Speaker::User, "Where is"));
        let out = c.absorb(Fragment::new(Speaker::Assistant, "Counter 3"));

        assert!(!out.is_update);
        assert_eq!(out.turn.sender, Speaker::Assistant);
        assert_eq!(out.turn.text, "Counter 3");
    }

    #[test]
    fn participants_with_different_names_do_not_merge() {
        let mut c = TurnCoalescer::new();
        c.absorb(Fragment::new(Speaker::Participant("unreal".into()), "a"));
        let out = c.absorb(Fragment::new(Speaker::Participant("other".into()), "b"));
        assert!(!out.is_update);
    }

    #[test]
    fn complete_closes_turn() {
        let mut c = TurnCoalescer::new();
        c.absorb(Fragment::new(Speaker::Assistant, "Done."));
        let closed = c.complete().unwrap();
        assert_eq!(closed.text, "Done.");
        assert!(c.open_turn().is_none());

        let out = c.absorb(Fragment::new(Speaker::Assistant, "Next"));
        assert!(!out.is_update);
        assert_eq!(out.turn.text, "Next");
    }

    #[test]
    fn turns_are_marked_live() {
        let mut c = TurnCoalescer::new();
        let out = c.absorb(Fragment::new(Speaker::User, "hi"));
        assert!(out.turn.is_live);
        assert!(out.turn.audio_ref.is_none());
    }
}
