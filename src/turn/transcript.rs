//! Ordered list of turns as a display would show them.

use super::coalescer::{Coalesced, ConversationTurn};

/// Applies [`Coalesced`] output: updates replace the last turn, everything
/// else appends.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, coalesced: &Coalesced) {
        match self.turns.last_mut() {
            Some(last) if coalesced.is_update => *last = coalesced.turn.clone(),
            _ => self.turns.push(coalesced.turn.clone()),
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
