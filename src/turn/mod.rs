//! Conversation turns.
//!
//! * [`TurnCoalescer`]: grows one open turn while the same speaker keeps
//!   sending fragments.
//! * [`Transcript`]: the stored turn list, replacing the last entry on
//!   updates.

pub mod coalescer;
pub mod transcript;

pub use coalescer::{Coalesced, ConversationTurn, Fragment, Speaker, TurnCoalescer};
pub use transcript::Transcript;
