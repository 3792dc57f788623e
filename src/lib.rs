//! Live audio and text relay to the Gemini Live voice model.
//!
//! * [`audio`]: capture, PCM16 wire codec, resampling, gapless playback.
//! * [`live`]: the streaming session, its protocol and its event loop.
//! * [`turn`]: fragment coalescing into conversation turns.
//! * [`relay`]: broadcast fan-out of chat events to every participant.
//! * [`chat`]: the one-shot `generateContent` chat path.
//! * [`config`]: `settings.toml` persistence.

pub mod audio;
pub mod chat;
pub mod config;
pub mod live;
pub mod relay;
pub mod turn;
