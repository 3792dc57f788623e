//! The bidirectional live session with the voice model.
//!
//! * [`protocol`]: serde types for the `BidiGenerateContent` messages.
//! * [`channel`]: [`LiveChannel`] / [`Connector`] and the websocket
//!   implementation.
//! * [`session`]: [`LiveSession`], the state machine that ties capture,
//!   channel, playback and turns together.
//! * [`driver`]: the single-task loop that feeds the session.

pub mod channel;
pub mod driver;
pub mod protocol;
pub mod session;
pub mod state;

pub use channel::{ChannelError, Connector, Credential, LiveChannel, WsConnector};
pub use driver::{run, SessionCommand, SessionStatus};
pub use protocol::{ClientMessage, ServerEvent, ServerMessage};
pub use session::{LiveSession, SessionError, SessionInput};
pub use state::SessionPhase;
