//! Live session phase machine.
//!
//! [`SessionPhase`] is the single source of truth for what the session may do
//! next.  The driver reads it for status lines; the session consults it
//! before every connect and every outbound audio frame.

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

/// Phases of one live connection.
///
/// ```text
/// Idle ──connect──▶ Connecting ──setupComplete──▶ Open ──close──▶ Closing ──▶ Closed
/// any phase ──transport failure──▶ Error
/// Closed / Error ──connect──▶ Connecting   (full reset, never a resume)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No connection has been requested yet.
    #[default]
    Idle,

    /// The websocket handshake or setup exchange is in flight.
    Connecting,

    /// Setup completed; audio frames are accepted.
    Open,

    /// A close was requested and is being carried out.
    Closing,

    /// The channel closed, either on request or by the server.
    Closed,

    /// The channel failed.  Only a fresh connect leaves this phase.
    Error,
}

impl SessionPhase {
    /// Whether `connect` may start a new connection from this phase.
    ///
    /// ```
    /// use live_relay::live::SessionPhase;
    ///
    /// assert!(SessionPhase::Idle.can_connect());
    /// assert!(SessionPhase::Closed.can_connect());
    /// assert!(SessionPhase::Error.can_connect());
    /// assert!(!SessionPhase::Open.can_connect());
    /// ```
    pub fn can_connect(&self) -> bool {
        matches!(
            self,
            SessionPhase::Idle | SessionPhase::Closed | SessionPhase::Error
        )
    }

    /// `true` while a connection exists or is being established.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionPhase::Connecting | SessionPhase::Open)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::Connecting => "Connecting",
            SessionPhase::Open => "Live",
            SessionPhase::Closing => "Closing",
            SessionPhase::Closed => "Closed",
            SessionPhase::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
