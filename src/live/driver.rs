//! The session event loop.
//!
//! [`run`] owns the [`LiveSession`] and interleaves three sources on one
//! task:
//!
//! ```text
//! SessionCommand (user)      ──▶ connect / record / reset / close
//! session.next_input()       ──▶ captured frame or server event
//! playback tick              ──▶ reap finished playback units
//! ```
//!
//! Nothing here runs in parallel, so the session needs no locks.  The loop
//! ends when the command sender is dropped; the session is closed on the way
//! out.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::channel::Credential;
use super::session::{LiveSession, SessionError};
use super::state::SessionPhase;

// ---------------------------------------------------------------------------
// SessionCommand / SessionStatus
// ---------------------------------------------------------------------------

/// Requests from the front-end.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Connect(Credential),
    StartRecording,
    StopRecording,
    Reset,
    Close,
}

/// Snapshot published after every step of the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub text: String,
    pub speaking: bool,
    pub recording: bool,
}

impl SessionStatus {
    pub fn of(session: &LiveSession) -> Self {
        Self {
            phase: session.phase(),
            text: session.status().to_owned(),
            speaking: session.is_speaking(),
            recording: session.is_recording(),
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            text: "Disconnected".into(),
            speaking: false,
            recording: false,
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Drive `session` until `commands` closes.
pub async fn run(
    mut session: LiveSession,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    poll_every: Duration,
    status: watch::Sender<SessionStatus>,
) {
    let mut ticker = tokio::time::interval(poll_every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                if let Err(e) = apply(&mut session, command).await {
                    log::warn!("live: {e}");
                }
            }

            input = session.next_input() => {
                if let Err(e) = session.dispatch(input) {
                    log::warn!("live: {e}");
                }
            }

            _ = ticker.tick() => session.poll_playback(),
        }

        publish_status(&status, &session);
    }

    log::info!("live: command channel closed, shutting down session");
    session.close();
    publish_status(&status, &session);
}

async fn apply(session: &mut LiveSession, command: SessionCommand) -> Result<(), SessionError> {
    log::debug!("live: command {command:?}");
    match command {
        SessionCommand::Connect(credential) => {
            let config = session.config().clone();
            session.connect(credential, config).await
        }
        SessionCommand::StartRecording => session.start_recording().await,
        SessionCommand::StopRecording => {
            session.stop_recording();
            Ok(())
        }
        SessionCommand::Reset => session.reset().await,
        SessionCommand::Close => {
            session.close();
            Ok(())
        }
    }
}

fn publish_status(status: &watch::Sender<SessionStatus>, session: &LiveSession) {
    let next = SessionStatus::of(session);
    status.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
