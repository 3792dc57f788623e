//! The live session state machine.
//!
//! [`LiveSession`] owns everything one live connection needs: the channel,
//! the capture loop, the playback scheduler and the turn coalescer.  It is
//! driven from a single cooperative loop (see [`super::driver`]):
//!
//! ```text
//! connect ──▶ Connecting ──▶ Open ◀──────────────┐
//!                             │ frames ─▶ channel  │ reset (full reconnect)
//!                             │ events ─▶ demux    │
//!                             ▼                    │
//!                    Closed / Error ───────────────┘
//! ```
//!
//! Server events are handled strictly in arrival order:
//!
//! | event              | effect                                              |
//! |--------------------|-----------------------------------------------------|
//! | user transcript    | coalesce as `User`, publish the turn                |
//! | assistant text     | coalesce as `Assistant`, publish the turn           |
//! | assistant audio    | schedule playback, speaking = true                  |
//! | turn complete      | speaking = false, close the open turn               |
//! | interrupted        | stop all playback now, speaking = false             |
//! | error              | phase = Error, no retry                             |
//! | closed             | phase = Closed                                      |

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use super::channel::{ChannelError, Connector, Credential, LiveChannel};
use super::protocol::{ClientMessage, ServerEvent};
use super::state::SessionPhase;
use crate::audio::{AudioChunk, CaptureError, CaptureLoop, CodecError, PlaybackScheduler};
use crate::config::LiveConfig;
use crate::relay::{RelayEvent, RelayPublisher, SenderNames};
use crate::turn::{Fragment, Speaker, Transcript, TurnCoalescer};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Failures surfaced by [`LiveSession`] operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Microphone missing or refused.  Reported, never retried.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(#[from] CaptureError),

    #[error(transparent)]
    InvalidAudioFormat(#[from] CodecError),

    /// Transport failure; the session is now in `Error`.
    #[error("live channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The channel went away; the session is now `Closed`.
    #[error("live channel closed: {0}")]
    ChannelClosed(String),

    #[error("no API key configured; set GEMINI_API_KEY or live.api_key")]
    MissingCredential,
}

// ---------------------------------------------------------------------------
// SessionInput
// ---------------------------------------------------------------------------

/// One unit of work for the session, as returned by
/// [`LiveSession::next_input`].
#[derive(Debug)]
pub enum SessionInput {
    /// A captured microphone frame.
    Frame(AudioChunk),
    /// A server event; `None` when the channel ended without a close event.
    Server(Option<ServerEvent>),
}

// ---------------------------------------------------------------------------
// LiveSession
// ---------------------------------------------------------------------------

pub struct LiveSession {
    connector: Arc<dyn Connector>,
    config: LiveConfig,
    credential: Option<Credential>,

    phase: SessionPhase,
    channel: Option<Box<dyn LiveChannel>>,

    capture: CaptureLoop,
    frames_tx: mpsc::UnboundedSender<AudioChunk>,
    frames_rx: mpsc::UnboundedReceiver<AudioChunk>,

    playback: PlaybackScheduler,
    speaking: bool,

    coalescer: TurnCoalescer,
    transcript: Transcript,
    relay: Arc<dyn RelayPublisher>,
    names: SenderNames,

    status: String,
}

impl LiveSession {
    /// Create an idle session.  Nothing is acquired until
    /// [`connect`](Self::connect) or [`start_recording`](Self::start_recording).
    pub fn new(
        connector: Arc<dyn Connector>,
        capture: CaptureLoop,
        playback: PlaybackScheduler,
        relay: Arc<dyn RelayPublisher>,
        names: SenderNames,
        config: LiveConfig,
    ) -> Self {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            config,
            credential: None,
            phase: SessionPhase::Idle,
            channel: None,
            capture,
            frames_tx,
            frames_rx,
            playback,
            speaking: false,
            coalescer: TurnCoalescer::new(),
            transcript: Transcript::new(),
            relay,
            names,
            status: "Disconnected".into(),
        }
    }

    /// Remember the key used by later implicit connects.
    pub fn set_credential(&mut self, credential: Credential) {
        self.credential = Some(credential);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Open the channel.
    ///
    /// Allowed from `Idle`, `Closed` and `Error`; while `Connecting` or
    /// `Open` this is a no-op that keeps the existing connection.  Every new
    /// connection starts with empty playback and turn state.
    pub async fn connect(
        &mut self,
        credential: Credential,
        config: LiveConfig,
    ) -> Result<(), SessionError> {
        if !self.phase.can_connect() {
            log::debug!("live: connect ignored in phase {:?}", self.phase);
            return Ok(());
        }
        self.credential = Some(credential);
        self.config = config;
        self.open_channel().await
    }

    async fn open_channel(&mut self) -> Result<(), SessionError> {
        let credential = self
            .credential
            .clone()
            .ok_or(SessionError::MissingCredential)?;

        self.clear_conversation();
        self.phase = SessionPhase::Connecting;
        self.status = "Connecting...".into();
        log::info!(
            "live: connecting (model {}, voice {})",
            self.config.model,
            self.config.voice_name
        );

        match self.connector.open(&credential, &self.config).await {
            Ok(channel) => {
                self.channel = Some(channel);
                self.phase = SessionPhase::Open;
                self.status = "Connected".into();
                log::info!("live: session open");
                Ok(())
            }
            Err(e) => {
                log::error!("live: connect failed: {e}");
                self.phase = SessionPhase::Error;
                self.status = format!("Connection failed: {e}");
                Err(SessionError::Channel(e))
            }
        }
    }

    /// Stop capture, drop the current channel and connect again with the
    /// same credential and config.
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        if self.credential.is_none() {
            return Err(SessionError::MissingCredential);
        }
        log::info!("live: reset requested");
        self.capture.stop();
        self.release_channel();
        self.phase = SessionPhase::Closed;
        while self.frames_rx.try_recv().is_ok() {}
        self.open_channel().await
    }

    /// Close the session on request.  Idempotent.
    pub fn close(&mut self) {
        if !self.phase.is_active() {
            return;
        }
        self.phase = SessionPhase::Closing;
        self.capture.stop();
        self.release_channel();
        self.playback.interrupt();
        self.speaking = false;
        self.coalescer.complete();
        self.phase = SessionPhase::Closed;
        self.status = "Disconnected".into();
        log::info!("live: session closed");
    }

    /// Best-effort close of the current channel.
    fn release_channel(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }

    fn clear_conversation(&mut self) {
        self.playback.interrupt();
        self.speaking = false;
        self.coalescer.complete();
        self.transcript.clear();
    }

    // -----------------------------------------------------------------------
    // Recording
    // -----------------------------------------------------------------------

    /// Start forwarding microphone frames, connecting first when there is no
    /// open session.
    pub async fn start_recording(&mut self) -> Result<(), SessionError> {
        if !self.phase.is_active() {
            self.open_channel().await?;
        }
        if let Err(e) = self.capture.start(self.frames_tx.clone()) {
            log::error!("live: microphone unavailable: {e}");
            self.status = format!("Microphone unavailable: {e}");
            return Err(SessionError::DeviceUnavailable(e));
        }
        self.status = "Listening...".into();
        log::info!("live: recording started");
        Ok(())
    }

    pub fn stop_recording(&mut self) {
        self.capture.stop();
        if self.phase == SessionPhase::Open {
            self.status = "Paused".into();
        }
    }

    /// Forward one captured frame.
    ///
    /// Dropped silently unless the session is `Open` and recording is on.
    /// Stale frames are never queued for later.
    pub fn send_audio_frame(&mut self, chunk: AudioChunk) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Open || !self.capture.recording_flag().is_recording() {
            log::trace!("live: frame dropped in phase {:?}", self.phase);
            return Ok(());
        }
        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };

        match channel.send(ClientMessage::audio(&chunk)) {
            Ok(()) => Ok(()),
            Err(ChannelError::Closed) => {
                self.enter_closed("channel closed while sending audio".into());
                Err(SessionError::ChannelClosed(self.status.clone()))
            }
            Err(e) => {
                self.enter_error(e.to_string());
                Err(SessionError::Channel(e))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Input
    // -----------------------------------------------------------------------

    /// Wait for the next captured frame or server event.
    ///
    /// Cancel-safe, so it can sit in a `select!` next to other sources.
    /// Pends forever while there is neither a channel nor a frame.
    pub async fn next_input(&mut self) -> SessionInput {
        let LiveSession {
            frames_rx, channel, ..
        } = self;

        let server = async {
            match channel {
                Some(channel) => channel.next_event().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            Some(frame) = frames_rx.recv() => SessionInput::Frame(frame),
            event = server => SessionInput::Server(event),
        }
    }

    /// Route one input returned by [`next_input`](Self::next_input).
    pub fn dispatch(&mut self, input: SessionInput) -> Result<(), SessionError> {
        match input {
            SessionInput::Frame(chunk) => self.send_audio_frame(chunk),
            SessionInput::Server(Some(event)) => self.handle_event(event),
            SessionInput::Server(None) => {
                self.handle_event(ServerEvent::Closed("channel ended".into()))
            }
        }
    }

    /// Apply one server event.
    pub fn handle_event(&mut self, event: ServerEvent) -> Result<(), SessionError> {
        match event {
            ServerEvent::SetupComplete => log::debug!("live: late setupComplete ignored"),

            ServerEvent::UserTranscript(text) => self.publish_fragment(Speaker::User, text),

            ServerEvent::AssistantText(text) => self.publish_fragment(Speaker::Assistant, text),

            ServerEvent::AssistantAudio(chunk) => {
                if self.phase != SessionPhase::Open {
                    log::debug!("live: audio dropped in phase {:?}", self.phase);
                    return Ok(());
                }
                if self.playback.enqueue(&chunk)?.is_some() {
                    self.speaking = true;
                }
            }

            ServerEvent::TurnComplete => {
                log::debug!("live: turn complete");
                self.speaking = false;
                self.coalescer.complete();
                self.status = "Your turn".into();
            }

            ServerEvent::Interrupted => {
                log::debug!("live: interrupted by user speech");
                self.playback.interrupt();
                self.speaking = false;
                if self
                    .coalescer
                    .open_turn()
                    .is_some_and(|turn| turn.sender == Speaker::Assistant)
                {
                    self.coalescer.complete();
                }
                self.status = "Interrupted".into();
            }

            ServerEvent::GoAway { time_left } => {
                log::warn!(
                    "live: server will close the session soon (time left: {})",
                    time_left.as_deref().unwrap_or("unknown")
                );
            }

            ServerEvent::Error(message) => self.enter_error(message),

            ServerEvent::Closed(reason) => self.enter_closed(reason),
        }
        Ok(())
    }

    fn publish_fragment(&mut self, speaker: Speaker, text: String) {
        let coalesced = self.coalescer.absorb(Fragment::new(speaker, text));
        self.transcript.apply(&coalesced);
        self.relay.publish(RelayEvent::live_turn(&coalesced, &self.names));
    }

    fn enter_error(&mut self, message: String) {
        log::error!("live: channel error: {message}");
        self.capture.stop();
        self.release_channel();
        self.playback.interrupt();
        self.speaking = false;
        self.phase = SessionPhase::Error;
        self.status = format!("Error: {message}");
    }

    fn enter_closed(&mut self, reason: String) {
        log::info!("live: channel closed: {reason}");
        self.capture.stop();
        self.release_channel();
        self.playback.interrupt();
        self.speaking = false;
        self.phase = SessionPhase::Closed;
        self.status = format!("Closed: {reason}");
    }

    // -----------------------------------------------------------------------
    // Playback
    // -----------------------------------------------------------------------

    /// Retire units that finished playing.  Speaking drops to false once the
    /// last one has ended.
    pub fn poll_playback(&mut self) {
        let finished = self.playback.reap();
        if finished > 0 {
            log::trace!("live: {finished} playback unit(s) finished");
        }
        if self.speaking && self.playback.live_count() == 0 {
            self.speaking = false;
            log::debug!("live: assistant finished speaking");
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Human-readable status line.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_active()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn playback(&self) -> &PlaybackScheduler {
        &self.playback
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.capture.stop();
        self.release_channel();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
