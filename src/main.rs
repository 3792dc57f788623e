//! Application entry point: terminal front-end for the live relay.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create a current-thread [`tokio`] runtime.  The live session owns
//!    cpal streams, which are not `Send`, so it stays on this thread.
//! 4. Build the relay hub and spawn the event printer.
//! 5. Build the chat path ([`GeminiChat`]) from config.
//! 6. Open the speaker output and build the live session.
//! 7. Run the session driver and the stdin command reader until `/quit`.
//!
//! # Commands
//!
//! | input              | effect                                  |
//! |--------------------|-----------------------------------------|
//! | `/connect`         | open the live session                   |
//! | `/mic`             | start streaming the microphone          |
//! | `/stop`            | stop streaming the microphone           |
//! | `/reset`           | reconnect with a fresh session          |
//! | `/close`           | close the live session                  |
//! | `/as NAME TEXT`    | send TEXT as another participant        |
//! | `/quit`            | exit                                    |
//! | anything else      | typed chat message                      |

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc, watch};

use live_relay::{
    audio::{AudioOutput, CaptureLoop, CpalInput, CpalOutput, PlaybackScheduler, UnitId},
    chat::{ChatModel, ChatRelay, GeminiChat},
    config::AppConfig,
    live::{self, Credential, LiveSession, SessionCommand, SessionStatus, WsConnector},
    relay::{InboundMessage, RelayEvent, RelayHub, SenderNames},
};

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("live-relay starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    let api_key = config.api_key();
    if api_key.is_none() {
        log::warn!("No API key configured; set GEMINI_API_KEY to use the live session and chat");
    }

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(config, api_key));
    // The stdin reader may still be parked in a blocking read.
    rt.shutdown_background();
    log::info!("live-relay stopped");
    Ok(())
}

async fn run(config: AppConfig, api_key: Option<String>) {
    // 4. Relay hub + printer
    let hub = Arc::new(RelayHub::new(config.relay.capacity));
    let names = SenderNames::new(config.relay.assistant_name.clone());
    tokio::spawn(print_events(hub.subscribe()));

    // 5. Chat path
    let model: Option<Arc<dyn ChatModel>> = match (&api_key, config.chat.enabled) {
        (Some(key), true) => Some(Arc::new(GeminiChat::from_config(&config.chat, key.clone()))
            as Arc<dyn ChatModel>),
        _ => None,
    };
    let chat = Arc::new(ChatRelay::new(model, hub.clone(), names.clone()));

    // 6. Live session
    let output: Box<dyn AudioOutput> = match CpalOutput::open() {
        Ok(output) => Box::new(output),
        Err(e) => {
            log::warn!("Speaker output unavailable ({e}); assistant audio will not be heard");
            Box::new(SilentOutput::new(config.audio.output_sample_rate))
        }
    };
    let capture = CaptureLoop::new(
        Box::new(CpalInput::new(
            config.audio.input_sample_rate,
            config.audio.frame_samples,
        )),
        config.audio.input_sample_rate,
    );
    let mut session = LiveSession::new(
        Arc::new(WsConnector::new()),
        capture,
        PlaybackScheduler::new(output),
        hub.clone(),
        names,
        config.live.clone(),
    );
    if let Some(key) = &api_key {
        session.set_credential(Credential::new(key.clone()));
    }

    // 7. Driver + stdin
    let (command_tx, command_rx) = mpsc::unbounded_channel::<SessionCommand>();
    let (status_tx, status_rx) = watch::channel(SessionStatus::default());
    tokio::spawn(print_status(status_rx));

    println!("Type a message, or /connect /mic /stop /reset /close /as NAME TEXT /quit");
    tokio::join!(
        live::run(
            session,
            command_rx,
            Duration::from_millis(config.audio.playback_poll_ms),
            status_tx,
        ),
        read_stdin(command_tx, chat, api_key),
    );
}

// ---------------------------------------------------------------------------
// stdin
// ---------------------------------------------------------------------------

async fn read_stdin(
    commands: mpsc::UnboundedSender<SessionCommand>,
    chat: Arc<ChatRelay>,
    api_key: Option<String>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let command = match line {
            "/quit" => break,
            "/connect" => match &api_key {
                Some(key) => SessionCommand::Connect(Credential::new(key.clone())),
                None => {
                    eprintln!("No API key configured (GEMINI_API_KEY)");
                    continue;
                }
            },
            "/mic" => SessionCommand::StartRecording,
            "/stop" => SessionCommand::StopRecording,
            "/reset" => SessionCommand::Reset,
            "/close" => SessionCommand::Close,
            _ => {
                if let Some(rest) = line.strip_prefix("/as ") {
                    match rest.trim().split_once(' ') {
                        Some((name, text)) => chat.handle_participant_message(name, text.trim()),
                        None => eprintln!("usage: /as NAME TEXT"),
                    }
                } else {
                    // Answered on its own task; /stop must not wait for the model.
                    chat.spawn_web_message(InboundMessage {
                        text: line.to_string(),
                    });
                }
                continue;
            }
        };

        if commands.send(command).is_err() {
            break;
        }
    }
    // Dropping `commands` ends the driver.
}

// ---------------------------------------------------------------------------
// Printers
// ---------------------------------------------------------------------------

async fn print_events(mut events: broadcast::Receiver<RelayEvent>) {
    // Live updates rewrite the current line instead of printing a new one.
    let mut line_open = false;

    loop {
        match events.recv().await {
            Ok(event) => {
                let updating = event.is_update == Some(true);
                if line_open && !updating {
                    println!();
                }
                if event.is_live == Some(true) {
                    print!("\r\x1b[2K{}: {}", event.sender, event.text);
                    let _ = std::io::stdout().flush();
                    line_open = true;
                } else {
                    println!("{}: {}", event.sender, event.text);
                    line_open = false;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("relay printer lagged, {skipped} event(s) skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn print_status(mut status: watch::Receiver<SessionStatus>) {
    while status.changed().await.is_ok() {
        let current = status.borrow_and_update().clone();
        eprintln!(
            "[{}{}{}] {}",
            current.phase.label(),
            if current.recording { ", mic on" } else { "" },
            if current.speaking { ", speaking" } else { "" },
            current.text
        );
    }
}

// ---------------------------------------------------------------------------
// SilentOutput: fallback AudioOutput when no speaker is present
// ---------------------------------------------------------------------------

/// Keeps time with the wall clock and discards samples, so scheduling and
/// the speaking flag still behave when no output device exists.
struct SilentOutput {
    started: Instant,
    rate: u32,
}

impl SilentOutput {
    fn new(rate: u32) -> Self {
        Self {
            started: Instant::now(),
            rate,
        }
    }
}

impl AudioOutput for SilentOutput {
    fn now(&self) -> u64 {
        (self.started.elapsed().as_secs_f64() * f64::from(self.rate)) as u64
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn start(&mut self, _id: UnitId, _samples: Arc<[f32]>, _at: u64) {}

    fn stop(&mut self, _id: UnitId) {}
}
