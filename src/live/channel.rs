//! The streaming channel to the live model.
//!
//! [`LiveChannel`] is what the session holds while connected; [`Connector`]
//! opens one.  [`WsConnector`] speaks the Gemini Live websocket protocol:
//!
//! - Endpoint: `<endpoint>?key=<api key>`
//! - First message: `setup`, then wait for `setupComplete`
//! - Audio: PCM16 LE, 16 kHz mono out, 24 kHz mono in, base64 inside JSON
//!
//! After setup a spawned pump task owns the socket.  It forwards outbound
//! messages from an unbounded queue and turns every inbound frame into
//! [`ServerEvent`]s, so the session never touches the socket directly.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{ClientMessage, ServerEvent, ServerMessage, Setup};
use crate::config::LiveConfig;

/// How long the server gets to acknowledge the setup message.
const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// ChannelError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("setup was not acknowledged: {0}")]
    Setup(String),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("channel is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// API key for the live endpoint.  `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// An open, set-up streaming connection.
#[async_trait]
pub trait LiveChannel: Send {
    /// Queue `message` for sending.  Never waits on the network.
    fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError>;

    /// Next event from the server, or `None` once nothing more will arrive.
    ///
    /// Must be cancel-safe: dropping the future loses no event.
    async fn next_event(&mut self) -> Option<ServerEvent>;

    /// Best-effort close.  Never fails.
    fn close(&mut self);
}

/// Opens channels.  Implementations must send the setup message and wait for
/// its acknowledgement before returning.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        credential: &Credential,
        config: &LiveConfig,
    ) -> Result<Box<dyn LiveChannel>, ChannelError>;
}

// ---------------------------------------------------------------------------
// WsConnector
// ---------------------------------------------------------------------------

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

fn endpoint_url(config: &LiveConfig, credential: &Credential) -> String {
    let separator = if config.endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", config.endpoint, separator, credential.expose())
}

/// Parse one websocket frame.  Unparseable JSON is logged and yields nothing.
fn frame_events(message: &Message) -> Vec<ServerEvent> {
    let parsed = match message {
        Message::Text(text) => serde_json::from_str::<ServerMessage>(text.as_str()),
        Message::Binary(bytes) => serde_json::from_slice::<ServerMessage>(bytes),
        _ => return Vec::new(),
    };
    match parsed {
        Ok(message) => message.into_events(),
        Err(e) => {
            log::warn!("live: unparseable server message: {e}");
            Vec::new()
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(
        &self,
        credential: &Credential,
        config: &LiveConfig,
    ) -> Result<Box<dyn LiveChannel>, ChannelError> {
        let url = endpoint_url(config, credential);
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        log::info!("live: websocket connected to {}", config.endpoint);

        let (mut sink, mut stream) = ws.split();

        let setup = serde_json::to_string(&ClientMessage::Setup(Setup::from_config(config)))?;
        sink.send(Message::Text(setup.into()))
            .await
            .map_err(|e| ChannelError::Setup(e.to_string()))?;

        let acknowledged = tokio::time::timeout(SETUP_TIMEOUT, async {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Close(close)) => {
                        let reason = close
                            .map(|c| c.reason.as_str().to_owned())
                            .unwrap_or_else(|| "closed during setup".into());
                        return Err(ChannelError::Setup(reason));
                    }
                    Ok(frame) => {
                        for event in frame_events(&frame) {
                            if event == ServerEvent::SetupComplete {
                                return Ok(());
                            }
                            log::debug!("live: ignoring {event:?} before setup completed");
                        }
                    }
                    Err(e) => return Err(ChannelError::Setup(e.to_string())),
                }
            }
            Err(ChannelError::Setup("stream ended during setup".into()))
        })
        .await
        .map_err(|_| ChannelError::Setup("timed out waiting for setupComplete".into()))?;
        acknowledged?;
        log::info!("live: setup complete (model {})", config.model);

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => {
                        let Some(message) = outbound else {
                            // Session dropped its end: close politely.
                            let _ = sink.close().await;
                            break;
                        };
                        let closing = matches!(message, Message::Close(_));
                        if let Err(e) = sink.send(message).await {
                            let _ = event_tx.send(ServerEvent::Error(e.to_string()));
                            break;
                        }
                        if closing {
                            let _ = event_tx.send(ServerEvent::Closed("closed by client".into()));
                            break;
                        }
                    }

                    inbound = stream.next() => {
                        match inbound {
                            Some(Ok(Message::Close(close))) => {
                                let reason = close
                                    .map(|c| c.reason.as_str().to_owned())
                                    .filter(|r| !r.is_empty())
                                    .unwrap_or_else(|| "closed by server".into());
                                log::info!("live: server closed the channel: {reason}");
                                let _ = event_tx.send(ServerEvent::Closed(reason));
                                break;
                            }
                            Some(Ok(frame)) => {
                                for event in frame_events(&frame) {
                                    if event_tx.send(event).is_err() {
                                        return;
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                log::error!("live: websocket error: {e}");
                                let _ = event_tx.send(ServerEvent::Error(e.to_string()));
                                break;
                            }
                            None => {
                                let _ = event_tx.send(ServerEvent::Closed("connection ended".into()));
                                break;
                            }
                        }
                    }
                }
            }
            log::debug!("live: pump task finished");
        });

        Ok(Box::new(WsChannel {
            outbound: out_tx,
            events: event_rx,
        }))
    }
}

// ---------------------------------------------------------------------------
// WsChannel
// ---------------------------------------------------------------------------

/// Dropping the channel drops `outbound`; the pump then sends a close frame
/// and exits on its own.
struct WsChannel {
    outbound: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
}

#[async_trait]
impl LiveChannel for WsChannel {
    fn send(&mut self, message: ClientMessage) -> Result<(), ChannelError> {
        let json = serde_json::to_string(&message)?;
        self.outbound
            .send(Message::Text(json.into()))
            .map_err(|_| ChannelError::Closed)
    }

    async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    fn close(&mut self) {
        // The pump may already be gone; that is a closed channel either way.
        let _ = self.outbound.send(Message::Close(None));
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let key = Credential::new("AIza-secret");
        assert_eq!(format!("{key:?}"), "Credential(***)");
        assert_eq!(key.expose(), "AIza-secret");
    }

    #[test]
    fn endpoint_url_appends_key() {
        let config = LiveConfig {
            endpoint: "wss://example.test/ws".into(),
            ..LiveConfig::default()
        };
        assert_eq!(
            endpoint_url(&config, &Credential::new("k")),
            "wss://example.test/ws?key=k"
        );

        let config = LiveConfig {
            endpoint: "wss://example.test/ws?alt=json".into(),
            ..LiveConfig::default()
        };
        assert_eq!(
            endpoint_url(&config, &Credential::new("k")),
            "wss://example.test/ws?alt=json&key=k"
        );
    }

    #[test]
    fn text_and_binary_frames_both_parse() {
        let json = r#"{"setupComplete":{}}"#;
        assert_eq!(
            frame_events(&Message::Text(json.into())),
            vec![ServerEvent::SetupComplete]
        );
        assert_eq!(
            frame_events(&Message::Binary(json.as_bytes().to_vec().into())),
            vec![ServerEvent::SetupComplete]
        );
    }

    #[test]
    fn garbage_and_control_frames_yield_nothing() {
        assert!(frame_events(&Message::Text("not json".into())).is_empty());
        assert!(frame_events(&Message::Ping(Vec::new().into())).is_empty());
    }

    #[tokio::test]
    async fn fake_connector_records_setup_and_replays_events() {
        let connector = testing::FakeConnector::default();
        let mut channel = connector
            .open(&Credential::new("k"), &LiveConfig::default())
            .await
            .unwrap();

        connector.emit(ServerEvent::TurnComplete);
        assert_eq!(channel.next_event().await, Some(ServerEvent::TurnComplete));
        assert!(matches!(connector.sent()[0], ClientMessage::Setup(_)));
    }
}
