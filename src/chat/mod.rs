//! One-shot (non-live) chat path.
//!
//! A message typed by a participant is broadcast as-is, sent to the model
//! with a single `generateContent` call, and the answer is broadcast under
//! the assistant's name.  Failures become one `system` event; nothing is
//! retried.
//!
//! * [`ChatModel`]: async trait implemented by completion backends.
//! * [`GeminiChat`]: REST `generateContent` backend.
//! * [`ChatRelay`]: ties a model to the relay.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::ChatConfig;
use crate::relay::{InboundMessage, RelayEvent, RelayPublisher, SenderNames};
use crate::turn::Speaker;

/// Text broadcast by the `system` sender when the model call fails.
pub const FAILURE_TEXT: &str = "Error: Failed to get AI response.";

// ---------------------------------------------------------------------------
// ChatError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ChatError {
    /// HTTP transport or connection error.
    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("chat request timed out")]
    Timeout,

    /// Non-success status from the API.
    #[error("chat API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse chat response: {0}")]
    Parse(String),

    /// The response carried no text part.
    #[error("chat model returned an empty response")]
    EmptyResponse,
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::Timeout
        } else {
            ChatError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// ChatModel
// ---------------------------------------------------------------------------

/// Single prompt in, single completion out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ChatError>;
}

// ---------------------------------------------------------------------------
// GeminiChat
// ---------------------------------------------------------------------------

/// Calls `{base_url}/v1beta/models/{model}:generateContent`.
pub struct GeminiChat {
    client: reqwest::Client,
    config: ChatConfig,
    api_key: String,
}

impl GeminiChat {
    /// The HTTP client carries the per-request timeout from
    /// `config.timeout_secs`; a default client is used if the builder fails.
    pub fn from_config(config: &ChatConfig, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config: config.clone(),
            api_key: api_key.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

/// Concatenate the non-thought text parts of the first candidate.
fn extract_text(json: &serde_json::Value) -> Result<String, ChatError> {
    let parts = json["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or(ChatError::EmptyResponse)?;

    let text: String = parts
        .iter()
        .filter(|part| !part["thought"].as_bool().unwrap_or(false))
        .filter_map(|part| part["text"].as_str())
        .collect();

    let text = text.trim();
    if text.is_empty() {
        return Err(ChatError::EmptyResponse);
    }
    Ok(text.to_string())
}

#[async_trait]
impl ChatModel for GeminiChat {
    async fn generate(&self, prompt: &str) -> Result<String, ChatError> {
        let body = serde_json::json!({
            "contents": [
                { "role": "user", "parts": [ { "text": prompt } ] }
            ]
        });

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Parse(e.to_string()))?;

        extract_text(&json)
    }
}

// ---------------------------------------------------------------------------
// ChatRelay
// ---------------------------------------------------------------------------

/// Answers typed messages and rebroadcasts other participants.
pub struct ChatRelay {
    model: Option<Arc<dyn ChatModel>>,
    relay: Arc<dyn RelayPublisher>,
    names: SenderNames,
}

impl ChatRelay {
    /// `model` is `None` when the chat path is disabled; typed messages are
    /// then broadcast without an answer.
    pub fn new(
        model: Option<Arc<dyn ChatModel>>,
        relay: Arc<dyn RelayPublisher>,
        names: SenderNames,
    ) -> Self {
        Self {
            model,
            relay,
            names,
        }
    }

    /// Broadcast `message` from the web user, then the model's answer (or a
    /// `system` error event).
    ///
    /// The model call runs on its own task.  The typed text is broadcast
    /// before this returns, so the caller can go straight back to reading
    /// input.
    pub fn spawn_web_message(self: &Arc<Self>, message: InboundMessage) -> JoinHandle<()> {
        self.publish_web_text(&message.text);
        let chat = Arc::clone(self);
        tokio::spawn(async move { chat.answer(&message.text).await })
    }

    fn publish_web_text(&self, text: &str) {
        log::info!("chat: web client says {text:?}");
        self.relay.publish(RelayEvent::text(
            self.names.name_of(&Speaker::User),
            text,
        ));
    }

    async fn answer(&self, text: &str) {
        let Some(model) = &self.model else {
            return;
        };

        match model.generate(text).await {
            Ok(answer) => {
                log::debug!("chat: model answered ({} chars)", answer.len());
                self.relay.publish(RelayEvent::text(
                    self.names.name_of(&Speaker::Assistant),
                    answer,
                ));
            }
            Err(e) => {
                log::error!("chat: model call failed: {e}");
                self.relay.publish(RelayEvent::text(
                    self.names.name_of(&Speaker::System),
                    FAILURE_TEXT,
                ));
            }
        }
    }

    /// Rebroadcast a message from another participant under its own name.
    pub fn handle_participant_message(&self, name: &str, text: &str) {
        log::info!("chat: {name} says {text:?}");
        self.relay.publish(RelayEvent::text(
            self.names.name_of(&Speaker::Participant(name.to_string())),
            text,
        ));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::relay::testing::RecordingRelay;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    struct AlwaysOk(String);

    #[async_trait]
    impl ChatModel for AlwaysOk {
        async fn generate(&self, _prompt: &str) -> Result<String, ChatError> {
            Ok(self.0.clone())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl ChatModel for AlwaysFails {
        async fn generate(&self, _prompt: &str) -> Result<String, ChatError> {
            Err(ChatError::Timeout)
        }
    }

    /// Answers only after the test releases it.
    struct Gated(Arc<Notify>);

    #[async_trait]
    impl ChatModel for Gated {
        async fn generate(&self, _prompt: &str) -> Result<String, ChatError> {
            self.0.notified().await;
            Ok("Counter 3.".into())
        }
    }

    fn chat(model: Option<Arc<dyn ChatModel>>) -> (ChatRelay, Arc<RecordingRelay>) {
        let relay = Arc::new(RecordingRelay::default());
        let chat = ChatRelay::new(model, relay.clone(), SenderNames::default());
        (chat, relay)
    }

    fn web(text: &str) -> InboundMessage {
        InboundMessage { text: text.into() }
    }

    fn pairs(relay: &RecordingRelay) -> Vec<(String, String)> {
        relay
            .events()
            .into_iter()
            .map(|e| (e.sender, e.text))
            .collect()
    }

    // -----------------------------------------------------------------------
    // ChatRelay
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn web_message_is_broadcast_then_answered() {
        let (chat, relay) = chat(Some(Arc::new(AlwaysOk("Counter 3.".into()))));
        let chat = Arc::new(chat);
        chat.spawn_web_message(web("Where do I go?")).await.unwrap();

        assert_eq!(
            pairs(&relay),
            vec![
                ("user".into(), "Where do I go?".into()),
                ("gemini".into(), "Counter 3.".into()),
            ]
        );
        assert!(relay.events().iter().all(|e| e.is_live.is_none()));
    }

    #[tokio::test]
    async fn model_failure_becomes_system_event() {
        let (chat, relay) = chat(Some(Arc::new(AlwaysFails)));
        let chat = Arc::new(chat);
        chat.spawn_web_message(web("hello")).await.unwrap();

        assert_eq!(
            pairs(&relay),
            vec![
                ("user".into(), "hello".into()),
                ("system".into(), FAILURE_TEXT.into()),
            ]
        );
    }

    #[tokio::test]
    async fn disabled_chat_only_broadcasts() {
        let (chat, relay) = chat(None);
        let chat = Arc::new(chat);
        chat.spawn_web_message(web("hello")).await.unwrap();
        assert_eq!(pairs(&relay), vec![("user".into(), "hello".into())]);
    }

    #[tokio::test]
    async fn spawned_message_returns_before_model_answers() {
        let release = Arc::new(Notify::new());
        let (chat, relay) = chat(Some(Arc::new(Gated(release.clone()))));
        let chat = Arc::new(chat);

        let answer = chat.spawn_web_message(web("Where do I go?"));

        // The typed text is out while the model is still working.
        assert_eq!(pairs(&relay), vec![("user".into(), "Where do I go?".into())]);
        tokio::task::yield_now().await;
        assert!(!answer.is_finished());

        release.notify_one();
        answer.await.unwrap();
        assert_eq!(
            pairs(&relay),
            vec![
                ("user".into(), "Where do I go?".into()),
                ("gemini".into(), "Counter 3.".into()),
            ]
        );
    }

    #[test]
    fn participant_message_uses_participant_name() {
        let (chat, relay) = chat(None);
        chat.handle_participant_message("unreal", "Level loaded");
        assert_eq!(pairs(&relay), vec![("unreal".into(), "Level loaded".into())]);
    }

    // -----------------------------------------------------------------------
    // GeminiChat
    // -----------------------------------------------------------------------

    #[test]
    fn url_joins_base_and_model() {
        let config = ChatConfig {
            base_url: "https://example.test/".into(),
            model: "m1".into(),
            ..ChatConfig::default()
        };
        let chat = GeminiChat::from_config(&config, "k");
        assert_eq!(
            chat.url(),
            "https://example.test/v1beta/models/m1:generateContent"
        );
    }

    #[test]
    fn extract_text_joins_parts_and_skips_thoughts() {
        let json = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "thinking...", "thought": true },
                    { "text": "Hello" },
                    { "text": " there" }
                ]}
            }]
        });
        assert_eq!(extract_text(&json).unwrap(), "Hello there");
    }

    #[test]
    fn extract_text_rejects_empty_candidates() {
        assert!(matches!(
            extract_text(&json!({ "candidates": [] })),
            Err(ChatError::EmptyResponse)
        ));
        assert!(matches!(
            extract_text(&json!({ "candidates": [{ "content": { "parts": [{ "text": "  " }] } }] })),
            Err(ChatError::EmptyResponse)
        ));
    }

    #[test]
    fn gemini_chat_is_object_safe() {
        let model: Arc<dyn ChatModel> =
            Arc::new(GeminiChat::from_config(&ChatConfig::default(), "k"));
        drop(model);
    }
}
