//! Wire types of the Gemini Live `BidiGenerateContent` websocket protocol.
//!
//! Only the subset used by the session is modelled.  Client messages are
//! externally tagged (`{"setup": {...}}`, `{"realtimeInput": {...}}`); server
//! messages are a bag of optional fields that [`ServerMessage::into_events`]
//! flattens into ordered [`ServerEvent`]s.

use serde::{Deserialize, Serialize};

use crate::audio::{rate_from_mime, AudioChunk};
use crate::config::{LiveConfig, Modality};

/// Rate assumed for assistant audio whose MIME type carries no `rate=`.
pub const DEFAULT_OUTPUT_RATE: u32 = 24_000;

// ---------------------------------------------------------------------------
// Shared content types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64 payload.
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    /// Marks model reasoning that must not be shown or spoken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
}

/// Enables server-side transcription; the object has no fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified, e.g. `models/gemini-2.5-flash-native-audio-latest`.
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<TranscriptionConfig>,
}

impl Setup {
    pub fn from_config(config: &LiveConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };
        Self {
            model,
            generation_config: GenerationConfig {
                response_modalities: config.response_modalities.clone(),
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice_name.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                role: None,
                parts: vec![Part::text(config.system_instruction.clone())],
            },
            input_audio_transcription: config
                .input_transcription
                .then(TranscriptionConfig::default),
            output_audio_transcription: config
                .output_transcription
                .then(TranscriptionConfig::default),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

/// Messages the session sends on the channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Realtime-input frame carrying one captured chunk.
    pub fn audio(chunk: &AudioChunk) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: chunk.mime_type(),
                data: chunk.to_base64(),
            }],
        })
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub generation_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// One JSON message received from the server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

/// Demultiplexed server event, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    /// Transcript fragment of what the user said.
    UserTranscript(String),
    /// Text fragment of the assistant's answer.
    AssistantText(String),
    /// PCM16 audio of the assistant's answer.
    AssistantAudio(AudioChunk),
    TurnComplete,
    /// The user started speaking over the assistant.
    Interrupted,
    /// The server will close the connection soon.
    GoAway { time_left: Option<String> },
    /// Transport failure.
    Error(String),
    /// The channel closed; carries the reason.
    Closed(String),
}

impl ServerMessage {
    /// Flatten one message into events.
    ///
    /// Order: user transcript, assistant text parts, assistant audio parts,
    /// output transcript, turn complete, interrupted.  Thought parts and
    /// empty fragments are dropped; audio with undecodable base64 is logged
    /// and skipped.
    pub fn into_events(self) -> Vec<ServerEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(ServerEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            if let Some(t) = content.input_transcription.filter(|t| !t.text.is_empty()) {
                events.push(ServerEvent::UserTranscript(t.text));
            }

            let parts = content
                .model_turn
                .map(|turn| turn.parts)
                .unwrap_or_default()
                .into_iter()
                .filter(|part| part.thought != Some(true));

            let mut audio = Vec::new();
            for part in parts {
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    events.push(ServerEvent::AssistantText(text));
                }
                if let Some(blob) = part.inline_data {
                    let rate = rate_from_mime(&blob.mime_type).unwrap_or(DEFAULT_OUTPUT_RATE);
                    match AudioChunk::from_base64(&blob.data, rate) {
                        Ok(chunk) => audio.push(ServerEvent::AssistantAudio(chunk)),
                        Err(e) => log::warn!("live: dropping inline audio: {e}"),
                    }
                }
            }
            events.extend(audio);

            if let Some(t) = content.output_transcription.filter(|t| !t.text.is_empty()) {
                events.push(ServerEvent::AssistantText(t.text));
            }
            if content.turn_complete {
                events.push(ServerEvent::TurnComplete);
            }
            if content.interrupted {
                events.push(ServerEvent::Interrupted);
            }
        }

        if let Some(go_away) = self.go_away {
            events.push(ServerEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        events
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
