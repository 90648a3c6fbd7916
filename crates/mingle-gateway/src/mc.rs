//! Generative MC client.
//!
//! One hosted model serves three jobs: text replies, multimodal voice
//! turns (transcription + reply in a single round trip), and speech
//! synthesis. Failures never reach the conversation as errors; they
//! degrade to a fixed apology, an empty turn, or silence.

use crate::error::{GatewayError, Result};
use mingle_core::ChatMessage;
use mingle_session::{ReplyGenerator, UtterancePayload, VoiceGateway, VoiceTurn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Model used for replies and voice interaction.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Shown in the transcript when reply generation fails outright.
pub const APOLOGY_REPLY: &str = "Sorry, I hit a small glitch. Please try again.";

/// Used when the model answers with an empty string.
const EMPTY_REPLY_FALLBACK: &str = "Okay!";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct InteractRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    audio: &'a str,
    mime_type: &'a str,
}

#[derive(Deserialize, Default)]
struct InteractResponse {
    #[serde(default)]
    transcription: String,
    #[serde(default)]
    reply: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

/// Client for the hosted generative MC service.
#[derive(Clone)]
pub struct McClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl McClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(GatewayError::Config("base_url must be non-empty".into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            voice: "default".to_string(),
        })
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::api(status.as_u16(), body));
        }
        Ok(resp.json().await?)
    }

    /// Generate a text reply. Errors surface to the caller; the
    /// [`ReplyGenerator`] adapter maps them to the apology string.
    pub async fn reply(&self, message: &str, recent: &[ChatMessage], kb: &[Value]) -> Result<String> {
        let prompt = build_reply_prompt(message, recent, kb);
        let resp: GenerateResponse = self
            .post_json("/v1/generate", &GenerateRequest {
                model: &self.model,
                prompt: &prompt,
            })
            .await?;
        if resp.text.is_empty() {
            return Ok(EMPTY_REPLY_FALLBACK.to_string());
        }
        Ok(resp.text)
    }

    /// One multimodal voice round trip: the model transcribes the
    /// utterance and answers it in the same call.
    pub async fn voice_turn(
        &self,
        payload: &UtterancePayload,
        recent: &[ChatMessage],
        kb: &[Value],
    ) -> Result<VoiceTurn> {
        let prompt = build_voice_prompt(recent, kb);
        let resp: InteractResponse = self
            .post_json("/v1/interact", &InteractRequest {
                model: &self.model,
                prompt: &prompt,
                audio: &payload.base64_wav,
                mime_type: "audio/wav",
            })
            .await?;
        Ok(VoiceTurn {
            transcription: resp.transcription,
            reply: resp.reply,
        })
    }

    /// Synthesize speech for a reply. Returns WAV bytes.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/speech", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                text,
                voice: &self.voice,
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::api(status.as_u16(), body));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

impl ReplyGenerator for McClient {
    async fn generate_reply(&self, message: &str, recent: &[ChatMessage], kb: &[Value]) -> String {
        match self.reply(message, recent, kb).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "reply generation failed");
                APOLOGY_REPLY.to_string()
            }
        }
    }
}

impl VoiceGateway for McClient {
    async fn process_utterance(
        &self,
        payload: &UtterancePayload,
        recent: &[ChatMessage],
        kb: &[Value],
    ) -> VoiceTurn {
        match self.voice_turn(payload, recent, kb).await {
            Ok(turn) => turn,
            Err(err) => {
                tracing::warn!(error = %err, "voice interaction failed");
                VoiceTurn::default()
            }
        }
    }
}

fn format_history(recent: &[ChatMessage]) -> String {
    recent
        .iter()
        .map(|msg| {
            if msg.user_id == "bot" {
                format!("MC: {}", msg.text)
            } else {
                format!("User ({}): {}", msg.user_name, msg.text)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_reply_prompt(message: &str, recent: &[ChatMessage], kb: &[Value]) -> String {
    let kb_text = serde_json::to_string(kb).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are an intelligent and helpful Event MC.\n\n\
         Reference Information:\n{kb_text}\n\n\
         Conversation History:\n{}\n\n\
         Current User Message: \"{message}\"\n\n\
         Instructions:\n\
         1. Answer based on Reference Information if applicable.\n\
         2. If general chit-chat, be polite and fun.\n\
         3. Keep the response concise (under 40 words).",
        format_history(recent)
    )
}

fn build_voice_prompt(recent: &[ChatMessage], kb: &[Value]) -> String {
    let kb_text = serde_json::to_string(kb).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are an Event MC.\n\n\
         Context:\n{kb_text}\n\
         History:\n{}\n\n\
         Task:\n\
         1. Listen to the user's audio input.\n\
         2. Transcribe exactly what the user said (key: \"transcription\").\n\
         3. Generate a polite, concise (max 2 sentences) response (key: \"reply\").\n\n\
         Return JSON ONLY: {{ \"transcription\": \"...\", \"reply\": \"...\" }}",
        format_history(recent)
    )
}
