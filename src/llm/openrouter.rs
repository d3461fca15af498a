//! OpenRouter chat-completions client.
//!
//! OpenAI-compatible request format. Plain requests return the trimmed
//! assistant text; audio requests are streamed and decoded chunk by chunk.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::stream::SseDecoder;
use super::{ChatMessage, ChatProvider, ChatReply};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

pub const DEFAULT_MODEL: &str = "x-ai/grok-4.1-fast";
const DEFAULT_MAX_TOKENS: u32 = 700;
const DEFAULT_TEMPERATURE: f32 = 0.2;

const APP_TITLE: &str = "ARENA Support Chat";
const APP_REFERER: &str = "https://arena.local";

pub const NO_RESPONSE: &str = "No response received from the AI model.";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    modalities: Option<[&'static str; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<AudioOptions<'a>>,
}

#[derive(Debug, Serialize)]
struct AudioOptions<'a> {
    voice: &'a str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenRouterClient {
    http: Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    total_calls: AtomicU64,
}

impl OpenRouterClient {
    pub fn new(
        api_key: SecretString,
        model: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to build OpenRouter HTTP client")?;

        Ok(Self {
            http,
            api_key,
            endpoint: OPENROUTER_API_URL.to_string(),
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: temperature.unwrap_or(DEFAULT_TEMPERATURE),
            total_calls: AtomicU64::new(0),
        })
    }

    /// Point at a different OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }

    fn request<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        voice: Option<&'a str>,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: voice.is_some(),
            modalities: voice.map(|_| ["text", "audio"]),
            audio: voice.map(|voice| AudioOptions { voice, format: "wav" }),
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .header("HTTP-Referer", APP_REFERER)
            .header("X-Title", APP_TITLE)
            .json(body)
            .send()
            .await
            .context("OpenRouter request failed")?;
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouter error: {} {}", status.as_u16(), text);
        }
        Ok(response)
    }
}

/// The trimmed text of the first choice.
fn reply_text(body: ChatResponse) -> Result<String> {
    let text = body
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    if text.is_empty() {
        anyhow::bail!(NO_RESPONSE);
    }
    Ok(text)
}

// ---------------------------------------------------------------------------
// ChatProvider implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ChatProvider for OpenRouterClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        debug!(model = %self.model, messages = messages.len(), "Requesting completion");
        let response = self.send(&self.request(&messages, None)).await?;
        let body: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenRouter response")?;
        let text = reply_text(body)?;
        info!(model = %self.model, chars = text.len(), "Completion received");
        Ok(text)
    }

    async fn complete_with_audio(
        &self,
        messages: Vec<ChatMessage>,
        voice: String,
    ) -> Result<ChatReply> {
        debug!(model = %self.model, voice = %voice, "Requesting streamed audio completion");
        let response = self.send(&self.request(&messages, Some(voice.as_str()))).await?;

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("OpenRouter stream interrupted")?;
            decoder.push(&chunk);
            if decoder.is_done() {
                break;
            }
        }

        let reply = decoder.finish();
        if reply.text.is_empty() && reply.audio.is_none() {
            anyhow::bail!(NO_RESPONSE);
        }
        info!(
            model = %self.model,
            chars = reply.text.len(),
            audio = reply.audio.is_some(),
            "Streamed completion received"
        );
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
