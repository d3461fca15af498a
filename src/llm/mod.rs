//! Support chat: a chat-completions provider and the assistant built on it.
//!
//! `ChatProvider` abstracts the completion endpoint; `SupportChat` gathers
//! the user's account context, assembles the prompt and asks the provider.

pub mod openrouter;
pub mod prompt;
pub mod stream;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::backend::Backend;
use crate::types::Profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Base64 audio plus its transcript, from a streamed reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioReply {
    pub data: String,
    pub transcript: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub text: String,
    pub audio: Option<AudioReply>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// One non-streamed completion; the trimmed assistant text.
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String>;

    /// A streamed completion with spoken output in `voice`.
    async fn complete_with_audio(&self, messages: Vec<ChatMessage>, voice: String)
        -> Result<ChatReply>;

    fn model_name(&self) -> &str;
}

/// The support assistant.
pub struct SupportChat {
    provider: Arc<dyn ChatProvider>,
    backend: Arc<dyn Backend>,
    knowledge: Option<String>,
}

impl SupportChat {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        backend: Arc<dyn Backend>,
        knowledge: Option<String>,
    ) -> Self {
        Self { provider, backend, knowledge }
    }

    /// Answer the last user turn in `history`.
    pub async fn reply(
        &self,
        profile: Option<&Profile>,
        history: &[ChatMessage],
    ) -> Result<String> {
        let context = prompt::SupportContext::gather(self.backend.as_ref(), profile).await;
        let messages = prompt::build_messages(self.knowledge.as_deref(), &context, history);
        info!(
            model = self.provider.model_name(),
            turns = history.len(),
            context_errors = context.context_errors.len(),
            "Support chat request"
        );
        self.provider.complete(messages).await
    }
}
