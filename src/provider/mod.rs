//! LLM / tool capability.
//!
//! A [`ChatProvider`] turns a [`ProviderRequest`] into a stream of [`ProviderEvent`]s. Vendor
//! SDKs live behind this trait; the runtime only interprets the event shapes. Tool calls are
//! performed by the provider and reported as `ToolStart` / `ToolEnd` pairs carrying the raw
//! tool result, which the [`ExecuteTerminal`] normalizes into citations.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`execute`] | Terminal step of the pipeline: drives the provider stream |
//! | [`scripted`] | Deterministic provider replaying a script (tests, `chat-replay`) |

pub mod execute;
pub mod scripted;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::context::{ChatContext, ChatUser};
use crate::types::message::{ChatInput, ConversationId, HistoryMessage, TokenUsage};
use crate::types::tool::ToolCallResult;
use crate::ui::ChatUi;
use crate::{BoxStream, Result};

pub use execute::ExecuteTerminal;
pub use scripted::{ScriptStep, ScriptedProvider};

/// One observation from a provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderEvent {
    /// Streamed text fragment.
    Chunk { text: String },
    ToolStart {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolEnd { id: String, result: ToolCallResult },
    Usage { usage: TokenUsage },
    /// Complete answer; shown only when nothing was streamed.
    Final { content: String },
    /// The provider stopped before finishing; what was streamed so far is a partial answer.
    StoppedEarly,
}

impl ProviderEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        ProviderEvent::Chunk { text: text.into() }
    }
}

/// Everything a provider needs for one call.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub conversation_id: ConversationId,
    pub user: ChatUser,
    pub llm: Option<String>,
    pub system_messages: Vec<String>,
    pub history: Vec<HistoryMessage>,
    pub input: ChatInput,
    /// Cancelled when the caller disconnects.
    pub cancel: CancellationToken,
    pub ui: Option<ChatUi>,
}

impl ProviderRequest {
    pub fn from_context(ctx: &ChatContext) -> Self {
        Self {
            conversation_id: ctx.conversation_id,
            user: ctx.user.clone(),
            llm: ctx.llm.clone(),
            system_messages: ctx.system_messages.clone(),
            history: ctx.history.clone(),
            input: ctx.input.clone(),
            cancel: ctx.cancel.clone(),
            ui: ctx.ui.clone(),
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Models this provider can serve, preferred first.
    fn llms(&self) -> Vec<String>;

    async fn stream(&self, request: ProviderRequest) -> Result<BoxStream<'static, ProviderEvent>>;

    /// One-shot answer to `request` without streaming, for side tasks such as naming a
    /// conversation. Tool events and usage are ignored.
    async fn complete(&self, request: ProviderRequest) -> Result<String> {
        let mut events = self.stream(request).await?;
        let mut text = String::new();
        let mut last_result = None;
        while let Some(event) = events.next().await {
            match event? {
                ProviderEvent::Chunk { text: chunk } => text.push_str(&chunk),
                ProviderEvent::Final { content } => last_result = Some(content),
                _ => {}
            }
        }
        if text.is_empty() {
            text = last_result.unwrap_or_default();
        }
        Ok(text)
    }
}
