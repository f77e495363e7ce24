use async_trait::async_trait;
use std::sync::Arc;

use super::HISTORY_ORDER;
use crate::context::ChatContext;
use crate::pipeline::{ChatMiddleware, Next};
use crate::store::MessageStore;
use crate::types::message::{HistoryMessage, MessageId};
use crate::{Error, Result};

/// Resolves where the new message attaches and loads the thread leading there.
///
/// The parent is, in order of preference: the human message's parent when regenerating, the
/// explicit `parent_message_id` of the input, or the latest message of the conversation.
pub struct HistoryMiddleware {
    messages: Arc<dyn MessageStore>,
}

impl HistoryMiddleware {
    pub fn new(messages: Arc<dyn MessageStore>) -> Self {
        Self { messages }
    }

    async fn resolve_parent(&self, ctx: &ChatContext) -> Result<Option<MessageId>> {
        if let Some(continuation) = ctx.continuation {
            return Ok(continuation.human_parent_id);
        }
        if let Some(parent) = ctx.input.parent_message_id {
            return match self.messages.find(parent).await? {
                Some(m) if m.conversation_id == ctx.conversation_id => Ok(Some(m.id)),
                _ => Err(Error::NotFound(format!(
                    "message {} in conversation {}",
                    parent, ctx.conversation_id
                ))),
            };
        }
        Ok(self
            .messages
            .find_latest(ctx.conversation_id)
            .await?
            .map(|m| m.id))
    }
}

#[async_trait]
impl ChatMiddleware for HistoryMiddleware {
    fn order(&self) -> i32 {
        HISTORY_ORDER
    }

    fn name(&self) -> &str {
        "history"
    }

    async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> Result<()> {
        let parent = self.resolve_parent(ctx).await?;
        let thread = self.messages.thread(ctx.conversation_id, parent).await?;

        tracing::debug!(
            conversation_id = ctx.conversation_id,
            parent_id = ?parent,
            messages = thread.len(),
            "history loaded"
        );
        ctx.parent_id = parent;
        ctx.history = thread.iter().map(HistoryMessage::from).collect();

        next.run(ctx).await
    }
}
