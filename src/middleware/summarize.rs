use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::SUMMARIZE_ORDER;
use crate::config::ChatConfig;
use crate::context::{ChatContext, ChatUser, ResultSink};
use crate::i18n::{self, Localizer};
use crate::pipeline::{ChatMiddleware, Next};
use crate::provider::{ChatProvider, ProviderRequest};
use crate::store::ConversationStore;
use crate::types::events::StreamEvent;
use crate::types::message::{ChatInput, ConversationId, MessageRole};
use crate::{Error, Result};

const SUMMARY_TIMEOUT: Duration = Duration::from_secs(10);

/// Names the conversation after its recent user messages while the turn runs.
///
/// The name comes from a one-shot provider completion and is announced as a `summary` event.
/// Conversations named by their user keep their name. A failed completion yields the
/// `texts.chat.noSummary` text; failures of the naming itself are logged and never fail the
/// turn.
pub struct SummarizeHistoryMiddleware {
    conversations: Arc<dyn ConversationStore>,
    provider: Arc<dyn ChatProvider>,
    localizer: Arc<dyn Localizer>,
    history_length: usize,
    prompt: String,
}

/// What the naming task needs from the turn, detached from the context.
struct SummaryJob {
    conversation_id: ConversationId,
    user: ChatUser,
    llm: Option<String>,
    llms: Vec<String>,
    user_messages: Vec<String>,
    result: ResultSink,
    cancel: CancellationToken,
}

impl SummarizeHistoryMiddleware {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        provider: Arc<dyn ChatProvider>,
        localizer: Arc<dyn Localizer>,
        config: &ChatConfig,
    ) -> Self {
        Self {
            conversations,
            provider,
            localizer,
            history_length: config.summary_history_length,
            prompt: config.summary_prompt.clone(),
        }
    }

    /// The new input followed by earlier user messages, newest first.
    fn user_messages(&self, ctx: &ChatContext) -> Vec<String> {
        let earlier = ctx
            .history
            .iter()
            .rev()
            .filter(|m| m.role == MessageRole::Human)
            .map(|m| m.content.clone())
            .take(self.history_length.saturating_sub(1));
        std::iter::once(ctx.input.content.clone())
            .chain(earlier)
            .collect()
    }

    async fn update_name(&self, job: SummaryJob) {
        if let Err(err) = self.try_update_name(&job).await {
            tracing::error!(
                conversation_id = job.conversation_id,
                error = %err,
                "failed to update conversation summary"
            );
        }
    }

    async fn try_update_name(&self, job: &SummaryJob) -> Result<()> {
        let conversation = self
            .conversations
            .find(job.conversation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("conversation {}", job.conversation_id)))?;
        if conversation.is_name_set_manually {
            return Ok(());
        }

        let Some(name) = self.conversation_name(job).await else {
            return Ok(());
        };
        self.conversations
            .rename(job.conversation_id, name.clone(), false)
            .await?;
        job.result.emit(StreamEvent::Summary { content: name }).await
    }

    async fn conversation_name(&self, job: &SummaryJob) -> Option<String> {
        let llm = job.llm.clone().filter(|l| job.llms.contains(l))?;
        let request = ProviderRequest {
            conversation_id: job.conversation_id,
            user: job.user.clone(),
            llm: Some(llm),
            system_messages: Vec::new(),
            history: Vec::new(),
            input: ChatInput::human(self.prompt.replace("{content}", &job.user_messages.join(" "))),
            cancel: job.cancel.child_token(),
            ui: None,
        };

        let answer = tokio::select! {
            _ = job.cancel.cancelled() => return None,
            r = tokio::time::timeout(SUMMARY_TIMEOUT, self.provider.complete(request)) => r,
        };
        match answer {
            Ok(Ok(name)) if !name.trim().is_empty() => return Some(name.trim().to_string()),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                tracing::error!(
                    conversation_id = job.conversation_id,
                    error = %err,
                    "failed to get conversation summary"
                );
            }
            Err(_) => {
                tracing::warn!(
                    conversation_id = job.conversation_id,
                    timeout_secs = SUMMARY_TIMEOUT.as_secs(),
                    "conversation summary timed out"
                );
            }
        }
        Some(self.localizer.t(i18n::NO_SUMMARY))
    }
}

#[async_trait]
impl ChatMiddleware for SummarizeHistoryMiddleware {
    fn order(&self) -> i32 {
        SUMMARIZE_ORDER
    }

    fn name(&self) -> &str {
        "summarize_history"
    }

    async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> Result<()> {
        let job = SummaryJob {
            conversation_id: ctx.conversation_id,
            user: ctx.user.clone(),
            llm: ctx.llm.clone(),
            llms: ctx.llms.clone(),
            user_messages: self.user_messages(ctx),
            result: ctx.result.clone(),
            cancel: ctx.cancel.clone(),
        };

        let (outcome, ()) = tokio::join!(next.run(ctx), self.update_name(job));
        outcome
    }
}
