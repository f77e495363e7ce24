//! 轮次编排：启动、续写与持久化。
//!
//! # Turn Orchestrator
//!
//! Ties the middleware chain, the provider call and persistence together.
//!
//! - [`TurnOrchestrator::start_turn`] answers a new user message
//! - [`TurnOrchestrator::continue_turn`] regenerates an existing assistant message and
//!   replaces its content in place
//! - [`TurnOrchestrator::answer_ui`] delivers the answer to a `ui` request
//!
//! Each turn runs as its own task and returns a [`TurnStream`] immediately. On success the
//! assistant message is persisted exactly once and `saved` is emitted before `completed`; a
//! failed turn persists nothing and ends with a single `error` event. A persistence failure
//! after a successful provider call is logged and the turn still completes.
//!
//! Turns of one conversation are serialized by a [`TurnGate`].

pub mod gate;
pub mod stream;

use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ChatConfig;
use crate::context::{self, ChatContext, ChatUser, Continuation, ResultSink, TurnRecord};
use crate::i18n::{Localizer, Texts};
use crate::middleware::{
    CheckUsageMiddleware, ChooseLlmMiddleware, DefaultPromptMiddleware, HistoryMiddleware,
    StoreUsageMiddleware, SummarizeHistoryMiddleware, UiMiddleware, UsageLimits,
};
use crate::pipeline::{ChatMiddleware, Pipeline, TurnState};
use crate::provider::{ChatProvider, ExecuteTerminal};
use crate::store::{ConversationStore, MessageStore, MessageUpdate, UsageStore};
use crate::types::events::StreamEvent;
use crate::types::message::{
    ChatInput, ChatMetadata, ContentPart, ConversationId, MessageId, MessageRole, NewMessage,
    StoredMessage,
};
use crate::ui::CallbackService;
use crate::{Error, ErrorContext, Result};

pub use gate::{TurnGate, TurnPermit};
pub use stream::TurnStream;

/// Request to answer a new message.
pub struct StartTurn {
    pub conversation_id: ConversationId,
    pub user: ChatUser,
    pub input: ChatInput,
    /// Model the conversation used last.
    pub llm: Option<String>,
    pub keep_partial: bool,
    /// Middleware contributed by extensions for this turn only.
    pub extensions: Vec<Arc<dyn ChatMiddleware>>,
}

impl StartTurn {
    pub fn new(conversation_id: ConversationId, user: ChatUser, input: ChatInput) -> Self {
        Self {
            conversation_id,
            user,
            input,
            llm: None,
            keep_partial: false,
            extensions: Vec::new(),
        }
    }

    pub fn with_llm(mut self, llm: impl Into<String>) -> Self {
        self.llm = Some(llm.into());
        self
    }

    pub fn keep_partial(mut self, keep: bool) -> Self {
        self.keep_partial = keep;
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<Arc<dyn ChatMiddleware>>) -> Self {
        self.extensions = extensions;
        self
    }
}

/// Request to regenerate an assistant message.
pub struct ContinueTurn {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub user: ChatUser,
    pub llm: Option<String>,
    pub keep_partial: bool,
    pub extensions: Vec<Arc<dyn ChatMiddleware>>,
}

impl ContinueTurn {
    pub fn new(conversation_id: ConversationId, message_id: MessageId, user: ChatUser) -> Self {
        Self {
            conversation_id,
            message_id,
            user,
            llm: None,
            keep_partial: false,
            extensions: Vec::new(),
        }
    }

    pub fn with_llm(mut self, llm: impl Into<String>) -> Self {
        self.llm = Some(llm.into());
        self
    }

    pub fn keep_partial(mut self, keep: bool) -> Self {
        self.keep_partial = keep;
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<Arc<dyn ChatMiddleware>>) -> Self {
        self.extensions = extensions;
        self
    }
}

/// Runs turns.
pub struct TurnOrchestrator {
    pipeline: Arc<Pipeline>,
    provider: Arc<dyn ChatProvider>,
    messages: Arc<dyn MessageStore>,
    callbacks: CallbackService,
    gate: TurnGate,
    config: ChatConfig,
}

impl TurnOrchestrator {
    pub fn builder(
        provider: Arc<dyn ChatProvider>,
        messages: Arc<dyn MessageStore>,
    ) -> TurnOrchestratorBuilder {
        TurnOrchestratorBuilder::new(provider, messages)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Whether a turn is running for the conversation.
    pub fn is_busy(&self, conversation_id: ConversationId) -> bool {
        self.gate.is_busy(conversation_id)
    }

    /// Answer a new message.
    pub async fn start_turn(&self, request: StartTurn) -> Result<TurnStream> {
        let permit = self
            .gate
            .acquire(request.conversation_id, self.config.busy_policy)
            .await?;
        let pipeline = self.pipeline_for(request.extensions)?;

        let (stream, mut ctx) = self.open(request.conversation_id, request.user, request.input);
        ctx.llm = request.llm;
        ctx.keep_partial = request.keep_partial;

        self.spawn(ctx, pipeline, permit);
        Ok(stream)
    }

    /// Regenerate the assistant message `message_id`, replacing its content on success.
    pub async fn continue_turn(&self, request: ContinueTurn) -> Result<TurnStream> {
        let permit = self
            .gate
            .acquire(request.conversation_id, self.config.busy_policy)
            .await?;

        let ai = self
            .find_in(request.conversation_id, request.message_id)
            .await?;
        if ai.role != MessageRole::Ai {
            return Err(Error::validation_with_context(
                format!("message {} is not an assistant message", ai.id),
                ErrorContext::new()
                    .with_field_path("message_id")
                    .with_source("turn_orchestrator"),
            ));
        }
        let human_id = ai.parent_id.ok_or_else(|| {
            Error::NotFound(format!("human message answered by message {}", ai.id))
        })?;
        let human = self.find_in(request.conversation_id, human_id).await?;

        let pipeline = self.pipeline_for(request.extensions)?;
        let mut input = ChatInput::human(human.text());
        input.parent_message_id = human.parent_id;

        let (stream, ctx) = self.open(request.conversation_id, request.user, input);
        let mut ctx = ctx.with_continuation(Continuation {
            message_id: ai.id,
            human_message_id: human.id,
            human_parent_id: human.parent_id,
        });
        ctx.llm = request.llm;
        ctx.keep_partial = request.keep_partial;

        self.spawn(ctx, pipeline, permit);
        Ok(stream)
    }

    /// Deliver the answer to a `ui` request. Returns `false` when no matching request is open.
    pub fn answer_ui(&self, request_id: &str, value: Value) -> bool {
        self.callbacks.complete(request_id, value)
    }

    async fn find_in(
        &self,
        conversation_id: ConversationId,
        id: MessageId,
    ) -> Result<StoredMessage> {
        self.messages
            .find(id)
            .await?
            .filter(|m| m.conversation_id == conversation_id)
            .ok_or_else(|| {
                Error::NotFound(format!("message {} in conversation {}", id, conversation_id))
            })
    }

    fn pipeline_for(&self, extensions: Vec<Arc<dyn ChatMiddleware>>) -> Result<Arc<Pipeline>> {
        if extensions.is_empty() {
            Ok(self.pipeline.clone())
        } else {
            Ok(Arc::new(self.pipeline.with_extensions(extensions)?))
        }
    }

    fn open(
        &self,
        conversation_id: ConversationId,
        user: ChatUser,
        input: ChatInput,
    ) -> (TurnStream, ChatContext) {
        let (sink, rx) =
            ResultSink::channel(self.config.event_buffer, self.config.emit_timeout());
        let cancel = CancellationToken::new();
        let ctx = ChatContext::new(conversation_id, user, input, sink)
            .with_cancel(cancel.clone())
            .with_llms(self.provider.llms());
        (TurnStream::new(rx, cancel), ctx)
    }

    fn spawn(&self, mut ctx: ChatContext, pipeline: Arc<Pipeline>, permit: TurnPermit) {
        let messages = self.messages.clone();

        tokio::spawn(async move {
            let _permit = permit;
            let started = Instant::now();
            let conversation_id = ctx.conversation_id;
            tracing::info!(
                conversation_id,
                continuation = ctx.continuation.is_some(),
                "turn started"
            );

            let handle = ctx.handle();
            let state = context::scope(handle, pipeline.run(&mut ctx)).await;

            if state == TurnState::Completed {
                finish(&ctx, messages.as_ref(), started).await;
            }
            // Providers or tools may still hold handles to the sink.
            ctx.result.close().await;

            tracing::info!(
                conversation_id,
                ?state,
                duration_ms = started.elapsed().as_millis() as u64,
                "turn finished"
            );
        });
    }
}

/// Persist the answer (if there is one to keep) and emit `saved` and `completed`.
async fn finish(ctx: &ChatContext, messages: &dyn MessageStore, started: Instant) {
    let record = ctx.result.record().await;
    let keep = ctx.executed && (!ctx.stopped_early || ctx.keep_partial);

    if keep {
        match persist(ctx, &record, messages).await {
            Ok(saved) => {
                let event = StreamEvent::Saved {
                    message_id: saved.id,
                    message_type: MessageRole::Ai,
                    parent_id: saved.parent_id,
                    saved_at: saved.updated_at,
                };
                if let Err(err) = ctx.result.emit(event).await {
                    tracing::error!(error = %err, "failed to emit saved event");
                }
            }
            Err(err) => {
                tracing::error!(
                    conversation_id = ctx.conversation_id,
                    error = %err,
                    "failed to store message in history"
                );
            }
        }
    } else if ctx.stopped_early {
        tracing::debug!(
            conversation_id = ctx.conversation_id,
            "discarding partial answer"
        );
    }

    let usage = ctx.usage.clone().unwrap_or_default();
    let metadata = ChatMetadata {
        token_count: usage.token_count,
        llm: Some(usage.llm)
            .filter(|l| !l.is_empty())
            .or_else(|| ctx.llm.clone()),
        model: Some(usage.model).filter(|m| !m.is_empty()),
        duration_ms: started.elapsed().as_millis() as u64,
    };
    if let Err(err) = ctx.result.emit(StreamEvent::Completed { metadata }).await {
        tracing::error!(error = %err, "failed to emit completed event");
    }
}

async fn persist(
    ctx: &ChatContext,
    record: &TurnRecord,
    messages: &dyn MessageStore,
) -> Result<StoredMessage> {
    let content = vec![ContentPart::text(record.content.clone())];

    if let Some(continuation) = ctx.continuation {
        return messages
            .update(
                continuation.message_id,
                MessageUpdate {
                    content,
                    tools: record.tools.clone(),
                    sources: record.sources.clone(),
                    debug: record.debug.clone(),
                },
            )
            .await;
    }

    let human = messages
        .save(NewMessage {
            conversation_id: ctx.conversation_id,
            parent_id: ctx.parent_id,
            role: MessageRole::Human,
            content: vec![ContentPart::text(ctx.input.content.clone())],
            tools: Vec::new(),
            sources: Vec::new(),
            debug: Vec::new(),
        })
        .await?;

    messages
        .save(NewMessage {
            conversation_id: ctx.conversation_id,
            parent_id: Some(human.id),
            role: MessageRole::Ai,
            content,
            tools: record.tools.clone(),
            sources: record.sources.clone(),
            debug: record.debug.clone(),
        })
        .await
}

/// Builder for [`TurnOrchestrator`].
pub struct TurnOrchestratorBuilder {
    provider: Arc<dyn ChatProvider>,
    messages: Arc<dyn MessageStore>,
    usage: Option<(Arc<dyn UsageStore>, UsageLimits)>,
    conversations: Option<Arc<dyn ConversationStore>>,
    localizer: Option<Arc<dyn Localizer>>,
    middlewares: Vec<Arc<dyn ChatMiddleware>>,
    callbacks: CallbackService,
    config: ChatConfig,
}

impl TurnOrchestratorBuilder {
    pub fn new(provider: Arc<dyn ChatProvider>, messages: Arc<dyn MessageStore>) -> Self {
        Self {
            provider,
            messages,
            usage: None,
            conversations: None,
            localizer: None,
            middlewares: Vec::new(),
            callbacks: CallbackService::new(),
            config: ChatConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable quota checks and usage recording.
    pub fn with_usage(mut self, usage: Arc<dyn UsageStore>, limits: UsageLimits) -> Self {
        self.usage = Some((usage, limits));
        self
    }

    /// Name conversations after their recent user messages.
    pub fn with_conversations(mut self, conversations: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(conversations);
        self
    }

    /// Replaces the built-in texts (and the configured overrides).
    pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self {
        self.localizer = Some(localizer);
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn ChatMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Share UI callbacks with another component (e.g. the HTTP layer answering them).
    pub fn with_callbacks(mut self, callbacks: CallbackService) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn build(self) -> Result<TurnOrchestrator> {
        self.config.validate()?;

        let localizer = self.localizer.unwrap_or_else(|| {
            Arc::new(Texts::with_overrides(self.config.texts.clone())) as Arc<dyn Localizer>
        });

        let mut builder = Pipeline::builder()
            .with_localizer(localizer.clone())
            .with_middleware(Arc::new(UiMiddleware::new(
                self.callbacks.clone(),
                self.config.ui_timeout(),
            )))
            .with_middleware(Arc::new(HistoryMiddleware::new(self.messages.clone())))
            .with_middleware(Arc::new(ChooseLlmMiddleware::new(localizer.clone())))
            .with_middleware(Arc::new(DefaultPromptMiddleware::new(
                self.config.default_system_prompt.clone(),
            )));

        if let Some((usage, limits)) = self.usage {
            builder = builder
                .with_middleware(Arc::new(CheckUsageMiddleware::new(
                    usage.clone(),
                    limits,
                    localizer.clone(),
                )))
                .with_middleware(Arc::new(StoreUsageMiddleware::new(usage)));
        }

        if let Some(conversations) = self.conversations {
            builder = builder.with_middleware(Arc::new(SummarizeHistoryMiddleware::new(
                conversations,
                self.provider.clone(),
                localizer.clone(),
                &self.config,
            )));
        }

        let pipeline = builder
            .with_middlewares(self.middlewares)
            .with_terminal(Arc::new(ExecuteTerminal::new(
                self.provider.clone(),
                &self.config,
            )))
            .build()?;

        tracing::debug!(middlewares = ?pipeline.names(), "chat pipeline built");

        Ok(TurnOrchestrator {
            pipeline: Arc::new(pipeline),
            provider: self.provider,
            messages: self.messages,
            callbacks: self.callbacks,
            gate: TurnGate::new(),
            config: self.config,
        })
    }
}
