//! Per-turn state threaded through the middleware chain.
//!
//! A [`ChatContext`] is created when a turn starts and dropped when the turn task ends. Its
//! [`ResultSink`] is write-only: middleware push events forward but can never read back what
//! was emitted. The sink enforces the stream's ordering rules at the producer side and feeds a
//! bounded queue read by the caller through an [`EventReceiver`].
//!
//! A producer waits at most the emit timeout for queue space. Events that do not fit in time
//! are parked in a backlog behind the queue and delivered once the caller catches up, so a
//! slow caller delays nothing and loses nothing.
//!
//! Code that cannot reach the context through parameters (tools, provider adapters) may use
//! [`current`] to obtain a [`TurnHandle`] for the turn it runs in.

use futures::task::AtomicWaker;
use futures::Stream;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::{Arc, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::classify::ErrorClass;
use crate::pipeline::TurnState;
use crate::protocol::order::{Admission, OrderGuard};
use crate::types::events::StreamEvent;
use crate::types::message::{
    joined_text, ChatInput, ConversationId, HistoryMessage, MessageId, TokenUsage, UserId,
};
use crate::types::source::Source;
use crate::ui::ChatUi;
use crate::{Error, Result};

/// The user a turn runs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUser {
    pub id: UserId,
    pub group: Option<String>,
}

impl ChatUser {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            group: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// The assistant message a continuation regenerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    /// Assistant message whose content is replaced.
    pub message_id: MessageId,
    /// Human message the assistant message answers.
    pub human_message_id: MessageId,
    /// Parent of the human message; history is restored up to here.
    pub human_parent_id: Option<MessageId>,
}

/// What the sink has seen of a turn, kept for persistence.
#[derive(Debug, Clone, Default)]
pub(crate) struct TurnRecord {
    pub content: String,
    pub tools: Vec<String>,
    pub sources: Vec<Source>,
    pub debug: Vec<String>,
    pub terminal: Option<&'static str>,
}

impl TurnRecord {
    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Chunk { content } => self.content.push_str(&joined_text(content)),
            StreamEvent::ToolStart { tool, .. } => self.tools.push(tool.name.clone()),
            StreamEvent::Debug { content } => self.debug.push(content.clone()),
            e if e.is_terminal() => self.terminal = Some(e.kind()),
            _ => {}
        }
    }
}

/// Events that did not fit into the queue within the emit timeout.
#[derive(Default)]
struct Backlog {
    events: std::sync::Mutex<VecDeque<StreamEvent>>,
    waker: AtomicWaker,
}

impl Backlog {
    fn is_empty(&self) -> bool {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    fn push(&self, event: StreamEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(event);
        self.waker.wake();
    }

    fn pop(&self) -> Option<StreamEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

struct SinkState {
    guard: OrderGuard,
    record: TurnRecord,
    /// `None` once the sink is closed.
    tx: Option<mpsc::Sender<StreamEvent>>,
}

struct SinkShared {
    emit_timeout: Duration,
    backlog: Arc<Backlog>,
    state: Mutex<SinkState>,
}

/// Write-only, ordered event sink of one turn.
///
/// Cloning yields another handle to the same stream.
#[derive(Clone)]
pub struct ResultSink {
    shared: Arc<SinkShared>,
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("emit_timeout", &self.shared.emit_timeout)
            .finish_non_exhaustive()
    }
}

impl ResultSink {
    /// Create a sink and the receiving end the caller reads from.
    pub fn channel(buffer: usize, emit_timeout: Duration) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let backlog = Arc::new(Backlog::default());
        let sink = Self {
            shared: Arc::new(SinkShared {
                emit_timeout,
                backlog: backlog.clone(),
                state: Mutex::new(SinkState {
                    guard: OrderGuard::new(),
                    record: TurnRecord::default(),
                    tx: Some(tx),
                }),
            }),
        };
        let receiver = EventReceiver {
            rx,
            backlog,
            done: false,
        };
        (sink, receiver)
    }

    /// Push one event.
    ///
    /// Events after the terminal event are dropped and logged; the first terminal event is
    /// authoritative. Events that break the ordering rules fail with [`Error::Protocol`].
    /// A slow consumer delays the producer by at most the emit timeout; the event is then
    /// parked in the backlog and every later event queues behind it until the consumer has
    /// drained it. Only a consumer that went away loses events.
    pub async fn emit(&self, event: StreamEvent) -> Result<()> {
        let mut state = self.shared.state.lock().await;

        match state.guard.admit(&event) {
            Admission::Accept => {}
            Admission::AfterTerminal => {
                tracing::warn!(
                    event = event.kind(),
                    terminal = state.record.terminal.unwrap_or("unknown"),
                    "dropping event emitted after the terminal event"
                );
                return Ok(());
            }
            Admission::Reject(violation) => {
                return Err(Error::Protocol(violation.to_string()));
            }
        }
        state.record.observe(&event);

        let Some(tx) = state.tx.as_ref() else {
            tracing::debug!(event = event.kind(), "sink closed, dropping event");
            return Ok(());
        };
        if tx.is_closed() {
            tracing::debug!(event = event.kind(), "consumer gone, dropping event");
            return Ok(());
        }
        if !self.shared.backlog.is_empty() {
            self.shared.backlog.push(event);
            return Ok(());
        }

        match tx.send_timeout(event, self.shared.emit_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(event)) => {
                tracing::warn!(
                    event = event.kind(),
                    timeout_ms = self.shared.emit_timeout.as_millis() as u64,
                    "consumer too slow, parking events behind the queue"
                );
                self.shared.backlog.push(event);
            }
            Err(SendTimeoutError::Closed(event)) => {
                tracing::debug!(event = event.kind(), "consumer gone, dropping event");
            }
        }
        Ok(())
    }

    /// Emit the terminal `error` event.
    pub async fn error(&self, message: impl Into<String>) -> Result<()> {
        self.emit(StreamEvent::error(message)).await
    }

    /// Whether a terminal event has been emitted.
    pub async fn is_terminated(&self) -> bool {
        self.shared.state.lock().await.guard.is_terminated()
    }

    /// Whether the caller stopped reading or the sink was closed.
    pub async fn is_closed(&self) -> bool {
        match self.shared.state.lock().await.tx.as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }

    /// Stop delivering events. The receiver ends once it has drained what was emitted, even
    /// while other handles to this sink are still alive.
    pub async fn close(&self) {
        self.shared.state.lock().await.tx = None;
    }

    /// Keep full sources for persistence; the stream only carries them without content.
    pub(crate) async fn attach_sources(&self, sources: &[Source]) {
        let mut state = self.shared.state.lock().await;
        state.record.sources.extend_from_slice(sources);
    }

    pub(crate) async fn terminal_kind(&self) -> Option<&'static str> {
        self.shared.state.lock().await.record.terminal
    }

    pub(crate) async fn record(&self) -> TurnRecord {
        self.shared.state.lock().await.record.clone()
    }
}

/// Reading end of a [`ResultSink`].
///
/// Yields events in emission order. Ends right after the terminal event, or once the sink is
/// closed (or dropped) and everything emitted before has been read.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<StreamEvent>,
    backlog: Arc<Backlog>,
    done: bool,
}

impl std::fmt::Debug for Backlog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backlog").finish_non_exhaustive()
    }
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        futures::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// The next event if one is ready.
    pub fn try_recv(&mut self) -> Option<StreamEvent> {
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        match self.poll_recv(&mut cx) {
            Poll::Ready(event) => event,
            Poll::Pending => None,
        }
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        if self.done {
            return Poll::Ready(None);
        }

        // The backlog only ever holds events newer than everything still queued.
        let event = match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => event,
            Poll::Ready(None) => match self.backlog.pop() {
                Some(event) => event,
                None => {
                    self.done = true;
                    return Poll::Ready(None);
                }
            },
            Poll::Pending => {
                self.backlog.waker.register(cx.waker());
                match self.backlog.pop() {
                    Some(event) => event,
                    None => return Poll::Pending,
                }
            }
        };

        if event.is_terminal() {
            self.done = true;
            self.rx.close();
        }
        Poll::Ready(Some(event))
    }
}

impl Stream for EventReceiver {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_recv(cx)
    }
}

/// Mutable state of one turn.
#[derive(Debug)]
pub struct ChatContext {
    pub conversation_id: ConversationId,
    pub user: ChatUser,
    pub input: ChatInput,
    pub result: ResultSink,
    /// Cancelled when the caller disconnects.
    pub cancel: CancellationToken,
    /// Set when the turn regenerates an existing assistant message.
    pub continuation: Option<Continuation>,
    /// Message the new human message is attached to.
    pub parent_id: Option<MessageId>,
    pub history: Vec<HistoryMessage>,
    pub system_messages: Vec<String>,
    /// Models available to the turn.
    pub llms: Vec<String>,
    /// Model chosen for the turn.
    pub llm: Option<String>,
    pub usage: Option<TokenUsage>,
    pub ui: Option<ChatUi>,
    /// Persist the partial answer when the provider stops early.
    pub keep_partial: bool,
    /// Free-form values shared between middleware.
    pub metadata: HashMap<String, Value>,
    pub(crate) state: TurnState,
    pub(crate) executed: bool,
    pub(crate) stopped_early: bool,
    pub(crate) failure: Option<ErrorClass>,
}

impl ChatContext {
    pub fn new(
        conversation_id: ConversationId,
        user: ChatUser,
        input: ChatInput,
        result: ResultSink,
    ) -> Self {
        Self {
            conversation_id,
            user,
            input,
            result,
            cancel: CancellationToken::new(),
            continuation: None,
            parent_id: None,
            history: Vec::new(),
            system_messages: Vec::new(),
            llms: Vec::new(),
            llm: None,
            usage: None,
            ui: None,
            keep_partial: false,
            metadata: HashMap::new(),
            state: TurnState::Pending,
            executed: false,
            stopped_early: false,
            failure: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = Some(continuation);
        self
    }

    pub fn with_llms(mut self, llms: Vec<String>) -> Self {
        self.llms = llms;
        self
    }

    pub fn with_keep_partial(mut self, keep: bool) -> Self {
        self.keep_partial = keep;
        self
    }

    /// Add tokens reported by a provider call.
    pub fn add_usage(&mut self, usage: &TokenUsage) {
        self.usage.get_or_insert_with(TokenUsage::default).add(usage);
    }

    /// Where the turn is in its lifecycle.
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Class of the failure the exception boundary caught, if any.
    pub fn failure(&self) -> Option<ErrorClass> {
        self.failure
    }

    /// Whether the provider signalled that it stopped before finishing.
    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }

    pub fn handle(&self) -> TurnHandle {
        TurnHandle {
            conversation_id: self.conversation_id,
            user: self.user.clone(),
            result: self.result.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// Detached view on the running turn.
#[derive(Debug, Clone)]
pub struct TurnHandle {
    pub conversation_id: ConversationId,
    pub user: ChatUser,
    pub result: ResultSink,
    pub cancel: CancellationToken,
}

tokio::task_local! {
    static CURRENT_TURN: TurnHandle;
}

/// The turn the calling task runs in, if any.
pub fn current() -> Option<TurnHandle> {
    CURRENT_TURN.try_with(|h| h.clone()).ok()
}

/// Run `fut` with `handle` as the current turn.
pub async fn scope<F: std::future::Future>(handle: TurnHandle, fut: F) -> F::Output {
    CURRENT_TURN.scope(handle, fut).await
}
