//! 中间件链：一次对话轮次的有序处理管线。
//!
//! # Middleware Chain
//!
//! A turn is processed by an ordered chain of middleware units wrapped around a terminal
//! (normally the provider call). The chain is built once: middleware are sorted ascending by
//! [`ChatMiddleware::order`] (ties keep registration order) into a flat list, and a turn is
//! driven by an index-based dispatcher, [`Next`].
//!
//! ```text
//!  ExceptionBoundary(-1000) → UI → usage check → history(-100) → … → terminal
//!          ▲                                                           │
//!          └──────────── errors and results travel back out ───────────┘
//! ```
//!
//! ## Semantics
//!
//! | Middleware does | Effect |
//! |-----------------|--------|
//! | `next.run(ctx)` | runs the rest of the chain with the same context |
//! | returns without calling `next` | ends the turn early, silently successful |
//! | returns `Err` | error travels outwards to the exception boundary |
//!
//! The [`ExceptionBoundary`] is inserted by [`PipelineBuilder::build`] at the reserved order
//! `-1000`; no other middleware may run outside it, so every failure of an inner middleware or
//! of the terminal is classified and emitted as exactly one `error` event.
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_chat::context::{ChatContext, ChatUser, ResultSink};
//! use ai_lib_chat::pipeline::{ChatMiddleware, Next, Pipeline, TurnState};
//! use ai_lib_chat::types::ChatInput;
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl ChatMiddleware for Shout {
//!     async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> ai_lib_chat::Result<()> {
//!         ctx.input.content = ctx.input.content.to_uppercase();
//!         next.run(ctx).await
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let pipeline = Pipeline::builder().with_middleware(Arc::new(Shout)).build()?;
//! let (sink, _rx) = ResultSink::channel(16, Duration::from_secs(1));
//! let mut ctx = ChatContext::new(1, ChatUser::new("u1"), ChatInput::human("hi"), sink);
//!
//! assert_eq!(pipeline.run(&mut ctx).await, TurnState::Completed);
//! assert_eq!(ctx.input.content, "HI");
//! # Ok::<(), ai_lib_chat::Error>(())
//! # }).unwrap();
//! ```

pub mod boundary;


use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::context::ChatContext;
use crate::i18n::{Localizer, Texts};
use crate::{Error, ErrorContext, Result};

pub use boundary::{ExceptionBoundary, BOUNDARY_ORDER};

/// A unit of the processing chain.
#[async_trait]
pub trait ChatMiddleware: Send + Sync {
    /// Position in the chain; lower runs further outside.
    fn order(&self) -> i32 {
        0
    }

    fn name(&self) -> &str {
        "unnamed"
    }

    async fn invoke(&self, ctx: &mut ChatContext, next: Next<'_>) -> Result<()>;
}

/// Innermost step of the chain, invoked by the last middleware's `next`.
#[async_trait]
pub trait ChatTerminal: Send + Sync {
    async fn execute(&self, ctx: &mut ChatContext) -> Result<()>;
}

/// Terminal that does nothing; used when a pipeline is built without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTerminal;

#[async_trait]
impl ChatTerminal for NoopTerminal {
    async fn execute(&self, _ctx: &mut ChatContext) -> Result<()> {
        Ok(())
    }
}

/// The remainder of the chain from one position on.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    pipeline: &'a Pipeline,
    index: usize,
}

impl<'a> Next<'a> {
    /// Invoke the rest of the chain.
    pub async fn run(self, ctx: &mut ChatContext) -> Result<()> {
        match self.pipeline.middlewares.get(self.index) {
            Some(middleware) => {
                let next = Next {
                    pipeline: self.pipeline,
                    index: self.index + 1,
                };
                middleware.invoke(ctx, next).await
            }
            None => self.pipeline.terminal.execute(ctx).await,
        }
    }

    /// Number of middleware still to run before the terminal.
    pub fn remaining(&self) -> usize {
        self.pipeline.middlewares.len().saturating_sub(self.index)
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").field("index", &self.index).finish()
    }
}

/// Lifecycle of one turn, observable through [`ChatContext::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Created, not yet handed to a pipeline.
    Pending,
    Running,
    Completed,
    Failed,
}

impl TurnState {
    pub fn is_finished(&self) -> bool {
        matches!(self, TurnState::Completed | TurnState::Failed)
    }
}

/// A sorted, immutable middleware chain.
pub struct Pipeline {
    middlewares: Vec<Arc<dyn ChatMiddleware>>,
    terminal: Arc<dyn ChatTerminal>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("middlewares", &self.names())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Middleware names in invocation order.
    pub fn names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// A copy of this pipeline with per-turn middleware merged in.
    pub fn with_extensions(&self, extensions: Vec<Arc<dyn ChatMiddleware>>) -> Result<Pipeline> {
        if extensions.is_empty() {
            return Ok(Pipeline {
                middlewares: self.middlewares.clone(),
                terminal: self.terminal.clone(),
            });
        }
        for ext in &extensions {
            check_order(ext.as_ref())?;
        }
        let mut middlewares = self.middlewares.clone();
        middlewares.extend(extensions);
        middlewares.sort_by_key(|m| m.order());
        Ok(Pipeline {
            middlewares,
            terminal: self.terminal.clone(),
        })
    }

    /// Drive one turn through the chain. The returned state is also left in the context.
    pub async fn run(&self, ctx: &mut ChatContext) -> TurnState {
        ctx.state = TurnState::Running;
        tracing::debug!(conversation_id = ctx.conversation_id, "turn running");

        let outcome = Next {
            pipeline: self,
            index: 0,
        }
        .run(ctx)
        .await;

        if let Err(err) = outcome {
            // Only reachable when the boundary itself could not emit.
            tracing::error!(
                conversation_id = ctx.conversation_id,
                error = %err,
                "error escaped the exception boundary"
            );
            ctx.state = TurnState::Failed;
            return ctx.state;
        }

        let state = if ctx.failure.is_some() || ctx.result.terminal_kind().await == Some("error") {
            TurnState::Failed
        } else {
            TurnState::Completed
        };
        tracing::debug!(conversation_id = ctx.conversation_id, ?state, "turn finished");
        ctx.state = state;
        state
    }
}

fn check_order(middleware: &dyn ChatMiddleware) -> Result<()> {
    if middleware.order() <= BOUNDARY_ORDER {
        return Err(Error::configuration_with_context(
            format!(
                "middleware '{}' uses order {} which is reserved for the exception boundary",
                middleware.name(),
                middleware.order()
            ),
            ErrorContext::new()
                .with_field_path("order")
                .with_details(format!("order must be greater than {}", BOUNDARY_ORDER))
                .with_source("pipeline_builder"),
        ));
    }
    Ok(())
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    middlewares: Vec<Arc<dyn ChatMiddleware>>,
    terminal: Option<Arc<dyn ChatTerminal>>,
    localizer: Option<Arc<dyn Localizer>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
            terminal: None,
            localizer: None,
        }
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn ChatMiddleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_middlewares(
        mut self,
        middlewares: impl IntoIterator<Item = Arc<dyn ChatMiddleware>>,
    ) -> Self {
        self.middlewares.extend(middlewares);
        self
    }

    pub fn with_terminal(mut self, terminal: Arc<dyn ChatTerminal>) -> Self {
        self.terminal = Some(terminal);
        self
    }

    /// Texts used by the exception boundary. Defaults to [`Texts::new`].
    pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self {
        self.localizer = Some(localizer);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        for middleware in &self.middlewares {
            check_order(middleware.as_ref())?;
        }

        let localizer = self
            .localizer
            .unwrap_or_else(|| Arc::new(Texts::new()) as Arc<dyn Localizer>);

        let mut middlewares: Vec<Arc<dyn ChatMiddleware>> =
            Vec::with_capacity(self.middlewares.len() + 1);
        middlewares.push(Arc::new(ExceptionBoundary::new(localizer)));
        middlewares.extend(self.middlewares);
        middlewares.sort_by_key(|m| m.order());

        Ok(Pipeline {
            middlewares,
            terminal: self
                .terminal
                .unwrap_or_else(|| Arc::new(NoopTerminal) as Arc<dyn ChatTerminal>),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
