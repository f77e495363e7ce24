//! # ai-lib-chat
//!
//! 对话轮次运行时：有序中间件管道、类型化事件流与工具结果归一化。
//!
//! Chat turn runtime - an ordered middleware pipeline that turns one user message into a
//! single, ordered stream of typed events, with provider calls, tool-result normalization
//! and persistence behind collaborator traits.
//!
//! ## Overview
//!
//! A turn flows through a chain of [`pipeline::ChatMiddleware`]s sorted by `order`. Each
//! middleware may act before and after the rest of the chain, or short-circuit it. The chain
//! ends in the [`provider::ExecuteTerminal`], which drives a [`provider::ChatProvider`] and
//! forwards what it reports. An exception boundary at the outermost position turns any
//! failure into exactly one `error` event with a user-safe message.
//!
//! ## Core Philosophy
//!
//! - **One ordered stream**: `chunk`/`tool_start`/`tool_end`/`sources` then `saved` then
//!   exactly one `completed` or `error`
//! - **Write-only sink**: middleware push events and never read them back
//! - **Persist once**: a successful turn stores the answer exactly once; failures store nothing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use ai_lib_chat::{ChatInput, ChatUser, StartTurn, TurnOrchestrator};
//! use ai_lib_chat::provider::{ScriptStep, ScriptedProvider};
//! use ai_lib_chat::store::InMemoryMessageStore;
//!
//! #[tokio::main]
//! async fn main() -> ai_lib_chat::Result<()> {
//!     let provider = Arc::new(ScriptedProvider::new(vec![ScriptStep::chunk("Hello")]));
//!     let orchestrator =
//!         TurnOrchestrator::builder(provider, Arc::new(InMemoryMessageStore::new())).build()?;
//!
//!     let request = StartTurn::new(1, ChatUser::new("alice"), ChatInput::human("Hi"));
//!     let mut events = orchestrator.start_turn(request).await?;
//!     while let Some(event) = events.next().await {
//!         println!("{}", event.kind());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`orchestrator`] | Turn start / continuation, per-conversation gating, persistence |
//! | [`pipeline`] | Middleware chain, dispatcher and exception boundary |
//! | [`middleware`] | Built-in middleware (history, usage, model choice, prompt, UI) |
//! | [`provider`] | Provider capability and the terminal step driving it |
//! | [`context`] | Per-turn context, result sink and the current-turn handle |
//! | [`protocol`] | Event ordering rules and SSE framing |
//! | [`normalize`] | Tool result normalization and citation extraction |
//! | [`classify`] | Error classification into user-facing messages |
//! | [`store`] | Message and usage persistence traits |
//! | [`types`] | Core type definitions (events, messages, sources, tools) |
//! | [`ui`] | Client-side confirm / input requests |
//! | [`i18n`] | User-facing texts |
//! | [`config`] | Runtime configuration |

pub mod classify;
pub mod config;
pub mod context;
pub mod i18n;
pub mod middleware;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod protocol;
pub mod provider;
pub mod store;
pub mod types;
pub mod ui;

// Re-export main types for convenience
pub use config::{BusyPolicy, ChatConfig};
pub use context::{ChatContext, ChatUser, EventReceiver, ResultSink};
pub use orchestrator::{ContinueTurn, StartTurn, TurnOrchestrator, TurnStream};
pub use pipeline::{ChatMiddleware, ChatTerminal, Next, Pipeline, TurnState};
pub use provider::{ChatProvider, ProviderEvent};
pub use types::{
    events::StreamEvent,
    message::{ChatInput, MessageRole},
    source::Source,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
