//! Terminal step: call the provider and translate its events into stream events.

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{ChatProvider, ProviderEvent, ProviderRequest};
use crate::config::ChatConfig;
use crate::context::ChatContext;
use crate::normalize::normalize_tool_response;
use crate::pipeline::ChatTerminal;
use crate::types::events::StreamEvent;
use crate::types::source::Source;
use crate::types::tool::{ToolCallResult, ToolInfo};
use crate::{BoxStream, Error, Result};

enum Step {
    Item(Option<Result<ProviderEvent>>),
    Cancelled,
    TimedOut,
}

/// Drives one provider call per turn.
///
/// - the whole call, including tool calls, is bounded by the provider timeout
/// - caller cancellation aborts the call unless the provider immediately reports that it
///   stopped early
/// - `sources` of a tool follow its `tool_end`
/// - a provider stream that ends with a tool still running fails the turn; a provider that
///   stopped early has its running tools closed without output
/// - a provider that does not stream gets its final answer emitted as a single chunk
pub struct ExecuteTerminal {
    provider: Arc<dyn ChatProvider>,
    timeout: Duration,
    tool_summary_chars: usize,
    log_rag_chunks: bool,
}

impl ExecuteTerminal {
    pub fn new(provider: Arc<dyn ChatProvider>, config: &ChatConfig) -> Self {
        Self {
            provider,
            timeout: config.provider_timeout(),
            tool_summary_chars: config.tool_summary_chars,
            log_rag_chunks: config.log_rag_chunks,
        }
    }

    async fn finish_tool(
        &self,
        ctx: &mut ChatContext,
        tools: &mut HashMap<String, String>,
        id: String,
        result: ToolCallResult,
    ) -> Result<()> {
        let name = tools.remove(&id).unwrap_or_else(|| id.clone());
        let normalized = normalize_tool_response(&result);

        ctx.result
            .emit(StreamEvent::ToolEnd {
                tool: ToolInfo {
                    name,
                    invocation_id: id,
                },
                output: Some(normalized.summary(self.tool_summary_chars)),
            })
            .await?;

        if normalized.sources.is_empty() {
            return Ok(());
        }

        ctx.result.attach_sources(&normalized.sources).await;
        ctx.result
            .emit(StreamEvent::Sources {
                content: normalized.sources.iter().map(Source::without_content).collect(),
            })
            .await?;

        if self.log_rag_chunks {
            tracing::info!(
                conversation_id = ctx.conversation_id,
                chunks = normalized.sources.len(),
                "retrieved chunks"
            );
            ctx.result
                .emit(StreamEvent::Logging {
                    content: logging_chunks(&normalized.sources),
                })
                .await?;
        }
        Ok(())
    }

    /// Collect what the provider has ready after cancellation.
    async fn on_cancel(
        &self,
        ctx: &mut ChatContext,
        stream: &mut BoxStream<'static, ProviderEvent>,
        tools: &mut HashMap<String, String>,
    ) -> Result<()> {
        while let Some(Some(item)) = stream.next().now_or_never() {
            match item {
                Ok(ProviderEvent::Chunk { text }) if !text.is_empty() => {
                    ctx.result.emit(StreamEvent::chunk(text)).await?;
                }
                Ok(ProviderEvent::Usage { usage }) => ctx.add_usage(&usage),
                Ok(ProviderEvent::StoppedEarly) => {
                    ctx.stopped_early = true;
                    return close_interrupted_tools(ctx, tools).await;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        Err(Error::Cancelled)
    }
}

#[async_trait]
impl ChatTerminal for ExecuteTerminal {
    async fn execute(&self, ctx: &mut ChatContext) -> Result<()> {
        ctx.executed = true;
        if ctx.llm.is_none() {
            ctx.llm = ctx.llms.first().cloned();
        }

        let deadline = Instant::now() + self.timeout;
        let cancel = ctx.cancel.clone();
        let request = ProviderRequest::from_context(ctx);

        let mut stream = match tokio::time::timeout_at(deadline, self.provider.stream(request)).await
        {
            Ok(stream) => stream?,
            Err(_) => return Err(Error::Timeout(self.timeout)),
        };

        let mut tools: HashMap<String, String> = HashMap::new();
        let mut streamed = false;
        let mut last_result: Option<String> = None;

        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                r = tokio::time::timeout_at(deadline, stream.next()) => match r {
                    Ok(item) => Step::Item(item),
                    Err(_) => Step::TimedOut,
                },
            };

            let event = match step {
                Step::Item(Some(item)) => item?,
                Step::Item(None) => break,
                Step::Cancelled => return self.on_cancel(ctx, &mut stream, &mut tools).await,
                Step::TimedOut => return Err(Error::Timeout(self.timeout)),
            };

            match event {
                ProviderEvent::Chunk { text } => {
                    if text.is_empty() {
                        continue;
                    }
                    streamed = true;
                    ctx.result.emit(StreamEvent::chunk(text)).await?;
                }
                ProviderEvent::ToolStart { id, name, input } => {
                    tools.insert(id.clone(), name.clone());
                    ctx.result
                        .emit(StreamEvent::ToolStart {
                            tool: ToolInfo {
                                name,
                                invocation_id: id,
                            },
                            input,
                        })
                        .await?;
                }
                ProviderEvent::ToolEnd { id, result } => {
                    self.finish_tool(ctx, &mut tools, id, result).await?;
                }
                ProviderEvent::Usage { usage } => ctx.add_usage(&usage),
                ProviderEvent::Final { content } => {
                    if !content.is_empty() {
                        last_result = Some(content);
                    }
                }
                ProviderEvent::StoppedEarly => {
                    ctx.stopped_early = true;
                    close_interrupted_tools(ctx, &mut tools).await?;
                    break;
                }
            }
        }

        if let Some(name) = tools.values().min() {
            return Err(Error::Protocol(format!(
                "provider finished while tool '{}' was still running",
                name
            )));
        }

        if !streamed {
            if let Some(content) = last_result {
                ctx.result.emit(StreamEvent::chunk(content)).await?;
            }
        }
        Ok(())
    }
}

/// End tools the provider abandoned when it stopped early.
async fn close_interrupted_tools(
    ctx: &mut ChatContext,
    tools: &mut HashMap<String, String>,
) -> Result<()> {
    let mut open: Vec<_> = tools.drain().collect();
    open.sort();
    for (id, name) in open {
        ctx.result
            .emit(StreamEvent::ToolEnd {
                tool: ToolInfo {
                    name,
                    invocation_id: id,
                },
                output: None,
            })
            .await?;
    }
    Ok(())
}

fn logging_chunks(sources: &[Source]) -> String {
    let mut out = format!(
        "**LOGGING**\n\n***Number of chunks*** {}\n\n",
        sources.len()
    );
    for (i, source) in sources.iter().enumerate() {
        out.push_str(&format!("***Chunk nr. {}:***\n\n", i + 1));
        out.push_str(source.chunk.content.as_deref().unwrap_or_default());
        out.push_str("\n\n");
    }
    out
}
