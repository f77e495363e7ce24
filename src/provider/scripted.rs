//! A provider that replays scripted steps.
//!
//! Each call to [`ChatProvider::stream`] consumes the next script; the last script is reused
//! once the queue runs dry. Scripts are plain data and deserialize from YAML, which is how
//! `chat-replay` feeds them.

use async_trait::async_trait;
use futures::stream;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ChatProvider, ProviderEvent, ProviderRequest};
use crate::context;
use crate::types::events::StreamEvent;
use crate::{BoxStream, Error, Result};

/// One step of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Yield a provider event.
    Emit { event: ProviderEvent },
    /// Fail with a provider error carrying `payload` as its raw body.
    Fail {
        message: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    /// Fail with a tool error.
    FailTool { tool: String, message: String },
    /// Fail with a domain error whose message is shown verbatim.
    FailChat { message: String },
    Sleep { ms: u64 },
    /// Write a `debug` event to the running turn.
    Debug { content: String },
    /// Never yield again.
    Hang,
    /// Wait for cancellation, then report `StoppedEarly`.
    StopOnCancel,
}

impl ScriptStep {
    pub fn chunk(text: impl Into<String>) -> Self {
        ScriptStep::Emit {
            event: ProviderEvent::chunk(text),
        }
    }

    pub fn emit(event: ProviderEvent) -> Self {
        ScriptStep::Emit { event }
    }
}

/// Deterministic [`ChatProvider`] for tests and tooling.
///
/// One-shot completions do not consume scripts; they answer with the text set through
/// [`ScriptedProvider::with_completion`] and fail when none was set.
#[derive(Clone)]
pub struct ScriptedProvider {
    scripts: Arc<Mutex<VecDeque<Vec<ScriptStep>>>>,
    llms: Vec<String>,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
    completion: Option<String>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self::with_scripts(vec![script])
    }

    /// One script per call, in order.
    pub fn with_scripts(scripts: Vec<Vec<ScriptStep>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            llms: vec!["scripted".to_string()],
            requests: Arc::new(Mutex::new(Vec::new())),
            completion: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer every one-shot completion with `text`.
    pub fn with_completion(mut self, text: impl Into<String>) -> Self {
        self.completion = Some(text.into());
        self
    }

    /// Prompts of the one-shot completions received so far.
    pub fn completion_prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn with_llms(mut self, llms: Vec<String>) -> Self {
        self.llms = llms;
        self
    }

    /// Queue another script.
    pub fn push_script(&self, script: Vec<ScriptStep>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(script);
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_script(&self) -> Vec<ScriptStep> {
        let Ok(mut scripts) = self.scripts.lock() else {
            return Vec::new();
        };
        if scripts.len() > 1 {
            scripts.pop_front().unwrap_or_default()
        } else {
            scripts.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn llms(&self) -> Vec<String> {
        self.llms.clone()
    }

    async fn stream(&self, request: ProviderRequest) -> Result<BoxStream<'static, ProviderEvent>> {
        let cancel = request.cancel.clone();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let steps: VecDeque<ScriptStep> = self.next_script().into();

        let events = stream::unfold((steps, cancel), |(mut steps, cancel)| async move {
            loop {
                let step = steps.pop_front()?;
                let failure = match step {
                    ScriptStep::Emit { event } => return Some((Ok(event), (steps, cancel))),
                    ScriptStep::Fail { message, payload } => Error::provider(message, payload),
                    ScriptStep::FailTool { tool, message } => Error::tool(tool, message),
                    ScriptStep::FailChat { message } => Error::chat(message),
                    ScriptStep::Sleep { ms } => {
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        continue;
                    }
                    ScriptStep::Debug { content } => {
                        if let Some(turn) = context::current() {
                            if let Err(err) = turn.result.emit(StreamEvent::Debug { content }).await {
                                tracing::debug!(error = %err, "debug event rejected");
                            }
                        }
                        continue;
                    }
                    ScriptStep::Hang => {
                        futures::future::pending::<()>().await;
                        continue;
                    }
                    ScriptStep::StopOnCancel => {
                        cancel.cancelled().await;
                        return Some((Ok(ProviderEvent::StoppedEarly), (steps, cancel)));
                    }
                };
                steps.clear();
                return Some((Err(failure), (steps, cancel)));
            }
        });

        Ok(Box::pin(events))
    }

    async fn complete(&self, request: ProviderRequest) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.input.content);
        }
        self.completion
            .clone()
            .ok_or_else(|| Error::provider("no completion scripted", serde_json::Value::Null))
    }
}
