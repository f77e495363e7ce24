//! Runtime configuration.
//!
//! Loaded from YAML and/or environment variables:
//! - `AI_CHAT_EVENT_BUFFER` (default 256)
//! - `AI_CHAT_EMIT_TIMEOUT_MS` (default 5000)
//! - `AI_CHAT_PROVIDER_TIMEOUT_SECS` (default 300)
//! - `AI_CHAT_BUSY_POLICY` (`reject` | `queue`, default `reject`)
//! - `AI_CHAT_LOG_RAG_CHUNKS` (`true` | `false`, default `false`)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::{Error, ErrorContext, Result};

/// What happens when a turn starts for a conversation that already has one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Fail fast with [`Error::ConversationBusy`].
    #[default]
    Reject,
    /// Wait until the running turn has finished.
    Queue,
}

impl std::str::FromStr for BusyPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(BusyPolicy::Reject),
            "queue" => Ok(BusyPolicy::Queue),
            other => Err(Error::configuration_with_context(
                format!("unknown busy policy '{}'", other),
                ErrorContext::new()
                    .with_field_path("busy_policy")
                    .with_details("expected 'reject' or 'queue'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Capacity of the per-turn event queue.
    pub event_buffer: usize,
    /// Longest time a producer waits on a full event queue before parking the event behind it.
    pub emit_timeout_ms: u64,
    /// Upper bound for one provider call (including its tool calls).
    pub provider_timeout_secs: u64,
    pub busy_policy: BusyPolicy,
    /// Emit a `logging` event listing retrieved chunks after each tool call.
    pub log_rag_chunks: bool,
    /// System prompt used when no middleware supplied one.
    pub default_system_prompt: String,
    /// How long a UI request waits for an answer before resolving to its default.
    pub ui_timeout_secs: u64,
    /// Maximum characters of tool output echoed in `tool_end`.
    pub tool_summary_chars: usize,
    /// Number of user messages (including the new one) a conversation name is generated from.
    pub summary_history_length: usize,
    /// Prompt for conversation names; `{content}` is replaced by the user messages.
    pub summary_prompt: String,
    /// Localization overrides, keyed by text key.
    pub texts: HashMap<String, String>,
}

pub const DEFAULT_SUMMARY_PROMPT: &str = "Summarize the following content ALWAYS in the same \
language as the content as short as possible in not more than 3 words. Write it as if it is \
Headline of an Article. Don't use new lines: <CONTENT>{content}</CONTENT>";

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            event_buffer: 256,
            emit_timeout_ms: 5_000,
            provider_timeout_secs: 300,
            busy_policy: BusyPolicy::Reject,
            log_rag_chunks: false,
            default_system_prompt: "You are a helpful assistant.".to_string(),
            ui_timeout_secs: 300,
            tool_summary_chars: 500,
            summary_history_length: 5,
            summary_prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
            texts: HashMap::new(),
        }
    }
}

impl ChatConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let cfg: ChatConfig = serde_yaml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse::<usize>("AI_CHAT_EVENT_BUFFER")? {
            self.event_buffer = v;
        }
        if let Some(v) = env_parse::<u64>("AI_CHAT_EMIT_TIMEOUT_MS")? {
            self.emit_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u64>("AI_CHAT_PROVIDER_TIMEOUT_SECS")? {
            self.provider_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("AI_CHAT_BUSY_POLICY") {
            self.busy_policy = v.parse()?;
        }
        if let Some(v) = env_parse::<bool>("AI_CHAT_LOG_RAG_CHUNKS")? {
            self.log_rag_chunks = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(Error::configuration_with_context(
                "event buffer must hold at least one event",
                ErrorContext::new()
                    .with_field_path("event_buffer")
                    .with_source("chat_config"),
            ));
        }
        if self.summary_history_length == 0 {
            return Err(Error::configuration_with_context(
                "summary history must include the new message",
                ErrorContext::new()
                    .with_field_path("summary_history_length")
                    .with_source("chat_config"),
            ));
        }
        if self.provider_timeout_secs == 0 {
            return Err(Error::configuration_with_context(
                "provider timeout must be positive",
                ErrorContext::new()
                    .with_field_path("provider_timeout_secs")
                    .with_source("chat_config"),
            ));
        }
        Ok(())
    }

    pub fn emit_timeout(&self) -> Duration {
        Duration::from_millis(self.emit_timeout_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn ui_timeout(&self) -> Duration {
        Duration::from_secs(self.ui_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            Error::configuration_with_context(
                format!("invalid value '{}'", raw),
                ErrorContext::new().with_field_path(key).with_source("env"),
            )
        }),
        Err(_) => Ok(None),
    }
}
