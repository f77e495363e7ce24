use serde_json::Value;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "config.event_buffer", "input.content")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "pipeline_builder", "turn_orchestrator")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the chat runtime.
///
/// Errors raised anywhere inside a turn travel up to the exception boundary, which is the
/// only place they are translated into a user-facing message (see [`crate::classify`]).
#[derive(Debug, Error)]
pub enum Error {
    /// Raised on purpose by pipeline logic. The message is already safe to show to users.
    #[error("{message}")]
    Chat {
        message: String,
        payload: Option<Value>,
    },

    /// Failure reported by an LLM provider. `payload` is the provider's raw error body.
    #[error("Provider error: {message}")]
    Provider { message: String, payload: Value },

    /// Failure reported by a tool invocation or the tool-calling layer.
    #[error("Tool '{tool}' failed: {message}")]
    Tool {
        tool: String,
        message: String,
        payload: Option<Value>,
    },

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Turn was cancelled")]
    Cancelled,

    #[error("Conversation {0} already has a turn in flight")]
    ConversationBusy(i64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Event protocol violation: {0}")]
    Protocol(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a domain chat error whose message is shown to the user verbatim.
    pub fn chat(message: impl Into<String>) -> Self {
        Error::Chat {
            message: message.into(),
            payload: None,
        }
    }

    /// Create a provider error from a message and the provider's raw error body.
    pub fn provider(message: impl Into<String>, payload: Value) -> Self {
        Error::Provider {
            message: message.into(),
            payload,
        }
    }

    /// Create a tool error.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
            payload: None,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Raw structured payload attached to the error, if any.
    ///
    /// Classifiers inspect this value without assuming which variant produced it.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Error::Chat { payload, .. } | Error::Tool { payload, .. } => payload.as_ref(),
            Error::Provider { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Human-readable message without the variant prefix.
    pub fn raw_message(&self) -> String {
        match self {
            Error::Chat { message, .. }
            | Error::Provider { message, .. }
            | Error::Tool { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
