//! Localization collaborator.
//!
//! The runtime only needs `t(key) -> String`. [`Texts`] provides the built-in English strings
//! and accepts overrides from configuration.

use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const ERROR_INTERNAL: &str = "texts.chat.errorInternal";
pub const ERROR_CONTENT_FILTER: &str = "texts.chat.errorContentFilter";
pub const ERROR_CONTEXT_LENGTH_EXCEEDED: &str = "texts.chat.errorContextLengthExceeded";
pub const ERROR_STRING_ABOVE_MAX_LENGTH: &str = "texts.chat.errorStringAboveMaxLength";
pub const ERROR_FAILED_TOOL_USE: &str = "texts.chat.errorFailedToolUse";
pub const ERROR_MISSING_LLM: &str = "texts.chat.errorMissingLLM";
pub const ERROR_TOKEN_LIMIT_USER: &str = "texts.chat.errorTokenLimitUser";
pub const ERROR_TOKEN_LIMIT_GROUP: &str = "texts.chat.errorTokenLimitGroup";
pub const NO_SUMMARY: &str = "texts.chat.noSummary";

static DEFAULT_TEXTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            ERROR_INTERNAL,
            "An internal error occurred. Please try again later.",
        ),
        (
            ERROR_CONTENT_FILTER,
            "The request was blocked by the content filter of the language model.",
        ),
        (
            ERROR_CONTEXT_LENGTH_EXCEEDED,
            "The conversation is too long for the language model. Please start a new conversation.",
        ),
        (
            ERROR_STRING_ABOVE_MAX_LENGTH,
            "The message is too long. Please shorten your input.",
        ),
        (
            ERROR_FAILED_TOOL_USE,
            "The language model failed to call a tool with valid arguments.",
        ),
        (ERROR_MISSING_LLM, "No language model is configured."),
        (
            ERROR_TOKEN_LIMIT_USER,
            "Your monthly token limit has been exceeded.",
        ),
        (
            ERROR_TOKEN_LIMIT_GROUP,
            "The monthly token limit of your user group has been exceeded.",
        ),
        (NO_SUMMARY, "New conversation"),
    ])
});

pub trait Localizer: Send + Sync {
    /// Resolve a text key. Unknown keys resolve to the key itself.
    fn t(&self, key: &str) -> String;
}

/// Built-in texts with optional overrides.
#[derive(Debug, Clone, Default)]
pub struct Texts {
    overrides: HashMap<String, String>,
}

impl Texts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }

    pub fn set(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), text.into());
        self
    }
}

impl Localizer for Texts {
    fn t(&self, key: &str) -> String {
        if let Some(text) = self.overrides.get(key) {
            return text.clone();
        }
        DEFAULT_TEXTS
            .get(key)
            .map(|s| s.to_string())
            .unwrap_or_else(|| key.to_string())
    }
}
