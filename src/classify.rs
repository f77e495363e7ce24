//! Error classification for the exception boundary.
//!
//! Every failure inside a turn is translated into exactly one [`ErrorClass`] and a localized,
//! user-safe message. Classifiers are fallible parsers tried in a fixed priority order, most
//! specific first; the first one that recognizes the error wins.
//!
//! | Priority | Class | Recognized by |
//! |----------|-------|---------------|
//! | 1 | `DomainChatError` | [`Error::Chat`], message shown verbatim |
//! | 2 | `ContentFiltered` | error code `content_filter` |
//! | 3 | `ContextTooLong` | error code `context_length_exceeded` |
//! | 4 | `InputTooLong` | error code `string_above_max_length` |
//! | 5 | `MalformedToolArgs` | tool-calling layer's schema mismatch message |
//! | 6 | `InternalError` | anything else |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_chat::classify::{classify, ErrorClass};
//! use ai_lib_chat::i18n::Texts;
//! use ai_lib_chat::Error;
//!
//! let err = Error::provider("400", serde_json::json!({"error": {"code": "context_length_exceeded"}}));
//! let c = classify(&err, &Texts::new());
//! assert_eq!(c.class, ErrorClass::ContextTooLong);
//! ```

use serde_json::Value;
use std::fmt;

use crate::i18n::{self, Localizer};
use crate::Error;

/// Message emitted by the tool-calling layer when the model produced arguments that do not
/// match the tool's schema.
pub const TOOL_SCHEMA_MISMATCH: &str = "Received tool input did not match expected schema";

/// Known failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Raised intentionally by pipeline logic; message is pre-approved for display.
    DomainChatError,
    /// The provider's content filter rejected the prompt or the completion.
    ContentFiltered,
    /// The conversation exceeds the model's context window.
    ContextTooLong,
    /// A single input string exceeds the provider's maximum length.
    InputTooLong,
    /// The model called a tool with arguments that failed schema validation.
    MalformedToolArgs,
    /// Catch-all.
    InternalError,
}

impl ErrorClass {
    /// Localization key of the user-facing message. `None` for domain errors, which carry
    /// their own message.
    #[inline]
    pub fn message_key(&self) -> Option<&'static str> {
        match self {
            Self::DomainChatError => None,
            Self::ContentFiltered => Some(i18n::ERROR_CONTENT_FILTER),
            Self::ContextTooLong => Some(i18n::ERROR_CONTEXT_LENGTH_EXCEEDED),
            Self::InputTooLong => Some(i18n::ERROR_STRING_ABOVE_MAX_LENGTH),
            Self::MalformedToolArgs => Some(i18n::ERROR_FAILED_TOOL_USE),
            Self::InternalError => Some(i18n::ERROR_INTERNAL),
        }
    }

    /// Stable snake_case name, used in logs.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DomainChatError => "domain_chat_error",
            Self::ContentFiltered => "content_filtered",
            Self::ContextTooLong => "context_too_long",
            Self::InputTooLong => "input_too_long",
            Self::MalformedToolArgs => "malformed_tool_args",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The recognized shape of an error, produced by a classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownErrorShape {
    Domain { message: String },
    Coded { class: ErrorClass, code: String },
    ToolArguments { message: String },
}

impl KnownErrorShape {
    pub fn class(&self) -> ErrorClass {
        match self {
            KnownErrorShape::Domain { .. } => ErrorClass::DomainChatError,
            KnownErrorShape::Coded { class, .. } => *class,
            KnownErrorShape::ToolArguments { .. } => ErrorClass::MalformedToolArgs,
        }
    }
}

/// A classifier: a fallible parse of an otherwise opaque error.
pub type Classifier = fn(&Error) -> Option<KnownErrorShape>;

/// Classifiers in priority order.
pub const CLASSIFIERS: &[Classifier] = &[
    parse_domain_error,
    parse_content_filter,
    parse_context_length_exceeded,
    parse_string_above_max_length,
    parse_malformed_tool_args,
];

/// Result of classifying an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub class: ErrorClass,
    /// Localized, user-safe message.
    pub message: String,
}

/// Find the first matching shape, if any classifier recognizes the error.
pub fn recognize(err: &Error) -> Option<KnownErrorShape> {
    CLASSIFIERS.iter().find_map(|classifier| classifier(err))
}

/// Classify an error and resolve its user-facing message.
pub fn classify(err: &Error, localizer: &dyn Localizer) -> Classification {
    match recognize(err) {
        Some(KnownErrorShape::Domain { message }) => Classification {
            class: ErrorClass::DomainChatError,
            message,
        },
        Some(shape) => {
            let class = shape.class();
            Classification {
                class,
                message: localize(class, localizer),
            }
        }
        None => Classification {
            class: ErrorClass::InternalError,
            message: localize(ErrorClass::InternalError, localizer),
        },
    }
}

fn localize(class: ErrorClass, localizer: &dyn Localizer) -> String {
    localizer.t(class.message_key().unwrap_or(i18n::ERROR_INTERNAL))
}

pub fn parse_domain_error(err: &Error) -> Option<KnownErrorShape> {
    match err {
        Error::Chat { message, .. } => Some(KnownErrorShape::Domain {
            message: message.clone(),
        }),
        _ => None,
    }
}

pub fn parse_content_filter(err: &Error) -> Option<KnownErrorShape> {
    parse_coded(err, "content_filter", ErrorClass::ContentFiltered)
}

pub fn parse_context_length_exceeded(err: &Error) -> Option<KnownErrorShape> {
    parse_coded(err, "context_length_exceeded", ErrorClass::ContextTooLong)
}

pub fn parse_string_above_max_length(err: &Error) -> Option<KnownErrorShape> {
    parse_coded(err, "string_above_max_length", ErrorClass::InputTooLong)
}

pub fn parse_malformed_tool_args(err: &Error) -> Option<KnownErrorShape> {
    let message = match err {
        Error::Tool { message, .. } | Error::Provider { message, .. } => message,
        _ => return None,
    };
    if message.contains(TOOL_SCHEMA_MISMATCH) {
        Some(KnownErrorShape::ToolArguments {
            message: message.clone(),
        })
    } else {
        None
    }
}

fn parse_coded(err: &Error, code: &str, class: ErrorClass) -> Option<KnownErrorShape> {
    let payload = err.payload()?;
    error_codes(payload)
        .into_iter()
        .any(|c| c == code)
        .then(|| KnownErrorShape::Coded {
            class,
            code: code.to_string(),
        })
}

/// Error codes found at the places providers put them: `code`, `error.code`,
/// `error.innererror.code` and `innererror.code`.
fn error_codes(payload: &Value) -> Vec<&str> {
    let paths: [&[&str]; 4] = [
        &["code"],
        &["error", "code"],
        &["error", "innererror", "code"],
        &["innererror", "code"],
    ];
    paths
        .iter()
        .filter_map(|path| {
            path.iter()
                .try_fold(payload, |v, key| v.get(*key))
                .and_then(Value::as_str)
        })
        .collect()
}
