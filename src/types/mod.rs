//! Core data types of the chat runtime.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`StreamEvent`] | One frame of the ordered event stream pushed to the caller |
//! | [`Source`] | Normalized citation record |
//! | [`ChatInput`] | The input message of a turn |
//! | [`StoredMessage`] | A persisted conversation message |
//! | [`ToolCallResult`] | Raw tool result (text blocks + embedded resources) |
//!
//! ## Submodules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`events`] | Stream event variants |
//! | [`message`] | Messages, usage and turn metadata |
//! | [`source`] | Citations and page normalization |
//! | [`tool`] | Tool result blocks and tool identity |

pub mod events;
pub mod message;
pub mod source;
pub mod tool;

pub use events::{StreamEvent, UiRequest, UiRequestType};
pub use message::{
    Attachment, ChatInput, ChatMetadata, ContentPart, ConversationId, HistoryMessage,
    MessageId, MessageRole, NewMessage, StoredMessage, TokenUsage, UserId,
};
pub use source::{normalize_pages, Chunk, Document, Source, SourceBuilder};
pub use tool::{EmbeddedResource, ToolBlock, ToolCallResult, ToolInfo};
