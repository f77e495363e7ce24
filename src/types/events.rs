//! Stream events pushed to the caller, one JSON object per frame.

use serde::{Deserialize, Serialize};

use super::message::{ChatMetadata, ContentPart, MessageId, MessageRole};
use super::source::Source;
use super::tool::ToolInfo;

/// Closed set of events, discriminated on the wire by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental content fragment.
    Chunk { content: Vec<ContentPart> },

    ToolStart {
        tool: ToolInfo,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        input: serde_json::Value,
    },

    ToolEnd {
        tool: ToolInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },

    Sources { content: Vec<Source> },

    #[serde(rename_all = "camelCase")]
    Saved {
        message_id: MessageId,
        message_type: MessageRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<MessageId>,
        saved_at: u64,
    },

    Completed { metadata: ChatMetadata },

    /// Terminal failure. `message` is always localized and safe to display.
    Error { message: String },

    Debug { content: String },

    Logging { content: String },

    Ui { request: UiRequest },

    Summary { content: String },
}

impl StreamEvent {
    pub fn chunk(text: impl Into<String>) -> Self {
        StreamEvent::Chunk {
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// Wire discriminator of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::ToolStart { .. } => "tool_start",
            StreamEvent::ToolEnd { .. } => "tool_end",
            StreamEvent::Sources { .. } => "sources",
            StreamEvent::Saved { .. } => "saved",
            StreamEvent::Completed { .. } => "completed",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Debug { .. } => "debug",
            StreamEvent::Logging { .. } => "logging",
            StreamEvent::Ui { .. } => "ui",
            StreamEvent::Summary { .. } => "summary",
        }
    }

    /// `completed` and `error` end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Completed { .. } | StreamEvent::Error { .. })
    }

    /// Diagnostic events carry no ordering constraints.
    pub fn is_out_of_band(&self) -> bool {
        matches!(
            self,
            StreamEvent::Debug { .. }
                | StreamEvent::Logging { .. }
                | StreamEvent::Ui { .. }
                | StreamEvent::Summary { .. }
        )
    }
}

/// Kind of answer a UI request expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UiRequestType {
    Boolean,
    String,
}

/// Directive for client-side rendering; answered out of band by request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiRequest {
    pub id: String,
    /// Markdown text shown to the user.
    pub text: String,
    #[serde(rename = "type")]
    pub request_type: UiRequestType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shapes() {
        let saved = StreamEvent::Saved {
            message_id: 42,
            message_type: MessageRole::Ai,
            parent_id: Some(41),
            saved_at: 1,
        };
        assert_eq!(
            serde_json::to_value(&saved).unwrap(),
            json!({"type": "saved", "messageId": 42, "messageType": "ai", "parentId": 41, "savedAt": 1})
        );

        assert_eq!(
            serde_json::to_value(StreamEvent::error("boom")).unwrap(),
            json!({"type": "error", "message": "boom"})
        );

        assert_eq!(
            serde_json::to_value(StreamEvent::chunk("Hel")).unwrap(),
            json!({"type": "chunk", "content": [{"type": "text", "text": "Hel"}]})
        );
    }

    #[test]
    fn each_frame_parses_on_its_own() {
        let frame = r#"{"type":"tool_end","tool":{"name":"search","invocationId":"t1"}}"#;
        let event: StreamEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(event.kind(), "tool_end");
        assert!(!event.is_terminal());
    }
}
