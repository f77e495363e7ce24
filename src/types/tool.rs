//! Tool invocation shapes as seen by the chat runtime.

use serde::{Deserialize, Serialize};

/// Raw result of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolBlock::text(text)],
            is_error: false,
        }
    }

    pub fn with_block(mut self, block: ToolBlock) -> Self {
        self.content.push(block);
        self
    }
}

/// A content block within a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "resource")]
    Resource { resource: EmbeddedResource },
    /// Any block type the runtime does not interpret (images, audio, ...).
    #[serde(other)]
    Unsupported,
}

impl ToolBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ToolBlock::Text { text: text.into() }
    }

    pub fn resource(mime_type: impl Into<String>, text: impl Into<String>) -> Self {
        ToolBlock::Resource {
            resource: EmbeddedResource {
                mime_type: Some(mime_type.into()),
                text: Some(text.into()),
                uri: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

/// Tool identity carried by `tool_start` / `tool_end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Display name of the tool.
    pub name: String,
    /// Identifies one invocation; pairs `tool_start` with `tool_end`.
    pub invocation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_shape() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "resource", "resource": {"mimeType": "application/x-c4-json-v1", "text": "{}"}},
                {"type": "image", "data": "..."}
            ]
        });
        let result: ToolCallResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.content.len(), 3);
        assert_eq!(result.content[0], ToolBlock::text("hello"));
        assert_eq!(result.content[2], ToolBlock::Unsupported);
        assert!(!result.is_error);
    }
}
