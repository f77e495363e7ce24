//! Tool-response normalization.
//!
//! Converts a raw tool result (plain text blocks plus embedded resources) into the text that
//! goes back to the model and the citations that go to the caller. Embedded resources with a
//! recognized citation MIME type are parsed; anything else is dropped, since losing a citation
//! is preferable to failing the turn.
//!
//! Output ordering partitions rather than interleaves: all plain text blocks first, in their
//! original order, followed by the resource-derived text blocks, in their original order.

pub mod c4;

use serde::{Deserialize, Serialize};

use crate::types::source::Source;
use crate::types::tool::{EmbeddedResource, ToolBlock, ToolCallResult};

pub use c4::{C4Json, C4_JSON_MIME_TYPE};

/// A plain text content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Normalized tool output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedToolResponse {
    pub content: Vec<TextBlock>,
    pub sources: Vec<Source>,
}

impl NormalizedToolResponse {
    /// Text handed back to the model.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Short summary for the `tool_end` event, cut at `max_chars` characters.
    pub fn summary(&self, max_chars: usize) -> String {
        let text = self.text();
        if text.chars().count() <= max_chars {
            return text;
        }
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}

/// Normalize a tool result. Never fails.
pub fn normalize_tool_response(result: &ToolCallResult) -> NormalizedToolResponse {
    let mut plain = Vec::new();
    let mut derived = Vec::new();
    let mut sources = Vec::new();

    for block in &result.content {
        match block {
            ToolBlock::Text { text } => plain.push(TextBlock::new(text.clone())),
            ToolBlock::Resource { resource } => {
                if let Some((text, mut resource_sources)) = parse_resource(resource) {
                    derived.push(TextBlock::new(text));
                    sources.append(&mut resource_sources);
                }
            }
            ToolBlock::Unsupported => {}
        }
    }

    plain.append(&mut derived);
    NormalizedToolResponse {
        content: plain,
        sources,
    }
}

fn parse_resource(resource: &EmbeddedResource) -> Option<(String, Vec<Source>)> {
    let mime_type = resource.mime_type.as_deref()?;
    if mime_type != C4_JSON_MIME_TYPE {
        tracing::debug!(mime_type, "dropping tool resource with unrecognized MIME type");
        return None;
    }

    let raw = resource.text.as_deref()?;
    match C4Json::parse(raw) {
        Ok(parsed) => {
            let text = parsed.text().to_string();
            Some((text, parsed.into_sources()))
        }
        Err(err) => {
            tracing::debug!(error = %err, "dropping malformed citation payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn citation(id: &str, text: &str, attributes: serde_json::Value) -> String {
        json!({
            "kind": "chunk",
            "version": "1",
            "data": {
                "text": text,
                "id": id,
                "score": 1.0,
                "region": {},
                "metadata": {"uri": format!("files/{id}"), "mime_type": "text/plain", "attributes": attributes}
            }
        })
        .to_string()
    }

    #[test]
    fn text_blocks_pass_through_in_order() {
        let result = ToolCallResult::text("one").with_block(ToolBlock::text("two"));
        let normalized = normalize_tool_response(&result);
        assert_eq!(
            normalized.content,
            vec![TextBlock::new("one"), TextBlock::new("two")]
        );
        assert!(normalized.sources.is_empty());
    }

    #[test]
    fn plain_text_precedes_resource_text() {
        let result = ToolCallResult::default()
            .with_block(ToolBlock::resource(
                C4_JSON_MIME_TYPE,
                citation("c1", "from resource", json!({})),
            ))
            .with_block(ToolBlock::text("plain"));

        let normalized = normalize_tool_response(&result);
        assert_eq!(normalized.content[0].text, "plain");
        assert_eq!(normalized.content[1].text, "from resource");
        assert_eq!(normalized.sources.len(), 1);
        assert!(normalized.sources[0].chunk.uri.is_none());
    }

    #[test]
    fn chunk_ids_fan_out_into_sources() {
        let result = ToolCallResult::default().with_block(ToolBlock::resource(
            C4_JSON_MIME_TYPE,
            citation("c1", "body", json!({"chunk_ids": ["a", "b"]})),
        ));
        let normalized = normalize_tool_response(&result);
        assert_eq!(normalized.content.len(), 1);
        assert_eq!(normalized.sources.len(), 2);
        let uris: Vec<_> = normalized
            .sources
            .iter()
            .map(|s| s.chunk.uri.clone().unwrap())
            .collect();
        assert_eq!(uris, vec!["a", "b"]);
    }

    #[test]
    fn unknown_and_malformed_resources_are_dropped() {
        let result = ToolCallResult::text("kept")
            .with_block(ToolBlock::resource("application/json", "{}"))
            .with_block(ToolBlock::resource(C4_JSON_MIME_TYPE, "{not json"))
            .with_block(ToolBlock::Unsupported);
        let normalized = normalize_tool_response(&result);
        assert_eq!(normalized.content, vec![TextBlock::new("kept")]);
        assert!(normalized.sources.is_empty());
    }

    #[test]
    fn summary_is_truncated() {
        let normalized = normalize_tool_response(&ToolCallResult::text("abcdef"));
        assert_eq!(normalized.summary(3), "abc…");
        assert_eq!(normalized.summary(10), "abcdef");
    }
}
