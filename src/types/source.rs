//! Normalized citation records attached to assistant responses.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata keys that are lifted into the [`Chunk`] and never passed through.
pub const EXTRACTED_METADATA_KEYS: &[&str] = &["chunk_ids", "pages"];

static PAGE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\s*-\s*(\d+)\s*$").expect("page range pattern is valid")
});

/// Upper bound for a single expanded range, guards against inputs like "1-999999999".
const MAX_RANGE_PAGES: u32 = 10_000;

/// A citation record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub title: String,
    pub chunk: Chunk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub pages: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Source {
    /// Copy of the source without chunk content, used when publishing references.
    pub fn without_content(&self) -> Source {
        let mut copy = self.clone();
        copy.chunk.content = None;
        copy
    }
}

/// Normalize a loosely-typed `pages` value into a list of page numbers.
///
/// - `9` becomes `[9]`
/// - `"7"` becomes `[7]`
/// - `"3-5"` becomes `[3, 4, 5]`
/// - arrays apply the rules above element-wise
///
/// Values that are neither numbers nor numeric strings are dropped. Duplicates are removed,
/// keeping the first occurrence.
pub fn normalize_pages(value: &Value) -> Vec<u32> {
    let mut pages = Vec::new();
    collect_pages(value, &mut pages);

    let mut seen = std::collections::HashSet::new();
    pages.retain(|p| seen.insert(*p));
    pages
}

fn collect_pages(value: &Value, out: &mut Vec<u32>) {
    match value {
        Value::Number(n) => {
            if let Some(p) = n.as_u64().and_then(|p| u32::try_from(p).ok()) {
                out.push(p);
            } else if let Some(f) = n.as_f64() {
                if f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
                    out.push(f as u32);
                }
            }
        }
        Value::String(s) => collect_page_str(s, out),
        Value::Array(items) => {
            for item in items {
                // Nested arrays are not a page shape anyone produces.
                if !item.is_array() {
                    collect_pages(item, out);
                }
            }
        }
        _ => {}
    }
}

fn collect_page_str(raw: &str, out: &mut Vec<u32>) {
    let trimmed = raw.trim();
    if let Ok(p) = trimmed.parse::<u32>() {
        out.push(p);
        return;
    }

    if let Some(caps) = PAGE_RANGE.captures(trimmed) {
        let start = caps[1].parse::<u32>().ok();
        let end = caps[2].parse::<u32>().ok();
        if let (Some(start), Some(end)) = (start, end) {
            if start <= end && end - start < MAX_RANGE_PAGES {
                out.extend(start..=end);
            }
        }
    }
}

/// Extract chunk identifiers from a metadata map. Non-string entries are skipped.
pub fn chunk_ids(metadata: &Map<String, Value>) -> Vec<String> {
    match metadata.get("chunk_ids") {
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Builds one or more [`Source`] records from a single logical citation.
///
/// When the metadata carries `chunk_ids`, one source is produced per id, each pointing at that
/// chunk and sharing document and metadata. Otherwise exactly one source is produced with an
/// empty chunk URI.
#[derive(Debug, Clone, Default)]
pub struct SourceBuilder {
    title: String,
    content: Option<String>,
    pages: Vec<u32>,
    score: Option<f64>,
    document: Option<Document>,
    metadata: Map<String, Value>,
}

impl SourceBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn pages(mut self, pages: Vec<u32>) -> Self {
        self.pages = pages;
        self
    }

    pub fn score(mut self, score: Option<f64>) -> Self {
        self.score = score;
        self
    }

    pub fn document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    /// Set passthrough metadata. `pages` found here is used when no pages were set explicitly.
    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn build(self) -> Vec<Source> {
        let ids = chunk_ids(&self.metadata);
        let pages = if self.pages.is_empty() {
            self.metadata
                .get("pages")
                .map(normalize_pages)
                .unwrap_or_default()
        } else {
            self.pages
        };

        let mut metadata = self.metadata;
        for key in EXTRACTED_METADATA_KEYS {
            metadata.remove(*key);
        }

        let make = |uri: Option<String>| Source {
            title: self.title.clone(),
            chunk: Chunk {
                uri,
                content: self.content.clone(),
                pages: pages.clone(),
                score: self.score,
            },
            document: self.document.clone(),
            metadata: Some(metadata.clone()),
        };

        if ids.is_empty() {
            vec![make(None)]
        } else {
            ids.into_iter().map(|id| make(Some(id))).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pages_from_range_string() {
        assert_eq!(normalize_pages(&json!(["3-5"])), vec![3, 4, 5]);
    }

    #[test]
    fn pages_from_single_values() {
        assert_eq!(normalize_pages(&json!("7")), vec![7]);
        assert_eq!(normalize_pages(&json!(9)), vec![9]);
        assert_eq!(normalize_pages(&json!([1, "2", "4-5", 2])), vec![1, 2, 4, 5]);
    }

    #[test]
    fn pages_ignore_garbage() {
        assert!(normalize_pages(&json!("cover")).is_empty());
        assert!(normalize_pages(&json!(null)).is_empty());
        assert!(normalize_pages(&json!({"page": 1})).is_empty());
        assert!(normalize_pages(&json!("5-3")).is_empty());
        assert!(normalize_pages(&json!(-1)).is_empty());
    }

    #[test]
    fn builder_fans_out_per_chunk_id() {
        let metadata = json!({"chunk_ids": ["a", "b"], "pages": "2", "lang": "de"});
        let sources = SourceBuilder::new("Handbook")
            .document(Document {
                uri: "doc-1".into(),
                ..Default::default()
            })
            .metadata(metadata.as_object().cloned().unwrap())
            .build();

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].chunk.uri.as_deref(), Some("a"));
        assert_eq!(sources[1].chunk.uri.as_deref(), Some("b"));
        assert_eq!(sources[0].document, sources[1].document);
        assert_eq!(sources[0].metadata, sources[1].metadata);
        assert_eq!(sources[0].chunk.pages, vec![2]);

        let meta = sources[0].metadata.as_ref().unwrap();
        assert!(!meta.contains_key("chunk_ids"));
        assert!(!meta.contains_key("pages"));
        assert_eq!(meta.get("lang"), Some(&json!("de")));
    }

    #[test]
    fn builder_without_chunk_ids_emits_single_source() {
        let sources = SourceBuilder::new("Handbook").build();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].chunk.uri.is_none());
    }

    #[test]
    fn source_serializes_camel_case() {
        let source = Source {
            title: "t".into(),
            chunk: Chunk::default(),
            document: Some(Document {
                uri: "u".into(),
                mime_type: Some("application/pdf".into()),
                ..Default::default()
            }),
            metadata: None,
        };
        let value = serde_json::to_value(&source).unwrap();
        assert_eq!(value["document"]["mimeType"], json!("application/pdf"));
        assert_eq!(value["chunk"]["uri"], json!(null));
    }
}
