//! Structured citation payloads (`application/x-c4-json-v1`).

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::source::{normalize_pages, Document, Source, SourceBuilder};

pub const C4_JSON_MIME_TYPE: &str = "application/x-c4-json-v1";

#[derive(Debug, Clone, Deserialize)]
pub struct C4Json {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    pub data: C4Data,
}

#[derive(Debug, Clone, Deserialize)]
pub struct C4Data {
    pub text: String,
    #[serde(default)]
    pub original: Option<String>,
    pub id: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub region: C4Region,
    pub metadata: C4Metadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct C4Region {
    #[serde(default)]
    pub bounding_boxes: Option<Vec<BoundingBox>>,
    /// Loosely typed: numbers, numeric strings or ranges like `"3-5"`.
    #[serde(default)]
    pub pages: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoundingBox {
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    pub page: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct C4Metadata {
    pub uri: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub attributes: Option<Map<String, Value>>,
}

impl C4Json {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Text handed back to the model for this citation.
    pub fn text(&self) -> &str {
        self.data.original.as_deref().unwrap_or(&self.data.text)
    }

    /// Distinct pages: bounding boxes first, then `region.pages`, then `attributes.pages`.
    pub fn pages(&self) -> Vec<u32> {
        let region = &self.data.region;
        if let Some(boxes) = region.bounding_boxes.as_ref().filter(|b| !b.is_empty()) {
            let mut pages: Vec<u32> = Vec::new();
            for b in boxes {
                if !pages.contains(&b.page) {
                    pages.push(b.page);
                }
            }
            return pages;
        }
        if let Some(pages) = &region.pages {
            return normalize_pages(pages);
        }
        self.data
            .metadata
            .attributes
            .as_ref()
            .and_then(|a| a.get("pages"))
            .map(normalize_pages)
            .unwrap_or_default()
    }

    /// One source per chunk id in `attributes.chunk_ids`, or a single one without a chunk URI.
    pub fn into_sources(self) -> Vec<Source> {
        let pages = self.pages();
        let content = self.text().to_string();
        let data = self.data;
        let meta = data.metadata;

        SourceBuilder::new(meta.title.clone().unwrap_or_else(|| data.id.clone()))
            .content(content)
            .pages(pages)
            .score(data.score)
            .document(Document {
                uri: meta.uri,
                name: meta.title,
                mime_type: meta.mime_type,
                size: meta.size,
                link: meta.link,
            })
            .metadata(meta.attributes.unwrap_or_default())
            .build()
    }
}
