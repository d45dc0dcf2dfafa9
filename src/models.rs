//! Core data models used throughout shopsense.
//!
//! These types represent the storefront content, indexed chunks, and search
//! results that flow through the indexing and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of storefront content a chunk originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Product,
    Page,
    Settings,
    Faq,
    Policy,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Product => "product",
            SourceType::Page => "page",
            SourceType::Settings => "settings",
            SourceType::Faq => "faq",
            SourceType::Policy => "policy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "product" => Some(SourceType::Product),
            "page" => Some(SourceType::Page),
            "settings" => Some(SourceType::Settings),
            "faq" => Some(SourceType::Faq),
            "policy" => Some(SourceType::Policy),
            _ => None,
        }
    }

    /// All categories the health scorer expects to see indexed.
    pub fn all() -> [SourceType; 5] {
        [
            SourceType::Product,
            SourceType::Page,
            SourceType::Settings,
            SourceType::Faq,
            SourceType::Policy,
        ]
    }
}

/// Raw item supplied by the content source (catalog file or storefront API)
/// before chunking and normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A bounded segment produced by the chunker, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub content: String,
    pub index: i64,
    pub start_pos: usize,
    pub end_pos: usize,
    pub word_count: usize,
    pub sentence_count: usize,
}

/// A unit of indexed content stored in SQLite.
#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    pub id: String,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub title: String,
    pub chunk_content: String,
    pub chunk_index: i64,
    pub content_hash: String,
    /// Unit-norm embedding; `None` until computed.
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
    pub indexed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A ranked result from similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub similarity: f64,
    pub title: String,
    pub content: String,
    pub source_type: SourceType,
    pub source_id: Option<String>,
    pub indexed_at: i64,
}

/// One turn in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// An append-only sequence of turns for one browsing session.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub turns: Vec<ConversationTurn>,
    /// Page/user metadata snapshot captured at creation.
    pub context: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_roundtrip() {
        for st in SourceType::all() {
            assert_eq!(SourceType::parse(st.as_str()), Some(st));
        }
        assert_eq!(SourceType::parse("widget"), None);
    }

    #[test]
    fn test_content_item_deserializes_catalog_entry() {
        let json = r#"{
            "id": "sku-42",
            "title": "Canvas Tote",
            "content": "A sturdy tote bag.",
            "type": "product",
            "url": "https://shop.example/tote",
            "metadata": {"price": "19.99"}
        }"#;
        let item: ContentItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.source_type, SourceType::Product);
        assert_eq!(item.id.as_deref(), Some("sku-42"));
    }
}
