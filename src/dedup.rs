//! Content-hash deduplication.
//!
//! Collapses items with identical content to the first occurrence, keeping
//! input order stable. Used by the indexer so a re-chunked catalog never
//! stores the same text twice.

use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// An item eligible for deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupItem {
    pub id: String,
    pub content: String,
}

/// Outcome of a deduplication pass.
#[derive(Debug)]
pub struct DedupResult {
    pub original_count: usize,
    pub duplicates_found: usize,
    pub unique_items: Vec<DedupItem>,
}

/// SHA-256 digest of a content string, hex-encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Remove items whose content digest was already seen. First occurrence wins;
/// the relative order of retained items is preserved.
pub fn remove_duplicates(items: Vec<DedupItem>) -> DedupResult {
    let original_count = items.len();
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique_items = Vec::with_capacity(items.len());

    for item in items {
        let digest = content_hash(&item.content);
        if seen.insert(digest) {
            unique_items.push(item);
        }
    }

    DedupResult {
        original_count,
        duplicates_found: original_count - unique_items.len(),
        unique_items,
    }
}
