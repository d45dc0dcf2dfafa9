//! Indexing pipeline orchestration.
//!
//! Coordinates the full flow: content items → chunking → run-wide
//! deduplication → embedding (best-effort, non-fatal) → storage. Re-indexing
//! a `(source_type, source_id)` replaces its prior chunks in one transaction,
//! so the last writer wins and no stale chunks survive. Each item commits
//! independently, which keeps progress persisted between embedding batches.

use anyhow::Result;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use crate::chunker;
use crate::config::Config;
use crate::dedup::{self, DedupItem};
use crate::embedding;
use crate::error::AssistError;
use crate::health::HealthCache;
use crate::models::{ChunkSpan, ContentItem, KnowledgeChunk, SourceType};

/// Counters reported after an indexing run.
#[derive(Debug, Default)]
pub struct IndexSummary {
    pub items_processed: usize,
    pub items_skipped: usize,
    pub chunks_written: u64,
    pub duplicates_removed: u64,
    pub embeddings_written: u64,
    pub embeddings_pending: u64,
}

/// Load a catalog file: a JSON array of content items.
pub fn load_catalog(path: &Path) -> Result<Vec<ContentItem>> {
    let content = std::fs::read_to_string(path)?;
    let items: Vec<ContentItem> = serde_json::from_str(&content)?;
    Ok(items)
}

/// Index a batch of content items: chunk, collapse duplicates across the
/// whole run, embed, and persist. Invalidates the health cache on success.
pub async fn index_items(
    config: &Config,
    pool: &SqlitePool,
    items: &[ContentItem],
    health: &HealthCache,
) -> Result<IndexSummary, AssistError> {
    let mut summary = IndexSummary::default();

    // Chunk every item first so deduplication sees the entire run.
    struct PendingChunk<'a> {
        item: &'a ContentItem,
        span: ChunkSpan,
        key: String,
    }

    let mut pending: Vec<PendingChunk<'_>> = Vec::new();
    // Every source that chunked successfully gets its prior rows replaced,
    // even if deduplication later drops all of its chunks.
    let mut sources: Vec<(SourceType, Option<String>)> = Vec::new();

    for item in items {
        let spans = match chunker::chunk(
            &item.content,
            config.chunking.max_chunk_size,
            config.chunking.min_chunk_size,
            config.chunking.preserve_sentences,
        ) {
            Ok(spans) => spans,
            Err(e) => {
                eprintln!(
                    "Warning: skipping '{}' ({}): {}",
                    item.title,
                    item.source_type.as_str(),
                    e
                );
                summary.items_skipped += 1;
                continue;
            }
        };

        summary.items_processed += 1;
        let source = (item.source_type, item.id.clone());
        if !sources.contains(&source) {
            sources.push(source);
        }
        for span in spans {
            let key = format!(
                "{}:{}:{}",
                item.source_type.as_str(),
                item.id.as_deref().unwrap_or("-"),
                span.index
            );
            pending.push(PendingChunk { item, span, key });
        }
    }

    // Collapse identical content within this run; first occurrence wins.
    let dedup_input: Vec<DedupItem> = pending
        .iter()
        .map(|p| DedupItem {
            id: p.key.clone(),
            content: p.span.content.clone(),
        })
        .collect();
    let dedup_result = dedup::remove_duplicates(dedup_input);
    summary.duplicates_removed = dedup_result.duplicates_found as u64;

    let retained: HashSet<&str> = dedup_result
        .unique_items
        .iter()
        .map(|i| i.id.as_str())
        .collect();
    pending.retain(|p| retained.contains(p.key.as_str()));

    // Best-effort embeddings over the retained chunk texts.
    let texts: Vec<String> = {
        let unique: HashSet<&str> = pending.iter().map(|p| p.span.content.as_str()).collect();
        unique.into_iter().map(String::from).collect()
    };
    let vectors: HashMap<String, Vec<f32>> =
        match embedding::generate_embeddings(&config.embedding, &texts).await {
            Ok(map) => map,
            Err(e) => {
                eprintln!("Warning: embedding generation failed: {}", e);
                HashMap::new()
            }
        };

    // Group retained chunks per source, then replace transactionally for
    // every processed source. A source with zero retained chunks still has
    // its stale rows deleted.
    let mut by_source: HashMap<(SourceType, Option<String>), Vec<&PendingChunk<'_>>> =
        HashMap::new();
    for p in &pending {
        by_source
            .entry((p.item.source_type, p.item.id.clone()))
            .or_default()
            .push(p);
    }

    for (source_type, source_id) in sources {
        let chunks = by_source
            .remove(&(source_type, source_id.clone()))
            .unwrap_or_default();

        let mut tx = pool.begin().await.map_err(AssistError::persistence)?;

        match &source_id {
            Some(id) => {
                sqlx::query(
                    "DELETE FROM knowledge_chunks WHERE source_type = ? AND source_id = ?",
                )
                .bind(source_type.as_str())
                .bind(id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    "DELETE FROM knowledge_chunks WHERE source_type = ? AND source_id IS NULL",
                )
                .bind(source_type.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        let now = Utc::now();
        for p in chunks {
            let chunk = KnowledgeChunk {
                id: Uuid::new_v4().to_string(),
                source_type,
                source_id: source_id.clone(),
                title: p.item.title.clone(),
                chunk_content: p.span.content.clone(),
                chunk_index: p.span.index,
                content_hash: dedup::content_hash(&p.span.content),
                embedding: vectors.get(p.span.content.as_str()).cloned(),
                metadata: serde_json::json!({
                    "url": p.item.url,
                    "word_count": p.span.word_count,
                    "sentence_count": p.span.sentence_count,
                    "extra": p.item.metadata,
                }),
                indexed_at: now,
                updated_at: now,
            };
            if chunk.embedding.is_some() {
                summary.embeddings_written += 1;
            } else {
                summary.embeddings_pending += 1;
            }

            sqlx::query(
                r#"
                INSERT INTO knowledge_chunks
                    (id, source_type, source_id, title, chunk_content, chunk_index,
                     content_hash, embedding, metadata_json, indexed_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(chunk.source_type.as_str())
            .bind(&chunk.source_id)
            .bind(&chunk.title)
            .bind(&chunk.chunk_content)
            .bind(chunk.chunk_index)
            .bind(&chunk.content_hash)
            .bind(chunk.embedding.as_deref().map(embedding::vec_to_blob))
            .bind(chunk.metadata.to_string())
            .bind(chunk.indexed_at.timestamp())
            .bind(chunk.updated_at.timestamp())
            .execute(&mut *tx)
            .await?;

            summary.chunks_written += 1;
        }

        tx.commit().await.map_err(AssistError::persistence)?;
    }

    health.invalidate();
    Ok(summary)
}
