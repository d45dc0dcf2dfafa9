//! Cosine-similarity search over stored chunk vectors.
//!
//! Vectors are fetched and ranked in process (brute force); the reported
//! similarity is raw cosine clamped to `[0, 1]` via `max(raw, 0)`, so wire
//! values are always non-negative. Ordering is fully deterministic:
//! similarity desc, then `indexed_at` desc, then chunk id asc.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::embedding;
use crate::error::AssistError;
use crate::models::{SearchHit, SourceType};

/// Knobs for a single search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub threshold: f64,
}

impl SearchOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            limit: config.retrieval.limit,
            threshold: config.retrieval.threshold,
        }
    }
}

/// Rank stored chunks against `query_vector`.
///
/// An empty or malformed (non-finite) query vector yields an empty result,
/// not an error. Candidates without an embedding are skipped.
pub async fn search_similar(
    pool: &SqlitePool,
    query_vector: &[f32],
    options: &SearchOptions,
) -> Result<Vec<SearchHit>, AssistError> {
    if query_vector.is_empty() || query_vector.iter().any(|v| !v.is_finite()) {
        return Ok(Vec::new());
    }

    let rows = sqlx::query(
        r#"
        SELECT id, source_type, source_id, title, chunk_content, embedding, indexed_at
        FROM knowledge_chunks
        WHERE embedding IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut hits: Vec<SearchHit> = Vec::with_capacity(rows.len());

    for row in &rows {
        let blob: Vec<u8> = row.get("embedding");
        let vec = embedding::blob_to_vec(&blob);
        let raw = embedding::cosine_similarity(query_vector, &vec) as f64;
        let similarity = raw.max(0.0);

        if similarity < options.threshold {
            continue;
        }

        let source_type_str: String = row.get("source_type");
        let source_type = match SourceType::parse(&source_type_str) {
            Some(st) => st,
            None => continue,
        };

        hits.push(SearchHit {
            id: row.get("id"),
            similarity,
            title: row.get("title"),
            content: row.get("chunk_content"),
            source_type,
            source_id: row.get("source_id"),
            indexed_at: row.get("indexed_at"),
        });
    }

    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.indexed_at.cmp(&a.indexed_at))
            .then(a.id.cmp(&b.id))
    });
    hits.truncate(options.limit);

    Ok(hits)
}

/// Embed a free-text query (with offline fallback) and search with it.
pub async fn search_text(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SearchHit>, AssistError> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let query_vec = embedding::generate_embedding(&config.embedding, query).await?;
    search_similar(pool, &query_vec, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::content_hash;
    use sqlx::SqlitePool;
    use uuid::Uuid;

    async fn setup() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let config: Config = toml::from_str(&format!(
            "[db]\npath = \"{}\"\n",
            tmp.path().join("kb.sqlite").display()
        ))
        .unwrap();
        let pool = crate::db::connect(&config.db).await.unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        (tmp, pool)
    }

    async fn insert_chunk(pool: &SqlitePool, title: &str, vector: &[f32], indexed_at: i64) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO knowledge_chunks
                (id, source_type, source_id, title, chunk_content, chunk_index,
                 content_hash, embedding, metadata_json, indexed_at, updated_at)
            VALUES (?, 'product', NULL, ?, ?, 0, ?, ?, '{}', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(title)
        .bind(format!("content for {}", title))
        .bind(content_hash(title))
        .bind(embedding::vec_to_blob(vector))
        .bind(indexed_at)
        .bind(indexed_at)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn test_results_sorted_and_thresholded() {
        let (_tmp, pool) = setup().await;
        insert_chunk(&pool, "exact", &[1.0, 0.0, 0.0], 100).await;
        insert_chunk(&pool, "close", &[0.9, 0.1, 0.0], 100).await;
        insert_chunk(&pool, "orthogonal", &[0.0, 0.0, 1.0], 100).await;
        insert_chunk(&pool, "opposite", &[-1.0, 0.0, 0.0], 100).await;

        let options = SearchOptions {
            limit: 10,
            threshold: 0.2,
        };
        let hits = search_similar(&pool, &[1.0, 0.0, 0.0], &options)
            .await
            .unwrap();

        // Orthogonal (0.0) and opposite (clamped to 0.0) fall below threshold.
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "exact");
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        for hit in &hits {
            assert!(hit.similarity >= 0.2);
            assert!(hit.similarity <= 1.0 + 1e-9);
        }
    }

    #[tokio::test]
    async fn test_limit_respected() {
        let (_tmp, pool) = setup().await;
        for i in 0..8 {
            insert_chunk(&pool, &format!("item-{}", i), &[1.0, 0.0, 0.0], 100 + i).await;
        }
        let options = SearchOptions {
            limit: 3,
            threshold: 0.0,
        };
        let hits = search_similar(&pool, &[1.0, 0.0, 0.0], &options)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_tie_broken_by_recency_then_id() {
        let (_tmp, pool) = setup().await;
        insert_chunk(&pool, "older", &[1.0, 0.0, 0.0], 100).await;
        insert_chunk(&pool, "newer", &[1.0, 0.0, 0.0], 200).await;

        let options = SearchOptions {
            limit: 10,
            threshold: 0.0,
        };
        let hits = search_similar(&pool, &[1.0, 0.0, 0.0], &options)
            .await
            .unwrap();
        assert_eq!(hits[0].title, "newer");
        assert_eq!(hits[1].title, "older");
    }

    #[tokio::test]
    async fn test_empty_or_malformed_query_yields_empty() {
        let (_tmp, pool) = setup().await;
        insert_chunk(&pool, "something", &[1.0, 0.0, 0.0], 100).await;

        let options = SearchOptions {
            limit: 10,
            threshold: 0.0,
        };
        assert!(search_similar(&pool, &[], &options).await.unwrap().is_empty());
        assert!(search_similar(&pool, &[f32::NAN, 0.0, 0.0], &options)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_chunks_without_embedding_skipped() {
        let (_tmp, pool) = setup().await;
        sqlx::query(
            r#"
            INSERT INTO knowledge_chunks
                (id, source_type, source_id, title, chunk_content, chunk_index,
                 content_hash, embedding, metadata_json, indexed_at, updated_at)
            VALUES ('no-vec', 'page', NULL, 'Unembedded', 'text', 0, 'h', NULL, '{}', 1, 1)
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let options = SearchOptions {
            limit: 10,
            threshold: 0.0,
        };
        let hits = search_similar(&pool, &[1.0, 0.0], &options).await.unwrap();
        assert!(hits.is_empty());
    }
}
