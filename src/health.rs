//! Knowledge-base health scoring.
//!
//! Produces a composite 0–100 score from three sub-scores:
//! - **completeness** — fraction of expected content categories (products,
//!   pages, settings, FAQ, policies) that meet a minimum item count;
//! - **freshness** — decreasing function of average content age;
//! - **quality** — penalizes short chunks, missing embeddings, and duplicate
//!   content hashes.
//!
//! Overall = 0.40·completeness + 0.30·freshness + 0.30·quality, clamped to
//! [0, 100]. Snapshots are cached with a TTL; the indexer invalidates the
//! cache whenever content changes.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::AssistError;
use crate::models::SourceType;

/// Average age (days) at or below which freshness is perfect.
const FRESH_AGE_DAYS: f64 = 7.0;
/// Average age (days) at or above which freshness is zero; also the
/// per-chunk "outdated" threshold.
const OUTDATED_AGE_DAYS: f64 = 90.0;

const WEIGHT_COMPLETENESS: f64 = 0.40;
const WEIGHT_FRESHNESS: f64 = 0.30;
const WEIGHT_QUALITY: f64 = 0.30;

/// Minimum indexed items for a category to count as present.
fn minimum_items(source_type: SourceType) -> i64 {
    match source_type {
        SourceType::Product => 5,
        _ => 1,
    }
}

/// Cached composite score over all knowledge chunks.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub overall_score: i64,
    pub health_status: String,
    pub completeness_score: i64,
    pub freshness_score: i64,
    pub quality_score: i64,
    pub breakdown: Vec<TypeBreakdown>,
    pub suggestions: Vec<Suggestion>,
    pub last_calculated: i64,
    pub calculation_time_ms: u64,
}

/// Per-content-type detail inside a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct TypeBreakdown {
    pub source_type: SourceType,
    pub chunk_count: i64,
    pub embedded_count: i64,
    pub avg_content_length: i64,
    pub outdated_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

/// One improvement action, ordered most urgent first.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub priority: Priority,
    pub action: String,
}

/// Completeness analysis detail.
#[derive(Debug, Clone, Serialize)]
pub struct Completeness {
    pub score: i64,
    pub present_content: Vec<SourceType>,
    pub missing_content: Vec<SourceType>,
}

struct CachedEntry {
    snapshot: HealthSnapshot,
    computed: Instant,
}

/// TTL cache for [`HealthSnapshot`]s, shared across requests.
pub struct HealthCache {
    ttl: Duration,
    entry: RwLock<Option<CachedEntry>>,
}

impl HealthCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            entry: RwLock::new(None),
        }
    }

    fn get(&self) -> Option<HealthSnapshot> {
        let guard = self.entry.read().ok()?;
        let entry = guard.as_ref()?;
        if entry.computed.elapsed() < self.ttl {
            Some(entry.snapshot.clone())
        } else {
            None
        }
    }

    fn put(&self, snapshot: HealthSnapshot) {
        if let Ok(mut guard) = self.entry.write() {
            *guard = Some(CachedEntry {
                snapshot,
                computed: Instant::now(),
            });
        }
    }

    /// Drop the cached snapshot. Called by the indexer on content change.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.entry.write() {
            *guard = None;
        }
    }
}

/// Compute (or return the cached) health snapshot.
///
/// `force_recalculate` bypasses the cache and refreshes it. Data-store
/// failures surface as `Persistence` errors wrapping the cause.
pub async fn get_health_score(
    pool: &SqlitePool,
    cache: &HealthCache,
    force_recalculate: bool,
) -> Result<HealthSnapshot, AssistError> {
    if !force_recalculate {
        if let Some(snapshot) = cache.get() {
            return Ok(snapshot);
        }
    }

    let started = Instant::now();

    let completeness = analyze_completeness(pool).await?;
    let (freshness, outdated_total) = analyze_freshness(pool).await?;
    let quality = analyze_quality(pool).await?;
    let breakdown = type_breakdown(pool).await?;

    let overall_raw = WEIGHT_COMPLETENESS * completeness.score as f64
        + WEIGHT_FRESHNESS * freshness as f64
        + WEIGHT_QUALITY * quality as f64;
    let overall_score = overall_raw.round().clamp(0.0, 100.0) as i64;

    let mut suggestions = improvement_suggestions(overall_score);
    if !completeness.missing_content.is_empty() {
        let names: Vec<&str> = completeness
            .missing_content
            .iter()
            .map(|t| t.as_str())
            .collect();
        suggestions.push(Suggestion {
            priority: Priority::High,
            action: format!("Add content for missing categories: {}", names.join(", ")),
        });
    }
    if outdated_total > 0 {
        suggestions.push(Suggestion {
            priority: Priority::Medium,
            action: format!("Re-index {} outdated item(s)", outdated_total),
        });
    }

    let snapshot = HealthSnapshot {
        overall_score,
        health_status: health_status(overall_score).to_string(),
        completeness_score: completeness.score,
        freshness_score: freshness,
        quality_score: quality,
        breakdown,
        suggestions,
        last_calculated: chrono::Utc::now().timestamp(),
        calculation_time_ms: started.elapsed().as_millis() as u64,
    };

    cache.put(snapshot.clone());
    Ok(snapshot)
}

/// Banded label for an overall score.
pub fn health_status(score: i64) -> &'static str {
    if score >= 85 {
        "Excellent"
    } else if score >= 65 {
        "Good"
    } else if score >= 40 {
        "Needs Improvement"
    } else if score >= 20 {
        "Poor"
    } else {
        "Critical"
    }
}

/// Which expected categories meet their minimum item counts.
pub async fn analyze_completeness(pool: &SqlitePool) -> Result<Completeness, AssistError> {
    let rows = sqlx::query(
        "SELECT source_type, COUNT(*) AS cnt FROM knowledge_chunks GROUP BY source_type",
    )
    .fetch_all(pool)
    .await?;

    let mut counts = std::collections::HashMap::new();
    for row in &rows {
        let st: String = row.get("source_type");
        let cnt: i64 = row.get("cnt");
        if let Some(parsed) = SourceType::parse(&st) {
            counts.insert(parsed, cnt);
        }
    }

    let mut present_content = Vec::new();
    let mut missing_content = Vec::new();
    for st in SourceType::all() {
        if counts.get(&st).copied().unwrap_or(0) >= minimum_items(st) {
            present_content.push(st);
        } else {
            missing_content.push(st);
        }
    }

    let score =
        (present_content.len() as f64 / SourceType::all().len() as f64 * 100.0).round() as i64;

    Ok(Completeness {
        score,
        present_content,
        missing_content,
    })
}

/// Freshness score and count of outdated chunks.
async fn analyze_freshness(pool: &SqlitePool) -> Result<(i64, i64), AssistError> {
    let now = chrono::Utc::now().timestamp();

    let avg_updated: Option<f64> = sqlx::query_scalar("SELECT AVG(updated_at) FROM knowledge_chunks")
        .fetch_one(pool)
        .await?;

    let Some(avg_updated) = avg_updated else {
        return Ok((0, 0));
    };

    let avg_age_days = (now as f64 - avg_updated) / 86_400.0;
    let score = if avg_age_days <= FRESH_AGE_DAYS {
        100.0
    } else if avg_age_days >= OUTDATED_AGE_DAYS {
        0.0
    } else {
        100.0 * (OUTDATED_AGE_DAYS - avg_age_days) / (OUTDATED_AGE_DAYS - FRESH_AGE_DAYS)
    };

    let cutoff = now - (OUTDATED_AGE_DAYS as i64) * 86_400;
    let outdated: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks WHERE updated_at < ?")
            .bind(cutoff)
            .fetch_one(pool)
            .await?;

    Ok((score.round() as i64, outdated))
}

/// Quality score: penalizes short content, missing embeddings, and
/// duplicate content hashes.
async fn analyze_quality(pool: &SqlitePool) -> Result<i64, AssistError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks")
        .fetch_one(pool)
        .await?;
    if total == 0 {
        return Ok(0);
    }

    let short: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks WHERE LENGTH(chunk_content) < 100")
            .fetch_one(pool)
            .await?;
    let unembedded: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_chunks WHERE embedding IS NULL")
            .fetch_one(pool)
            .await?;
    let distinct_hashes: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT content_hash) FROM knowledge_chunks")
            .fetch_one(pool)
            .await?;

    let total_f = total as f64;
    let short_ratio = short as f64 / total_f;
    let unembedded_ratio = unembedded as f64 / total_f;
    let duplicate_ratio = (total - distinct_hashes) as f64 / total_f;

    let score = 100.0 - 40.0 * short_ratio - 30.0 * unembedded_ratio - 30.0 * duplicate_ratio;
    Ok(score.round().clamp(0.0, 100.0) as i64)
}

async fn type_breakdown(pool: &SqlitePool) -> Result<Vec<TypeBreakdown>, AssistError> {
    let now = chrono::Utc::now().timestamp();
    let cutoff = now - (OUTDATED_AGE_DAYS as i64) * 86_400;

    let rows = sqlx::query(
        r#"
        SELECT source_type,
               COUNT(*) AS cnt,
               SUM(CASE WHEN embedding IS NOT NULL THEN 1 ELSE 0 END) AS embedded,
               CAST(AVG(LENGTH(chunk_content)) AS INTEGER) AS avg_len,
               SUM(CASE WHEN updated_at < ? THEN 1 ELSE 0 END) AS outdated
        FROM knowledge_chunks
        GROUP BY source_type
        ORDER BY cnt DESC
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    let mut breakdown = Vec::with_capacity(rows.len());
    for row in &rows {
        let st: String = row.get("source_type");
        if let Some(source_type) = SourceType::parse(&st) {
            breakdown.push(TypeBreakdown {
                source_type,
                chunk_count: row.get("cnt"),
                embedded_count: row.get("embedded"),
                avg_content_length: row.get("avg_len"),
                outdated_count: row.get("outdated"),
            });
        }
    }

    Ok(breakdown)
}

/// Priority-ordered improvement actions; lower scores bias toward
/// critical/high priority items.
pub fn improvement_suggestions(current_score: i64) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();

    if current_score < 20 {
        suggestions.push(Suggestion {
            priority: Priority::Critical,
            action: "Index your product catalog so the assistant has something to work with"
                .to_string(),
        });
        suggestions.push(Suggestion {
            priority: Priority::Critical,
            action: "Add shipping and return policy pages".to_string(),
        });
    } else if current_score < 40 {
        suggestions.push(Suggestion {
            priority: Priority::High,
            action: "Cover the remaining content categories (FAQ, policies, store settings)"
                .to_string(),
        });
        suggestions.push(Suggestion {
            priority: Priority::High,
            action: "Expand thin product descriptions past a sentence or two".to_string(),
        });
    } else if current_score < 65 {
        suggestions.push(Suggestion {
            priority: Priority::Medium,
            action: "Refresh content that has not been updated recently".to_string(),
        });
        suggestions.push(Suggestion {
            priority: Priority::Medium,
            action: "Fill in missing embeddings with a re-index run".to_string(),
        });
    } else if current_score < 85 {
        suggestions.push(Suggestion {
            priority: Priority::Low,
            action: "Add an FAQ covering your most common support questions".to_string(),
        });
    } else {
        suggestions.push(Suggestion {
            priority: Priority::Low,
            action: "Keep content fresh with periodic re-indexing".to_string(),
        });
    }

    suggestions
}

/// Starter template for a known content type.
pub fn content_template(content_type: &str) -> Result<String, AssistError> {
    let template = match content_type {
        "shipping_policy" => {
            "## Shipping Policy\n\n\
             - Processing time: [X business days]\n\
             - Domestic shipping: [carrier, cost, typical transit time]\n\
             - International shipping: [regions served, customs notes]\n\
             - Tracking: [when and how tracking numbers are sent]\n"
        }
        "return_policy" => {
            "## Return Policy\n\n\
             - Return window: [X days from delivery]\n\
             - Condition requirements: [unused, original packaging, ...]\n\
             - Refund method and timing: [original payment, X business days]\n\
             - How to start a return: [link or contact]\n"
        }
        "faq" => {
            "## Frequently Asked Questions\n\n\
             **Q: [Common question]?**\nA: [Clear answer.]\n\n\
             **Q: [Another question]?**\nA: [Clear answer.]\n"
        }
        "about_us" => {
            "## About Us\n\n\
             [Who you are, what you sell, and what makes the store different.]\n"
        }
        "size_guide" => {
            "## Size Guide\n\n\
             | Size | Measurement A | Measurement B |\n\
             |------|---------------|---------------|\n\
             | S    | [..]          | [..]          |\n"
        }
        other => {
            return Err(AssistError::InvalidArgument(format!(
                "unknown content type: {}",
                other
            )))
        }
    };

    Ok(template.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::content_hash;
    use uuid::Uuid;

    async fn setup() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let config: crate::config::Config = toml::from_str(&format!(
            "[db]\npath = \"{}\"\n",
            tmp.path().join("kb.sqlite").display()
        ))
        .unwrap();
        let pool = crate::db::connect(&config.db).await.unwrap();
        crate::migrate::apply_schema(&pool).await.unwrap();
        (tmp, pool)
    }

    async fn insert(pool: &SqlitePool, source_type: &str, content: &str, updated_at: i64) {
        sqlx::query(
            r#"
            INSERT INTO knowledge_chunks
                (id, source_type, source_id, title, chunk_content, chunk_index,
                 content_hash, embedding, metadata_json, indexed_at, updated_at)
            VALUES (?, ?, NULL, 'title', ?, 0, ?, ?, '{}', ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(source_type)
        .bind(content)
        .bind(content_hash(content))
        .bind(crate::embedding::vec_to_blob(&[1.0, 0.0]))
        .bind(updated_at)
        .bind(updated_at)
        .execute(pool)
        .await
        .unwrap();
    }

    fn long_content(tag: &str) -> String {
        format!(
            "{}: this entry carries enough descriptive text to clear the short-content \
             threshold used by the quality analyzer in scoring runs.",
            tag
        )
    }

    #[tokio::test]
    async fn test_empty_knowledge_base_is_critical() {
        let (_tmp, pool) = setup().await;
        let cache = HealthCache::new(300);
        let snapshot = get_health_score(&pool, &cache, false).await.unwrap();
        assert!(snapshot.overall_score <= 20);
        assert_eq!(snapshot.health_status, "Critical");
    }

    #[tokio::test]
    async fn test_completeness_partial_catalog() {
        let (_tmp, pool) = setup().await;
        let now = chrono::Utc::now().timestamp();
        // 12 products and one settings entry, nothing else.
        for i in 0..12 {
            insert(&pool, "product", &long_content(&format!("product {}", i)), now).await;
        }
        insert(&pool, "settings", &long_content("settings"), now).await;

        let completeness = analyze_completeness(&pool).await.unwrap();
        assert!(completeness.score > 0 && completeness.score < 100);
        assert!(!completeness.present_content.is_empty());
        assert!(!completeness.missing_content.is_empty());
        assert!(completeness.present_content.contains(&SourceType::Product));
        assert!(completeness.missing_content.contains(&SourceType::Faq));
    }

    #[tokio::test]
    async fn test_full_fresh_catalog_scores_well() {
        let (_tmp, pool) = setup().await;
        let now = chrono::Utc::now().timestamp();
        for i in 0..6 {
            insert(&pool, "product", &long_content(&format!("p{}", i)), now).await;
        }
        for st in ["page", "settings", "faq", "policy"] {
            insert(&pool, st, &long_content(st), now).await;
        }

        let cache = HealthCache::new(300);
        let snapshot = get_health_score(&pool, &cache, false).await.unwrap();
        assert!(snapshot.overall_score >= 85, "score: {}", snapshot.overall_score);
        assert_eq!(snapshot.health_status, "Excellent");
        assert_eq!(snapshot.completeness_score, 100);
        assert_eq!(snapshot.freshness_score, 100);
    }

    #[tokio::test]
    async fn test_stale_content_lowers_freshness() {
        let (_tmp, pool) = setup().await;
        let old = chrono::Utc::now().timestamp() - 200 * 86_400;
        insert(&pool, "product", &long_content("stale"), old).await;

        let (freshness, outdated) = analyze_freshness(&pool).await.unwrap();
        assert_eq!(freshness, 0);
        assert_eq!(outdated, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_and_force_recalculate() {
        let (_tmp, pool) = setup().await;
        let cache = HealthCache::new(300);
        let now = chrono::Utc::now().timestamp();
        insert(&pool, "product", &long_content("one"), now).await;

        let first = get_health_score(&pool, &cache, false).await.unwrap();

        // New content, but the cached snapshot is returned until invalidated.
        insert(&pool, "faq", &long_content("faq"), now).await;
        let cached = get_health_score(&pool, &cache, false).await.unwrap();
        assert_eq!(cached.last_calculated, first.last_calculated);
        assert_eq!(cached.completeness_score, first.completeness_score);

        let forced = get_health_score(&pool, &cache, true).await.unwrap();
        assert!(forced.completeness_score > first.completeness_score);
    }

    #[tokio::test]
    async fn test_invalidate_clears_cache() {
        let (_tmp, pool) = setup().await;
        let cache = HealthCache::new(300);
        let now = chrono::Utc::now().timestamp();
        insert(&pool, "product", &long_content("one"), now).await;

        let first = get_health_score(&pool, &cache, false).await.unwrap();
        insert(&pool, "settings", &long_content("settings"), now).await;
        cache.invalidate();

        let second = get_health_score(&pool, &cache, false).await.unwrap();
        assert!(second.completeness_score >= first.completeness_score);
        assert_ne!(
            second.breakdown.len(),
            first.breakdown.len(),
            "recomputed snapshot should see the new category"
        );
    }

    #[test]
    fn test_status_bands() {
        assert_eq!(health_status(90), "Excellent");
        assert_eq!(health_status(85), "Excellent");
        assert_eq!(health_status(70), "Good");
        assert_eq!(health_status(50), "Needs Improvement");
        assert_eq!(health_status(25), "Poor");
        assert_eq!(health_status(10), "Critical");
    }

    #[test]
    fn test_low_scores_bias_urgent_suggestions() {
        let low = improvement_suggestions(5);
        assert!(low.iter().any(|s| s.priority == Priority::Critical));
        let high = improvement_suggestions(95);
        assert!(high.iter().all(|s| s.priority == Priority::Low));
    }

    #[test]
    fn test_content_template_known_and_unknown() {
        assert!(content_template("shipping_policy").unwrap().contains("Shipping"));
        assert!(content_template("return_policy").is_ok());
        let err = content_template("podcast").unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }
}
