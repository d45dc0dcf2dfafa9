//! End-to-end pipeline tests over a temporary SQLite database.
//!
//! Everything runs in offline mode: embeddings come from the deterministic
//! hash fallback and chat completions from the offline provider, so no
//! network is needed.

use std::path::Path;

use shopsense::chat::{ChatOptions, ChatService};
use shopsense::config::Config;
use shopsense::health::{self, HealthCache};
use shopsense::index;
use shopsense::models::{ContentItem, SourceType};
use shopsense::search::{self, SearchOptions};
use shopsense::{db, migrate};

fn test_config(db_path: &Path) -> Config {
    toml::from_str(&format!(
        r#"
[db]
path = "{}"

[chunking]
max_chunk_size = 400
min_chunk_size = 80

[embedding]
dims = 64

[retrieval]
limit = 5
threshold = 0.0
"#,
        db_path.display()
    ))
    .unwrap()
}

fn item(id: &str, title: &str, content: &str, source_type: SourceType) -> ContentItem {
    ContentItem {
        id: Some(id.to_string()),
        title: title.to_string(),
        content: content.to_string(),
        source_type,
        url: None,
        metadata: serde_json::Value::Null,
    }
}

fn sample_catalog() -> Vec<ContentItem> {
    let mut items: Vec<ContentItem> = (0..12)
        .map(|i| {
            item(
                &format!("sku-{}", i),
                &format!("Product {}", i),
                &format!(
                    "Product {} is part of our outdoor collection, made from durable \
                     recycled materials and backed by a two-year warranty.",
                    i
                ),
                SourceType::Product,
            )
        })
        .collect();
    items.push(item(
        "store-settings",
        "Store Settings",
        "We accept credit cards and bank transfer. Orders placed before noon ship the same day.",
        SourceType::Settings,
    ));
    items
}

#[tokio::test]
async fn test_index_then_search_finds_relevant_chunk() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = test_config(&tmp.path().join("kb.sqlite"));
    let pool = db::connect(&config.db).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let cache = HealthCache::new(300);

    let items = vec![
        item(
            "shipping",
            "Shipping Policy",
            "We ship worldwide within three business days using tracked carriers.",
            SourceType::Policy,
        ),
        item(
            "returns",
            "Return Policy",
            "Returns are accepted within thirty days in original condition.",
            SourceType::Policy,
        ),
    ];
    let summary = index::index_items(&config, &pool, &items, &cache)
        .await
        .unwrap();
    assert_eq!(summary.chunks_written, 2);
    assert_eq!(summary.embeddings_written, 2);

    // The offline embedding is hash-based, so searching for the exact stored
    // text must rank its own chunk first with similarity ~1.
    let options = SearchOptions {
        limit: 5,
        threshold: 0.0,
    };
    let hits = search::search_text(
        &pool,
        &config,
        "We ship worldwide within three business days using tracked carriers.",
        &options,
    )
    .await
    .unwrap();

    assert!(!hits.is_empty());
    assert_eq!(hits[0].title, "Shipping Policy");
    assert!(hits[0].similarity > 0.99);
}

#[tokio::test]
async fn test_search_on_fresh_database_returns_empty() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = test_config(&tmp.path().join("kb.sqlite"));
    let pool = db::connect(&config.db).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();

    let options = SearchOptions {
        limit: 5,
        threshold: 0.0,
    };
    let hits = search::search_text(&pool, &config, "anything at all", &options)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_completeness_scenario_twelve_products_one_settings() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = test_config(&tmp.path().join("kb.sqlite"));
    let pool = db::connect(&config.db).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let cache = HealthCache::new(300);

    index::index_items(&config, &pool, &sample_catalog(), &cache)
        .await
        .unwrap();

    let completeness = health::analyze_completeness(&pool).await.unwrap();
    assert!(completeness.score > 0 && completeness.score < 100);
    assert!(!completeness.present_content.is_empty());
    assert!(!completeness.missing_content.is_empty());
}

#[tokio::test]
async fn test_health_reflects_indexed_content() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = test_config(&tmp.path().join("kb.sqlite"));
    let pool = db::connect(&config.db).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let cache = HealthCache::new(300);

    // Empty knowledge base starts Critical.
    let empty = health::get_health_score(&pool, &cache, false).await.unwrap();
    assert!(empty.overall_score <= 20);
    assert_eq!(empty.health_status, "Critical");

    // Indexing invalidates the cache, so the next read recomputes.
    index::index_items(&config, &pool, &sample_catalog(), &cache)
        .await
        .unwrap();
    let after = health::get_health_score(&pool, &cache, false).await.unwrap();
    assert!(after.overall_score > empty.overall_score);
    assert!(!after.breakdown.is_empty());
}

#[tokio::test]
async fn test_chat_end_to_end_with_retrieval() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = test_config(&tmp.path().join("kb.sqlite"));
    let pool = db::connect(&config.db).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    let cache = HealthCache::new(300);

    index::index_items(&config, &pool, &sample_catalog(), &cache)
        .await
        .unwrap();

    let service = ChatService::new(config.clone(), pool);
    let response = service
        .generate_response("Which payment methods do you accept?", ChatOptions::default())
        .await;

    assert!(response.success);
    assert!(response.context_chunks > 0);
    assert!(!response.metadata.rag_sources.is_empty());
    assert!(!response.conversation_id.is_empty());
    assert!(response.tokens_used > 0);
}

#[tokio::test]
async fn test_chat_conversation_continuity() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = test_config(&tmp.path().join("kb.sqlite"));
    let pool = db::connect(&config.db).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();

    let service = ChatService::new(config.clone(), pool);
    let first = service
        .generate_response("Do you ship to France?", ChatOptions::default())
        .await;
    assert!(first.success);

    let second = service
        .generate_response(
            "And to Germany?",
            ChatOptions {
                conversation_id: Some(first.conversation_id.clone()),
                ..ChatOptions::default()
            },
        )
        .await;
    assert_eq!(second.conversation_id, first.conversation_id);
    assert_eq!(service.turn_count(&first.conversation_id), 4);
}

#[tokio::test]
async fn test_free_plan_rate_limit() {
    let tmp = tempfile::TempDir::new().unwrap();
    let config = test_config(&tmp.path().join("kb.sqlite"));
    let pool = db::connect(&config.db).await.unwrap();
    migrate::apply_schema(&pool).await.unwrap();

    let service = ChatService::new(config.clone(), pool);
    let mut limited = None;
    for i in 0..120 {
        let response = service.generate_response("hello", ChatOptions::default()).await;
        if !response.success {
            assert_eq!(response.error_code, Some("rate_limited"));
            limited = Some(i);
            break;
        }
    }
    assert_eq!(limited, Some(100), "free plan allows exactly 100 messages/day");
}
