//! # shopsense CLI
//!
//! The `shopsense` binary drives the knowledge-base pipeline and the widget
//! API server.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shopsense init` | Create the SQLite database and run schema migrations |
//! | `shopsense index <catalog.json>` | Chunk, dedup, embed, and store content |
//! | `shopsense search "<query>"` | Similarity search over indexed chunks |
//! | `shopsense health` | Print the knowledge-base health snapshot |
//! | `shopsense template <type>` | Print a starter template for a content type |
//! | `shopsense chat "<message>"` | One-off assistant response |
//! | `shopsense serve` | Start the widget HTTP API |

mod chat;
mod chunker;
mod config;
mod db;
mod dedup;
mod embedding;
mod error;
mod health;
mod index;
mod license;
mod llm;
mod migrate;
mod models;
mod search;
mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::chat::{ChatOptions, ChatService};
use crate::health::HealthCache;
use crate::search::SearchOptions;

/// shopsense — storefront knowledge base and RAG assistant.
#[derive(Parser)]
#[command(
    name = "shopsense",
    about = "shopsense — a storefront knowledge-base and RAG assistant service",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shopsense.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Index a catalog file: a JSON array of content items
    /// (`{id, title, content, type, url, metadata}`).
    Index {
        /// Path to the catalog JSON file.
        catalog: PathBuf,
    },

    /// Similarity search over indexed chunks.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity (0–1) for a result to be included.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Print the knowledge-base health snapshot.
    Health {
        /// Bypass the cache and recompute.
        #[arg(long)]
        force: bool,
    },

    /// Print a starter template for a content type
    /// (shipping_policy, return_policy, faq, about_us, size_guide).
    Template {
        content_type: String,
    },

    /// Ask the assistant a single question.
    Chat {
        message: String,

        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Start the widget HTTP API server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { catalog } => {
            let items = index::load_catalog(&catalog)?;
            let pool = db::connect(&cfg.db).await?;
            migrate::apply_schema(&pool).await?;
            let health_cache = HealthCache::new(cfg.health.cache_ttl_secs);

            let summary = index::index_items(&cfg, &pool, &items, &health_cache).await?;

            println!("index {}", catalog.display());
            println!("  items processed: {}", summary.items_processed);
            if summary.items_skipped > 0 {
                println!("  items skipped: {}", summary.items_skipped);
            }
            println!("  chunks written: {}", summary.chunks_written);
            println!("  duplicates removed: {}", summary.duplicates_removed);
            println!("  embeddings written: {}", summary.embeddings_written);
            if summary.embeddings_pending > 0 {
                println!("  embeddings pending: {}", summary.embeddings_pending);
            }
            println!("ok");

            pool.close().await;
        }
        Commands::Search {
            query,
            limit,
            threshold,
        } => {
            let pool = db::connect(&cfg.db).await?;
            migrate::apply_schema(&pool).await?;
            let options = SearchOptions {
                limit: limit.unwrap_or(cfg.retrieval.limit),
                threshold: threshold.unwrap_or(cfg.retrieval.threshold),
            };
            let hits = search::search_text(&pool, &cfg, &query, &options).await?;

            if hits.is_empty() {
                println!("No results.");
            } else {
                for (i, hit) in hits.iter().enumerate() {
                    println!(
                        "{}. [{:.2}] {} / {}",
                        i + 1,
                        hit.similarity,
                        hit.source_type.as_str(),
                        hit.title
                    );
                    println!(
                        "    excerpt: \"{}\"",
                        excerpt(&hit.content, 160).replace('\n', " ")
                    );
                    println!("    id: {}", hit.id);
                    println!();
                }
            }

            pool.close().await;
        }
        Commands::Health { force } => {
            let pool = db::connect(&cfg.db).await?;
            migrate::apply_schema(&pool).await?;
            let cache = HealthCache::new(cfg.health.cache_ttl_secs);
            let snapshot = health::get_health_score(&pool, &cache, force).await?;

            println!("Knowledge Base Health");
            println!("=====================");
            println!();
            println!(
                "  Overall:      {} ({})",
                snapshot.overall_score, snapshot.health_status
            );
            println!("  Completeness: {}", snapshot.completeness_score);
            println!("  Freshness:    {}", snapshot.freshness_score);
            println!("  Quality:      {}", snapshot.quality_score);
            println!();

            if !snapshot.breakdown.is_empty() {
                println!(
                    "  {:<12} {:>8} {:>10} {:>10} {:>10}",
                    "TYPE", "CHUNKS", "EMBEDDED", "AVG LEN", "OUTDATED"
                );
                println!("  {}", "-".repeat(56));
                for b in &snapshot.breakdown {
                    println!(
                        "  {:<12} {:>8} {:>10} {:>10} {:>10}",
                        b.source_type.as_str(),
                        b.chunk_count,
                        b.embedded_count,
                        b.avg_content_length,
                        b.outdated_count
                    );
                }
                println!();
            }

            if !snapshot.suggestions.is_empty() {
                println!("  Suggestions:");
                for s in &snapshot.suggestions {
                    println!("    [{:?}] {}", s.priority, s.action);
                }
            }

            pool.close().await;
        }
        Commands::Template { content_type } => {
            let template = health::content_template(&content_type)?;
            println!("{}", template);
        }
        Commands::Chat {
            message,
            conversation,
        } => {
            let pool = db::connect(&cfg.db).await?;
            migrate::apply_schema(&pool).await?;
            let service = Arc::new(ChatService::new(cfg.clone(), pool));

            let response = service
                .generate_response(
                    &message,
                    ChatOptions {
                        conversation_id: conversation,
                        ..ChatOptions::default()
                    },
                )
                .await;

            println!("{}", response.response);
            println!();
            println!("  conversation: {}", response.conversation_id);
            println!("  model: {}", response.model_used);
            println!("  context chunks: {}", response.context_chunks);
            println!(
                "  confidence: {:.2}",
                response.metadata.confidence_score
            );
            if let Some(code) = response.error_code {
                println!("  error: {}", code);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn excerpt(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &text[..cut])
}
