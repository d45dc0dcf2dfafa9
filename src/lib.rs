//! # shopsense
//!
//! A storefront knowledge-base and RAG assistant service.
//!
//! shopsense indexes store content (products, pages, policies, FAQs,
//! settings) into a SQLite vector store and answers shopper questions with
//! retrieval-augmented responses over a JSON HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌───────────┐
//! │ Catalog JSON │──▶│ Chunk+Dedup+Embed  │──▶│  SQLite   │
//! │ (products…)  │   │     pipeline       │   │  vectors  │
//! └──────────────┘   └────────────────────┘   └─────┬─────┘
//!                                                   │
//!                      ┌────────────────────────────┤
//!                      ▼                            ▼
//!                ┌──────────┐                 ┌──────────┐
//!                │   CLI    │                 │   HTTP   │
//!                │(shopsense)│                │ (widget) │
//!                └──────────┘                 └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! shopsense init                       # create database
//! shopsense index catalog.json        # ingest store content
//! shopsense search "return policy"    # similarity search
//! shopsense health                     # knowledge-base health score
//! shopsense chat "do you ship to EU?" # one-off assistant reply
//! shopsense serve                      # start the widget API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy and envelope codes |
//! | [`models`] | Core data types |
//! | [`chunker`] | Sentence-respecting text chunking |
//! | [`dedup`] | Content-hash deduplication |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`index`] | Indexing pipeline |
//! | [`search`] | Cosine similarity search |
//! | [`health`] | Knowledge-base health scoring |
//! | [`chat`] | RAG response orchestration |
//! | [`llm`] | Chat-completion client |
//! | [`license`] | Plan tiers and usage limits |
//! | [`server`] | Widget HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chat;
pub mod chunker;
pub mod config;
pub mod db;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod health;
pub mod index;
pub mod license;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
