use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub license: LicenseConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    /// SQLite connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_preserve_sentences")]
    pub preserve_sentences: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            preserve_sentences: true,
        }
    }
}

fn default_max_chunk_size() -> usize {
    800
}
fn default_min_chunk_size() -> usize {
    100
}
fn default_preserve_sentences() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// Approximate token budget for retrieved context in the prompt.
    #[serde(default = "default_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            threshold: default_threshold(),
            max_context_tokens: default_context_tokens(),
        }
    }
}

fn default_limit() -> usize {
    5
}
fn default_threshold() -> f64 {
    0.1
}
fn default_context_tokens() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"offline"`. Offline mode uses the deterministic
    /// hash-based fallback and never touches the network.
    #[serde(default = "default_embed_provider")]
    pub provider: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub skip_failures: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            model: default_embed_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            skip_failures: false,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embed_provider() -> String {
    "offline".to_string()
}
fn default_embed_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"openai"` or `"offline"`.
    #[serde(default = "default_embed_provider")]
    pub provider: String,
    #[serde(default = "default_model_free")]
    pub model_free: String,
    #[serde(default = "default_model_pro")]
    pub model_pro: String,
    #[serde(default = "default_model_unlimited")]
    pub model_unlimited: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum prior turns included in the prompt.
    #[serde(default = "default_max_history")]
    pub max_history_messages: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            model_free: default_model_free(),
            model_pro: default_model_pro(),
            model_unlimited: default_model_unlimited(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_history_messages: default_max_history(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_model_free() -> String {
    "gpt-4o-mini".to_string()
}
fn default_model_pro() -> String {
    "gpt-4o".to_string()
}
fn default_model_unlimited() -> String {
    "gpt-4.1".to_string()
}
fn default_max_tokens() -> u32 {
    600
}
fn default_temperature() -> f64 {
    0.4
}
fn default_max_history() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct LicenseConfig {
    /// `"free"`, `"pro"`, or `"unlimited"`.
    #[serde(default = "default_plan")]
    pub plan: String,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            plan: default_plan(),
        }
    }
}

fn default_plan() -> String {
    "free".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7410".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be >= 1");
    }

    if config.chunking.max_chunk_size == 0 {
        anyhow::bail!("chunking.max_chunk_size must be > 0");
    }
    if config.chunking.min_chunk_size >= config.chunking.max_chunk_size {
        anyhow::bail!("chunking.min_chunk_size must be < max_chunk_size");
    }

    if config.retrieval.limit == 0 {
        anyhow::bail!("retrieval.limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.threshold) {
        anyhow::bail!("retrieval.threshold must be in [0.0, 1.0]");
    }

    match config.embedding.provider.as_str() {
        "openai" | "offline" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or offline.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }

    match config.llm.provider.as_str() {
        "openai" | "offline" => {}
        other => anyhow::bail!("Unknown llm provider: '{}'. Must be openai or offline.", other),
    }

    match config.license.plan.as_str() {
        "free" | "pro" | "unlimited" => {}
        other => anyhow::bail!(
            "Unknown plan: '{}'. Must be free, pro, or unlimited.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> Config {
        toml::from_str("[db]\npath = \"/tmp/shopsense.sqlite\"\n").unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let cfg = minimal();
        assert_eq!(cfg.db.max_connections, 5);
        assert_eq!(cfg.chunking.max_chunk_size, 800);
        assert_eq!(cfg.chunking.min_chunk_size, 100);
        assert!(cfg.chunking.preserve_sentences);
        assert_eq!(cfg.embedding.provider, "offline");
        assert_eq!(cfg.embedding.dims, 1536);
        assert_eq!(cfg.license.plan, "free");
        validate(&cfg).unwrap();
    }

    #[test]
    fn test_rejects_zero_pool_size() {
        let mut cfg = minimal();
        cfg.db.max_connections = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut cfg = minimal();
        cfg.retrieval.threshold = 1.5;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rejects_unknown_plan() {
        let mut cfg = minimal();
        cfg.license.plan = "enterprise".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_rejects_min_not_below_max() {
        let mut cfg = minimal();
        cfg.chunking.min_chunk_size = 800;
        assert!(validate(&cfg).is_err());
    }
}
