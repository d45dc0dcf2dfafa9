//! Chat-completion client.
//!
//! Mirrors the embedding client's transport behavior: exponential backoff on
//! HTTP 429/5xx and network errors, immediate failure on other 4xx. The
//! `offline` provider composes a deterministic answer from the retrieved
//! context, keeping the assistant functional (and testable) with no network.

use anyhow::{bail, Result};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::{ConversationTurn, TurnRole};

/// Rough chars-per-token ratio used for budgets and offline token counts.
pub const CHARS_PER_TOKEN: usize = 4;

/// Fully assembled prompt for one completion call.
#[derive(Debug, Clone)]
pub struct ChatPrompt {
    pub system: String,
    /// Retrieved knowledge-base context, already trimmed to budget.
    pub context: String,
    /// Prior turns, oldest first, already capped.
    pub history: Vec<ConversationTurn>,
    pub user_message: String,
}

/// Result of a completion call.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u32,
}

/// Estimate tokens for a piece of text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Run a chat completion against the configured provider.
pub async fn complete(config: &LlmConfig, model: &str, prompt: &ChatPrompt) -> Result<Completion> {
    match config.provider.as_str() {
        "openai" => complete_openai(config, model, prompt).await,
        "offline" => Ok(complete_offline(prompt)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Deterministic offline completion: answer from the retrieved context, or a
/// polite "don't know" when retrieval found nothing.
fn complete_offline(prompt: &ChatPrompt) -> Completion {
    let text = if prompt.context.trim().is_empty() {
        "I couldn't find anything about that in the store's information. \
         Could you rephrase, or ask about our products, shipping, or returns?"
            .to_string()
    } else {
        let mut excerpt = prompt.context.trim().to_string();
        if excerpt.len() > 600 {
            let mut cut = 600;
            while !excerpt.is_char_boundary(cut) {
                cut -= 1;
            }
            excerpt.truncate(cut);
            excerpt.push('…');
        }
        format!("Here's what I found in our store information:\n\n{}", excerpt)
    };

    let tokens_used = estimate_tokens(&prompt.user_message) + estimate_tokens(&text);
    Completion {
        text,
        tokens_used: tokens_used as u32,
    }
}

/// Call the OpenAI chat completions API with retry/backoff.
async fn complete_openai(config: &LlmConfig, model: &str, prompt: &ChatPrompt) -> Result<Completion> {
    let api_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let mut messages = Vec::new();
    let system = if prompt.context.trim().is_empty() {
        prompt.system.clone()
    } else {
        format!("{}\n\nStore information:\n{}", prompt.system, prompt.context)
    };
    messages.push(serde_json::json!({ "role": "system", "content": system }));
    for turn in &prompt.history {
        let role = match turn.role {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        };
        messages.push(serde_json::json!({ "role": role, "content": turn.content }));
    }
    messages.push(serde_json::json!({ "role": "user", "content": prompt.user_message }));

    let body = serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": config.max_tokens,
        "temperature": config.temperature,
    });

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return parse_completion_response(&json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("chat API error {}: {}", status, body_text));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("chat API error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Chat completion failed after retries")))
}

fn parse_completion_response(json: &serde_json::Value) -> Result<Completion> {
    let text = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing message content"))?
        .to_string();

    let tokens_used = json
        .get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|t| t.as_u64())
        .unwrap_or(0) as u32;

    Ok(Completion { text, tokens_used })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(context: &str) -> ChatPrompt {
        ChatPrompt {
            system: "You are a shopping assistant.".to_string(),
            context: context.to_string(),
            history: Vec::new(),
            user_message: "Do you ship internationally?".to_string(),
        }
    }

    #[tokio::test]
    async fn test_offline_uses_context() {
        let config = LlmConfig::default();
        let result = complete(&config, "gpt-4o-mini", &prompt("We ship to 40 countries."))
            .await
            .unwrap();
        assert!(result.text.contains("40 countries"));
        assert!(result.tokens_used > 0);
    }

    #[tokio::test]
    async fn test_offline_without_context_is_graceful() {
        let config = LlmConfig::default();
        let result = complete(&config, "gpt-4o-mini", &prompt("")).await.unwrap();
        assert!(result.text.contains("couldn't find"));
    }

    #[tokio::test]
    async fn test_offline_deterministic() {
        let config = LlmConfig::default();
        let p = prompt("We ship worldwide.");
        let a = complete(&config, "m", &p).await.unwrap();
        let b = complete(&config, "m", &p).await.unwrap();
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
