//! Plan tiers and usage limits.
//!
//! The subscription plan gates which chat model is used and how many
//! assistant messages a store may send per day. Counters are kept in
//! process; the billing backend itself is an external collaborator.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::LlmConfig;
use crate::error::AssistError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Free,
    Pro,
    Unlimited,
}

impl Plan {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(Plan::Free),
            "pro" => Some(Plan::Pro),
            "unlimited" => Some(Plan::Unlimited),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Unlimited => "unlimited",
        }
    }

    /// Daily assistant-message quota; `None` means unmetered.
    pub fn daily_message_quota(&self) -> Option<u64> {
        match self {
            Plan::Free => Some(100),
            Plan::Pro => Some(2_000),
            Plan::Unlimited => None,
        }
    }

    /// Model identifier used for chat completion on this plan.
    pub fn model<'a>(&self, llm: &'a LlmConfig) -> &'a str {
        match self {
            Plan::Free => &llm.model_free,
            Plan::Pro => &llm.model_pro,
            Plan::Unlimited => &llm.model_unlimited,
        }
    }
}

/// Per-process usage meter with a rolling daily window.
pub struct UsageMeter {
    plan: Plan,
    used: AtomicU64,
    window_start: AtomicU64,
}

impl UsageMeter {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            used: AtomicU64::new(0),
            window_start: AtomicU64::new(chrono::Utc::now().timestamp() as u64),
        }
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Record one message, failing with `RateLimited` once the plan's daily
    /// quota is exhausted.
    pub fn record_message(&self) -> Result<(), AssistError> {
        let now = chrono::Utc::now().timestamp() as u64;
        let start = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(start) >= 86_400 {
            // New day: reset the window. A lost race just delays the reset.
            if self
                .window_start
                .compare_exchange(start, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                self.used.store(0, Ordering::Relaxed);
            }
        }

        match self.plan.daily_message_quota() {
            None => {
                self.used.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Some(quota) => {
                let prev = self.used.fetch_add(1, Ordering::Relaxed);
                if prev >= quota {
                    Err(AssistError::RateLimited {
                        plan: self.plan.as_str().to_string(),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_parse() {
        assert_eq!(Plan::parse("free"), Some(Plan::Free));
        assert_eq!(Plan::parse("pro"), Some(Plan::Pro));
        assert_eq!(Plan::parse("unlimited"), Some(Plan::Unlimited));
        assert_eq!(Plan::parse("enterprise"), None);
    }

    #[test]
    fn test_model_selection_per_plan() {
        let llm = LlmConfig::default();
        assert_eq!(Plan::Free.model(&llm), llm.model_free);
        assert_eq!(Plan::Pro.model(&llm), llm.model_pro);
        assert_eq!(Plan::Unlimited.model(&llm), llm.model_unlimited);
    }

    #[test]
    fn test_quota_enforced_for_free() {
        let meter = UsageMeter::new(Plan::Free);
        for _ in 0..100 {
            meter.record_message().unwrap();
        }
        let err = meter.record_message().unwrap_err();
        assert_eq!(err.code(), "rate_limited");
    }

    #[test]
    fn test_unlimited_never_limited() {
        let meter = UsageMeter::new(Plan::Unlimited);
        for _ in 0..500 {
            meter.record_message().unwrap();
        }
        assert_eq!(meter.used(), 500);
    }
}
