//! Error taxonomy shared by every fallible operation in the crate.
//!
//! All core modules return `Result<T, AssistError>`. The orchestrator and the
//! HTTP layer convert these into structured envelopes with a stable
//! `error_code` string; a raw error is never surfaced to a client.

use thiserror::Error;

/// Discriminated error for the knowledge-base and chat pipeline.
#[derive(Debug, Error)]
pub enum AssistError {
    /// Malformed input: empty content, bad chunk sizes, unknown content type.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Input matched a disallowed pattern and was rejected before dispatch.
    #[error("message rejected by safety filter")]
    SafetyFilter,

    /// The embedding or LLM service could not be reached or returned an error.
    #[error("upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The data store was unreachable or a write failed.
    #[error("persistence failure: {source}")]
    Persistence {
        #[source]
        source: anyhow::Error,
    },

    /// The current plan's usage quota has been exhausted.
    #[error("usage quota exceeded for plan '{plan}'")]
    RateLimited { plan: String },
}

impl AssistError {
    /// Stable machine-readable code used in response envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            AssistError::InvalidArgument(_) => "invalid_argument",
            AssistError::SafetyFilter => "safety_filter",
            AssistError::UpstreamUnavailable(_) => "upstream_unavailable",
            AssistError::Persistence { .. } => "persistence_error",
            AssistError::RateLimited { .. } => "rate_limited",
        }
    }

    /// Non-technical message suitable for end users. Safety rejections in
    /// particular must not reveal which pattern matched.
    pub fn user_message(&self) -> String {
        match self {
            AssistError::InvalidArgument(msg) => msg.clone(),
            AssistError::SafetyFilter => {
                "Sorry, I can't help with that request.".to_string()
            }
            AssistError::UpstreamUnavailable(_) => {
                "The assistant is temporarily unavailable. Please try again shortly.".to_string()
            }
            AssistError::Persistence { .. } => {
                "Something went wrong on our side. Please try again shortly.".to_string()
            }
            AssistError::RateLimited { .. } => {
                "You've reached the message limit for your plan.".to_string()
            }
        }
    }

    pub fn persistence(err: impl Into<anyhow::Error>) -> Self {
        AssistError::Persistence { source: err.into() }
    }
}

impl From<sqlx::Error> for AssistError {
    fn from(err: sqlx::Error) -> Self {
        AssistError::persistence(err)
    }
}
