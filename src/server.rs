//! HTTP API for the storefront widget.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat/message` | Generate an assistant response |
//! | `POST` | `/chat/stream` | Same, delivered as SSE fragments |
//! | `GET`  | `/health` | Knowledge-base health snapshot |
//! | `POST` | `/actions/add-to-cart` | Validated pass-through cart action |
//! | `POST` | `/actions/apply-coupon` | Validated pass-through coupon action |
//!
//! Chat envelopes are always HTTP 200 — failure is expressed by
//! `success=false` plus an `error_code`, so the widget never has to parse
//! transport errors. Malformed requests outside the chat contract get a
//! JSON error body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "product_id must not be empty" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the widget is served
//! from the storefront's own origin, which we do not control.

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{ChatOptions, ChatService};
use crate::config::Config;
use crate::db;
use crate::health::{self, HealthCache};
use crate::migrate;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    chat: Arc<ChatService>,
    health_cache: Arc<HealthCache>,
}

/// Start the widget API server. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let pool = db::connect(&config.db).await?;
    migrate::apply_schema(&pool).await?;

    let state = AppState {
        chat: Arc::new(ChatService::new(config.clone(), pool)),
        health_cache: Arc::new(HealthCache::new(config.health.cache_ttl_secs)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/chat/message", post(handle_chat_message))
        .route("/chat/stream", post(handle_chat_stream))
        .route("/health", get(handle_health))
        .route("/actions/add-to-cart", post(handle_add_to_cart))
        .route("/actions/apply-coupon", post(handle_apply_coupon))
        .layer(cors)
        .with_state(state);

    println!("shopsense API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ POST /chat/message ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    context: Option<serde_json::Value>,
    #[serde(default)]
    options: Option<ChatRequestOptions>,
}

#[derive(Deserialize)]
struct ChatRequestOptions {
    #[serde(default)]
    model: Option<String>,
}

impl ChatRequest {
    fn into_parts(self) -> (String, ChatOptions) {
        let options = ChatOptions {
            conversation_id: self.conversation_id,
            model: self.options.and_then(|o| o.model),
            context: self.context,
        };
        (self.message, options)
    }
}

async fn handle_chat_message(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Json<serde_json::Value> {
    let (message, options) = request.into_parts();
    let response = state.chat.generate_response(&message, options).await;
    Json(serde_json::to_value(&response).unwrap_or_else(|_| serde_json::json!({"success": false})))
}

// ============ POST /chat/stream ============

/// Same contract as `/chat/message`, but the response text is delivered as
/// SSE `message` events carrying `{"message": "<fragment>"}`, terminated by
/// a `done` event with the full envelope (minus the already-streamed text).
async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (message, options) = request.into_parts();
    let mut response = state.chat.generate_response(&message, options).await;

    let fragments = split_fragments(&response.response, 6);
    response.response = String::new();

    let mut events: Vec<Result<Event, Infallible>> = fragments
        .into_iter()
        .map(|fragment| {
            Ok(Event::default()
                .event("message")
                .data(serde_json::json!({ "message": fragment }).to_string()))
        })
        .collect();

    let envelope =
        serde_json::to_value(&response).unwrap_or_else(|_| serde_json::json!({"success": false}));
    events.push(Ok(Event::default().event("done").data(envelope.to_string())));

    Sse::new(stream::iter(events)).keep_alive(KeepAlive::default())
}

/// Split text into word groups of `words_per_fragment`, preserving
/// whitespace between groups.
fn split_fragments(text: &str, words_per_fragment: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    words
        .chunks(words_per_fragment.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

// ============ GET /health ============

async fn handle_health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let snapshot = health::get_health_score(state.chat.pool(), &state.health_cache, false)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "health": snapshot,
    })))
}

// ============ Storefront actions ============

/// Envelope for pass-through e-commerce actions. The cart itself lives in
/// the storefront; these handlers validate and hand the action back in a
/// structured form the widget can apply.
#[derive(Serialize)]
struct ActionEnvelope {
    success: bool,
    message: String,
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct AddToCartRequest {
    product_id: String,
    #[serde(default = "default_quantity")]
    quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

async fn handle_add_to_cart(
    State(state): State<AppState>,
    Json(request): Json<AddToCartRequest>,
) -> Result<Json<ActionEnvelope>, AppError> {
    if request.product_id.trim().is_empty() {
        return Err(bad_request("product_id must not be empty"));
    }
    if request.quantity == 0 {
        return Err(bad_request("quantity must be at least 1"));
    }

    // Known products have indexed chunks; unknown ids get a soft failure.
    let title: Option<String> = sqlx::query_scalar(
        "SELECT title FROM knowledge_chunks WHERE source_type = 'product' AND source_id = ? LIMIT 1",
    )
    .bind(&request.product_id)
    .fetch_optional(state.chat.pool())
    .await
    .map_err(|e| internal_error(e.to_string()))?;

    match title {
        Some(title) => Ok(Json(ActionEnvelope {
            success: true,
            message: format!("Added {} to cart", title),
            data: serde_json::json!({
                "product_id": request.product_id,
                "quantity": request.quantity,
                "title": title,
            }),
        })),
        None => Ok(Json(ActionEnvelope {
            success: false,
            message: "Product not found".to_string(),
            data: serde_json::json!({ "product_id": request.product_id }),
        })),
    }
}

#[derive(Deserialize)]
struct ApplyCouponRequest {
    code: String,
}

async fn handle_apply_coupon(
    Json(request): Json<ApplyCouponRequest>,
) -> Result<Json<ActionEnvelope>, AppError> {
    let code = request.code.trim();
    if code.is_empty() {
        return Err(bad_request("code must not be empty"));
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(bad_request("code contains invalid characters"));
    }

    Ok(Json(ActionEnvelope {
        success: true,
        message: "Coupon submitted".to_string(),
        data: serde_json::json!({ "code": code }),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fragments_groups_words() {
        let fragments = split_fragments("one two three four five six seven", 3);
        assert_eq!(fragments, vec!["one two three", "four five six", "seven"]);
    }

    #[test]
    fn test_split_fragments_empty() {
        assert!(split_fragments("", 5).is_empty());
        assert!(split_fragments("   ", 5).is_empty());
    }

    #[test]
    fn test_chat_request_parses_minimal_body() {
        let request: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        let (message, options) = request.into_parts();
        assert_eq!(message, "hi");
        assert!(options.conversation_id.is_none());
        assert!(options.model.is_none());
    }

    #[test]
    fn test_chat_request_parses_full_body() {
        let request: ChatRequest = serde_json::from_str(
            r#"{
                "message": "hi",
                "conversation_id": "abc",
                "context": {"page": "/checkout"},
                "options": {"model": "gpt-4o"}
            }"#,
        )
        .unwrap();
        let (_, options) = request.into_parts();
        assert_eq!(options.conversation_id.as_deref(), Some("abc"));
        assert_eq!(options.model.as_deref(), Some("gpt-4o"));
    }
}
