//! Web API module for Aegis
//!
//! Provides REST API endpoints for:
//! - Chat: one message through the admission and resilience pipeline
//! - Quota: read-only per-tenant usage
//! - Health: liveness and per-component diagnostics
//!
//! Handlers read their collaborators from `Extension` layers installed by the
//! server (`Arc<AssistantPipeline>`, the shutdown `CancellationToken`,
//! [`health::RedisTarget`] and optionally `ProviderStats`).

pub mod chat;
pub mod health;
pub mod quota;

use axum::Router;
use serde::Serialize;

pub use chat::chat_routes;
pub use health::health_routes;
pub use quota::quota_routes;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Create the API router with all endpoints
pub fn api_router() -> Router {
    Router::new()
        .merge(health_routes())
        .merge(chat_routes())
        .merge(quota_routes())
}
