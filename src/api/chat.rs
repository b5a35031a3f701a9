//! Chat endpoint
//!
//! POST /api/v1/chat runs one inbound message through admission, the
//! concurrency gate and the resilient invoker. Throttle and fallback replies
//! are ordinary 200 responses; only shutdown or gate closure yields 503.

use super::ApiResponse;
use aegis_core::{
    AssistantPipeline, InboundMessage, Outcome, OutcomeKind, TenantId, UserFriendlyError,
};
use axum::http::StatusCode;
use axum::{routing::post, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

/// Request body for POST /api/v1/chat
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Sender; omitted for anonymous/system events
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
    pub text: String,
}

/// Reply payload
#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub kind: OutcomeKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl From<Outcome> for ChatReply {
    fn from(outcome: Outcome) -> Self {
        let retry_after_secs = match &outcome {
            Outcome::Throttled {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        };
        Self {
            kind: outcome.kind(),
            text: outcome.into_text(),
            retry_after_secs,
        }
    }
}

async fn chat(
    Extension(pipeline): Extension<Arc<AssistantPipeline>>,
    Extension(shutdown): Extension<CancellationToken>,
    Json(request): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse<ChatReply>>) {
    if request.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("text must not be empty")),
        );
    }

    let message = InboundMessage {
        tenant: request.tenant_id,
        text: request.text,
    };
    let request_id = Uuid::new_v4();
    let span = info_span!("chat", %request_id, tenant = %message.tenant_label());
    let cancel = shutdown.child_token();

    match pipeline.handle(&message, &cancel).instrument(span).await {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::success(outcome.into()))),
        Err(e) => {
            warn!(
                %request_id,
                tenant = %message.tenant_label(),
                error = %e,
                "Chat request aborted"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error(e.user_message())),
            )
        }
    }
}

/// Create the chat routes
pub fn chat_routes() -> Router {
    Router::new().route("/api/v1/chat", post(chat))
}
