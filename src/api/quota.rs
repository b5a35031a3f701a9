//! Quota API endpoint
//!
//! GET /api/v1/quota/:tenant returns the current window usage for one tenant. Reading
//! does not count as a request.

use super::ApiResponse;
use aegis_core::{AssistantPipeline, QuotaUsage, TenantId};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::{routing::get, Extension, Json, Router};
use std::sync::Arc;
use tracing::warn;

async fn get_quota(
    Extension(pipeline): Extension<Arc<AssistantPipeline>>,
    Path(tenant): Path<String>,
) -> (StatusCode, Json<ApiResponse<QuotaUsage>>) {
    let tenant = TenantId::new(tenant);

    match pipeline.admission().usage(&tenant).await {
        Ok(usage) => (StatusCode::OK, Json(ApiResponse::success(usage))),
        Err(e) => {
            warn!(tenant = %tenant, error = %e, "Quota usage unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    }
}

/// Create the quota routes
pub fn quota_routes() -> Router {
    Router::new().route("/api/v1/quota/:tenant", get(get_quota))
}
