//! Health check endpoints with component-level diagnostics.
//!
//! Provides:
//! - `/health`: simple "healthy" + version (for load balancers)
//! - `/health/detailed`: per-component status (quota store, redis, gate, llm)

use aegis_core::{AssistantPipeline, QuotaMode};
use aegis_llm::ProviderStats;
use axum::extract::Extension;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;

/// Shared counter backend URL, `None` when disabled
#[derive(Debug, Clone)]
pub struct RedisTarget(pub Option<String>);

/// Simple health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Detailed health response with per-component checks
#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub checks: HealthChecks,
}

/// All component health checks
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub quota: ComponentHealth,
    pub redis: ComponentHealth,
    pub gate: ComponentHealth,
    pub llm: ComponentHealth,
}

/// Individual component health status
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn healthy(latency_ms: u64) -> Self {
        Self {
            status: "healthy",
            latency_ms: Some(latency_ms),
            error: None,
            details: None,
        }
    }

    fn with_status(status: &'static str, details: serde_json::Value) -> Self {
        Self {
            status,
            latency_ms: None,
            error: None,
            details: Some(details),
        }
    }

    fn unhealthy(error: String) -> Self {
        Self {
            status: "unhealthy",
            latency_ms: None,
            error: Some(error),
            details: None,
        }
    }

    fn disabled() -> Self {
        Self {
            status: "disabled",
            latency_ms: None,
            error: None,
            details: None,
        }
    }
}

/// Simple health check (for load balancers)
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Detailed health check with all component statuses
async fn detailed_health_check(
    Extension(pipeline): Extension<Arc<AssistantPipeline>>,
    Extension(redis): Extension<RedisTarget>,
    provider_stats: Option<Extension<ProviderStats>>,
) -> Json<DetailedHealthResponse> {
    let quota_health = check_quota(&pipeline);
    let redis_health = match redis.0.as_deref() {
        Some(url) => check_redis(url).await,
        None => ComponentHealth::disabled(),
    };
    let gate_health = check_gate(&pipeline);
    let llm_health = check_llm(&pipeline, provider_stats.map(|Extension(s)| s));

    let components = [
        quota_health.status,
        redis_health.status,
        gate_health.status,
        llm_health.status,
    ];

    let healthy_count = components.iter().filter(|s| **s == "healthy").count();
    let unhealthy_count = components
        .iter()
        .filter(|s| **s == "unhealthy" || **s == "degraded")
        .count();

    let overall_status = if unhealthy_count == 0 {
        "healthy"
    } else if healthy_count > 0 {
        "degraded"
    } else {
        "unhealthy"
    };

    Json(DetailedHealthResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION"),
        checks: HealthChecks {
            quota: quota_health,
            redis: redis_health,
            gate: gate_health,
            llm: llm_health,
        },
    })
}

/// Quota store mode; LOCAL counts are not shared between processes
fn check_quota(pipeline: &AssistantPipeline) -> ComponentHealth {
    let admission = pipeline.admission();
    let mode = admission.store().mode();
    let config = admission.config();
    let details = serde_json::json!({
        "mode": mode,
        "request_limit": config.request_limit,
        "window_secs": config.window_secs,
    });
    match mode {
        QuotaMode::Distributed => ComponentHealth::with_status("healthy", details),
        QuotaMode::Local => ComponentHealth::with_status("degraded", details),
    }
}

/// Check Redis connectivity
async fn check_redis(redis_url: &str) -> ComponentHealth {
    let start = std::time::Instant::now();
    match redis::Client::open(redis_url) {
        Ok(client) => match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => match redis::cmd("PING").query_async::<String>(&mut conn).await {
                Ok(_) => ComponentHealth::healthy(start.elapsed().as_millis() as u64),
                Err(e) => ComponentHealth::unhealthy(e.to_string()),
            },
            Err(e) => ComponentHealth::unhealthy(e.to_string()),
        },
        Err(e) => ComponentHealth::unhealthy(e.to_string()),
    }
}

/// Gate usage snapshot
fn check_gate(pipeline: &AssistantPipeline) -> ComponentHealth {
    let stats = pipeline.gate().stats();
    ComponentHealth::with_status(
        "healthy",
        serde_json::json!({
            "capacity": stats.capacity,
            "in_use": stats.in_use,
        }),
    )
}

/// Check LLM provider configuration (lightweight, no API call)
fn check_llm(pipeline: &AssistantPipeline, stats: Option<ProviderStats>) -> ComponentHealth {
    let provider = pipeline.provider_name();
    match stats {
        Some(stats) if !stats.has_api_key => {
            ComponentHealth::unhealthy(format!("{} API key is not configured", provider))
        }
        Some(stats) => ComponentHealth::with_status(
            "healthy",
            serde_json::json!({
                "provider": provider,
                "model": stats.model,
                "api_url": stats.api_url,
            }),
        ),
        None => {
            ComponentHealth::with_status("healthy", serde_json::json!({ "provider": provider }))
        }
    }
}

/// Create health routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
}
