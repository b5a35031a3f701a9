//! Server initialization and main run loop
//!
//! Contains the component builder shared with the CLI and the `run()`
//! function that serves the HTTP API until a shutdown signal arrives.

use super::config::AppConfig;
use super::loader::load_config;
use super::shutdown::wait_for_shutdown_signal;
use crate::api::{self, health::RedisTarget};
use aegis_core::{select_quota_store, AssistantPipeline, ContextAssembler, PassthroughAssembler};
use aegis_llm::DeepSeekProvider;
use anyhow::{Context, Result};
use axum::{routing::get, Extension, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Everything a request needs, built once at startup
pub struct Components {
    pub pipeline: Arc<AssistantPipeline>,
    pub provider: Arc<DeepSeekProvider>,
}

/// Build the provider, probe the quota store and assemble the pipeline
pub async fn build_components(config: &AppConfig) -> Result<Components> {
    let api_key = std::env::var("DEEPSEEK_API_KEY").unwrap_or_default();
    if api_key.is_empty() {
        warn!("DEEPSEEK_API_KEY not set, generation requests will fail permanently");
    }

    let provider = Arc::new(
        DeepSeekProvider::new(config.llm.deepseek.to_provider_config(api_key))
            .context("Failed to create DeepSeek provider")?,
    );

    let quota = &config.resilience.quota;
    let store = select_quota_store(config.redis.effective_url(), quota).await;

    let assembler: Arc<dyn ContextAssembler> = match &config.llm.system_prompt {
        Some(system) => Arc::new(PassthroughAssembler::with_system(system.clone())),
        None => Arc::new(PassthroughAssembler::default()),
    };

    info!(
        mode = %store.mode(),
        request_limit = quota.request_limit,
        window_secs = quota.window_secs,
        max_concurrency = config.resilience.concurrency.max_concurrency,
        max_attempts = config.resilience.retry.max_attempts,
        "Resilience layer initialized"
    );

    let pipeline = Arc::new(AssistantPipeline::from_config(
        &config.resilience,
        store,
        provider.clone(),
        assembler,
    ));

    Ok(Components { pipeline, provider })
}

/// Run the server
pub async fn run() -> Result<()> {
    info!("Starting Aegis assistant v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config().context("Failed to load configuration")?;
    info!("Configuration loaded");

    let Components { pipeline, provider } = build_components(&config).await?;
    let shutdown = CancellationToken::new();

    let app = Router::new()
        .route("/", get(|| async { "Aegis assistant" }))
        .merge(api::api_router())
        .layer(Extension(pipeline.clone()))
        .layer(Extension(shutdown.clone()))
        .layer(Extension(provider.stats()))
        .layer(Extension(RedisTarget(
            config.redis.effective_url().map(str::to_string),
        )))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("HTTP server listening on http://{}", addr);

    let gate = pipeline.gate().clone();
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            info!("Shutting down, cancelling in-flight requests");
            server_shutdown.cancel();
            gate.close();
        })
        .await
        .context("HTTP server error")?;

    info!("Aegis shutdown complete");
    Ok(())
}
