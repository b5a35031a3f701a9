//! Per-request control flow
//!
//! admission → prompt assembly → gate → invoker → degradation.
//! Every collaborator is injected, so tests substitute fakes for the store,
//! the prompt assembler and the generation provider.

use crate::admission::{AdmissionMiddleware, Decision};
use crate::config::ResilienceConfig;
use crate::degradation::{DegradationPolicy, Outcome};
use crate::error::{Error, Result};
use crate::gate::ConcurrencyGate;
use crate::invoker::{InvokeError, ResilientInvoker, RetryPolicy};
use crate::quota::QuotaStore;
use crate::tenant::InboundMessage;
use aegis_llm::{GenerationProvider, Prompt};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Builds the downstream prompt for an admitted message.
///
/// Retrieval and context assembly live behind this seam; the pipeline treats
/// the result as opaque.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContextAssembler: Send + Sync {
    /// Assemble the prompt for `message`
    async fn assemble(&self, message: &InboundMessage) -> Prompt;
}

/// Sends the message text as-is, optionally behind a system instruction
#[derive(Debug, Clone, Default)]
pub struct PassthroughAssembler {
    system: Option<String>,
}

impl PassthroughAssembler {
    /// Prepend `system` to every prompt
    #[must_use]
    pub fn with_system(system: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
        }
    }
}

#[async_trait]
impl ContextAssembler for PassthroughAssembler {
    async fn assemble(&self, message: &InboundMessage) -> Prompt {
        let prompt = Prompt::user(message.text.clone());
        match &self.system {
            Some(system) => prompt.with_system(system.clone()),
            None => prompt,
        }
    }
}

/// The admission-control and resilience layer around one generation provider
pub struct AssistantPipeline {
    admission: AdmissionMiddleware,
    gate: Arc<ConcurrencyGate>,
    invoker: ResilientInvoker,
    degradation: DegradationPolicy,
    provider: Arc<dyn GenerationProvider>,
    assembler: Arc<dyn ContextAssembler>,
}

impl AssistantPipeline {
    /// Assemble a pipeline from explicit collaborators
    pub fn new(
        admission: AdmissionMiddleware,
        gate: Arc<ConcurrencyGate>,
        invoker: ResilientInvoker,
        degradation: DegradationPolicy,
        provider: Arc<dyn GenerationProvider>,
        assembler: Arc<dyn ContextAssembler>,
    ) -> Self {
        Self {
            admission,
            gate,
            invoker,
            degradation,
            provider,
            assembler,
        }
    }

    /// Build every component from configuration around an already-probed store
    pub fn from_config(
        config: &ResilienceConfig,
        store: Arc<dyn QuotaStore>,
        provider: Arc<dyn GenerationProvider>,
        assembler: Arc<dyn ContextAssembler>,
    ) -> Self {
        Self::new(
            AdmissionMiddleware::new(store, config.quota.clone()),
            Arc::new(ConcurrencyGate::new(config.concurrency.max_concurrency)),
            ResilientInvoker::new(RetryPolicy::from_config(&config.retry)),
            DegradationPolicy::new(config.messages.clone(), config.quota.window()),
            provider,
            assembler,
        )
    }

    /// Admission middleware
    #[must_use]
    pub fn admission(&self) -> &AdmissionMiddleware {
        &self.admission
    }

    /// Shared concurrency gate
    #[must_use]
    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    /// Generation provider name
    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Handle one inbound message.
    ///
    /// Denials and downstream failures come back as `Ok` outcomes; only
    /// cancellation and gate shutdown are errors.
    pub async fn handle(
        &self,
        message: &InboundMessage,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let tenant = message.tenant_label();

        if let Decision::Deny { retry_after, .. } = self.admission.admit(message).await {
            return Ok(self.degradation.on_denied(retry_after));
        }

        let prompt = self.assembler.assemble(message).await;

        let permit = match self.gate.acquire_cancellable(cancel).await {
            Ok(permit) => permit,
            Err(e) => {
                info!(tenant = %tenant, error = %e, "Gave up waiting for a generation slot");
                return Err(e);
            }
        };
        debug!(tenant = %tenant, provider = %self.provider.name(), "Invoking provider");

        let result = self
            .invoker
            .call(tenant, cancel, |_| self.provider.generate(&prompt))
            .await;
        permit.release();

        match result {
            Ok(invoked) => Ok(Outcome::Generated(invoked.value)),
            Err(InvokeError::Cancelled { .. }) => Err(Error::Cancelled),
            Err(e) => Ok(self.degradation.on_failure(tenant, e.into())),
        }
    }
}

#[cfg(test)]
mod tests;
