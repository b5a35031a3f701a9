//! Aegis Core - Admission Control and Resilience
//!
//! This crate sits between an inbound user request and the downstream
//! generation call:
//! - Quota: per-tenant fixed-window counters (shared Redis counter with a local fallback)
//! - Admission: allow/deny before any downstream cost is incurred
//! - Gate: process-wide cap on simultaneous generation calls
//! - Invoker: failure classification, bounded retry, rate-limit-aware backoff
//! - Degradation: user-facing throttle and fallback messages
//! - Pipeline: the per-request control flow tying them together

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod config;
pub mod degradation;
pub mod error;
pub mod gate;
pub mod invoker;
pub mod pipeline;
pub mod quota;
pub mod tenant;

pub use admission::{AdmissionMiddleware, Decision, QuotaUsage};
pub use config::{ConcurrencyConfig, MessagesConfig, QuotaConfig, ResilienceConfig, RetryConfig};
pub use degradation::{DegradationPolicy, Outcome, OutcomeKind};
pub use error::{format_error_for_cli, Error, QuotaStoreError, Result, UserFriendlyError};
pub use gate::{ConcurrencyGate, GatePermit, GateStats};
pub use invoker::{
    Classify, DefaultClassifier, FailureClass, FailureClassifier, InvokeError, Invoked,
    ResilientInvoker, RetryAttempt, RetryPolicy,
};
pub use pipeline::{AssistantPipeline, ContextAssembler, PassthroughAssembler};
pub use quota::{
    probe, select_quota_store, DistributedQuotaStore, LocalQuotaStore, QuotaKey, QuotaMode,
    QuotaStore, RedisBackend, Ttl,
};
pub use tenant::{InboundMessage, TenantId};
