//! Resilient invoker
//!
//! Wraps one downstream call with failure classification, bounded retry and
//! exponential backoff. Rate-limited failures may carry a server wait hint,
//! which replaces the computed delay when it is longer.
//!
//! The caller's concurrency slot stays held through every backoff sleep.
//! Under sustained rate limiting this can starve other waiters; shrink
//! `retry.max_attempts` or `retry.backoff_max_secs` if that matters more
//! than per-request completion.

use crate::config::RetryConfig;
use crate::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Explicit "too many requests" signal
    RateLimited {
        /// Server-specified wait before the next attempt
        wait_hint: Option<Duration>,
    },
    /// Network fault, timeout, server-side error
    Transient,
    /// Malformed input, authorization, other 4xx: never retried
    Permanent,
}

impl FailureClass {
    /// Whether another attempt may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureClass::Permanent)
    }

    /// Server wait hint, if any
    #[must_use]
    pub fn wait_hint(&self) -> Option<Duration> {
        match self {
            FailureClass::RateLimited { wait_hint } => *wait_hint,
            _ => None,
        }
    }
}

/// Errors that know their own retry class
pub trait Classify {
    /// Classify this failure
    fn classify(&self) -> FailureClass;
}

impl Classify for aegis_llm::Error {
    fn classify(&self) -> FailureClass {
        match self {
            aegis_llm::Error::RateLimit { retry_after } => FailureClass::RateLimited {
                wait_hint: *retry_after,
            },
            e if e.is_retryable() => FailureClass::Transient,
            _ => FailureClass::Permanent,
        }
    }
}

/// Decides the retry class of an error
pub trait FailureClassifier<E>: Send + Sync {
    /// Classify `error`
    fn classify(&self, error: &E) -> FailureClass;
}

/// Uses the error's own [`Classify`] impl
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<E: Classify> FailureClassifier<E> for DefaultClassifier {
    fn classify(&self, error: &E) -> FailureClass {
        error.classify()
    }
}

impl<E, F> FailureClassifier<E> for F
where
    F: Fn(&E) -> FailureClass + Send + Sync,
{
    fn classify(&self, error: &E) -> FailureClass {
        self(error)
    }
}

/// Attempt budget and delay schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Lower clamp of the computed delay
    pub min_delay: Duration,
    /// Upper clamp of the computed delay and of wait hints
    pub max_delay: Duration,
    /// Multiplier applied to `base^(attempt-1)`
    pub multiplier: Duration,
    /// Exponential base
    pub base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build from configuration
    ///
    /// Out-of-range values are coerced rather than rejected: a multiplier that
    /// is not a non-negative finite number of seconds becomes `max_delay`, and
    /// a base below 1 (or NaN) becomes 1.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        let min_delay = Duration::from_secs(config.backoff_min_secs);
        let max_delay = Duration::from_secs(config.backoff_max_secs).max(min_delay);
        let base = if config.backoff_base >= 1.0 {
            config.backoff_base
        } else {
            1.0
        };

        Self {
            max_attempts: config.max_attempts.max(1),
            min_delay,
            max_delay,
            multiplier: Duration::try_from_secs_f64(config.backoff_multiplier_secs)
                .unwrap_or(max_delay),
            base,
        }
    }

    /// Set maximum attempts
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the delay clamp
    #[must_use]
    pub fn with_delay_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min;
        self.max_delay = max.max(min);
        self
    }

    /// Computed delay after the failed attempt number `attempt` (1-based):
    /// `multiplier * base^(attempt-1)`, clamped to `[min_delay, max_delay]`
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.multiplier.as_secs_f64() * self.base.powi(exponent);
        if raw.is_nan() {
            return self.max_delay;
        }
        let clamped = raw.clamp(self.min_delay.as_secs_f64(), self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(clamped).unwrap_or(self.max_delay)
    }

    /// Delay before the next attempt, preferring a longer server hint
    #[must_use]
    pub fn next_delay(&self, attempt: u32, wait_hint: Option<Duration>) -> Duration {
        let computed = self.backoff(attempt);
        match wait_hint {
            Some(hint) if hint > computed => hint.min(self.max_delay),
            _ => computed,
        }
    }
}

/// One scheduled retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    /// The attempt that failed (1-based)
    pub attempt: u32,
    /// Sleep before the next attempt
    pub delay: Duration,
    /// Failure description
    pub cause: String,
}

/// Successful call plus the retries it took
#[derive(Debug)]
pub struct Invoked<T> {
    /// Downstream result
    pub value: T,
    /// Retries performed before success
    pub retries: Vec<RetryAttempt>,
}

/// Terminal failure of an invocation
#[derive(Debug)]
pub enum InvokeError<E> {
    /// Non-retryable failure, surfaced on first occurrence
    Permanent {
        /// The failure
        cause: E,
        /// Attempts made
        attempts: u32,
    },
    /// Every attempt failed transiently
    Exhausted {
        /// Failure of the final attempt
        last_cause: E,
        /// Attempts made
        attempts: u32,
        /// Retries performed
        retries: Vec<RetryAttempt>,
    },
    /// Enclosing request cancelled mid-call or mid-backoff
    Cancelled {
        /// Attempts started
        attempts: u32,
    },
}

impl<E> InvokeError<E> {
    /// Attempts made before giving up
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            InvokeError::Permanent { attempts, .. }
            | InvokeError::Exhausted { attempts, .. }
            | InvokeError::Cancelled { attempts } => *attempts,
        }
    }
}

impl<E: fmt::Display> fmt::Display for InvokeError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Permanent { cause, attempts } => {
                write!(f, "permanent failure on attempt {}: {}", attempts, cause)
            }
            InvokeError::Exhausted {
                last_cause,
                attempts,
                ..
            } => write!(f, "exhausted {} attempts: {}", attempts, last_cause),
            InvokeError::Cancelled { attempts } => {
                write!(f, "cancelled after {} attempt(s)", attempts)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for InvokeError<E> {}

impl<E: fmt::Display> From<InvokeError<E>> for Error {
    fn from(err: InvokeError<E>) -> Self {
        match err {
            InvokeError::Permanent { cause, attempts } => Error::PermanentDownstream {
                attempts,
                cause: cause.to_string(),
            },
            InvokeError::Exhausted {
                last_cause,
                attempts,
                ..
            } => Error::ExhaustedRetries {
                attempts,
                last_cause: last_cause.to_string(),
            },
            InvokeError::Cancelled { .. } => Error::Cancelled,
        }
    }
}

/// Retry/backoff wrapper around a downstream call
#[derive(Debug, Clone, Default)]
pub struct ResilientInvoker<C = DefaultClassifier> {
    policy: RetryPolicy,
    classifier: C,
}

impl ResilientInvoker {
    /// Create an invoker using each error's own classification
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: DefaultClassifier,
        }
    }
}

impl<C> ResilientInvoker<C> {
    /// Replace the failure classifier
    #[must_use]
    pub fn with_classifier<C2>(self, classifier: C2) -> ResilientInvoker<C2> {
        ResilientInvoker {
            policy: self.policy,
            classifier,
        }
    }

    /// The retry policy
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` (given the 1-based attempt number) until it succeeds,
    /// fails permanently, exhausts the attempt budget, or `cancel` fires.
    pub async fn call<T, E, F, Fut>(
        &self,
        tenant: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<Invoked<T>, InvokeError<E>>
    where
        C: FailureClassifier<E>,
        E: fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut retries = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(tenant = %tenant, attempt, "Request cancelled during downstream call");
                    return Err(InvokeError::Cancelled { attempts: attempt });
                }
                result = operation(attempt) => result,
            };

            let e = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(tenant = %tenant, attempt, "Downstream call succeeded after retry");
                    }
                    return Ok(Invoked { value, retries });
                }
                Err(e) => e,
            };

            let class = self.classifier.classify(&e);
            if !class.is_retryable() {
                error!(tenant = %tenant, attempt, cause = %e, "Permanent downstream failure");
                return Err(InvokeError::Permanent {
                    cause: e,
                    attempts: attempt,
                });
            }

            if attempt >= max_attempts {
                error!(
                    tenant = %tenant,
                    attempts = attempt,
                    cause = %e,
                    "Downstream retries exhausted"
                );
                return Err(InvokeError::Exhausted {
                    last_cause: e,
                    attempts: attempt,
                    retries,
                });
            }

            let delay = self.policy.next_delay(attempt, class.wait_hint());
            warn!(
                tenant = %tenant,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                rate_limited = matches!(class, FailureClass::RateLimited { .. }),
                cause = %e,
                "Downstream call failed, retrying"
            );
            retries.push(RetryAttempt {
                attempt,
                delay,
                cause: e.to_string(),
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(tenant = %tenant, attempt, "Request cancelled during backoff");
                    return Err(InvokeError::Cancelled { attempts: attempt });
                }
                _ = sleep(delay) => {}
            }
        }
    }
}
