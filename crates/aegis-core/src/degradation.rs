//! Degradation policy
//!
//! Shapes the user-visible outcome of every terminal path. The transport
//! collaborator receives plain text; platform markup is its concern.

use crate::config::{MessagesConfig, RETRY_AFTER_PLACEHOLDER};
use crate::error::Error;
use serde::Serialize;
use std::time::Duration;
use tracing::error;

/// What the transport should send back
#[derive(Debug)]
pub enum Outcome {
    /// Downstream produced an answer
    Generated(String),
    /// Tenant is over quota
    Throttled {
        /// Rendered throttle message
        message: String,
        /// Seconds until the quota window resets
        retry_after_secs: u64,
    },
    /// Downstream could not be completed; the session stays usable
    Fallback {
        /// Rendered fallback message
        message: String,
        /// Terminal error that caused the fallback
        cause: Error,
    },
}

/// Discriminant of [`Outcome`], for transport payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// See [`Outcome::Generated`]
    Generated,
    /// See [`Outcome::Throttled`]
    Throttled,
    /// See [`Outcome::Fallback`]
    Fallback,
}

impl Outcome {
    /// Outcome kind
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Generated(_) => OutcomeKind::Generated,
            Outcome::Throttled { .. } => OutcomeKind::Throttled,
            Outcome::Fallback { .. } => OutcomeKind::Fallback,
        }
    }

    /// Text to deliver
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Outcome::Generated(text) => text,
            Outcome::Throttled { message, .. } | Outcome::Fallback { message, .. } => message,
        }
    }

    /// Consume into the text to deliver
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Outcome::Generated(text) => text,
            Outcome::Throttled { message, .. } | Outcome::Fallback { message, .. } => message,
        }
    }
}

/// Maps denials and downstream failures to user-facing messages
#[derive(Debug, Clone)]
pub struct DegradationPolicy {
    messages: MessagesConfig,
    window: Duration,
}

impl DegradationPolicy {
    /// Create a policy; `window` is quoted when the reset time is unknown
    #[must_use]
    pub fn new(messages: MessagesConfig, window: Duration) -> Self {
        Self { messages, window }
    }

    /// Throttle message for a denied request. No downstream call, no retry accounting.
    #[must_use]
    pub fn on_denied(&self, retry_after: Option<Duration>) -> Outcome {
        let wait = retry_after.unwrap_or(self.window);
        let retry_after_secs = ceil_secs(wait);
        let message = self
            .messages
            .throttle
            .replace(RETRY_AFTER_PLACEHOLDER, &retry_after_secs.to_string());

        Outcome::Throttled {
            message,
            retry_after_secs,
        }
    }

    /// Fallback message for a terminal downstream failure
    #[must_use]
    pub fn on_failure(&self, tenant: &str, cause: Error) -> Outcome {
        let attempts = match &cause {
            Error::PermanentDownstream { attempts, .. }
            | Error::ExhaustedRetries { attempts, .. } => *attempts,
            _ => 0,
        };
        error!(tenant = %tenant, attempts, cause = %cause, "Serving fallback message");

        Outcome::Fallback {
            message: self.messages.fallback.clone(),
            cause,
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DegradationPolicy {
        DegradationPolicy::new(MessagesConfig::default(), Duration::from_secs(3600))
    }

    #[test]
    fn test_throttle_message_uses_remaining_window() {
        let outcome = policy().on_denied(Some(Duration::from_millis(44_200)));
        assert_eq!(outcome.kind(), OutcomeKind::Throttled);
        assert!(outcome.text().contains("try again in 45 seconds"));
        assert!(!outcome.text().contains(RETRY_AFTER_PLACEHOLDER));
    }

    #[test]
    fn test_throttle_message_falls_back_to_window() {
        match policy().on_denied(None) {
            Outcome::Throttled {
                message,
                retry_after_secs,
            } => {
                assert_eq!(retry_after_secs, 3600);
                assert!(message.contains("3600 seconds"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_custom_message_without_placeholder() {
        let messages = MessagesConfig {
            throttle: "Slow down.".to_string(),
            ..MessagesConfig::default()
        };
        let outcome = DegradationPolicy::new(messages, Duration::from_secs(60)).on_denied(None);
        assert_eq!(outcome.into_text(), "Slow down.");
    }

    #[test]
    fn test_failure_serves_fallback() {
        let cause = Error::ExhaustedRetries {
            attempts: 5,
            last_cause: "503".to_string(),
        };
        let outcome = policy().on_failure("42", cause);

        assert_eq!(outcome.kind(), OutcomeKind::Fallback);
        assert_eq!(outcome.text(), MessagesConfig::default().fallback);
        assert!(matches!(
            outcome,
            Outcome::Fallback {
                cause: Error::ExhaustedRetries { attempts: 5, .. },
                ..
            }
        ));
    }

    #[test]
    fn test_generated_passes_through() {
        let outcome = Outcome::Generated("hello".to_string());
        assert_eq!(outcome.kind(), OutcomeKind::Generated);
        assert_eq!(outcome.into_text(), "hello");
    }

    #[test]
    fn test_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&OutcomeKind::Throttled).unwrap(),
            "\"throttled\""
        );
    }
}
