//! Tenant identity and inbound messages

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of the end user (or group) a quota is tracked for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TenantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for TenantId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// A message handed over by the transport collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Sender; `None` for system or anonymous events
    pub tenant: Option<TenantId>,
    /// Raw message text
    pub text: String,
}

impl InboundMessage {
    /// Message from a known tenant
    pub fn new(tenant: impl Into<TenantId>, text: impl Into<String>) -> Self {
        Self {
            tenant: Some(tenant.into()),
            text: text.into(),
        }
    }

    /// Message without a sender
    pub fn anonymous(text: impl Into<String>) -> Self {
        Self {
            tenant: None,
            text: text.into(),
        }
    }

    /// Short slash command (`/start`, `/help`), shorter than `max_len` chars
    #[must_use]
    pub fn is_short_command(&self, max_len: usize) -> bool {
        self.text.starts_with('/') && self.text.chars().count() < max_len
    }

    /// Tenant label for log fields
    #[must_use]
    pub fn tenant_label(&self) -> &str {
        self.tenant.as_ref().map_or("-", TenantId::as_str)
    }
}
