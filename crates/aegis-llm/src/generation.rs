//! Generation provider abstraction
//!
//! The resilience layer never builds prompts itself. A context-assembly
//! collaborator hands it a [`Prompt`], and the layer forwards it unchanged to
//! a [`GenerationProvider`].

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role of a prompt message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    /// System instructions
    System,
    /// End-user turn
    User,
    /// Previous assistant turn
    Assistant,
}

impl PromptRole {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptRole::System => "system",
            PromptRole::User => "user",
            PromptRole::Assistant => "assistant",
        }
    }
}

/// A single prompt message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Message role
    pub role: PromptRole,
    /// Message content
    pub content: String,
}

/// Opaque prompt payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Ordered messages
    pub messages: Vec<PromptMessage>,
}

impl Prompt {
    /// Prompt with a single user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::default().with_message(PromptRole::User, content)
    }

    /// Append a message
    #[must_use]
    pub fn with_message(mut self, role: PromptRole, content: impl Into<String>) -> Self {
        self.messages.push(PromptMessage {
            role,
            content: content.into(),
        });
        self
    }

    /// Prepend a system message
    #[must_use]
    pub fn with_system(mut self, content: impl Into<String>) -> Self {
        self.messages.insert(
            0,
            PromptMessage {
                role: PromptRole::System,
                content: content.into(),
            },
        );
        self
    }

    /// Whether the prompt has no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Downstream text-generation call
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Provider name (for logs)
    fn name(&self) -> &str;

    /// Generate a completion for the prompt
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}
