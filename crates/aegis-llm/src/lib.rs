//! Aegis LLM - Downstream Generation Providers
//!
//! This crate provides the downstream side of the Aegis assistant:
//! - Generation: the `GenerationProvider` trait and the opaque `Prompt` payload
//! - DeepSeek: OpenAI-compatible chat completion client
//! - Error: provider errors, with retry hints parsed from `Retry-After`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod deepseek;
pub mod error;
pub mod generation;
pub mod util;

pub use deepseek::{DeepSeekConfig, DeepSeekProvider, ProviderStats};
pub use error::{Error, Result};
pub use generation::{GenerationProvider, Prompt, PromptMessage, PromptRole};
