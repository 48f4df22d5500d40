//! LLM integration module.
//!
//! Provides an OpenAI-compatible client for chat-completion calls and
//! the prompts used for multiple-choice question synthesis.

mod client;
mod prompts;

pub use client::{LlmClient, LlmResponse, Message, Role, TokenUsage};
pub use prompts::Prompts;

use crate::error::Result;
use async_trait::async_trait;

/// A backend able to answer a single-turn chat completion.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Single user message with optional system prompt; returns the text of
    /// the first choice.
    async fn complete(&self, system: Option<&str>, user: &str) -> Result<String>;
}
