//! Agent adapter for the assistant core.
//!
//! Provides the `AgentClient` seam to the external language-model service:
//! - Context construction (device, location, time, notifications, history)
//! - A reqwest-backed HTTP client with multimodal photo support
//! - Speech formatting for display-less devices

pub mod context;
pub mod http;
pub mod speech;

use async_trait::async_trait;

pub use context::AgentContext;
pub use http::{HttpAgentClient, HttpAgentConfig};
pub use speech::format_for_speech;

/// Fixed response substituted whenever the agent fails or times out.
pub const APOLOGY: &str =
    "Sorry, I couldn't answer that right now. Please try again in a moment.";

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Run one query against the language model. `photos` are raw image
    /// bytes, newest first; empty when the device has no camera or capture
    /// failed.
    async fn generate(
        &self,
        query: &str,
        photos: &[Vec<u8>],
        context: &AgentContext,
    ) -> Result<AgentReply, AgentError>;
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    pub response: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout")]
    Timeout,
}
