//! Language-model assistant seam.
//!
//! The engine only sees [`AssistantClient`]: it sends a [`Prompt`] and gets
//! back narrative text plus optional code. Any failure on the way becomes
//! an [`AssistantError`], which the engine records as an
//! `AssistantUnavailable` step.

pub mod openai;
pub mod parser;

pub use openai::{OpenAiAssistant, OpenAiConfig};
pub use parser::parse_reply;

use async_trait::async_trait;
use thiserror::Error;

/// A prompt ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Parsed assistant reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistantReply {
    pub narrative: String,
    pub code: Option<String>,
}

impl AssistantReply {
    pub fn new(narrative: impl Into<String>, code: Option<String>) -> Self {
        Self {
            narrative: narrative.into(),
            code: code.filter(|c| !c.trim().is_empty()),
        }
    }
}

/// Assistant failures. All of them map to `AssistantUnavailable`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssistantError {
    #[error("assistant unavailable: {0}")]
    Unavailable(String),

    #[error("assistant API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid assistant response: {0}")]
    InvalidResponse(String),
}

/// Code-generating assistant.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<AssistantReply, AssistantError>;

    /// Model name used in reports.
    fn model_name(&self) -> &str {
        "unknown"
    }
}
