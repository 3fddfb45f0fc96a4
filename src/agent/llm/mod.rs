//! Model backend abstraction layer.
//!
//! This module provides:
//! - [`ModelBackend`] trait for swappable, streaming model backends
//! - [`BackendFactory`] for building a backend from a [`ModelProfile`]
//! - [`OpenAiCompatBackend`], a chat-completions client for any
//!   OpenAI-compatible endpoint
//!
//! # Adding a New Backend
//!
//! 1. Create a new file (e.g., `anthropic.rs`)
//! 2. Implement `ModelBackend`, yielding text deltas then one `Completed`
//! 3. Implement `BackendFactory` for it and hand it to the profile registry

mod types;

pub mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::tools::ToolDefinition;
use crate::Result;

pub use openai::{OpenAiBackendFactory, OpenAiCompatBackend};
pub use types::StreamAccumulator;

use super::message::{Message, ToolCallRequest};
use super::profiles::ModelProfile;

/// Terminal output of one backend call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendResponse {
    /// Full text content of the response.
    pub content: String,

    /// Tool calls requested by the model, in the order it produced them.
    pub tool_calls: Vec<ToolCallRequest>,
}

impl BackendResponse {
    /// Create a simple text response.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: vec![],
        }
    }

    /// Check if response has tool calls.
    #[inline]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One item of a streamed backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// A content token (or several) as it arrives.
    TextDelta(String),
    /// End of the call; always the last item of a successful stream.
    Completed(BackendResponse),
}

pub type BackendStream = Pin<Box<dyn Stream<Item = Result<BackendEvent>> + Send>>;

/// Model backend trait — swappable provider abstraction.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Start a streamed call. An empty `tools` slice means a tool-free call.
    async fn stream(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<BackendStream>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

/// Builds backends for profiles.
pub trait BackendFactory: Send + Sync {
    fn build(&self, profile: &ModelProfile) -> Result<Box<dyn ModelBackend>>;
}
