//! Agent module - core orchestration logic.
//!
//! This module contains:
//! - Message and tool-call types exchanged with model backends
//! - Stream events and the emitter that delivers them
//! - Model profiles and the backend trait with its OpenAI-compatible client
//! - Session context for connected clients
//! - The tool loop that decides, executes tools and streams the answer

pub mod context;
pub mod events;
pub mod llm;
pub mod loop_impl;
pub mod message;
pub mod profiles;
pub mod session;

// Re-exports for convenience
pub use events::{Cancelled, EventEmitter, StreamEvent};
pub use llm::{BackendEvent, BackendFactory, BackendResponse, ModelBackend, OpenAiCompatBackend};
pub use loop_impl::{ToolLoop, TurnOutcome, TurnRequest, TurnSummary, DEFAULT_MAX_ROUNDS};
pub use message::{ConversationTurn, Message, Role, ToolArguments, ToolCallRequest};
pub use profiles::{ModelProfile, ProfileRegistry, VisibleProfile};
pub use session::{SessionContext, SessionField, SessionStore};
