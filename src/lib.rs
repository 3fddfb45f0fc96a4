//! toolrelay - streaming tool-orchestration engine for chat models
//!
//! This library turns one user message into a stream of progress events
//! and a final answer, letting an OpenAI-compatible model call tools served
//! by MCP servers along the way.

pub mod agent;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod tools;
pub mod ui;

pub use engine::{Engine, EngineStatus};
pub use error::{Error, Result};
