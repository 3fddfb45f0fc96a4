//! Turn lifecycle events and the bounded channel that carries them.
//!
//! Events serialize to the frame shape transports forward verbatim:
//! `{"type": "tool_start", "tool_id": ..., ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// One event in a turn's ordered output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        content: String,
    },
    ToolPlan {
        content: String,
        tool_count: usize,
    },
    ToolStart {
        tool_id: String,
        tool_name: String,
        tool_args: Value,
        progress: String,
    },
    ToolEnd {
        tool_id: String,
        tool_name: String,
        result: String,
    },
    ToolError {
        tool_id: String,
        tool_name: String,
        error: String,
    },
    AiResponseStart {
        content: String,
    },
    AiResponseChunk {
        content: String,
    },
    AiResponseEnd {
        content: String,
    },
    Error {
        content: String,
    },
}

impl StreamEvent {
    /// Wire tag of this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::ToolPlan { .. } => "tool_plan",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::ToolError { .. } => "tool_error",
            Self::AiResponseStart { .. } => "ai_response_start",
            Self::AiResponseChunk { .. } => "ai_response_chunk",
            Self::AiResponseEnd { .. } => "ai_response_end",
            Self::Error { .. } => "error",
        }
    }

    /// True for the events that close a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AiResponseEnd { .. } | Self::Error { .. })
    }
}

/// The consumer of a turn's events went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event consumer disconnected")]
pub struct Cancelled;

/// Producer half of a turn's event channel.
///
/// The channel is bounded: a slow consumer suspends the producer at its
/// next `emit` instead of losing events. Dropping the receiver cancels.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }

    /// Create an emitter together with the receiver a transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: StreamEvent) -> Result<(), Cancelled> {
        if self.tx.is_closed() {
            return Err(Cancelled);
        }
        self.tx.send(event).await.map_err(|_| Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.is_closed()
    }
}
