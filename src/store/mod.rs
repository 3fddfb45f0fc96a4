//! Conversation history storage contracts and an in-memory implementation.

mod record;

pub use record::{ToolCallRecord, ToolResultRecord, TurnRecord};

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::agent::message::ConversationTurn;
use crate::error::Error;
use crate::Result;

/// History collaborator consulted before and after every turn.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The last `limit` turns of a session, oldest first.
    async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>>;

    async fn save_turn(&self, session_id: &str, record: TurnRecord) -> Result<()>;

    async fn clear(&self, session_id: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    sessions: Mutex<HashMap<String, Vec<TurnRecord>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full records of a session, oldest first.
    pub fn records(&self, session_id: &str) -> Result<Vec<TurnRecord>> {
        Ok(self.lock()?.get(session_id).cloned().unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<TurnRecord>>>> {
        self.sessions
            .lock()
            .map_err(|_| Error::Other("history store lock poisoned".to_string()))
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn recent_turns(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        let sessions = self.lock()?;
        let records = sessions.get(session_id).map(Vec::as_slice).unwrap_or_default();
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].iter().map(TurnRecord::to_turn).collect())
    }

    async fn save_turn(&self, session_id: &str, record: TurnRecord) -> Result<()> {
        self.lock()?
            .entry(session_id.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.lock()?.remove(session_id);
        Ok(())
    }
}
