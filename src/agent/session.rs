//! Per-session state shared between the transport and the loop.

use std::collections::HashMap;

use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Connection parameter selecting a model profile.
pub const MODEL_PARAM: &str = "model";
/// Connection parameter carrying an external correlation id.
pub const CORRELATION_PARAM: &str = "msid";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub selected_profile_id: Option<String>,
    pub correlation_id: Option<i64>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }
}

/// A single field update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionField {
    Profile(String),
    CorrelationId(i64),
}

/// Concurrent map from session id to context; locking is per shard, never
/// global.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionContext>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a session for a new connection and apply its parameters.
    ///
    /// `msid` must parse as an integer, otherwise it is ignored; `model`
    /// is stored as-is and validated only when resolved.
    pub fn open(&self, params: &HashMap<String, String>) -> SessionContext {
        let mut context = SessionContext::new(Uuid::new_v4().to_string());

        if let Some(raw) = params.get(CORRELATION_PARAM) {
            match raw.trim().parse::<i64>() {
                Ok(id) => context.correlation_id = Some(id),
                Err(_) => debug!("Ignoring non-integer {}: {:?}", CORRELATION_PARAM, raw),
            }
        }
        if let Some(model) = params.get(MODEL_PARAM).filter(|m| !m.trim().is_empty()) {
            context.selected_profile_id = Some(model.trim().to_string());
        }

        info!("Session opened: {}", context.session_id);
        self.sessions
            .insert(context.session_id.clone(), context.clone());
        context
    }

    /// Update one field, creating the session if it does not exist.
    pub fn set(&self, session_id: &str, field: SessionField) {
        let mut entry = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionContext::new(session_id));
        match field {
            SessionField::Profile(id) => entry.selected_profile_id = Some(id),
            SessionField::CorrelationId(id) => entry.correlation_id = Some(id),
        }
    }

    /// Snapshot of a session's context.
    pub fn get(&self, session_id: &str) -> Option<SessionContext> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionContext> {
        let removed = self.sessions.remove(session_id).map(|(_, context)| context);
        if removed.is_some() {
            info!("Session closed: {}", session_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_open_applies_parameters() {
        let store = SessionStore::new();
        let ctx = store.open(&params(&[("msid", "42"), ("model", "fast")]));

        assert_eq!(ctx.correlation_id, Some(42));
        assert_eq!(ctx.selected_profile_id.as_deref(), Some("fast"));
        assert_eq!(store.get(&ctx.session_id), Some(ctx));
    }

    #[test]
    fn test_open_ignores_invalid_msid() {
        let store = SessionStore::new();
        let ctx = store.open(&params(&[("msid", "abc")]));
        assert_eq!(ctx.correlation_id, None);
        assert_eq!(ctx.selected_profile_id, None);
    }

    #[test]
    fn test_session_ids_are_unique() {
        let store = SessionStore::new();
        let a = store.open(&HashMap::new());
        let b = store.open(&HashMap::new());
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_set_get_remove() {
        let store = SessionStore::new();
        store.set("s1", SessionField::Profile("smart".to_string()));
        store.set("s1", SessionField::CorrelationId(7));

        let ctx = store.get("s1").unwrap();
        assert_eq!(ctx.selected_profile_id.as_deref(), Some("smart"));
        assert_eq!(ctx.correlation_id, Some(7));

        assert!(store.remove("s1").is_some());
        assert!(store.get("s1").is_none());
        assert!(store.remove("s1").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_sessions() {
        let store = Arc::new(SessionStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = format!("s{i}");
                store.set(&id, SessionField::CorrelationId(i));
                store.get(&id).and_then(|ctx| ctx.correlation_id)
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), Some(i as i64));
        }
        assert_eq!(store.len(), 16);
    }
}
