//! Engine - wires registries, sessions, history and the tool loop together

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::agent::events::{EventEmitter, StreamEvent};
use crate::agent::llm::{BackendFactory, OpenAiBackendFactory};
use crate::agent::loop_impl::{ToolLoop, TurnOutcome, TurnRequest};
use crate::agent::profiles::{ProfileRegistry, VisibleProfile};
use crate::agent::session::{SessionContext, SessionStore};
use crate::config::Config;
use crate::store::{HistoryStore, InMemoryHistoryStore};
use crate::tools::{McpHttpProvider, ToolCatalog, ToolRegistry};
use crate::Result;

const EMPTY_INPUT_MESSAGE: &str = "User input must not be empty";

/// Snapshot of what the engine is running with.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub default_profile: String,
    pub profile_count: usize,
    pub tool_count: usize,
    pub server_count: usize,
    pub active_sessions: usize,
    pub max_rounds: usize,
}

/// Cheap to clone; every clone shares the same state.
#[derive(Clone)]
pub struct Engine {
    profiles: Arc<ProfileRegistry>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    history: Arc<dyn HistoryStore>,
    tool_loop: Arc<ToolLoop>,
    history_limit: usize,
    event_buffer: usize,
}

impl Engine {
    pub fn new(
        profiles: Arc<ProfileRegistry>,
        tools: Arc<ToolRegistry>,
        history: Arc<dyn HistoryStore>,
        config: &Config,
    ) -> Self {
        let tool_loop = ToolLoop::new(profiles.clone(), tools.clone(), config.max_rounds);
        Self {
            profiles,
            tools,
            sessions: Arc::new(SessionStore::new()),
            history,
            tool_loop: Arc::new(tool_loop),
            history_limit: config.history_limit,
            event_buffer: config.event_buffer.max(1),
        }
    }

    /// Build the engine from configuration, discovering tools on every
    /// configured server in order.
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::from_config_with(config, Arc::new(OpenAiBackendFactory)).await
    }

    pub async fn from_config_with(
        config: &Config,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self> {
        config.validate()?;

        let profiles = ProfileRegistry::new(
            config.profiles.clone(),
            config.default_profile.clone(),
            factory,
        )?;

        let tools = ToolRegistry::new();
        for (name, server) in &config.servers {
            let provider = McpHttpProvider::with_timeout(
                name.clone(),
                server.url.clone(),
                Duration::from_secs(server.timeout_secs),
            )?;
            tools.discover(name, Arc::new(provider)).await?;
        }
        info!(
            "Tool discovery finished: {} tools from {} servers",
            tools.len(),
            config.servers.len()
        );

        Ok(Self::new(
            Arc::new(profiles),
            Arc::new(tools),
            Arc::new(InMemoryHistoryStore::new()),
            config,
        ))
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    /// Open a session from connection parameters (`model`, `msid`).
    pub fn open_session(&self, params: &HashMap<String, String>) -> SessionContext {
        self.sessions.open(params)
    }

    pub fn list_models(&self) -> Vec<VisibleProfile> {
        self.profiles.list_visible()
    }

    pub fn describe_tools(&self) -> ToolCatalog {
        self.tools.describe_all()
    }

    pub fn status(&self) -> EngineStatus {
        let catalog = self.tools.describe_all();
        EngineStatus {
            default_profile: self.profiles.default_id().to_string(),
            profile_count: self.profiles.len(),
            tool_count: catalog.total_tools,
            server_count: catalog.server_count,
            active_sessions: self.sessions.len(),
            max_rounds: self.tool_loop.max_rounds(),
        }
    }

    /// Run one turn on a background task. Dropping the receiver cancels the
    /// turn at its next emission.
    pub fn start_turn(
        &self,
        session_id: impl Into<String>,
        user_input: impl Into<String>,
    ) -> mpsc::Receiver<StreamEvent> {
        let (emitter, rx) = EventEmitter::channel(self.event_buffer);
        let engine = self.clone();
        let session_id = session_id.into();
        let user_input = user_input.into();

        tokio::spawn(async move {
            engine.run_turn(&session_id, &user_input, &emitter).await;
        });
        rx
    }

    /// Run one turn to completion on the caller's task.
    pub async fn run_turn(
        &self,
        session_id: &str,
        user_input: &str,
        emitter: &EventEmitter,
    ) -> TurnOutcome {
        if user_input.trim().is_empty() {
            let event = StreamEvent::Error {
                content: EMPTY_INPUT_MESSAGE.to_string(),
            };
            return match emitter.emit(event).await {
                Ok(()) => TurnOutcome::Failed(EMPTY_INPUT_MESSAGE.to_string()),
                Err(_) => TurnOutcome::Cancelled,
            };
        }

        let session = self
            .sessions
            .get(session_id)
            .unwrap_or_else(|| SessionContext::new(session_id));

        let history = match self
            .history
            .recent_turns(session_id, self.history_limit)
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                warn!("Failed to load history for {}: {}", session_id, e);
                Vec::new()
            }
        };

        let request = TurnRequest {
            user_input: user_input.to_string(),
            history,
            session,
        };
        let summary = self.tool_loop.run(request, emitter).await;

        if let Err(e) = self.history.save_turn(session_id, summary.record).await {
            warn!("Failed to save turn for {}: {}", session_id, e);
        }

        summary.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::testing::{ScriptedBackend, ScriptedFactory, Step};
    use crate::agent::message::Role;
    use crate::agent::profiles::ModelProfile;
    use crate::agent::session::{SessionField, CORRELATION_PARAM, MODEL_PARAM};
    use crate::tools::{LocalToolProvider, ToolSpec};
    use serde_json::json;

    fn engine(backend: ScriptedBackend) -> (Engine, Arc<InMemoryHistoryStore>) {
        let config = Config {
            profiles: vec![ModelProfile::new("default", "sk-test", "test-model")],
            ..Config::default()
        };
        let profiles = ProfileRegistry::new(
            config.profiles.clone(),
            "default",
            Arc::new(ScriptedFactory::new(backend)),
        )
        .unwrap();

        let provider = LocalToolProvider::new().with_tool(
            ToolSpec::new("search", "Search the web", json!({"type": "object"})),
            |_args, ctx| async move { Ok(format!("msid={:?}", ctx.correlation_id)) },
        );
        let tools = ToolRegistry::new();
        let specs = provider.specs();
        tools
            .register_provider("local", Arc::new(provider), specs)
            .unwrap();

        let history = Arc::new(InMemoryHistoryStore::new());
        let engine = Engine::new(Arc::new(profiles), Arc::new(tools), history.clone(), &config);
        (engine, history)
    }

    async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_empty_input_yields_single_error() {
        let backend = ScriptedBackend::new(vec![]);
        let (engine, history) = engine(backend.clone());

        let events = collect(engine.start_turn("s1", "   ")).await;

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0],
            StreamEvent::Error {
                content: EMPTY_INPUT_MESSAGE.to_string()
            }
        );
        assert!(backend.calls().is_empty());
        assert!(history.records("s1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_turn_is_saved_with_tools_and_answer() {
        let backend = ScriptedBackend::new(vec![
            Step::call("c1", "search", r#"{"q":"x"}"#),
            Step::text(&["The answer ", "is 42"]),
        ]);
        let (engine, history) = engine(backend);
        let session = engine.open_session(&HashMap::from([(
            CORRELATION_PARAM.to_string(),
            "77".to_string(),
        )]));

        let events = collect(engine.start_turn(session.session_id.clone(), "what?")).await;
        assert!(matches!(events.last(), Some(StreamEvent::AiResponseEnd { .. })));

        let records = history.records(&session.session_id).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.user_input, "what?");
        assert_eq!(record.ai_response, "The answer is 42");
        assert_eq!(record.correlation_id, Some(77));
        assert_eq!(record.tools_called[0].tool_name, "search");
        assert_eq!(record.tool_results[0].result.as_deref(), Some("msid=Some(77)"));
    }

    #[tokio::test]
    async fn test_history_feeds_next_turn() {
        let backend = ScriptedBackend::new(vec![Step::text(&["first"]), Step::text(&["second"])]);
        let (engine, _history) = engine(backend.clone());

        collect(engine.start_turn("s1", "one")).await;
        collect(engine.start_turn("s1", "two")).await;

        let calls = backend.calls();
        let roles: Vec<Role> = calls[1].messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(calls[1].messages[2].content, "first");
    }

    #[tokio::test]
    async fn test_failed_tool_summary_is_saved() {
        let backend = ScriptedBackend::new(vec![
            Step::call("c1", "missing", "{}"),
            Step::text(&[]),
        ]);
        let (engine, history) = engine(backend);

        collect(engine.start_turn("s1", "go")).await;

        let record = &history.records("s1").unwrap()[0];
        assert_eq!(
            record.ai_response,
            "Errors occurred while processing:\nTool not found: missing"
        );
    }

    #[tokio::test]
    async fn test_dropped_receiver_still_saves_partial_record() {
        let backend = ScriptedBackend::repeating(Step::text(&["never seen"]));
        let (engine, history) = engine(backend);

        let rx = engine.start_turn("s1", "hello");
        drop(rx);

        // The spawned task observes the closed channel on its first emit.
        for _ in 0..50 {
            if !history.records("s1").unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let records = history.records("s1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_input, "hello");
    }

    #[tokio::test]
    async fn test_session_profile_selection_and_status() {
        let (engine, _history) = engine(ScriptedBackend::new(vec![]));
        let session = engine.open_session(&HashMap::from([(
            MODEL_PARAM.to_string(),
            "fast".to_string(),
        )]));
        engine
            .sessions()
            .set(&session.session_id, SessionField::CorrelationId(5));

        let stored = engine.sessions().get(&session.session_id).unwrap();
        assert_eq!(stored.selected_profile_id.as_deref(), Some("fast"));
        assert_eq!(stored.correlation_id, Some(5));

        let status = engine.status();
        assert_eq!(status.default_profile, "default");
        assert_eq!(status.tool_count, 1);
        assert_eq!(status.server_count, 1);
        assert_eq!(status.active_sessions, 1);
        assert_eq!(status.max_rounds, 25);
        assert_eq!(engine.list_models().len(), 1);
    }

    #[tokio::test]
    async fn test_from_config_survives_unreachable_server() {
        let mut config = Config {
            profiles: vec![ModelProfile::new("default", "sk-test", "test-model")],
            ..Config::default()
        };
        config.servers.insert(
            "offline".to_string(),
            crate::config::ServerConfig {
                url: "http://127.0.0.1:9/mcp".to_string(),
                timeout_secs: 2,
            },
        );

        let factory = Arc::new(ScriptedFactory::new(ScriptedBackend::new(vec![])));
        let engine = Engine::from_config_with(&config, factory).await.unwrap();

        let catalog = engine.describe_tools();
        assert_eq!(catalog.server_count, 1);
        assert_eq!(catalog.total_tools, 0);
    }
}
