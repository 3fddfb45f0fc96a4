//! Tool loop - the round-based decide / execute / answer state machine

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::context::{build_transcript, decision_messages};
use super::events::{Cancelled, EventEmitter, StreamEvent};
use super::llm::{BackendEvent, BackendResponse};
use super::message::{ConversationTurn, Message, ToolCallRequest};
use super::profiles::{BackendBundle, ProfileRegistry};
use super::session::SessionContext;
use crate::error::Error;
use crate::store::TurnRecord;
use crate::tools::{ToolContext, ToolDefinition, ToolRegistry};

/// Default cap on decide/execute rounds per turn.
pub const DEFAULT_MAX_ROUNDS: usize = 25;

const STATUS_MESSAGE: &str = "Generating...";
const ANSWER_START_MESSAGE: &str = "AI is responding...";
const PARAGRAPH_BREAK: &str = "\n\n";
const ROUND_LIMIT_MESSAGE: &str =
    "Reached the maximum number of reasoning rounds. Please narrow the question or try again later.";

/// Input of one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_input: String,
    /// Prior turns, oldest first.
    pub history: Vec<ConversationTurn>,
    pub session: SessionContext,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// A final answer was streamed and closed.
    Answered,
    /// The round cap was hit and the fallback answer was streamed.
    RoundLimit,
    /// A terminal `error` event was emitted.
    Failed(String),
    /// The consumer went away; nothing more was emitted.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TurnSummary {
    pub outcome: TurnOutcome,
    pub record: TurnRecord,
}

/// Why a deciding call did not produce a decision.
enum Interrupt {
    Cancelled,
    /// `streamed` is set when text already reached the consumer.
    Backend { error: Error, streamed: bool },
}

impl From<Cancelled> for Interrupt {
    fn from(_: Cancelled) -> Self {
        Interrupt::Cancelled
    }
}

struct Decision {
    response: BackendResponse,
    /// Whether this call already forwarded text to the consumer.
    streamed: bool,
}

/// Emission state of one turn.
struct Turn<'a> {
    emitter: &'a EventEmitter,
    /// Set at most once; guards the single `ai_response_start`.
    answer_opened: bool,
    record: TurnRecord,
}

impl<'a> Turn<'a> {
    fn new(emitter: &'a EventEmitter, record: TurnRecord) -> Self {
        Self {
            emitter,
            answer_opened: false,
            record,
        }
    }

    async fn emit(&mut self, event: StreamEvent) -> Result<(), Cancelled> {
        self.emitter.emit(event.clone()).await?;
        self.record.observe(&event);
        Ok(())
    }

    async fn open_answer(&mut self) -> Result<(), Cancelled> {
        if !self.answer_opened {
            self.emit(StreamEvent::AiResponseStart {
                content: ANSWER_START_MESSAGE.to_string(),
            })
            .await?;
            self.answer_opened = true;
        }
        Ok(())
    }

    async fn chunk(&mut self, content: impl Into<String>) -> Result<(), Cancelled> {
        self.open_answer().await?;
        self.emit(StreamEvent::AiResponseChunk {
            content: content.into(),
        })
        .await
    }

    /// Close the answer without repeating what was streamed.
    async fn close_answer(&mut self) -> Result<(), Cancelled> {
        self.open_answer().await?;
        self.emit(StreamEvent::AiResponseEnd {
            content: String::new(),
        })
        .await
    }

    async fn fail(&mut self, err: &Error) -> Result<TurnOutcome, Cancelled> {
        self.emit(StreamEvent::Error {
            content: format!("Error processing request: {err}"),
        })
        .await?;
        Ok(TurnOutcome::Failed(err.to_string()))
    }
}

/// The tool loop drives one user turn through decide / execute rounds.
pub struct ToolLoop {
    profiles: Arc<ProfileRegistry>,
    tools: Arc<ToolRegistry>,
    max_rounds: usize,
}

impl ToolLoop {
    /// Create a new tool loop
    pub fn new(profiles: Arc<ProfileRegistry>, tools: Arc<ToolRegistry>, max_rounds: usize) -> Self {
        Self {
            profiles,
            tools,
            max_rounds: max_rounds.max(1),
        }
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Run one turn, emitting its events in order.
    ///
    /// Never fails: every error path ends in a closed answer, an `error`
    /// event, or cancellation.
    pub async fn run(&self, request: TurnRequest, emitter: &EventEmitter) -> TurnSummary {
        let record = TurnRecord::new(&request.user_input, request.session.correlation_id);
        let mut turn = Turn::new(emitter, record);

        let outcome = match self.drive(&request, &mut turn).await {
            Ok(outcome) => outcome,
            Err(Cancelled) => {
                info!(
                    "Turn cancelled by consumer (session {})",
                    request.session.session_id
                );
                TurnOutcome::Cancelled
            }
        };

        TurnSummary {
            outcome,
            record: turn.record.finalize(),
        }
    }

    async fn drive(&self, request: &TurnRequest, turn: &mut Turn<'_>) -> Result<TurnOutcome, Cancelled> {
        info!("Starting turn: {}", preview(&request.user_input));
        turn.emit(StreamEvent::Status {
            content: STATUS_MESSAGE.to_string(),
        })
        .await?;

        let bundle = match self
            .profiles
            .bundle(request.session.selected_profile_id.as_deref())
        {
            Ok(bundle) => bundle,
            Err(e) => {
                error!("No backend available: {}", e);
                return turn.fail(&e).await;
            }
        };

        let tools = self.tools.definitions();
        let context = ToolContext {
            session_id: request.session.session_id.clone(),
            correlation_id: request.session.correlation_id,
        };
        let mut transcript = build_transcript(&request.history, &request.user_input);

        for round in 1..=self.max_rounds {
            if turn.emitter.is_cancelled() {
                return Err(Cancelled);
            }
            debug!(
                "Round {}/{} with profile '{}'",
                round, self.max_rounds, bundle.profile.id
            );

            let messages = decision_messages(&transcript);
            let decision = match self.decide(&bundle, &messages, &tools, turn).await {
                Ok(decision) => decision,
                Err(Interrupt::Cancelled) => return Err(Cancelled),
                Err(Interrupt::Backend {
                    error,
                    streamed: true,
                }) if round == 1 => {
                    warn!("Deciding call failed mid-answer, closing it: {}", error);
                    turn.close_answer().await?;
                    return Ok(TurnOutcome::Answered);
                }
                Err(Interrupt::Backend { error, .. }) if round == 1 => {
                    warn!("Deciding call failed, answering without tools: {}", error);
                    return self.answer_directly(&bundle, &transcript, turn).await;
                }
                Err(Interrupt::Backend { error, .. }) => {
                    error!("Deciding call failed in round {}: {}", round, error);
                    return turn.fail(&error).await;
                }
            };

            if !decision.response.has_tool_calls() {
                info!("Answered after {} round(s)", round);
                return finish_answer(decision, turn).await;
            }

            let BackendResponse {
                content,
                tool_calls,
            } = decision.response;
            if decision.streamed {
                turn.chunk(PARAGRAPH_BREAK).await?;
            }

            let total = tool_calls.len();
            info!("Round {}: calling {} tool(s)", round, total);
            turn.emit(StreamEvent::ToolPlan {
                content: format!("AI decided to call {total} tool(s)"),
                tool_count: total,
            })
            .await?;

            transcript.push(Message::assistant_with_tools(content, tool_calls.clone()));
            for (index, call) in tool_calls.iter().enumerate() {
                let result = self.execute(call, index + 1, total, &context, turn).await?;
                transcript.push(Message::tool_result(&call.call_id, &call.tool_name, result));
            }
        }

        warn!("Reached round limit ({}), returning fallback", self.max_rounds);
        turn.chunk(ROUND_LIMIT_MESSAGE).await?;
        turn.close_answer().await?;
        Ok(TurnOutcome::RoundLimit)
    }

    /// One streamed backend call; text deltas go straight to the consumer.
    async fn decide(
        &self,
        bundle: &BackendBundle,
        messages: &[Message],
        tools: &[ToolDefinition],
        turn: &mut Turn<'_>,
    ) -> Result<Decision, Interrupt> {
        let limit = bundle.profile.timeout();
        let opened = tokio::time::timeout(limit, bundle.backend.stream(messages, tools)).await;
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => {
                return Err(Interrupt::Backend {
                    error,
                    streamed: false,
                })
            }
            Err(_) => {
                return Err(Interrupt::Backend {
                    error: timed_out(limit),
                    streamed: false,
                })
            }
        };

        let mut streamed = false;
        loop {
            let Ok(item) = tokio::time::timeout(limit, stream.next()).await else {
                return Err(Interrupt::Backend {
                    error: timed_out(limit),
                    streamed,
                });
            };

            match item {
                Some(Ok(BackendEvent::TextDelta(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    turn.chunk(text).await?;
                    streamed = true;
                }
                Some(Ok(BackendEvent::Completed(response))) => {
                    return Ok(Decision { response, streamed });
                }
                Some(Err(error)) => return Err(Interrupt::Backend { error, streamed }),
                None => {
                    return Err(Interrupt::Backend {
                        error: Error::BackendInvocation(
                            "stream ended without a completed response".to_string(),
                        ),
                        streamed,
                    })
                }
            }
        }
    }

    /// Tool-free streamed answer, used when the first deciding call fails.
    async fn answer_directly(
        &self,
        bundle: &BackendBundle,
        transcript: &[Message],
        turn: &mut Turn<'_>,
    ) -> Result<TurnOutcome, Cancelled> {
        match self.decide(bundle, transcript, &[], turn).await {
            Ok(decision) => finish_answer(decision, turn).await,
            Err(Interrupt::Cancelled) => Err(Cancelled),
            Err(Interrupt::Backend { error, .. }) => {
                error!("Direct answer failed: {}", error);
                turn.fail(&error).await
            }
        }
    }

    /// Run one tool call; failures become an error string for the transcript.
    async fn execute(
        &self,
        call: &ToolCallRequest,
        index: usize,
        total: usize,
        context: &ToolContext,
        turn: &mut Turn<'_>,
    ) -> Result<String, Cancelled> {
        let arguments = call.arguments.resolve();
        turn.emit(StreamEvent::ToolStart {
            tool_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            tool_args: Value::Object(arguments.clone()),
            progress: format!("{index}/{total}"),
        })
        .await?;

        let outcome = match self.tools.find(&call.tool_name) {
            Some(tool) => tool.invoke(arguments, context).await,
            None => Err(Error::ToolNotFound(call.tool_name.clone())),
        };

        match outcome {
            Ok(result) => {
                debug!("Tool {} succeeded: {} chars", call.tool_name, result.len());
                turn.emit(StreamEvent::ToolEnd {
                    tool_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    result: result.clone(),
                })
                .await?;
                Ok(result)
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Tool {} failed: {}", call.tool_name, message);
                turn.emit(StreamEvent::ToolError {
                    tool_id: call.call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    error: message.clone(),
                })
                .await?;
                Ok(format!("Error: {message}"))
            }
        }
    }
}

/// Close the answer; text not already streamed is sent as one chunk.
async fn finish_answer(decision: Decision, turn: &mut Turn<'_>) -> Result<TurnOutcome, Cancelled> {
    if !decision.streamed && !decision.response.content.is_empty() {
        turn.chunk(decision.response.content).await?;
    }
    turn.close_answer().await?;
    Ok(TurnOutcome::Answered)
}

fn timed_out(limit: Duration) -> Error {
    Error::BackendInvocation(format!("timed out after {}s", limit.as_secs()))
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(50).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
