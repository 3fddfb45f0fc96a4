//! Wire types for OpenAI-compatible chat completions, and the accumulator
//! that folds a server-sent event stream into deltas and a final response.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::BackendResponse;
use crate::agent::message::{Message, Role, ToolArguments, ToolCallRequest};
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

#[derive(Debug, Serialize)]
pub(crate) struct ApiRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ApiTool<'a>>,
    pub temperature: f32,
    pub stream: bool,
}

impl<'a> ApiRequest<'a> {
    pub fn streaming(
        model: &'a str,
        temperature: f32,
        messages: &'a [Message],
        tools: &'a [ToolDefinition],
    ) -> Self {
        Self {
            model,
            messages: messages.iter().map(ApiMessage::from).collect(),
            tools: tools.iter().map(ApiTool::from).collect(),
            temperature,
            stream: true,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiMessage<'a> {
    pub role: Role,
    /// `null` for an assistant message that only carries tool calls.
    pub content: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ApiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
}

impl<'a> From<&'a Message> for ApiMessage<'a> {
    fn from(message: &'a Message) -> Self {
        let tool_calls: Vec<ApiToolCall> = message
            .tool_calls
            .iter()
            .flatten()
            .map(ApiToolCall::from)
            .collect();
        let content = if message.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(message.content.as_str())
        };

        Self {
            role: message.role,
            content,
            tool_calls,
            tool_call_id: message.tool_call_id.as_deref(),
            name: message.name.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiToolCall {
    pub id: String,
    pub r#type: &'static str,
    pub function: ApiFunctionCall,
}

impl From<&ToolCallRequest> for ApiToolCall {
    fn from(call: &ToolCallRequest) -> Self {
        Self {
            id: call.call_id.clone(),
            r#type: "function",
            function: ApiFunctionCall {
                name: call.tool_name.clone(),
                arguments: call.arguments.as_text(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiTool<'a> {
    pub r#type: &'static str,
    pub function: ApiFunction<'a>,
}

impl<'a> From<&'a ToolDefinition> for ApiTool<'a> {
    fn from(tool: &'a ToolDefinition) -> Self {
        Self {
            r#type: "function",
            function: ApiFunction {
                name: &tool.name,
                description: &tool.description,
                parameters: &tool.parameters,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ApiFunction<'a> {
    pub name: &'a str,
    pub description: &'a str,
    pub parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ApiErrorEnvelope>(body).ok()?;
    Some(parsed.error.message)
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    index: Option<u32>,
    id: Option<String>,
    function: Option<DeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct DeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds raw SSE bytes into text deltas and, at the end, one
/// [`BackendResponse`].
///
/// Tool-call fragments are keyed by their `index`; argument fragments are
/// concatenated verbatim and parsed later by the loop.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    buffer: Vec<u8>,
    content: String,
    tool_calls: BTreeMap<u32, PartialCall>,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the response body; returns the text deltas of every
    /// complete line it finished.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(bytes);

        let mut deltas = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if self.done {
                continue;
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(delta) = self.apply_line(line.trim())? {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }

    /// True once `data: [DONE]` was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Flush any unterminated last line and build the response.
    pub fn finish(mut self) -> Result<(Option<String>, BackendResponse)> {
        let mut trailing = None;
        if !self.buffer.is_empty() && !self.done {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            trailing = self.apply_line(line.trim())?;
        }

        let tool_calls = self
            .tool_calls
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| {
                ToolCallRequest::new(
                    call.id.unwrap_or_else(|| format!("call_{}", index + 1)),
                    call.name,
                    ToolArguments::Raw(call.arguments),
                )
            })
            .collect();

        Ok((
            trailing,
            BackendResponse {
                content: self.content,
                tool_calls,
            },
        ))
    }

    fn apply_line(&mut self, line: &str) -> Result<Option<String>> {
        let Some(payload) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(None);
        }
        if payload == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let chunk: StreamChunk = serde_json::from_str(payload).map_err(|e| {
            Error::BackendInvocation(format!("malformed stream chunk: {e}"))
        })?;

        let mut delta_text: Option<String> = None;
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.content.push_str(&content);
                delta_text = Some(match delta_text {
                    Some(previous) => previous + &content,
                    None => content,
                });
            }

            for delta in choice.delta.tool_calls.into_iter().flatten() {
                let entry = self.tool_calls.entry(delta.index.unwrap_or(0)).or_default();
                if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                    entry.id = Some(id);
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                        entry.name = name;
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(delta_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> String {
        format!("data: {value}\n\n")
    }

    #[test]
    fn test_text_deltas_accumulate() {
        let mut acc = StreamAccumulator::new();
        let body = data(json!({"choices": [{"delta": {"content": "Hel"}}]}))
            + &data(json!({"choices": [{"delta": {"content": "lo"}}]}))
            + "data: [DONE]\n\n";

        let deltas = acc.feed(body.as_bytes()).unwrap();
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert!(acc.is_done());

        let (trailing, response) = acc.finish().unwrap();
        assert!(trailing.is_none());
        assert_eq!(response.content, "Hello");
        assert!(!response.has_tool_calls());
    }

    #[test]
    fn test_lines_split_across_chunks() {
        let mut acc = StreamAccumulator::new();
        let body = data(json!({"choices": [{"delta": {"content": "héllo"}}]}));
        let bytes = body.as_bytes();
        let split = body.find('é').unwrap() + 1;

        assert!(acc.feed(&bytes[..split]).unwrap().is_empty());
        assert_eq!(acc.feed(&bytes[split..]).unwrap(), vec!["héllo"]);
    }

    #[test]
    fn test_tool_call_fragments_merge_by_index() {
        let mut acc = StreamAccumulator::new();
        let body = data(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "search", "arguments": "{\"q\":"}}
            ]}}]}))
            + &data(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 1, "id": "call_b", "function": {"name": "lookup", "arguments": ""}}
            ]}}]}))
            + &data(json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"x\"}"}}
            ]}}]}));

        acc.feed(body.as_bytes()).unwrap();
        let (_, response) = acc.finish().unwrap();

        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].call_id, "call_a");
        assert_eq!(response.tool_calls[0].tool_name, "search");
        assert_eq!(
            response.tool_calls[0].arguments,
            ToolArguments::Raw(r#"{"q":"x"}"#.to_string())
        );
        assert_eq!(response.tool_calls[1].tool_name, "lookup");
    }

    #[test]
    fn test_unterminated_last_line_is_flushed() {
        let mut acc = StreamAccumulator::new();
        let line = format!("data: {}", json!({"choices": [{"delta": {"content": "tail"}}]}));
        assert!(acc.feed(line.as_bytes()).unwrap().is_empty());

        let (trailing, response) = acc.finish().unwrap();
        assert_eq!(trailing.as_deref(), Some("tail"));
        assert_eq!(response.content, "tail");
    }

    #[test]
    fn test_malformed_chunk_is_backend_error() {
        let mut acc = StreamAccumulator::new();
        let err = acc.feed(b"data: {oops\n").unwrap_err();
        assert!(matches!(err, Error::BackendInvocation(_)));
    }

    #[test]
    fn test_comments_and_usage_chunks_are_ignored() {
        let mut acc = StreamAccumulator::new();
        let body = String::from(": keep-alive\n\n") + &data(json!({"choices": [], "usage": {"total_tokens": 3}}));
        assert!(acc.feed(body.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_assistant_tool_message_serializes_null_content() {
        let call = ToolCallRequest::new("c1", "search", ToolArguments::Raw("{}".to_string()));
        let message = Message::assistant_with_tools("", vec![call]);
        let value = serde_json::to_value(ApiMessage::from(&message)).unwrap();

        assert_eq!(value["role"], "assistant");
        assert!(value["content"].is_null());
        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert_eq!(value["tool_calls"][0]["function"]["arguments"], "{}");
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error":{"message":"Invalid API key","type":"auth"}}"#;
        assert_eq!(extract_error_message(body).as_deref(), Some("Invalid API key"));
        assert!(extract_error_message("gateway down").is_none());
    }
}
