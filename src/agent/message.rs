//! Transcript message types passed to the model backend

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::Error;

/// Key under which unparseable raw argument text is handed to a tool.
pub const RAW_ARGUMENTS_KEY: &str = "$raw";

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,

    /// Tool call ID (for tool responses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name (for tool responses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool calls made by assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Create an assistant message with tool calls
    pub fn assistant_with_tools(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Create a tool result message
    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
            ..Self::plain(Role::Tool, result)
        }
    }
}

/// Tool arguments as delivered by the backend.
///
/// Some backends hand over an already-decoded object, others the raw JSON
/// text the model produced. Both are resolved once, in [`ToolArguments::resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    Structured(Map<String, Value>),
    Raw(String),
}

impl ToolArguments {
    /// Parse into an argument object.
    ///
    /// Empty raw text is an empty object; anything that is not a JSON object
    /// is an [`Error::ArgumentParse`].
    pub fn parse(&self) -> crate::Result<Map<String, Value>> {
        match self {
            Self::Structured(map) => Ok(map.clone()),
            Self::Raw(text) if text.trim().is_empty() => Ok(Map::new()),
            Self::Raw(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(Error::ArgumentParse(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                ))),
                Err(e) => Err(Error::ArgumentParse(e.to_string())),
            },
        }
    }

    /// Parse, substituting `{"$raw": text}` when the text is not an object.
    pub fn resolve(&self) -> Map<String, Value> {
        match self.parse() {
            Ok(map) => map,
            Err(e) => {
                warn!("Falling back to raw tool arguments: {}", e);
                let mut map = Map::new();
                map.insert(RAW_ARGUMENTS_KEY.to_string(), Value::String(self.as_text()));
                map
            }
        }
    }

    /// Argument text as a backend expects it on the wire.
    pub fn as_text(&self) -> String {
        match self {
            Self::Structured(map) => Value::Object(map.clone()).to_string(),
            Self::Raw(text) => text.clone(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A tool call request from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: ToolArguments,
}

impl ToolCallRequest {
    pub fn new(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: ToolArguments,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// One prior exchange supplied by the history store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_input: String,
    #[serde(default)]
    pub ai_response: Option<String>,
}

impl ConversationTurn {
    pub fn new(user_input: impl Into<String>, ai_response: Option<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ai_response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(msg.tool_calls.is_none());
    }

    #[test]
    fn test_tool_result_carries_id_and_name() {
        let msg = Message::tool_result("call_1", "search", "42");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("search"));
        assert_eq!(msg.content, "42");
    }

    #[test]
    fn test_raw_object_arguments_parse() {
        let args = ToolArguments::Raw(r#"{"q":"x"}"#.to_string());
        assert_eq!(args.resolve().get("q"), Some(&json!("x")));
    }

    #[test]
    fn test_structured_arguments_pass_through() {
        let mut map = Map::new();
        map.insert("q".to_string(), json!("x"));
        let args = ToolArguments::Structured(map.clone());
        assert_eq!(args.resolve(), map);
        assert_eq!(args.as_text(), r#"{"q":"x"}"#);
    }

    #[test]
    fn test_empty_raw_arguments_are_empty_object() {
        assert!(ToolArguments::Raw("  ".to_string()).resolve().is_empty());
    }

    #[test]
    fn test_invalid_arguments_fall_back_to_sentinel() {
        let args = ToolArguments::Raw("{not json".to_string());
        assert!(matches!(args.parse(), Err(Error::ArgumentParse(_))));

        let resolved = args.resolve();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved.get(RAW_ARGUMENTS_KEY), Some(&json!("{not json")));
    }

    #[test]
    fn test_non_object_arguments_fall_back_to_sentinel() {
        let resolved = ToolArguments::Raw("[1,2]".to_string()).resolve();
        assert_eq!(resolved.get(RAW_ARGUMENTS_KEY), Some(&json!("[1,2]")));
    }
}
