//! What gets saved for one turn, assembled from its event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::events::StreamEvent;
use crate::agent::message::ConversationTurn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_id: String,
    pub tool_name: String,
    pub tool_args: Value,
    pub progress: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool_id: String,
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A completed (or interrupted) turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub user_input: String,
    pub ai_response: String,
    pub tools_called: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolResultRecord>,
    pub correlation_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(user_input: impl Into<String>, correlation_id: Option<i64>) -> Self {
        Self {
            user_input: user_input.into(),
            ai_response: String::new(),
            tools_called: Vec::new(),
            tool_results: Vec::new(),
            correlation_id,
            created_at: Utc::now(),
        }
    }

    /// Fold one emitted event into the record.
    pub fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ToolStart {
                tool_id,
                tool_name,
                tool_args,
                progress,
            } => self.tools_called.push(ToolCallRecord {
                tool_id: tool_id.clone(),
                tool_name: tool_name.clone(),
                tool_args: tool_args.clone(),
                progress: progress.clone(),
            }),
            StreamEvent::ToolEnd {
                tool_id,
                tool_name,
                result,
            } => self.tool_results.push(ToolResultRecord {
                tool_id: tool_id.clone(),
                tool_name: tool_name.clone(),
                success: true,
                result: Some(result.clone()),
                error: None,
            }),
            StreamEvent::ToolError {
                tool_id,
                tool_name,
                error,
            } => self.tool_results.push(ToolResultRecord {
                tool_id: tool_id.clone(),
                tool_name: tool_name.clone(),
                success: false,
                result: None,
                error: Some(error.clone()),
            }),
            StreamEvent::AiResponseChunk { content } => self.ai_response.push_str(content),
            _ => {}
        }
    }

    /// An empty answer after failed tools is replaced by an error summary.
    pub fn finalize(mut self) -> Self {
        if self.ai_response.is_empty() {
            let errors: Vec<&str> = self
                .tool_results
                .iter()
                .filter(|r| !r.success)
                .map(|r| r.error.as_deref().unwrap_or("unknown error"))
                .collect();
            if !errors.is_empty() {
                self.ai_response = format!("Errors occurred while processing:\n{}", errors.join("\n"));
            }
        }
        self
    }

    /// The part of the record fed back as history.
    pub fn to_turn(&self) -> ConversationTurn {
        let answer = Some(self.ai_response.clone()).filter(|a| !a.is_empty());
        ConversationTurn::new(&self.user_input, answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_observe_collects_tools_and_answer() {
        let mut record = TurnRecord::new("q", Some(9));
        record.observe(&StreamEvent::Status {
            content: "Generating...".to_string(),
        });
        record.observe(&StreamEvent::ToolStart {
            tool_id: "c1".to_string(),
            tool_name: "search".to_string(),
            tool_args: json!({"q": "x"}),
            progress: "1/1".to_string(),
        });
        record.observe(&StreamEvent::ToolEnd {
            tool_id: "c1".to_string(),
            tool_name: "search".to_string(),
            result: "42".to_string(),
        });
        record.observe(&StreamEvent::AiResponseChunk {
            content: "It is ".to_string(),
        });
        record.observe(&StreamEvent::AiResponseChunk {
            content: "42".to_string(),
        });

        let record = record.finalize();
        assert_eq!(record.ai_response, "It is 42");
        assert_eq!(record.tools_called[0].tool_args["q"], "x");
        assert!(record.tool_results[0].success);
        assert_eq!(record.to_turn().ai_response.as_deref(), Some("It is 42"));
    }

    #[test]
    fn test_empty_answer_summarises_tool_errors() {
        let mut record = TurnRecord::new("q", None);
        record.observe(&StreamEvent::ToolError {
            tool_id: "c1".to_string(),
            tool_name: "search".to_string(),
            error: "Tool not found: search".to_string(),
        });

        let record = record.finalize();
        assert_eq!(
            record.ai_response,
            "Errors occurred while processing:\nTool not found: search"
        );
    }

    #[test]
    fn test_empty_answer_without_errors_stays_empty() {
        let record = TurnRecord::new("q", None).finalize();
        assert!(record.ai_response.is_empty());
        assert_eq!(record.to_turn().ai_response, None);
    }
}
