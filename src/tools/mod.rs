//! Tools module - capabilities exposed by external tool providers
//!
//! A provider (an MCP server, or an in-process [`LocalToolProvider`]) lists
//! its tools once at startup. The [`ToolRegistry`] gives every tool a safe,
//! unique name and keeps a handle back to the provider for invocation.

mod local;
pub mod mcp;
mod registry;

pub use local::LocalToolProvider;
pub use mcp::McpHttpProvider;
pub use registry::{sanitize_tool_name, ServerTools, ToolCatalog, ToolInfo, ToolRegistry};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// A tool as its provider describes it, before registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object"})
}

/// Per-call context forwarded to providers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolContext {
    pub session_id: String,
    pub correlation_id: Option<i64>,
}

/// Tool provider - a remote or local source of callable tools
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// List the tools this provider exposes
    async fn list_tools(&self) -> Result<Vec<ToolSpec>>;

    /// Invoke a tool by the provider's own name
    async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<String>;
}

/// Tool definition handed to the model backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A registered tool.
///
/// `name` is the sanitized, process-unique name the model sees;
/// `original_name` is what the provider expects on invocation.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub original_name: String,
    pub description: String,
    pub parameter_schema: Value,
    pub provider_group: String,
    provider: Arc<dyn ToolProvider>,
}

impl ToolDescriptor {
    pub(crate) fn new(
        name: String,
        spec: ToolSpec,
        provider_group: &str,
        provider: Arc<dyn ToolProvider>,
    ) -> Self {
        Self {
            name,
            original_name: spec.name,
            description: spec.description,
            parameter_schema: spec.input_schema,
            provider_group: provider_group.to_string(),
            provider,
        }
    }

    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameter_schema.clone(),
        }
    }

    pub async fn invoke(&self, arguments: Map<String, Value>, context: &ToolContext) -> Result<String> {
        self.provider
            .invoke(&self.original_name, arguments, context)
            .await
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("original_name", &self.original_name)
            .field("provider_group", &self.provider_group)
            .finish_non_exhaustive()
    }
}
