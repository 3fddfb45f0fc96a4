//! In-process tools backed by async closures

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{ToolContext, ToolProvider, ToolSpec};
use crate::error::Error;
use crate::Result;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;
type Handler = Arc<dyn Fn(Map<String, Value>, ToolContext) -> HandlerFuture + Send + Sync>;

/// A tool provider whose tools run inside this process.
///
/// ```ignore
/// let provider = LocalToolProvider::new().with_tool(
///     ToolSpec::new("echo", "Echo the input", json!({"type": "object"})),
///     |args, _ctx| async move { Ok(Value::Object(args).to_string()) },
/// );
/// ```
#[derive(Default, Clone)]
pub struct LocalToolProvider {
    tools: Vec<(ToolSpec, Handler)>,
}

impl LocalToolProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool. Invocation matches the first tool with the given name.
    pub fn with_tool<F, Fut>(mut self, spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(Map<String, Value>, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args, ctx| Box::pin(handler(args, ctx)));
        self.tools.push((spec, handler));
        self
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|(spec, _)| spec.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolProvider for LocalToolProvider {
    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        Ok(self.specs())
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        context: &ToolContext,
    ) -> Result<String> {
        let handler = self
            .tools
            .iter()
            .find(|(spec, _)| spec.name == name)
            .map(|(_, handler)| Arc::clone(handler))
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        handler(arguments, context.clone()).await
    }
}
