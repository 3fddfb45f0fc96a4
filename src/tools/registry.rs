//! Tool registry - sanitized, collision-free names over all providers

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ToolDefinition, ToolDescriptor, ToolProvider, ToolSpec};
use crate::error::Error;
use crate::Result;

/// Replace anything outside `[A-Za-z0-9_-]` with `_`; empty becomes `tool`.
pub fn sanitize_tool_name(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let invalid =
        INVALID.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]").expect("valid tool name pattern"));

    let sanitized = invalid.replace_all(name, "_");
    if sanitized.is_empty() {
        "tool".to_string()
    } else {
        sanitized.into_owned()
    }
}

#[derive(Default)]
struct RegistryState {
    tools: Vec<Arc<ToolDescriptor>>,
    by_name: HashMap<String, usize>,
    groups: Vec<(String, Vec<usize>)>,
    /// Every name ever handed out; never shrinks.
    used_names: HashSet<String>,
}

impl RegistryState {
    fn unique_name(&mut self, original: &str) -> String {
        let base = sanitize_tool_name(original);
        let mut candidate = base.clone();
        let mut index = 1;
        while self.used_names.contains(&candidate) {
            index += 1;
            candidate = format!("{base}_{index}");
        }
        self.used_names.insert(candidate.clone());
        candidate
    }

    fn group_mut(&mut self, group: &str) -> &mut Vec<usize> {
        let position = match self.groups.iter().position(|(name, _)| name == group) {
            Some(position) => position,
            None => {
                self.groups.push((group.to_string(), Vec::new()));
                self.groups.len() - 1
            }
        };
        &mut self.groups[position].1
    }
}

/// Registry of every tool known to the process.
///
/// Shared read-mostly across sessions; registration takes the write lock
/// only for the in-memory append, never across a provider call.
#[derive(Default)]
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider's tools under `group`, returning the assigned names.
    pub fn register_provider(
        &self,
        group: &str,
        provider: Arc<dyn ToolProvider>,
        specs: Vec<ToolSpec>,
    ) -> Result<Vec<String>> {
        let mut state = self.write()?;
        state.group_mut(group);

        let mut names = Vec::with_capacity(specs.len());
        for spec in specs {
            let name = state.unique_name(&spec.name);
            if name != spec.name {
                info!("Renamed tool '{}' -> '{}'", spec.name, name);
            }

            let index = state.tools.len();
            let descriptor = ToolDescriptor::new(name.clone(), spec, group, Arc::clone(&provider));
            state.tools.push(Arc::new(descriptor));
            state.by_name.insert(name.clone(), index);
            state.group_mut(group).push(index);
            names.push(name);
        }

        info!("Registered {} tools from '{}'", names.len(), group);
        Ok(names)
    }

    /// Ask a provider for its tools and register them.
    ///
    /// A provider that fails to list is registered as an empty group.
    pub async fn discover(&self, group: &str, provider: Arc<dyn ToolProvider>) -> Result<usize> {
        let specs = match provider.list_tools().await {
            Ok(specs) => specs,
            Err(e) => {
                warn!("Failed to list tools from '{}': {}", group, e);
                Vec::new()
            }
        };
        Ok(self.register_provider(group, provider, specs)?.len())
    }

    /// Exact, case-sensitive lookup
    pub fn find(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        let state = self.read().ok()?;
        let found = state.by_name.get(name).map(|&i| Arc::clone(&state.tools[i]));
        if found.is_none() {
            debug!("Tool lookup missed: {}", name);
        }
        found
    }

    /// Definitions for the model backend, in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.read()
            .map(|state| state.tools.iter().map(|t| t.to_definition()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|state| state.tools.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grouped listing for display
    pub fn describe_all(&self) -> ToolCatalog {
        let Ok(state) = self.read() else {
            return ToolCatalog::default();
        };

        let servers: Vec<ServerTools> = state
            .groups
            .iter()
            .map(|(group, indices)| {
                let tools: Vec<ToolInfo> = indices
                    .iter()
                    .map(|&i| ToolInfo::from_descriptor(&state.tools[i]))
                    .collect();
                ServerTools {
                    name: group.clone(),
                    tool_count: tools.len(),
                    tools,
                }
            })
            .collect();

        ToolCatalog {
            total_tools: servers.iter().map(|s| s.tool_count).sum(),
            server_count: servers.len(),
            servers,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|_| Error::Other("tool registry lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|_| Error::Other("tool registry lock poisoned".to_string()))
    }
}

/// Tools grouped by provider
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCatalog {
    pub servers: Vec<ServerTools>,
    pub total_tools: usize,
    pub server_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerTools {
    pub name: String,
    pub tools: Vec<ToolInfo>,
    pub tool_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub required: Vec<String>,
}

impl ToolInfo {
    /// Schema details are best effort: a schema without `properties`
    /// yields empty parameters rather than an error.
    fn from_descriptor(tool: &ToolDescriptor) -> Self {
        let schema = &tool.parameter_schema;
        let parameters = schema
            .get("properties")
            .filter(|p| p.is_object())
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters,
            required,
        }
    }
}
