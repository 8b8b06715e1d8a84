//! Name-keyed collection of [`ManagedTool`]s with dispatch.
//!
//! The registry is shared by reference across orchestration calls, so its
//! map sits behind an `RwLock` and every mutation takes `&self`. The lock is
//! only held long enough to clone an `Arc<ManagedTool>`; execution happens
//! outside it, under the tool's own lock discipline.

use super::calculator::CalculatorTool;
use super::core::{ManagedTool, Tool, ToolArgs, ToolStats};
use super::datetime::DateTimeTool;
use super::email::EmailTool;
use super::knowledge::KnowledgeTool;
use super::result::ToolResult;
use super::search::SearchTool;
use super::weather::WeatherTool;
use crate::ToolDef;
use crate::config::ToolsConfig;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<ManagedTool>>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.list_names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ManagedTool>>> {
        self.tools.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ManagedTool>>> {
        self.tools.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&self, tool: impl Tool + 'static) {
        self.register_managed(ManagedTool::new(tool));
    }

    /// Register an already-wrapped tool (custom clock, TTL, validation).
    pub fn register_managed(&self, tool: ManagedTool) {
        self.register_shared(Arc::new(tool));
    }

    /// Register a tool that may also be held elsewhere, keeping its cache
    /// and statistics.
    pub fn register_shared(&self, tool: Arc<ManagedTool>) {
        let name = tool.name().to_string();
        if self.write().insert(name.clone(), tool).is_some() {
            info!("Replaced tool: {name}");
        } else {
            info!("Registered tool: {name}");
        }
    }

    /// A registry holding every built-in tool that `config` enables.
    ///
    /// Built-ins: `calculator`, `date_time`, `weather`, `web_search`,
    /// `wolfram_alpha`, `email`.
    pub fn with_defaults(config: &ToolsConfig) -> Self {
        Self::new()
            .with_if(config.is_enabled("calculator"), CalculatorTool::new())
            .with_if(config.is_enabled("date_time"), DateTimeTool::new())
            .with_if(
                config.is_enabled("weather"),
                WeatherTool::new(config.weather.clone()),
            )
            .with_if(
                config.is_enabled("web_search"),
                SearchTool::new(config.search.clone()),
            )
            .with_if(
                config.is_enabled("wolfram_alpha"),
                KnowledgeTool::new(config.knowledge.clone()),
            )
            .with_if(
                config.is_enabled("email"),
                EmailTool::new(config.email.clone()),
            )
    }

    /// Register a tool (builder pattern).
    pub fn with(self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Conditionally register a tool (builder pattern).
    pub fn with_if(self, condition: bool, tool: impl Tool + 'static) -> Self {
        if condition { self.with(tool) } else { self }
    }

    /// Remove a tool by name. Does nothing if it isn't registered.
    pub fn unregister(&self, name: &str) {
        if self.write().remove(name).is_some() {
            info!("Unregistered tool: {name}");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ManagedTool>> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Schema of every registered tool, sorted by name.
    pub fn schemas(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self
            .read()
            .values()
            .map(|t| t.definition().clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run a tool by name. Unknown names produce an error result.
    pub async fn run(&self, name: &str, arguments: &ToolArgs) -> ToolResult {
        let Some(tool) = self.get(name) else {
            debug!("[tool] no tool named '{name}'");
            return ToolResult::error_result(format!("Tool '{name}' not found"));
        };
        tool.run(arguments).await
    }

    /// Clear every tool's cache and statistics.
    pub fn clear_all_caches(&self) {
        for tool in self.read().values() {
            tool.clear_cache();
        }
    }

    /// Usage statistics for every tool, sorted by name.
    pub fn stats(&self) -> Vec<ToolStats> {
        let mut stats: Vec<ToolStats> = self.read().values().map(|t| t.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
