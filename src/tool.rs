//! The `Tool` interface, its self-describing parameter schema, and the
//! registry that groups tool instances into named toolsets per role.
//!
//! Grounded on the donor's `tool_protocol.rs` (`ToolParameter`,
//! `ToolParameterType`, builder-style metadata) generalized to this crate's
//! synchronous-looking `Call(args) -> result` contract, and on §9's
//! "cyclic references" design note: tools never hold a full `Environment`,
//! only the narrow [`ToolEnvironment`] capability handle.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::container_runtime::ExecResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    String,
    Number,
    Boolean,
}

impl ParameterType {
    pub fn json_schema_name(self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: &'static str,
    pub param_type: ParameterType,
    pub description: &'static str,
}

impl ToolParameter {
    pub const fn new(
        name: &'static str,
        param_type: ParameterType,
        description: &'static str,
    ) -> Self {
        ToolParameter {
            name,
            param_type,
            description,
        }
    }
}

/// The narrow back-reference tools hold instead of a full `Environment`: just
/// enough capability to run shell commands, copy files in, and flip the two
/// run-terminating flags. Implemented by [`crate::environment::Environment`].
#[async_trait]
pub trait ToolEnvironment: Send + Sync {
    async fn exec(&self, command: &str, timeout: Duration) -> ExecResult;
    async fn copy_in(&self, host_path: &Path, container_path: &str) -> std::io::Result<String>;
    fn mark_solved(&self);
    fn mark_giveup(&self);
    fn flag(&self) -> String;
}

/// A single capability the model may invoke. Constructing a tool must never
/// have side effects; side effects belong in [`Tool::setup`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> &[ToolParameter];
    fn required_parameters(&self) -> &HashSet<&'static str>;

    async fn setup(&self) -> Result<(), String> {
        Ok(())
    }
    async fn teardown(&self, _error: Option<&str>) {}

    /// Runs the tool. Arguments have already been validated against
    /// `required_parameters` and type-coerced by
    /// [`crate::backend::parse_tool_arguments`]; this method still returns a
    /// JSON object (never panics) so unexpected shapes become `{"error": ..}`
    /// rather than a crash.
    async fn call(&self, args: serde_json::Map<String, Value>) -> Value;
}

/// Aggregates tool instances and the named subsets ("toolsets") that
/// configuration assigns to each role.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    toolsets: HashMap<String, Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn define_toolset(&mut self, name: impl Into<String>, tool_names: Vec<String>) {
        self.toolsets.insert(name.into(), tool_names);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn all(&self) -> &HashMap<String, Arc<dyn Tool>> {
        &self.tools
    }

    /// Returns only the tools named by the given toolset, silently skipping
    /// any name the registry has no tool for.
    pub fn get_toolset(&self, toolset_name: &str) -> HashMap<String, Arc<dyn Tool>> {
        let names = self
            .toolsets
            .get(toolset_name)
            .cloned()
            .unwrap_or_default();
        names
            .into_iter()
            .filter_map(|n| self.tools.get(&n).map(|t| (n, t.clone())))
            .collect()
    }
}
