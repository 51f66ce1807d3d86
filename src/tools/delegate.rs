//! `delegate`: planner-only sentinel. The planner's `RunOneRound` special-cases
//! a call to this tool before dispatch (see `crate::agent`) and hands the task
//! to the coordinator directly; `call` below is never reached in normal
//! operation and exists only so the tool has a schema entry for the backend.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::tool::{ParameterType, Tool, ToolParameter};

const PARAMETERS: &[ToolParameter] = &[ToolParameter::new(
    "task",
    ParameterType::String,
    "a detailed task description.",
)];

#[derive(Default)]
pub struct DelegateTool {
    required: HashSet<&'static str>,
}

impl DelegateTool {
    pub fn new() -> Self {
        let mut required = HashSet::new();
        required.insert("task");
        DelegateTool { required }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate"
    }

    fn description(&self) -> &str {
        "Delegate a task to an executor LLM agent. The executor agent is fully autonomous and equipped with various tools for CTF challenges."
    }

    fn parameters(&self) -> &[ToolParameter] {
        PARAMETERS
    }

    fn required_parameters(&self) -> &HashSet<&'static str> {
        &self.required
    }

    async fn call(&self, _args: Map<String, Value>) -> Value {
        json!({"error": "delegate is intercepted by the coordinator and should not be executed directly"})
    }
}
