//! `finish_task`: executor-only sentinel terminating the executor's loop with
//! a natural-language summary. See `crate::agent`'s special-case handling.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::tool::{ParameterType, Tool, ToolParameter};

const PARAMETERS: &[ToolParameter] = &[ToolParameter::new(
    "summary",
    ParameterType::String,
    "a summary of what was accomplished and any findings",
)];

#[derive(Default)]
pub struct FinishTaskTool {
    required: HashSet<&'static str>,
}

impl FinishTaskTool {
    pub fn new() -> Self {
        let mut required = HashSet::new();
        required.insert("summary");
        FinishTaskTool { required }
    }
}

#[async_trait]
impl Tool for FinishTaskTool {
    fn name(&self) -> &str {
        "finish_task"
    }

    fn description(&self) -> &str {
        "Finish the delegated task and report a summary back to the planner."
    }

    fn parameters(&self) -> &[ToolParameter] {
        PARAMETERS
    }

    fn required_parameters(&self) -> &HashSet<&'static str> {
        &self.required
    }

    async fn call(&self, _args: Map<String, Value>) -> Value {
        json!({"error": "finish_task is intercepted by the agent loop and should not be executed directly"})
    }
}
