//! `generate_prompt`: autoprompter-only sentinel capturing the planner's
//! seed prompt. See `crate::agent`'s special-case handling.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::tool::{ParameterType, Tool, ToolParameter};

const PARAMETERS: &[ToolParameter] = &[ToolParameter::new(
    "prompt",
    ParameterType::String,
    "the initial prompt to seed the planner with",
)];

#[derive(Default)]
pub struct GeneratePromptTool {
    required: HashSet<&'static str>,
}

impl GeneratePromptTool {
    pub fn new() -> Self {
        let mut required = HashSet::new();
        required.insert("prompt");
        GeneratePromptTool { required }
    }
}

#[async_trait]
impl Tool for GeneratePromptTool {
    fn name(&self) -> &str {
        "generate_prompt"
    }

    fn description(&self) -> &str {
        "Generate the initial prompt that will seed the planner agent."
    }

    fn parameters(&self) -> &[ToolParameter] {
        PARAMETERS
    }

    fn required_parameters(&self) -> &HashSet<&'static str> {
        &self.required
    }

    async fn call(&self, _args: Map<String, Value>) -> Value {
        json!({"error": "generate_prompt is intercepted by the agent loop and should not be executed directly"})
    }
}
