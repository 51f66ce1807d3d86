//! `giveup`: lets the model abandon the challenge instead of burning out the budget.
//!
//! `confirm` is accepted but advisory only — per the resolved open question in
//! DESIGN.md, the flag is set unconditionally once the tool is called at all.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::tool::{ParameterType, Tool, ToolEnvironment, ToolParameter};

const PARAMETERS: &[ToolParameter] = &[ToolParameter::new(
    "confirm",
    ParameterType::Boolean,
    "advisory confirmation flag; giveup happens regardless",
)];

pub struct GiveupTool {
    env: Arc<dyn ToolEnvironment>,
    required: HashSet<&'static str>,
}

impl GiveupTool {
    pub fn new(env: Arc<dyn ToolEnvironment>) -> Self {
        GiveupTool {
            env,
            required: HashSet::new(),
        }
    }
}

#[async_trait]
impl Tool for GiveupTool {
    fn name(&self) -> &str {
        "giveup"
    }

    fn description(&self) -> &str {
        "Give up this challenge to terminate it immediately. Use this to stop solving the challenge."
    }

    fn parameters(&self) -> &[ToolParameter] {
        PARAMETERS
    }

    fn required_parameters(&self) -> &HashSet<&'static str> {
        &self.required
    }

    async fn call(&self, _args: Map<String, Value>) -> Value {
        self.env.mark_giveup();
        json!({"success": true})
    }
}
