//! `run_command`: runs a shell command inside the working container.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::tool::{ParameterType, Tool, ToolEnvironment, ToolParameter};

const PARAMETERS: &[ToolParameter] = &[
    ToolParameter::new(
        "command",
        ParameterType::String,
        "the command to run",
    ),
    ToolParameter::new(
        "timeout",
        ParameterType::Number,
        "timeout in seconds (default 300)",
    ),
];

pub struct RunCommandTool {
    env: Arc<dyn ToolEnvironment>,
    required: HashSet<&'static str>,
}

impl RunCommandTool {
    pub fn new(env: Arc<dyn ToolEnvironment>) -> Self {
        let mut required = HashSet::new();
        required.insert("command");
        RunCommandTool { env, required }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the Docker container. Returns stdout, stderr, returncode, and timed_out."
    }

    fn parameters(&self) -> &[ToolParameter] {
        PARAMETERS
    }

    fn required_parameters(&self) -> &HashSet<&'static str> {
        &self.required
    }

    async fn call(&self, args: Map<String, Value>) -> Value {
        let command = match args.get("command").and_then(Value::as_str) {
            Some(c) => c,
            None => return json!({"error": "No command provided"}),
        };
        let timeout_secs = args
            .get("timeout")
            .and_then(Value::as_f64)
            .unwrap_or(300.0);
        let result = self
            .env
            .exec(command, Duration::from_secs_f64(timeout_secs.max(0.0)))
            .await;
        json!({
            "stdout": result.stdout,
            "stderr": result.stderr,
            "returncode": result.returncode,
            "timed_out": result.timed_out,
        })
    }
}
