//! `create_file`: writes contents to a host-side temp file, then copies it
//! into the container at the requested path.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use crate::tool::{ParameterType, Tool, ToolEnvironment, ToolParameter};

const PARAMETERS: &[ToolParameter] = &[
    ToolParameter::new("path", ParameterType::String, "destination path inside the container"),
    ToolParameter::new("contents", ParameterType::String, "file contents to write"),
];

pub struct CreateFileTool {
    env: Arc<dyn ToolEnvironment>,
    required: HashSet<&'static str>,
}

impl CreateFileTool {
    pub fn new(env: Arc<dyn ToolEnvironment>) -> Self {
        let mut required = HashSet::new();
        required.insert("path");
        required.insert("contents");
        CreateFileTool { env, required }
    }
}

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Write a file with the given contents inside the challenge container."
    }

    fn parameters(&self) -> &[ToolParameter] {
        PARAMETERS
    }

    fn required_parameters(&self) -> &HashSet<&'static str> {
        &self.required
    }

    async fn call(&self, args: Map<String, Value>) -> Value {
        let path = match args.get("path").and_then(Value::as_str) {
            Some(p) => p,
            None => return json!({"error": "No path provided"}),
        };
        let contents = match args.get("contents").and_then(Value::as_str) {
            Some(c) => c,
            None => return json!({"error": "No contents provided"}),
        };

        let mut tmp = match tempfile::NamedTempFile::new() {
            Ok(t) => t,
            Err(e) => return json!({"error": format!("failed to create temp file: {}", e)}),
        };
        if let Err(e) = tmp.write_all(contents.as_bytes()) {
            return json!({"error": format!("failed to write temp file: {}", e)});
        }

        match self.env.copy_in(tmp.path(), path).await {
            Ok(final_path) => json!({"success": true, "path": final_path}),
            Err(e) => json!({"error": format!("failed to copy file into container: {}", e)}),
        }
    }
}
