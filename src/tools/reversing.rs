//! `disassemble` / `decompile`: Ghidra-headless-backed binary analysis.
//!
//! Grounded on the original source's `GhidraBaseTool`: both tools shell a
//! fixed script into the container via `exec`, parse its JSON stdout, and
//! cache the whole-binary analysis so repeated queries against the same
//! binary don't re-run Ghidra. Function lookup falls back through a short
//! list of common entry-point aliases, and additionally resolves radare2-style
//! `fcn.<hexaddr>` names through an address index.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::tool::{ParameterType, Tool, ToolEnvironment, ToolParameter};

const DISASSEMBLE_SCRIPT: &str = "/opt/ghidra/customScripts/disassemble.sh";
const DECOMPILE_SCRIPT: &str = "/opt/ghidra/customScripts/decompile.sh";
const GHIDRA_TIMEOUT: Duration = Duration::from_secs(120);

const PARAMETERS: &[ToolParameter] = &[
    ToolParameter::new("binary", ParameterType::String, "path of the binary"),
    ToolParameter::new(
        "function",
        ParameterType::String,
        "function name (default 'main')",
    ),
];

fn fcn_addr_pattern() -> Regex {
    Regex::new(r"^fcn\.([0-9a-f]+)$").expect("static regex")
}

/// Looks up `function` in a cached Ghidra analysis result shaped
/// `{"functions": {name: ...}, "addresses": {addr: name}}`.
fn find_function<'a>(analysis: &'a Value, function: &str) -> Option<&'a Value> {
    let functions = analysis.get("functions")?.as_object()?;
    if let Some(found) = functions.get(function) {
        return Some(found);
    }
    if function == "main" {
        for alias in ["_start", "invoke_main", "entry"] {
            if let Some(found) = functions.get(alias) {
                return Some(found);
            }
        }
    }
    if let Some(caps) = fcn_addr_pattern().captures(function) {
        let addr = &caps[1];
        let addresses = analysis.get("addresses")?.as_object()?;
        let name = addresses.get(addr)?.as_str()?;
        return functions.get(name);
    }
    None
}

async fn run_ghidra(
    env: &dyn ToolEnvironment,
    script: &str,
    binary: &str,
) -> Result<Value, String> {
    log::debug!(target: "reversing", "running Ghidra script {} for {}", script, binary);
    let command = format!("{} {}", script, binary);
    let result = env.exec(&command, GHIDRA_TIMEOUT).await;
    if result.returncode != Some(0) {
        log::debug!(target: "reversing", "Ghidra failed: {}", result.stdout);
        return Err(format!(
            "Failed to run Ghidra for {}! Make sure the file exists and is a binary file.",
            binary
        ));
    }
    serde_json::from_str(&result.stdout).map_err(|e| format!("malformed Ghidra output: {}", e))
}

struct GhidraCache {
    cache: Mutex<std::collections::HashMap<String, Value>>,
}

impl GhidraCache {
    fn new() -> Self {
        GhidraCache {
            cache: Mutex::new(std::collections::HashMap::new()),
        }
    }

    async fn get_or_run(
        &self,
        env: &dyn ToolEnvironment,
        script: &str,
        binary: &str,
    ) -> Result<Value, String> {
        let mut guard = self.cache.lock().await;
        if let Some(v) = guard.get(binary) {
            return Ok(v.clone());
        }
        let analysis = run_ghidra(env, script, binary).await?;
        guard.insert(binary.to_string(), analysis.clone());
        Ok(analysis)
    }
}

pub struct DisassembleTool {
    env: Arc<dyn ToolEnvironment>,
    cache: GhidraCache,
    required: HashSet<&'static str>,
}

impl DisassembleTool {
    pub fn new(env: Arc<dyn ToolEnvironment>) -> Self {
        let mut required = HashSet::new();
        required.insert("binary");
        DisassembleTool {
            env,
            cache: GhidraCache::new(),
            required,
        }
    }
}

#[async_trait]
impl Tool for DisassembleTool {
    fn name(&self) -> &str {
        "disassemble"
    }

    fn description(&self) -> &str {
        "Disassemble a function from a binary using Ghidra."
    }

    fn parameters(&self) -> &[ToolParameter] {
        PARAMETERS
    }

    fn required_parameters(&self) -> &HashSet<&'static str> {
        &self.required
    }

    async fn call(&self, args: Map<String, Value>) -> Value {
        let binary = match args.get("binary").and_then(Value::as_str) {
            Some(b) => b,
            None => return json!({"error": "No binary provided"}),
        };
        let function = args.get("function").and_then(Value::as_str).unwrap_or("main");

        let analysis = match self
            .cache
            .get_or_run(self.env.as_ref(), DISASSEMBLE_SCRIPT, binary)
            .await
        {
            Ok(a) => a,
            Err(e) => return json!({"error": e}),
        };
        match find_function(&analysis, function) {
            Some(found) => json!({"disassembly": found}),
            None => json!({"error": format!("Function {} not found in {}", function, binary)}),
        }
    }
}

pub struct DecompileTool {
    env: Arc<dyn ToolEnvironment>,
    cache: GhidraCache,
    required: HashSet<&'static str>,
}

impl DecompileTool {
    pub fn new(env: Arc<dyn ToolEnvironment>) -> Self {
        let mut required = HashSet::new();
        required.insert("binary");
        DecompileTool {
            env,
            cache: GhidraCache::new(),
            required,
        }
    }
}

#[async_trait]
impl Tool for DecompileTool {
    fn name(&self) -> &str {
        "decompile"
    }

    fn description(&self) -> &str {
        "Decompile a function from a binary using Ghidra."
    }

    fn parameters(&self) -> &[ToolParameter] {
        PARAMETERS
    }

    fn required_parameters(&self) -> &HashSet<&'static str> {
        &self.required
    }

    async fn call(&self, args: Map<String, Value>) -> Value {
        let binary = match args.get("binary").and_then(Value::as_str) {
            Some(b) => b,
            None => return json!({"error": "No binary provided"}),
        };
        let function = args.get("function").and_then(Value::as_str).unwrap_or("main");

        let analysis = match self
            .cache
            .get_or_run(self.env.as_ref(), DECOMPILE_SCRIPT, binary)
            .await
        {
            Ok(a) => a,
            Err(e) => return json!({"error": e}),
        };
        match find_function(&analysis, function) {
            Some(found) => json!({"decompilation": found}),
            None => json!({"error": format!("Function {} not found in {}", function, binary)}),
        }
    }
}
