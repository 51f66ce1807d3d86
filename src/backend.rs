//! The `Backend` interface: one `send` operation plus argument parsing.
//! Concrete LLM wire protocols are out of scope for this crate; see
//! [`scripted::ScriptedBackend`] for the one reference implementation it
//! ships (used by tests and as a worked example of the trait).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;

use crate::message::{Message, ToolCall, ToolResult};
use crate::tool::{ParameterType, Tool};

pub mod scripted;

/// Token accounting for one completion; drives cost computation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Per-million-token USD pricing for a model, used to turn a [`TokenUsage`]
/// into a dollar cost. Supplements the spec's cost formula with the concrete
/// multiplier shape a real `Backend` implementation needs.
#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_price_per_million: f64,
    pub output_price_per_million: f64,
}

impl ModelPricing {
    pub fn cost(&self, usage: TokenUsage) -> f64 {
        usage.prompt_tokens as f64 / 1_000_000.0 * self.input_price_per_million
            + usage.completion_tokens as f64 / 1_000_000.0 * self.output_price_per_million
    }
}

/// The outcome of one `Backend::send` call. At most one `tool_call` may be
/// set. `cost` is 0.0 whenever the provider reported no usage (never
/// inferred). `error` carries recoverable provider failures (rate limit,
/// bad request) instead of them being thrown.
#[derive(Debug, Clone, Default)]
pub struct BackendResponse {
    pub content: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub cost: f64,
    pub error: Option<String>,
}

/// Uppercased tag naming a backend in an API-key file (`TAG=KEY` lines); the
/// file format itself is out of core scope, this enum only names the
/// documented tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTag {
    OpenAi,
    Anthropic,
    Together,
    Gemini,
}

impl BackendTag {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendTag::OpenAi => "OPENAI",
            BackendTag::Anthropic => "ANTHROPIC",
            BackendTag::Together => "TOGETHER",
            BackendTag::Gemini => "GEMINI",
        }
    }
}

/// Transport-level failure. Recoverable conditions (rate limit, bad request)
/// are surfaced through `BackendResponse::error` instead, never through this
/// type; `BackendError` is reserved for calls that could not be attempted at
/// all (e.g. a malformed request the implementation cannot even send).
#[derive(Debug)]
pub struct BackendError(pub String);

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend error: {}", self.0)
    }
}
impl std::error::Error for BackendError {}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn send(&self, messages: &[Message]) -> Result<BackendResponse, BackendError>;

    /// Model identifier this backend instance is configured to call; embedded
    /// in the run log's per-agent `*_model` field.
    fn model(&self) -> &str;
}

/// Decodes `call.arguments` (JSON text if it's a string, or an already-decoded
/// object) against `tool.required_parameters()`/`tool.parameters()`: verifies
/// every required parameter is present, drops unknown parameters, and
/// coerces values whose declared schema type is `number` to floating point.
///
/// Returns `Ok(call)` with `parsed_arguments` populated on success, or
/// `Err(result)` — a `ToolResult{id: call.id, result: {"error": ...}}` ready
/// to append as an observation — on failure. Never panics on malformed input.
pub fn parse_tool_arguments(tool: &dyn Tool, call: ToolCall) -> Result<ToolCall, ToolResult> {
    let decoded: serde_json::Map<String, Value> = match &call.arguments {
        None => serde_json::Map::new(),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(m)) => m,
            Ok(_) => return Err(call.error("arguments must decode to a JSON object")),
            Err(e) => return Err(call.error(format!("invalid JSON arguments: {}", e))),
        },
        Some(Value::Object(m)) => m.clone(),
        Some(_) => return Err(call.error("arguments must be a JSON object or object-encoded string")),
    };

    let present: HashSet<&str> = decoded.keys().map(String::as_str).collect();
    let required = tool.required_parameters();
    let missing: Vec<&str> = required
        .iter()
        .filter(|r| !present.contains(*r))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(call.error(format!(
            "Missing required parameters for {}: {}",
            tool.name(),
            missing.join(", ")
        )));
    }

    // Drop unknown parameters and coerce declared `number` types to f64.
    let known: std::collections::HashMap<&str, ParameterType> = tool
        .parameters()
        .iter()
        .map(|p| (p.name, p.param_type))
        .collect();
    let mut parsed = serde_json::Map::new();
    for (key, value) in decoded {
        if let Some(&param_type) = known.get(key.as_str()) {
            let coerced = if param_type == ParameterType::Number {
                coerce_number(value)
            } else {
                value
            };
            parsed.insert(key, coerced);
        }
        // Unknown parameters are silently dropped, per the spec contract.
    }

    Ok(call.with_parsed(parsed))
}

fn coerce_number(value: Value) -> Value {
    match value {
        Value::Number(n) => serde_json::Number::from_f64(n.as_f64().unwrap_or(0.0))
            .map(Value::Number)
            .unwrap_or(Value::Number(n)),
        Value::String(s) => s
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(s)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::run_command::RunCommandTool;
    use std::sync::Arc;

    struct NoopEnv;
    #[async_trait]
    impl crate::tool::ToolEnvironment for NoopEnv {
        async fn exec(&self, _c: &str, _t: std::time::Duration) -> crate::container_runtime::ExecResult {
            unimplemented!()
        }
        async fn copy_in(&self, _h: &std::path::Path, _c: &str) -> std::io::Result<String> {
            unimplemented!()
        }
        fn mark_solved(&self) {}
        fn mark_giveup(&self) {}
        fn flag(&self) -> String {
            String::new()
        }
    }

    #[test]
    fn missing_required_parameter_errors() {
        let tool = RunCommandTool::new(Arc::new(NoopEnv));
        let call = ToolCall::new("run_command", Some(Value::String("{}".into())));
        let err = parse_tool_arguments(&tool, call).unwrap_err();
        assert!(err.is_error());
    }

    #[test]
    fn unknown_parameters_are_dropped() {
        let tool = RunCommandTool::new(Arc::new(NoopEnv));
        let call = ToolCall::new(
            "run_command",
            Some(serde_json::json!({"command": "ls", "bogus": "x"})),
        );
        let parsed = parse_tool_arguments(&tool, call).unwrap();
        let args = parsed.parsed_arguments.unwrap();
        assert!(args.contains_key("command"));
        assert!(!args.contains_key("bogus"));
    }

    #[test]
    fn number_type_is_coerced_to_float() {
        let tool = RunCommandTool::new(Arc::new(NoopEnv));
        let call = ToolCall::new(
            "run_command",
            Some(serde_json::json!({"command": "ls", "timeout": "5"})),
        );
        let parsed = parse_tool_arguments(&tool, call).unwrap();
        let args = parsed.parsed_arguments.unwrap();
        assert_eq!(args.get("timeout").unwrap().as_f64(), Some(5.0));
    }
}
