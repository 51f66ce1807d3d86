//! Message, role, and tool-call/tool-result types shared by every conversation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

/// Generates a fresh, run-unique tool call id.
pub fn new_call_id() -> String {
    Uuid::new_v4().to_string()
}

/// A single invocation of a named tool, in one of three states: unparsed (only
/// `arguments` set), parsed (`parsed_arguments` set), or errored (turned into a
/// `ToolResult` by the caller via [`ToolCall::error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw, backend-native argument form (JSON text, or an already-decoded map).
    pub arguments: Option<Value>,
    /// Present once `ParseToolArguments` has validated and coerced `arguments`.
    pub parsed_arguments: Option<serde_json::Map<String, Value>>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Option<Value>) -> Self {
        ToolCall {
            id: new_call_id(),
            name: name.into(),
            arguments,
            parsed_arguments: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_parsed(mut self, parsed: serde_json::Map<String, Value>) -> Self {
        self.parsed_arguments = Some(parsed);
        self
    }

    /// Convenience constructor for turning a failed call directly into an
    /// observation result, keyed to this call's id and name.
    pub fn error(&self, message: impl Into<String>) -> ToolResult {
        let mut result = serde_json::Map::new();
        result.insert("error".to_string(), Value::String(message.into()));
        ToolResult {
            name: self.name.clone(),
            id: self.id.clone(),
            result: Value::Object(result),
        }
    }

    /// Parameter names actually present on the parsed call, if any.
    pub fn present_parameters(&self) -> HashSet<String> {
        self.parsed_arguments
            .as_ref()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for ToolCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(parsed) = &self.parsed_arguments {
            write!(f, "{}({:?})", self.name, parsed)
        } else if let Some(raw) = &self.arguments {
            write!(f, "{}({})", self.name, raw)
        } else {
            write!(f, "{}([arguments unset])", self.name)
        }
    }
}

/// The outcome of running a tool, always appended to the issuing agent's
/// conversation as an `OBSERVATION`. `result` may be a scalar or a JSON object;
/// the convention used throughout this crate is an object carrying either
/// `{"error": "..."}` or whatever success fields the tool documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub name: String,
    pub id: String,
    pub result: Value,
}

impl ToolResult {
    pub fn for_call(call: &ToolCall, result: Value) -> Self {
        ToolResult {
            name: call.name.clone(),
            id: call.id.clone(),
            result,
        }
    }

    pub fn is_error(&self) -> bool {
        self.result
            .as_object()
            .map(|o| o.contains_key("error"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Observation,
}

/// One entry in a [`crate::conversation::Conversation`]. `tool_data` is a
/// `ToolCall` for `Role::Assistant` messages and a `ToolResult` for
/// `Role::Observation` messages; it is always `None` for `System`/`User`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub index: usize,
    pub role: Role,
    pub content: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub tool_result: Option<ToolResult>,
}

impl Message {
    pub fn system(index: usize, content: impl Into<String>) -> Self {
        Message {
            index,
            role: Role::System,
            content: Some(content.into()),
            tool_call: None,
            tool_result: None,
        }
    }

    pub fn user(index: usize, content: impl Into<String>) -> Self {
        Message {
            index,
            role: Role::User,
            content: Some(content.into()),
            tool_call: None,
            tool_result: None,
        }
    }

    pub fn assistant(index: usize, content: Option<String>, tool_call: Option<ToolCall>) -> Self {
        Message {
            index,
            role: Role::Assistant,
            content,
            tool_call,
            tool_result: None,
        }
    }

    pub fn observation(index: usize, tool_result: ToolResult) -> Self {
        Message {
            index,
            role: Role::Observation,
            content: None,
            tool_call: None,
            tool_result: Some(tool_result),
        }
    }
}
