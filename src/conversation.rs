//! Append-only, round-indexed message log with selective observation truncation.
//!
//! Grounded on the donor's restartable-iterator idiom for history windowing:
//! truncation happens once, at append time, and is never re-derived at read
//! time, so a dumped log stays stable across repeated reads.

use crate::message::{Message, Role, ToolResult};
use serde_json::Value;

/// Default cap (in characters) applied to any string embedded in an appended
/// observation's `result`.
pub const DEFAULT_TRUNCATE_CONTENT: usize = 25_000;

const TRUNCATION_MARKER: &str = " …very long output, truncated!";

fn truncate_string(s: &str, budget: usize) -> String {
    if s.chars().count() <= budget {
        return s.to_string();
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    let prefix_len = budget.saturating_sub(marker_len);
    let prefix: String = s.chars().take(prefix_len).collect();
    format!("{}{}", prefix, TRUNCATION_MARKER)
}

/// Recursively truncates every string value reachable from `value`, applying
/// the same per-string budget regardless of nesting depth.
fn truncate_value(value: Value, budget: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_string(&s, budget)),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| truncate_value(v, budget)).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, truncate_value(v, budget)))
                .collect(),
        ),
        other => other,
    }
}

/// Ordered, append-only message log for one agent. `round` advances once per
/// `Agent::RunOneRound`; every append is stamped with the round active at the
/// time of the call, never re-derived later.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub name: String,
    all_messages: Vec<Message>,
    round: usize,
    pub truncate_content: usize,
}

impl Conversation {
    pub fn new(name: impl Into<String>) -> Self {
        Conversation {
            name: name.into(),
            all_messages: Vec::new(),
            round: 0,
            truncate_content: DEFAULT_TRUNCATE_CONTENT,
        }
    }

    pub fn round(&self) -> usize {
        self.round
    }

    /// Advances the round counter. Called once per agent loop iteration,
    /// before the round's messages are appended.
    pub fn next_round(&mut self) {
        self.round += 1;
    }

    pub fn append_system(&mut self, content: impl Into<String>) {
        self.all_messages
            .push(Message::system(self.round, content));
    }

    pub fn append_user(&mut self, content: impl Into<String>) {
        self.all_messages.push(Message::user(self.round, content));
    }

    pub fn append_assistant(
        &mut self,
        content: Option<String>,
        tool_call: Option<crate::message::ToolCall>,
    ) {
        self.all_messages
            .push(Message::assistant(self.round, content, tool_call));
    }

    /// Appends an observation, truncating any string in `result` that exceeds
    /// `truncate_content` in place.
    pub fn append_observation(&mut self, mut result: ToolResult) {
        result.result = truncate_value(result.result, self.truncate_content);
        self.all_messages
            .push(Message::observation(self.round, result));
    }

    pub fn all_messages(&self) -> &[Message] {
        &self.all_messages
    }

    /// Returns the messages to hand to the backend for the next completion.
    /// When `len_observations` is set, `OBSERVATION` messages older than
    /// `round - len_observations` are dropped, and `ASSISTANT` messages in
    /// that same dropped window keep their `content` (the model's prior
    /// thought) but lose their `tool_call` (since the paired observation is
    /// gone, the call would otherwise dangle).
    pub fn messages(&self, len_observations: Option<usize>) -> Vec<Message> {
        let trunc_before = match len_observations {
            Some(n) => self.round as i64 - n as i64,
            None => return self.all_messages.clone(),
        };
        self.all_messages
            .iter()
            .filter_map(|m| {
                let in_dropped_window = (m.index as i64) <= trunc_before;
                match m.role {
                    Role::Observation if in_dropped_window => None,
                    Role::Assistant if in_dropped_window && m.tool_call.is_some() => {
                        let mut m = m.clone();
                        m.tool_call = None;
                        Some(m)
                    }
                    _ => Some(m.clone()),
                }
            })
            .collect()
    }

    /// Plain JSON-serializable records for the run log, in append order.
    pub fn dump(&self) -> Vec<Value> {
        self.all_messages
            .iter()
            .map(|m| serde_json::to_value(m).expect("Message always serializes"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    #[test]
    fn append_stamps_current_round() {
        let mut c = Conversation::new("t");
        c.next_round();
        c.append_user("hi");
        assert_eq!(c.all_messages()[0].index, 1);
    }

    #[test]
    fn truncation_applies_at_append_not_read() {
        let mut c = Conversation::new("t");
        c.truncate_content = 64;
        let call = ToolCall::new("run_command", None);
        let long = "x".repeat(100);
        c.append_observation(ToolResult::for_call(&call, Value::String(long)));
        let stored = c.all_messages()[0].tool_result.as_ref().unwrap();
        let s = stored.result.as_str().unwrap();
        assert!(s.chars().count() <= 64);
        assert!(s.ends_with("truncated!"));
        // Reading twice must not re-truncate or otherwise mutate the stored form.
        let dump1 = c.dump();
        let dump2 = c.dump();
        assert_eq!(dump1, dump2);
    }

    #[test]
    fn len_observations_drops_old_observations_but_keeps_assistant_thought() {
        let mut c = Conversation::new("t");
        let call = ToolCall::new("run_command", None);
        c.next_round(); // round 1
        c.append_assistant(Some("thinking".into()), Some(call.clone()));
        c.append_observation(ToolResult::for_call(&call, Value::String("out".into())));
        c.next_round(); // round 2
        c.append_user("continue");

        let windowed = c.messages(Some(0));
        // round-1 observation (index 1) <= trunc_before (2-0=2) is dropped.
        assert!(windowed
            .iter()
            .all(|m| !(m.role == Role::Observation && m.index == 1)));
        // round-1 assistant message survives with content but no tool_call.
        let assistant = windowed
            .iter()
            .find(|m| m.role == Role::Assistant)
            .unwrap();
        assert_eq!(assistant.content.as_deref(), Some("thinking"));
        assert!(assistant.tool_call.is_none());
    }
}
