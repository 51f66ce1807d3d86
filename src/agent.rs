//! Per-role single-round agent loop.
//!
//! Grounded on the original source's `BaseAgent`/`SingleAgent`/
//! `AutoPromptAgent`/`PlannerAgent`/`ExecutorAgent` (`nyuctf_multiagent/agent.py`):
//! each role gets its own `run_one_round`, duplicated per role rather than
//! built from one generic dispatcher, matching the original's own structure
//! (and §9's explicit rejection of a coroutine/generic driver in favor of a
//! plain loop + method per role).

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::{parse_tool_arguments, Backend};
use crate::conversation::Conversation;
use crate::environment::Environment;
use crate::message::{ToolCall, ToolResult};
use crate::prompt_manager::{self, PromptManager};
use crate::tool::ToolEnvironment;

/// Run-fatal failure, raised for any role except the executor (whose
/// backend errors are non-fatal to the overall run; see §4.8/§7).
#[derive(Debug, Clone)]
pub enum AgentError {
    Backend(String),
    ContainerSetup(String),
    Interrupted,
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Backend(m) => write!(f, "backend error: {}", m),
            AgentError::ContainerSetup(m) => write!(f, "container setup error: {}", m),
            AgentError::Interrupted => write!(f, "run interrupted by user"),
        }
    }
}
impl std::error::Error for AgentError {}

/// Checks `text` for the real flag, or its `{...}`-stripped inner contents,
/// and marks the environment solved on a hit. The passive backstop described
/// in §4.7/§4.10: it runs on every appended message regardless of whether
/// the model ever called `submit_flag`.
fn check_flag_in(environment: &Environment, text: &str) {
    let flag = environment.challenge.flag();
    if !flag.is_empty() && text.contains(flag) {
        environment.mark_solved();
        return;
    }
    if let Some(inner) = environment.challenge.flag_inner() {
        if !inner.is_empty() && text.contains(inner) {
            environment.mark_solved();
        }
    }
}

/// Fields common to every role's prompt interpolation: `challenge.*` and
/// `prompter.server_description`. Role-specific calls (e.g. a delegated
/// task's `task_description`) extend this map before calling
/// `prompter.get`.
fn base_fields<'a>(environment: &'a Environment, templates: &HashMap<String, String>) -> HashMap<&'a str, String> {
    let challenge = &environment.challenge;
    let mut fields = HashMap::new();
    fields.insert("challenge.name", challenge.name.clone());
    fields.insert("challenge.description", challenge.description.clone());
    fields.insert("challenge.flag_format", challenge.flag_format());
    fields.insert(
        "challenge.server_host",
        challenge.server_host.clone().unwrap_or_default(),
    );
    fields.insert(
        "challenge.server_port",
        challenge
            .server_port
            .map(|p| p.to_string())
            .unwrap_or_default(),
    );
    fields.insert(
        "prompter.server_description",
        prompt_manager::server_description(challenge, templates),
    );
    fields
}

/// Shared state and helpers every role's agent wraps. Not a `Tool`/`Backend`
/// style trait object: roles differ enough in their round logic (§4.7-§4.9)
/// that a generic driver would need as many special cases as a dedicated
/// method per role, which is what this crate does instead (§9).
pub struct AgentCore {
    pub environment: Arc<Environment>,
    pub prompter: Arc<PromptManager>,
    pub templates: HashMap<String, String>,
    pub backend: Arc<dyn Backend>,
    pub conversation: Conversation,
    pub max_rounds: usize,
    pub len_observations: Option<usize>,
    pub current_cost: f64,
}

impl AgentCore {
    pub fn new(
        name: impl Into<String>,
        environment: Arc<Environment>,
        prompter: Arc<PromptManager>,
        templates: HashMap<String, String>,
        backend: Arc<dyn Backend>,
        max_rounds: usize,
        len_observations: Option<usize>,
    ) -> Self {
        AgentCore {
            environment,
            prompter,
            templates,
            backend,
            conversation: Conversation::new(name),
            max_rounds,
            len_observations,
            current_cost: 0.0,
        }
    }

    /// `challenge.*`/`prompter.server_description` fields this agent's
    /// prompts may reference, plus any call-specific extras merged in by
    /// the caller (e.g. `task_description`).
    pub fn fields(&self, extra: &[(&'static str, String)]) -> HashMap<&str, String> {
        let mut fields = base_fields(&self.environment, &self.templates);
        for (k, v) in extra {
            fields.insert(k, v.clone());
        }
        fields
    }

    pub fn add_system_message(&mut self, content: impl Into<String>) {
        self.conversation.append_system(content.into());
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        let content = content.into();
        check_flag_in(&self.environment, &content);
        self.conversation.append_user(content);
    }

    pub fn add_assistant_message(&mut self, content: Option<String>, tool_call: Option<ToolCall>) {
        if let Some(c) = &content {
            check_flag_in(&self.environment, c);
        }
        if let Some(call) = &tool_call {
            if let Some(raw) = &call.arguments {
                check_flag_in(&self.environment, &raw.to_string());
            }
        }
        self.conversation.append_assistant(content, tool_call);
    }

    pub fn add_observation_message(&mut self, tool_result: ToolResult) {
        self.conversation.append_observation(tool_result);
        if let Some(last) = self.conversation.all_messages().last() {
            if let Some(result) = &last.tool_result {
                check_flag_in(&self.environment, &result.result.to_string());
            }
        }
    }

    /// Adds the standard `system` + `initial` prompt pair.
    pub fn add_start_prompts(&mut self, extra: &[(&'static str, String)]) {
        let fields = self.fields(extra);
        let system = self.prompter.get(prompt_manager::SYSTEM, &fields);
        let initial = self.prompter.get(prompt_manager::INITIAL, &fields);
        self.add_system_message(system);
        self.add_user_message(initial);
    }

    /// Validates/coerces a raw tool call's arguments against its registered
    /// schema. `Err` carries a ready-to-append `ToolResult` (missing
    /// required parameter, malformed JSON, or an unregistered tool name).
    pub async fn parse_call(&self, call: ToolCall) -> Result<ToolCall, ToolResult> {
        match self.environment.get_tool(&call.name).await {
            Some(tool) => parse_tool_arguments(tool.as_ref(), call),
            None => Err(call.error(format!("Unknown tool {}", call.name))),
        }
    }

    pub async fn run_tool(&self, call: &ToolCall) -> ToolResult {
        self.environment.run_tool(call).await
    }
}

/// The autoprompter: its only productive action is `generate_prompt`, which
/// replaces the planner's hard-coded initial prompt.
pub struct AutoPromptAgent {
    pub core: AgentCore,
    pub finished: bool,
    pub autoprompt: Option<String>,
}

impl AutoPromptAgent {
    pub fn new(core: AgentCore) -> Self {
        AutoPromptAgent {
            core,
            finished: false,
            autoprompt: None,
        }
    }

    pub async fn run_one_round(&mut self) -> Result<(), AgentError> {
        let messages = self.core.conversation.messages(self.core.len_observations);
        let response = self
            .core
            .backend
            .send(&messages)
            .await
            .map_err(|e| AgentError::Backend(e.0))?;
        if let Some(err) = response.error {
            return Err(AgentError::Backend(err));
        }
        self.core.current_cost += response.cost;
        self.core
            .add_assistant_message(response.content, response.tool_call.clone());

        let tool_call = match response.tool_call {
            None => {
                let fields = self.core.fields(&[]);
                let msg = self.core.prompter.get(prompt_manager::CONTINUE, &fields);
                self.core.add_user_message(msg);
                return Ok(());
            }
            Some(c) => c,
        };

        let parsed = match self.core.parse_call(tool_call).await {
            Ok(c) => c,
            Err(result) => {
                self.core.add_observation_message(result);
                return Ok(());
            }
        };

        if parsed.name == "generate_prompt" {
            self.autoprompt = parsed
                .parsed_arguments
                .as_ref()
                .and_then(|m| m.get("prompt"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            self.finished = true;
        } else {
            let result = self.core.run_tool(&parsed).await;
            self.core.add_observation_message(result);
        }
        Ok(())
    }

    /// One-shot escape used when the round budget runs out without the
    /// autoprompter ever producing a prompt (§4.8).
    pub async fn run_for_autoprompt(&mut self) {
        let fields = self.core.fields(&[]);
        let msg = self
            .core
            .prompter
            .get(prompt_manager::FINISH_AUTOPROMPT, &fields);
        self.core.add_user_message(msg);

        let messages = self.core.conversation.messages(self.core.len_observations);
        let response = match self.core.backend.send(&messages).await {
            Ok(r) => r,
            Err(_) => return,
        };
        self.core.current_cost += response.cost;
        if response.error.is_some() {
            return;
        }
        let tool_call = match response.tool_call {
            None => {
                self.autoprompt = response.content;
                return;
            }
            Some(c) => c,
        };
        let parsed = match self.core.parse_call(tool_call.clone()).await {
            Ok(c) => c,
            Err(_) => {
                let raw = tool_call.arguments.map(|v| v.to_string()).unwrap_or_default();
                self.autoprompt = Some(format!(
                    "{}\n\n{}",
                    response.content.unwrap_or_default(),
                    raw
                ));
                return;
            }
        };
        if parsed.name == "generate_prompt" {
            self.autoprompt = parsed
                .parsed_arguments
                .as_ref()
                .and_then(|m| m.get("prompt"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
    }
}

/// Reasons at task level and delegates sub-tasks to fresh executors.
pub struct PlannerAgent {
    pub core: AgentCore,
    pub delegated_task: Option<ToolCall>,
}

impl PlannerAgent {
    pub fn new(core: AgentCore) -> Self {
        PlannerAgent {
            core,
            delegated_task: None,
        }
    }

    pub async fn run_one_round(&mut self) -> Result<(), AgentError> {
        let messages = self.core.conversation.messages(self.core.len_observations);
        let response = self
            .core
            .backend
            .send(&messages)
            .await
            .map_err(|e| AgentError::Backend(e.0))?;
        if let Some(err) = response.error {
            return Err(AgentError::Backend(err));
        }
        self.core.current_cost += response.cost;
        self.core
            .add_assistant_message(response.content, response.tool_call.clone());

        let tool_call = match response.tool_call {
            None => {
                let fields = self.core.fields(&[]);
                let msg = self.core.prompter.get(prompt_manager::CONTINUE, &fields);
                self.core.add_user_message(msg);
                return Ok(());
            }
            Some(c) => c,
        };

        let parsed = match self.core.parse_call(tool_call).await {
            Ok(c) => c,
            Err(result) => {
                self.core.add_observation_message(result);
                return Ok(());
            }
        };

        if parsed.name == "delegate" {
            // The coordinator (`PlannerExecutorSystem::run_executor`) is
            // responsible for appending the resulting observation.
            self.delegated_task = Some(parsed);
        } else {
            let result = self.core.run_tool(&parsed).await;
            self.core.add_observation_message(result);
        }
        Ok(())
    }
}

/// Carries out a single delegated sub-task with the full toolset.
pub struct ExecutorAgent {
    pub core: AgentCore,
    pub finished: bool,
    pub finish_summary: Option<String>,
    pub error: Option<String>,
}

impl ExecutorAgent {
    pub fn new(core: AgentCore) -> Self {
        ExecutorAgent {
            core,
            finished: false,
            finish_summary: None,
            error: None,
        }
    }

    /// Spawns a sibling executor sharing backend/prompter/limits but a fresh
    /// conversation, so the coordinator can spawn one per delegated task.
    pub fn new_sibling(&self) -> ExecutorAgent {
        let core = AgentCore::new(
            self.core.conversation.name.clone(),
            self.core.environment.clone(),
            self.core.prompter.clone(),
            self.core.templates.clone(),
            self.core.backend.clone(),
            self.core.max_rounds,
            self.core.len_observations,
        );
        ExecutorAgent::new(core)
    }

    /// Backend errors here are non-fatal to the run: the executor simply
    /// stops (§4.7 step 2, §7).
    pub async fn run_one_round(&mut self) {
        let messages = self.core.conversation.messages(self.core.len_observations);
        let response = match self.core.backend.send(&messages).await {
            Ok(r) => r,
            Err(e) => {
                self.finished = true;
                self.error = Some(e.0);
                return;
            }
        };
        if let Some(err) = response.error {
            self.finished = true;
            self.error = Some(err);
            return;
        }
        self.core.current_cost += response.cost;
        self.core
            .add_assistant_message(response.content, response.tool_call.clone());

        let tool_call = match response.tool_call {
            None => {
                let fields = self.core.fields(&[]);
                let msg = self.core.prompter.get(prompt_manager::CONTINUE, &fields);
                self.core.add_user_message(msg);
                return;
            }
            Some(c) => c,
        };

        let parsed = match self.core.parse_call(tool_call).await {
            Ok(c) => c,
            Err(result) => {
                self.core.add_observation_message(result);
                return;
            }
        };

        if parsed.name == "finish_task" {
            self.finish_summary = parsed
                .parsed_arguments
                .as_ref()
                .and_then(|m| m.get("summary"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            self.finished = true;
        } else {
            let result = self.core.run_tool(&parsed).await;
            self.core.add_observation_message(result);
        }
    }

    /// One-shot escape used when the round budget runs out before the
    /// executor calls `finish_task` (§4.8).
    pub async fn run_for_finish_summary(&mut self) {
        let fields = self.core.fields(&[]);
        let msg = self.core.prompter.get(prompt_manager::FINISH_TASK, &fields);
        self.core.add_user_message(msg);

        let messages = self.core.conversation.messages(self.core.len_observations);
        let response = match self.core.backend.send(&messages).await {
            Ok(r) => r,
            Err(_) => return,
        };
        self.core.current_cost += response.cost;
        if response.error.is_some() {
            return;
        }
        let tool_call = match response.tool_call {
            None => {
                self.finish_summary = response.content;
                return;
            }
            Some(c) => c,
        };
        let parsed = match self.core.parse_call(tool_call.clone()).await {
            Ok(c) => c,
            Err(_) => {
                let raw = tool_call.arguments.map(|v| v.to_string()).unwrap_or_default();
                self.finish_summary = Some(format!(
                    "{}\n\n{}",
                    response.content.unwrap_or_default(),
                    raw
                ));
                return;
            }
        };
        if parsed.name == "finish_task" {
            self.finish_summary = parsed
                .parsed_arguments
                .as_ref()
                .and_then(|m| m.get("summary"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
        }
    }
}

/// The monolithic "single" role: one agent, full toolset, no delegation.
pub struct SingleAgent {
    pub core: AgentCore,
}

impl SingleAgent {
    pub fn new(core: AgentCore) -> Self {
        SingleAgent { core }
    }

    pub async fn run_one_round(&mut self) -> Result<(), AgentError> {
        let messages = self.core.conversation.messages(self.core.len_observations);
        let response = self
            .core
            .backend
            .send(&messages)
            .await
            .map_err(|e| AgentError::Backend(e.0))?;
        if let Some(err) = response.error {
            return Err(AgentError::Backend(err));
        }
        self.core.current_cost += response.cost;
        self.core
            .add_assistant_message(response.content, response.tool_call.clone());

        let tool_call = match response.tool_call {
            None => {
                let fields = self.core.fields(&[]);
                let msg = self.core.prompter.get(prompt_manager::CONTINUE, &fields);
                self.core.add_user_message(msg);
                return Ok(());
            }
            Some(c) => c,
        };

        let parsed = match self.core.parse_call(tool_call).await {
            Ok(c) => c,
            Err(result) => {
                self.core.add_observation_message(result);
                return Ok(());
            }
        };

        let result = self.core.run_tool(&parsed).await;
        self.core.add_observation_message(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::ScriptedBackend;
    use crate::backend::BackendResponse;
    use crate::challenge::{Category, Challenge, EventKind, ServerType};
    use crate::container_runtime::{ContainerHandle, ContainerRuntime, ExecResult, RuntimeError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    struct FakeRuntime;
    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn start(&self, _i: &str, _n: &str) -> Result<ContainerHandle, RuntimeError> {
            Ok("fake".into())
        }
        async fn exec(&self, _h: &ContainerHandle, _c: &str, _t: Duration) -> ExecResult {
            ExecResult {
                stdout: String::new(),
                stderr: String::new(),
                returncode: Some(0),
                timed_out: false,
            }
        }
        async fn copy_in(
            &self,
            _h: &ContainerHandle,
            _hp: &std::path::Path,
            _cp: &str,
        ) -> Result<String, RuntimeError> {
            Ok("ok".into())
        }
        async fn stop(&self, _h: &ContainerHandle) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn start_challenge(&self, _c: &Challenge) -> Result<String, RuntimeError> {
            Ok(String::new())
        }
        async fn stop_challenge(&self, _c: &Challenge) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    async fn test_environment() -> Arc<Environment> {
        let challenge = Challenge::new(
            "baby pwn",
            Category::Pwn,
            100,
            "pwn me",
            "flag{abc123}",
            vec![],
            ServerType::None,
            None,
            None,
            false,
            PathBuf::from("/c"),
            "img",
            2024,
            EventKind::Qualifier,
        )
        .unwrap();
        let env = Environment::new(challenge, "img".into(), "net".into(), Arc::new(FakeRuntime));
        env.register_default_tools().await;
        env
    }

    fn core_with(environment: Arc<Environment>, script: Vec<BackendResponse>) -> AgentCore {
        AgentCore::new(
            "test",
            environment,
            Arc::new(PromptManager::new(HashMap::new())),
            HashMap::new(),
            Arc::new(ScriptedBackend::new("test-model", script)),
            30,
            None,
        )
    }

    #[tokio::test]
    async fn submit_flag_sets_solved() {
        let env = test_environment().await;
        let call = ToolCall::new("submit_flag", Some(json!({"flag": "flag{abc123}"})));
        let core = core_with(
            env.clone(),
            vec![BackendResponse {
                tool_call: Some(call),
                ..Default::default()
            }],
        );
        let mut agent = SingleAgent::new(core);
        agent.run_one_round().await.unwrap();
        assert!(env.solved());
    }

    #[tokio::test]
    async fn passive_flag_detection_via_assistant_content() {
        let env = test_environment().await;
        let core = core_with(
            env.clone(),
            vec![BackendResponse {
                content: Some("the flag is flag{abc123}".into()),
                ..Default::default()
            }],
        );
        let mut agent = SingleAgent::new(core);
        agent.run_one_round().await.unwrap();
        assert!(env.solved());
    }

    #[tokio::test]
    async fn planner_delegate_call_is_captured_not_executed() {
        let env = test_environment().await;
        let call = ToolCall::new("delegate", Some(json!({"task": "enumerate ports"})));
        let core = core_with(
            env.clone(),
            vec![BackendResponse {
                tool_call: Some(call),
                ..Default::default()
            }],
        );
        let mut planner = PlannerAgent::new(core);
        planner.run_one_round().await.unwrap();
        assert!(planner.delegated_task.is_some());
        assert!(planner.core.conversation.all_messages().iter().all(|m| m.tool_result.is_none()));
    }

    #[tokio::test]
    async fn executor_missing_required_parameter_is_non_fatal() {
        let env = test_environment().await;
        let call = ToolCall::new("run_command", Some(json!({})));
        let core = core_with(
            env.clone(),
            vec![BackendResponse {
                tool_call: Some(call),
                ..Default::default()
            }],
        );
        let mut executor = ExecutorAgent::new(core);
        executor.run_one_round().await;
        assert!(!executor.finished);
        let last = executor.core.conversation.all_messages().last().unwrap();
        assert!(last.tool_result.as_ref().unwrap().is_error());
    }

    #[tokio::test]
    async fn executor_backend_error_marks_finished_without_fatal_propagation() {
        let env = test_environment().await;
        let core = core_with(
            env.clone(),
            vec![BackendResponse {
                error: Some("rate limited".into()),
                ..Default::default()
            }],
        );
        let mut executor = ExecutorAgent::new(core);
        executor.run_one_round().await;
        assert!(executor.finished);
        assert_eq!(executor.error.as_deref(), Some("rate limited"));
    }

    #[tokio::test]
    async fn planner_backend_error_is_fatal() {
        let env = test_environment().await;
        let core = core_with(
            env.clone(),
            vec![BackendResponse {
                error: Some("bad request".into()),
                ..Default::default()
            }],
        );
        let mut planner = PlannerAgent::new(core);
        let err = planner.run_one_round().await.unwrap_err();
        assert!(matches!(err, AgentError::Backend(_)));
    }
}
