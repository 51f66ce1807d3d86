//! Cross-module integration tests for the CTF control plane: end-to-end runs
//! through `PlannerExecutorSystem`/`SingleAgentSystem` against a fake
//! container runtime and a scripted backend, exercising the scenarios named
//! in SPEC_FULL.md §8.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ctf_autopilot::backend::scripted::ScriptedBackend;
use ctf_autopilot::backend::BackendResponse;
use ctf_autopilot::{
    AgentCore, AutoPromptAgent, Category, Challenge, ContainerRuntime, Environment, EventKind,
    ExecutorAgent, PlannerAgent, PlannerExecutorSystem, PromptManager, ServerType, SingleAgent,
    SingleAgentSystem, ToolCall,
};
use ctf_autopilot::container_runtime::{ContainerHandle, ExecResult, RuntimeError};

struct FakeRuntime;

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start(&self, _image: &str, _network: &str) -> Result<ContainerHandle, RuntimeError> {
        Ok("fake-container".to_string())
    }

    async fn exec(&self, _handle: &ContainerHandle, _command: &str, _timeout: Duration) -> ExecResult {
        ExecResult {
            stdout: String::new(),
            stderr: String::new(),
            returncode: Some(0),
            timed_out: false,
        }
    }

    async fn copy_in(
        &self,
        _handle: &ContainerHandle,
        _host_path: &std::path::Path,
        _container_path: &str,
    ) -> Result<String, RuntimeError> {
        Ok("/home/ctfplayer/chal".into())
    }

    async fn stop(&self, _handle: &ContainerHandle) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn start_challenge(&self, _challenge: &Challenge) -> Result<String, RuntimeError> {
        Ok(String::new())
    }

    async fn stop_challenge(&self, _challenge: &Challenge) -> Result<(), RuntimeError> {
        Ok(())
    }
}

async fn build_environment() -> Arc<Environment> {
    let challenge = Challenge::new(
        "warmup",
        Category::Misc,
        50,
        "just say the flag",
        "flag{integration_test}",
        vec![],
        ServerType::None,
        None,
        None,
        false,
        PathBuf::from("/challenges/warmup"),
        "ctf-misc-base",
        2025,
        EventKind::Qualifier,
    )
    .unwrap();

    let env = Environment::new(challenge, "ctf-misc-base".into(), "ctfnet".into(), Arc::new(FakeRuntime));
    env.register_default_tools().await;
    env
}

fn core_with(environment: Arc<Environment>, name: &str, script: Vec<BackendResponse>) -> AgentCore {
    AgentCore::new(
        name,
        environment,
        Arc::new(PromptManager::new(HashMap::new())),
        HashMap::new(),
        Arc::new(ScriptedBackend::new("test-model", script)),
        30,
        None,
    )
}

/// Scenario 1: happy-path solve via submit_flag, single-agent topology.
#[tokio::test]
async fn single_agent_solves_with_submit_flag_and_writes_run_log() {
    let env = build_environment().await;
    let call = ToolCall::new("submit_flag", Some(json!({"flag": "flag{integration_test}"})));
    let core = core_with(
        env.clone(),
        "single",
        vec![BackendResponse {
            tool_call: Some(call),
            cost: 0.005,
            ..Default::default()
        }],
    );
    let mut system = SingleAgentSystem::new(env.clone(), None, SingleAgent::new(core), 1.0);

    let logdir = tempfile::tempdir().unwrap();
    let (path, record) = system
        .run_and_write(logdir.path(), "alice", "smoke")
        .await
        .unwrap();

    assert!(env.solved());
    assert!(record.success);
    assert_eq!(record.exit_reason, "solved");
    assert_eq!(record.total_cost, 0.005);
    assert!(path.ends_with("alice/smoke/2025q-msc-warmup.json"));

    let contents = std::fs::read_to_string(&path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(parsed["success"], true);
    assert!(parsed.get("executor").is_some());
    assert!(parsed.get("planner").is_none());
}

/// Scenario 2: the model never calls submit_flag, but echoes the flag in its
/// own assistant content; the passive backstop should still mark it solved.
#[tokio::test]
async fn passive_flag_detection_solves_without_a_tool_call() {
    let env = build_environment().await;
    let core = core_with(
        env.clone(),
        "single",
        vec![BackendResponse {
            content: Some("I found it: flag{integration_test}".into()),
            ..Default::default()
        }],
    );
    let mut system = SingleAgentSystem::new(env.clone(), None, SingleAgent::new(core), 1.0);
    let record = system.run().await;

    assert!(record.success);
    assert_eq!(record.exit_reason, "solved");
}

/// Scenario 3: planner delegates, executor enumerates then finishes with a
/// summary, planner observes it and its loop terminates once the executor's
/// work lets a later round submit the flag.
#[tokio::test]
async fn delegation_round_trip_collects_executor_summary() {
    let env = build_environment().await;

    let delegate_call = ToolCall::new("delegate", Some(json!({"task": "poke the service"})));
    let submit_call = ToolCall::new("submit_flag", Some(json!({"flag": "flag{integration_test}"})));
    let planner_core = core_with(
        env.clone(),
        "planner",
        vec![
            BackendResponse {
                tool_call: Some(delegate_call),
                ..Default::default()
            },
            BackendResponse {
                tool_call: Some(submit_call),
                ..Default::default()
            },
        ],
    );
    let planner = PlannerAgent::new(planner_core);

    let run_cmd_call = ToolCall::new("run_command", Some(json!({"command": "echo hi"})));
    let finish_call = ToolCall::new("finish_task", Some(json!({"summary": "service says hi, nothing else"})));
    let executor_core = core_with(
        env.clone(),
        "executor",
        vec![
            BackendResponse {
                tool_call: Some(run_cmd_call),
                ..Default::default()
            },
            BackendResponse {
                tool_call: Some(finish_call),
                ..Default::default()
            },
        ],
    );
    let executor_template = ExecutorAgent::new(executor_core);

    let mut system = PlannerExecutorSystem::new(env.clone(), None, planner, executor_template, 5.0);
    let record = system.run().await;

    assert!(record.success);
    let executors = record.executors.unwrap();
    assert_eq!(executors.len(), 1);
    // The planner's conversation must carry the delegate observation with the
    // executor's summary as its result.
    let planner_dump = record.planner.unwrap();
    let delegate_observation = planner_dump
        .iter()
        .find(|m| m["role"] == "observation" && m["tool_result"]["name"] == "delegate")
        .expect("delegate observation present");
    assert_eq!(
        delegate_observation["tool_result"]["result"],
        json!("service says hi, nothing else")
    );
}

/// Scenario 4: a missing required parameter produces a non-fatal tool-error
/// observation and the run continues (here: immediately exhausts its tiny
/// round budget without solving).
#[tokio::test]
async fn missing_required_argument_is_non_fatal_observation() {
    let env = build_environment().await;
    let bad_call = ToolCall::new("run_command", Some(json!({})));
    let core = core_with(
        env.clone(),
        "single",
        vec![BackendResponse {
            tool_call: Some(bad_call),
            ..Default::default()
        }],
    );
    let mut agent_core = core;
    agent_core.max_rounds = 1;
    let mut system = SingleAgentSystem::new(env.clone(), None, SingleAgent::new(agent_core), 1.0);
    let record = system.run().await;

    assert!(!record.success);
    assert_eq!(record.exit_reason, "max_rounds");
    let dump = record.executor.unwrap();
    let observation = dump
        .iter()
        .find(|m| m["role"] == "observation")
        .expect("observation present");
    assert!(observation["tool_result"]["result"]["error"]
        .as_str()
        .unwrap()
        .contains("run_command"));
}

/// Scenario 6: exceeding the cost ceiling halts the run with `exit_reason =
/// "cost"`, even though the model never produced a tool call or solved
/// anything.
#[tokio::test]
async fn cost_ceiling_halts_single_agent_run() {
    let env = build_environment().await;
    let responses: Vec<BackendResponse> = (0..10)
        .map(|_| BackendResponse {
            content: Some("still working".into()),
            cost: 0.02,
            ..Default::default()
        })
        .collect();
    let core = core_with(env.clone(), "single", responses);
    let mut system = SingleAgentSystem::new(env.clone(), None, SingleAgent::new(core), 0.01);
    let record = system.run().await;

    assert!(!record.success);
    assert_eq!(record.exit_reason, "cost");
    assert!(record.total_cost > 0.01);
}

/// The autoprompter's generated prompt replaces the hardcoded initial
/// prompt when it produces one before its round budget runs out.
#[tokio::test]
async fn autoprompter_seed_prompt_feeds_the_planner() {
    let env = build_environment().await;

    let generate_call = ToolCall::new(
        "generate_prompt",
        Some(json!({"prompt": "focus on the misc category hint"})),
    );
    let autoprompter_core = core_with(
        env.clone(),
        "autoprompter",
        vec![BackendResponse {
            tool_call: Some(generate_call),
            ..Default::default()
        }],
    );
    let autoprompter = AutoPromptAgent::new(autoprompter_core);

    let submit_call = ToolCall::new("submit_flag", Some(json!({"flag": "flag{integration_test}"})));
    let planner_core = core_with(
        env.clone(),
        "planner",
        vec![BackendResponse {
            tool_call: Some(submit_call),
            ..Default::default()
        }],
    );
    let planner = PlannerAgent::new(planner_core);
    let executor_template = ExecutorAgent::new(core_with(env.clone(), "executor", vec![]));

    let mut system = PlannerExecutorSystem::new(env.clone(), Some(autoprompter), planner, executor_template, 5.0);
    let record = system.run().await;

    assert!(record.success);
    let planner_dump = record.planner.unwrap();
    let seeded_user_message = planner_dump
        .iter()
        .find(|m| m["role"] == "user")
        .expect("seeded user message present");
    assert_eq!(
        seeded_user_message["content"],
        json!("focus on the misc category hint")
    );
    assert!(!record.autoprompter.is_empty());
}
