//! Top-level run coordinators: sequence autoprompter → planner → executors
//! (or a single monolithic agent), arbitrate the global cost ceiling, and
//! assemble the run record written at teardown.
//!
//! Grounded on the original source's `PlannerExecutorSystem`/`SingleAgent`
//! driver classes (`nyuctf_multiagent/agent.py`): `run()`, `run_executor()`,
//! `run_autoprompter()`, `get_exit_reason()`, `total_cost()`, `dump_log()`.
//! Reworked per §9's "no try/finally singleton" and "teardown is guaranteed"
//! design notes: `environment.teardown()` always runs once `run_inner`
//! returns, on every exit path, success or fatal error alike, since nothing
//! between `setup()` succeeding and the final `teardown()` call returns early.

use std::sync::Arc;

use chrono::Utc;

use crate::agent::{AgentError, AutoPromptAgent, ExecutorAgent, PlannerAgent, SingleAgent};
use crate::environment::Environment;
use crate::logger::RunLogger;
use crate::message::{ToolCall, ToolResult};
use crate::prompt_manager;
use crate::run_log::{write_atomic, ExitReason, RunRecord};

/// Sum of every role's accumulated cost so far, plus `extra` — the caller
/// passes in the cost of whichever agent is mid-round and not yet folded
/// into a stored total (see `run_executor`), so the ceiling check always
/// reflects the true in-flight spend without needing a self-referential
/// mutable borrow across the check.
fn sum_cost(
    planner: Option<&PlannerAgent>,
    single: Option<&SingleAgent>,
    executors: &[ExecutorAgent],
    autoprompter: Option<&AutoPromptAgent>,
    extra: f64,
) -> f64 {
    let mut total = extra;
    if let Some(p) = planner {
        total += p.core.current_cost;
    }
    if let Some(s) = single {
        total += s.core.current_cost;
    }
    total += executors.iter().map(|e| e.core.current_cost).sum::<f64>();
    if let Some(a) = autoprompter {
        total += a.core.current_cost;
    }
    total
}

/// Drives an autoprompter to completion (or exhaustion), grounded on the
/// original's shared `run_autoprompter` body reused by both system classes.
/// Returns the fatal error, if any; a non-fatal exhaustion just leaves
/// `autoprompter.autoprompt` unset, and the caller falls back to the
/// hardcoded initial prompt.
async fn drive_autoprompter(
    environment: &Arc<Environment>,
    autoprompter: &mut AutoPromptAgent,
    max_cost: f64,
    other_cost: f64,
) -> Result<(), AgentError> {
    loop {
        let done = environment.solved()
            || autoprompter.finished
            || autoprompter.core.conversation.round() > autoprompter.core.max_rounds
            || other_cost + autoprompter.core.current_cost > max_cost;
        if done {
            break;
        }
        autoprompter.core.conversation.next_round();
        autoprompter.run_one_round().await?;
    }
    if autoprompter.autoprompt.is_none() && !environment.solved() {
        autoprompter.run_for_autoprompt().await;
    }
    Ok(())
}

/// Planner-delegates-to-executors topology (§4.9).
pub struct PlannerExecutorSystem {
    pub environment: Arc<Environment>,
    pub autoprompter: Option<AutoPromptAgent>,
    pub planner: PlannerAgent,
    executor_template: ExecutorAgent,
    pub max_cost: f64,
    pub logger: RunLogger,
    all_executors: Vec<ExecutorAgent>,
}

impl PlannerExecutorSystem {
    pub fn new(
        environment: Arc<Environment>,
        autoprompter: Option<AutoPromptAgent>,
        planner: PlannerAgent,
        executor_template: ExecutorAgent,
        max_cost: f64,
    ) -> Self {
        PlannerExecutorSystem {
            environment,
            autoprompter,
            planner,
            executor_template,
            max_cost,
            logger: RunLogger::new("planner_executor_system"),
            all_executors: Vec::new(),
        }
    }

    fn total_cost(&self, extra: f64) -> f64 {
        sum_cost(
            Some(&self.planner),
            None,
            &self.all_executors,
            self.autoprompter.as_ref(),
            extra,
        )
    }

    fn exit_reason(&self) -> ExitReason {
        if self.environment.solved() {
            ExitReason::Solved
        } else if self.environment.giveup() {
            ExitReason::Giveup
        } else if self.total_cost(0.0) > self.max_cost {
            ExitReason::Cost
        } else if self.planner.core.conversation.round() > self.planner.core.max_rounds {
            ExitReason::PlannerRounds
        } else {
            ExitReason::Unknown
        }
    }

    /// Runs one delegated task on a fresh sibling executor, returns the
    /// summary the planner's observation should carry. Cost and rounds are
    /// bounded the same way the top-level loop is; an exhausted executor
    /// that never called `finish_task` gets one escape round
    /// (`run_for_finish_summary`) before falling back to a templated
    /// "no summary" message.
    async fn run_executor(&mut self, task: &ToolCall) -> String {
        let mut executor = self.executor_template.new_sibling();

        let task_description = task
            .parsed_arguments
            .as_ref()
            .and_then(|m| m.get("task"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        executor
            .core
            .add_start_prompts(&[("task_description", task_description)]);

        loop {
            let in_flight = executor.core.current_cost;
            let done = self.environment.solved()
                || executor.finished
                || executor.core.conversation.round() > executor.core.max_rounds
                || self.total_cost(in_flight) > self.max_cost;
            if done {
                break;
            }
            executor.core.conversation.next_round();
            executor.run_one_round().await;
        }

        if executor.finish_summary.is_none()
            && !self.environment.solved()
            && self.total_cost(executor.core.current_cost) <= self.max_cost
        {
            executor.run_for_finish_summary().await;
        }

        let outcome = if let Some(summary) = &executor.finish_summary {
            summary.clone()
        } else if let Some(err) = &executor.error {
            let fields = executor.core.fields(&[("error", err.clone())]);
            executor.core.prompter.get(prompt_manager::FINISH_ERROR, &fields)
        } else {
            let fields = executor.core.fields(&[]);
            executor.core.prompter.get(prompt_manager::FINISH_EMPTY, &fields)
        };

        self.all_executors.push(executor);
        outcome
    }

    async fn run_inner(&mut self) -> (ExitReason, Option<String>) {
        if let Some(mut autoprompter) = self.autoprompter.take() {
            let other = self.planner.core.current_cost;
            let result = drive_autoprompter(&self.environment, &mut autoprompter, self.max_cost, other).await;
            self.autoprompter = Some(autoprompter);
            if let Err(e) = result {
                return (ExitReason::Error, Some(e.to_string()));
            }
        }

        let initial = match self.autoprompter.as_ref().and_then(|a| a.autoprompt.clone()) {
            Some(prompt) => prompt,
            None => {
                if self.autoprompter.is_some() {
                    self.logger
                        .warn("autoprompter produced no prompt, falling back to the hardcoded initial prompt")
                        .await;
                }
                let fields = self.planner.core.fields(&[]);
                self.planner.core.prompter.get(prompt_manager::INITIAL, &fields)
            }
        };
        let system_fields = self.planner.core.fields(&[]);
        let system = self.planner.core.prompter.get(prompt_manager::SYSTEM, &system_fields);
        self.planner.core.add_system_message(system);
        self.planner.core.add_user_message(initial);

        loop {
            let done = self.environment.solved()
                || self.environment.giveup()
                || self.planner.core.conversation.round() > self.planner.core.max_rounds
                || self.total_cost(0.0) > self.max_cost;
            if done {
                break;
            }

            self.planner.core.conversation.next_round();
            if let Err(e) = self.planner.run_one_round().await {
                return (ExitReason::Error, Some(e.to_string()));
            }

            if let Some(task) = self.planner.delegated_task.take() {
                let summary = self.run_executor(&task).await;
                let observation = ToolResult::for_call(&task, serde_json::json!(summary));
                self.planner.core.add_observation_message(observation);
            }
        }

        (self.exit_reason(), None)
    }

    fn build_record(
        &self,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
        exit_reason: ExitReason,
        error: Option<String>,
        debug_log: Vec<String>,
    ) -> RunRecord {
        RunRecord {
            start_time: start.to_rfc3339(),
            end_time: end.to_rfc3339(),
            time_taken_secs: (end - start).num_milliseconds() as f64 / 1000.0,
            autoprompter_model: self
                .autoprompter
                .as_ref()
                .map(|a| a.core.backend.model().to_string()),
            planner_model: Some(self.planner.core.backend.model().to_string()),
            executor_model: self.executor_template.core.backend.model().to_string(),
            total_cost: self.total_cost(0.0),
            success: self.environment.solved(),
            exit_reason: exit_reason.as_str().to_string(),
            error,
            autoprompter: self
                .autoprompter
                .as_ref()
                .map(|a| a.core.conversation.dump())
                .unwrap_or_default(),
            planner: Some(self.planner.core.conversation.dump()),
            executors: Some(
                self.all_executors
                    .iter()
                    .map(|e| e.core.conversation.dump())
                    .collect(),
            ),
            executor: None,
            executor_errors: Some(self.all_executors.iter().map(|e| e.error.clone()).collect()),
            debug_log,
        }
    }

    /// Starts the challenge's service container(s), sets up the working
    /// container and every tool, runs the loop, and guarantees teardown runs
    /// regardless of which path above returned. `setup` failing is itself a
    /// terminal `Error` exit reason rather than a panic.
    pub async fn run(&mut self) -> RunRecord {
        let start = Utc::now();
        if let Err(e) = self.environment.start_challenge().await {
            self.logger
                .warn(format!("failed to start challenge container: {}", e))
                .await;
        }

        let (exit_reason, error) = match self.environment.setup().await {
            Err(e) => {
                self.logger.error(format!("container setup failed: {}", e)).await;
                (ExitReason::Error, Some(format!("container setup failed: {}", e)))
            }
            Ok(()) => self.run_inner().await,
        };

        self.environment.teardown(error.as_deref()).await;
        let end = Utc::now();
        self.build_record(start, end, exit_reason, error, self.logger.debug_log().await)
    }

    /// Convenience wrapper running the system and persisting its record under
    /// the documented `<logdir>/<user>/<experiment>/<canonical_name>.json`
    /// path (§6).
    pub async fn run_and_write(
        &mut self,
        logdir: &std::path::Path,
        user: &str,
        experiment: &str,
    ) -> std::io::Result<(std::path::PathBuf, RunRecord)> {
        let canonical = self.environment.challenge.canonical_name();
        let record = self.run().await;
        let path = write_atomic(logdir, user, experiment, &canonical, &record)?;
        Ok((path, record))
    }
}

/// Monolithic single-agent topology (§4.9 "Supplemented"): one agent with
/// the full toolset, no delegation. Same autoprompter/cost/round
/// termination predicate, a flatter run record (`executor` instead of
/// `planner` + `executors`).
pub struct SingleAgentSystem {
    pub environment: Arc<Environment>,
    pub autoprompter: Option<AutoPromptAgent>,
    pub agent: SingleAgent,
    pub max_cost: f64,
    pub logger: RunLogger,
}

impl SingleAgentSystem {
    pub fn new(
        environment: Arc<Environment>,
        autoprompter: Option<AutoPromptAgent>,
        agent: SingleAgent,
        max_cost: f64,
    ) -> Self {
        SingleAgentSystem {
            environment,
            autoprompter,
            agent,
            max_cost,
            logger: RunLogger::new("single_agent_system"),
        }
    }

    fn total_cost(&self, extra: f64) -> f64 {
        sum_cost(None, Some(&self.agent), &[], self.autoprompter.as_ref(), extra)
    }

    fn exit_reason(&self) -> ExitReason {
        if self.environment.solved() {
            ExitReason::Solved
        } else if self.environment.giveup() {
            ExitReason::Giveup
        } else if self.total_cost(0.0) > self.max_cost {
            ExitReason::Cost
        } else if self.agent.core.conversation.round() > self.agent.core.max_rounds {
            ExitReason::MaxRounds
        } else {
            ExitReason::Unknown
        }
    }

    async fn run_inner(&mut self) -> (ExitReason, Option<String>) {
        if let Some(mut autoprompter) = self.autoprompter.take() {
            let other = self.agent.core.current_cost;
            let result = drive_autoprompter(&self.environment, &mut autoprompter, self.max_cost, other).await;
            self.autoprompter = Some(autoprompter);
            if let Err(e) = result {
                return (ExitReason::Error, Some(e.to_string()));
            }
        }

        let initial = match self.autoprompter.as_ref().and_then(|a| a.autoprompt.clone()) {
            Some(prompt) => prompt,
            None => {
                if self.autoprompter.is_some() {
                    self.logger
                        .warn("autoprompter produced no prompt, falling back to the hardcoded initial prompt")
                        .await;
                }
                let fields = self.agent.core.fields(&[]);
                self.agent.core.prompter.get(prompt_manager::INITIAL, &fields)
            }
        };
        let system_fields = self.agent.core.fields(&[]);
        let system = self.agent.core.prompter.get(prompt_manager::SYSTEM, &system_fields);
        self.agent.core.add_system_message(system);
        self.agent.core.add_user_message(initial);

        loop {
            let done = self.environment.solved()
                || self.environment.giveup()
                || self.agent.core.conversation.round() > self.agent.core.max_rounds
                || self.total_cost(0.0) > self.max_cost;
            if done {
                break;
            }
            self.agent.core.conversation.next_round();
            if let Err(e) = self.agent.run_one_round().await {
                return (ExitReason::Error, Some(e.to_string()));
            }
        }

        (self.exit_reason(), None)
    }

    fn build_record(
        &self,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
        exit_reason: ExitReason,
        error: Option<String>,
        debug_log: Vec<String>,
    ) -> RunRecord {
        RunRecord {
            start_time: start.to_rfc3339(),
            end_time: end.to_rfc3339(),
            time_taken_secs: (end - start).num_milliseconds() as f64 / 1000.0,
            autoprompter_model: self
                .autoprompter
                .as_ref()
                .map(|a| a.core.backend.model().to_string()),
            planner_model: None,
            executor_model: self.agent.core.backend.model().to_string(),
            total_cost: self.total_cost(0.0),
            success: self.environment.solved(),
            exit_reason: exit_reason.as_str().to_string(),
            error,
            autoprompter: self
                .autoprompter
                .as_ref()
                .map(|a| a.core.conversation.dump())
                .unwrap_or_default(),
            planner: None,
            executors: None,
            executor: Some(self.agent.core.conversation.dump()),
            executor_errors: None,
            debug_log,
        }
    }

    pub async fn run(&mut self) -> RunRecord {
        let start = Utc::now();
        if let Err(e) = self.environment.start_challenge().await {
            self.logger
                .warn(format!("failed to start challenge container: {}", e))
                .await;
        }

        let (exit_reason, error) = match self.environment.setup().await {
            Err(e) => {
                self.logger.error(format!("container setup failed: {}", e)).await;
                (ExitReason::Error, Some(format!("container setup failed: {}", e)))
            }
            Ok(()) => self.run_inner().await,
        };

        self.environment.teardown(error.as_deref()).await;
        let end = Utc::now();
        self.build_record(start, end, exit_reason, error, self.logger.debug_log().await)
    }

    pub async fn run_and_write(
        &mut self,
        logdir: &std::path::Path,
        user: &str,
        experiment: &str,
    ) -> std::io::Result<(std::path::PathBuf, RunRecord)> {
        let canonical = self.environment.challenge.canonical_name();
        let record = self.run().await;
        let path = write_atomic(logdir, user, experiment, &canonical, &record)?;
        Ok((path, record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentCore;
    use crate::backend::scripted::ScriptedBackend;
    use crate::backend::BackendResponse;
    use crate::challenge::{Category, Challenge, EventKind, ServerType};
    use crate::container_runtime::{ContainerHandle, ContainerRuntime, ExecResult, RuntimeError};
    use crate::prompt_manager::PromptManager;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
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

    fn core_with(environment: Arc<Environment>, name: &str, script: Vec<BackendResponse>, max_rounds: usize) -> AgentCore {
        AgentCore::new(
            name,
            environment,
            Arc::new(PromptManager::new(HashMap::new())),
            HashMap::new(),
            Arc::new(ScriptedBackend::new("test-model", script)),
            max_rounds,
            None,
        )
    }

    #[tokio::test]
    async fn planner_delegates_executor_solves_and_loop_stops() {
        let env = test_environment().await;

        let delegate_call = ToolCall::new("delegate", Some(json!({"task": "find the flag"})));
        let planner_core = core_with(
            env.clone(),
            "planner",
            vec![BackendResponse {
                tool_call: Some(delegate_call),
                ..Default::default()
            }],
            30,
        );
        let planner = PlannerAgent::new(planner_core);

        let submit_call = ToolCall::new("submit_flag", Some(json!({"flag": "flag{abc123}"})));
        let executor_core = core_with(
            env.clone(),
            "executor",
            vec![BackendResponse {
                tool_call: Some(submit_call),
                ..Default::default()
            }],
            30,
        );
        let executor_template = ExecutorAgent::new(executor_core);

        let mut system = PlannerExecutorSystem::new(env.clone(), None, planner, executor_template, 10.0);
        let record = system.run().await;

        assert!(record.success);
        assert_eq!(record.exit_reason, "solved");
        assert!(env.solved());
        assert_eq!(record.executors.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exceeding_max_cost_ends_the_run_with_cost_exit_reason() {
        let env = test_environment().await;
        let responses: Vec<BackendResponse> = (0..50)
            .map(|_| BackendResponse {
                content: Some("thinking".into()),
                cost: 1.0,
                ..Default::default()
            })
            .collect();
        let planner_core = core_with(env.clone(), "planner", responses, 100);
        let planner = PlannerAgent::new(planner_core);
        let executor_core = core_with(env.clone(), "executor", vec![], 100);
        let executor_template = ExecutorAgent::new(executor_core);

        let mut system = PlannerExecutorSystem::new(env.clone(), None, planner, executor_template, 2.5);
        let record = system.run().await;

        assert!(!record.success);
        assert_eq!(record.exit_reason, "cost");
        assert!(record.total_cost > 2.5);
    }

    #[tokio::test]
    async fn single_agent_system_solves_directly() {
        let env = test_environment().await;
        let submit_call = ToolCall::new("submit_flag", Some(json!({"flag": "flag{abc123}"})));
        let core = core_with(
            env.clone(),
            "single",
            vec![BackendResponse {
                tool_call: Some(submit_call),
                ..Default::default()
            }],
            30,
        );
        let agent = SingleAgent::new(core);
        let mut system = SingleAgentSystem::new(env.clone(), None, agent, 10.0);
        let record = system.run().await;

        assert!(record.success);
        assert!(record.executor.is_some());
        assert!(record.planner.is_none());
    }
}
