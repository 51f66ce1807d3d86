//! Plain `serde::Deserialize` structs mirroring the documented YAML
//! configuration schema (§6). The core never opens or parses the file
//! itself — that loader is out of scope — it only accepts an
//! already-deserialized value.

use serde::Deserialize;

fn default_max_cost() -> f64 {
    1.0
}

fn default_enable_autoprompt() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_max_cost")]
    pub max_cost: f64,
    #[serde(default = "default_enable_autoprompt")]
    pub enable_autoprompt: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            max_cost: default_max_cost(),
            enable_autoprompt: default_enable_autoprompt(),
        }
    }
}

/// Which role a [`RoleConfig`] configures; used only to pick the documented
/// per-role defaults below, never serialized itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Autoprompter,
    Planner,
    Executor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleConfig {
    pub max_rounds: usize,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub prompt: String,
    pub toolset: Vec<String>,
    /// Executor/single only; `None` disables observation-history truncation.
    #[serde(default)]
    pub len_observations: Option<usize>,
}

impl RoleConfig {
    /// Builds the documented default configuration for a role, matching the
    /// original source's `Config.__init__` literal defaults one-for-one.
    pub fn defaults_for(role: Role) -> Self {
        match role {
            Role::Planner => RoleConfig {
                max_rounds: 30,
                model: "gpt-4o-2024-11-20".to_string(),
                temperature: 0.95,
                max_tokens: 4096,
                prompt: "prompt/base_planner_prompt.yaml".to_string(),
                toolset: vec![
                    "run_command".into(),
                    "submit_flag".into(),
                    "giveup".into(),
                    "delegate".into(),
                ],
                len_observations: None,
            },
            Role::Executor => RoleConfig {
                max_rounds: 30,
                model: "gpt-4o-2024-11-20".to_string(),
                temperature: 0.95,
                max_tokens: 4096,
                prompt: "prompt/base_executor_prompt.yaml".to_string(),
                toolset: vec![
                    "run_command".into(),
                    "finish_task".into(),
                    "disassemble".into(),
                    "decompile".into(),
                    "create_file".into(),
                ],
                len_observations: Some(5),
            },
            Role::Autoprompter => RoleConfig {
                max_rounds: 30,
                model: "gpt-4o-2024-11-20".to_string(),
                temperature: 0.95,
                max_tokens: 4096,
                prompt: "prompt/autoprompt_prompt.yaml".to_string(),
                toolset: vec!["run_command".into(), "generate_prompt".into()],
                len_observations: None,
            },
        }
    }
}

/// Top-level configuration handed to the coordinator, mirroring the YAML
/// schema's `experiment` + per-role sections.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub experiment: ExperimentConfig,
    #[serde(default = "default_autoprompter_config")]
    pub autoprompter: RoleConfig,
    #[serde(default = "default_planner_config")]
    pub planner: RoleConfig,
    #[serde(default = "default_executor_config")]
    pub executor: RoleConfig,
}

fn default_autoprompter_config() -> RoleConfig {
    RoleConfig::defaults_for(Role::Autoprompter)
}
fn default_planner_config() -> RoleConfig {
    RoleConfig::defaults_for(Role::Planner)
}
fn default_executor_config() -> RoleConfig {
    RoleConfig::defaults_for(Role::Executor)
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            experiment: ExperimentConfig::default(),
            autoprompter: default_autoprompter_config(),
            planner: default_planner_config(),
            executor: default_executor_config(),
        }
    }
}
