//! Owns the working container and every tool instance for one run; mediates
//! tool dispatch and exposes the `solved`/`giveup` flags tools may set.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::challenge::Challenge;
use crate::container_runtime::{ContainerHandle, ContainerRuntime, ExecResult, RuntimeError};
use crate::message::{ToolCall, ToolResult};
use crate::tool::{Tool, ToolEnvironment, ToolRegistry};
use crate::tools::{
    CreateFileTool, DecompileTool, DelegateTool, DisassembleTool, FinishTaskTool,
    GeneratePromptTool, GiveupTool, RunCommandTool, SubmitFlagTool,
};

pub struct Environment {
    pub challenge: Challenge,
    pub container_image: String,
    pub network: String,
    runtime: Arc<dyn ContainerRuntime>,
    container: RwLock<Option<ContainerHandle>>,
    tools: RwLock<ToolRegistry>,
    solved: AtomicBool,
    giveup: AtomicBool,
}

impl Environment {
    /// Constructs the environment and registers the standard built-in
    /// toolset, wired against `self` as the narrow [`ToolEnvironment`]
    /// capability. Must be `Arc`-wrapped up front so tools can hold a
    /// back-reference without a full ownership cycle.
    pub fn new(
        challenge: Challenge,
        container_image: String,
        network: String,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Arc<Self> {
        let env = Arc::new(Environment {
            challenge,
            container_image,
            network,
            runtime,
            container: RwLock::new(None),
            tools: RwLock::new(ToolRegistry::new()),
            solved: AtomicBool::new(false),
            giveup: AtomicBool::new(false),
        });
        env
    }

    /// Registers the nine built-in tools and the default per-role toolsets.
    /// Separate from `new` because tools need an already-`Arc`'d environment
    /// to hold as their capability back-reference.
    pub async fn register_default_tools(self: &Arc<Self>) {
        let cap: Arc<dyn ToolEnvironment> = self.clone();
        let mut registry = self.tools.write().await;
        registry.register(Arc::new(RunCommandTool::new(cap.clone())));
        registry.register(Arc::new(CreateFileTool::new(cap.clone())));
        registry.register(Arc::new(SubmitFlagTool::new(cap.clone())));
        registry.register(Arc::new(GiveupTool::new(cap.clone())));
        registry.register(Arc::new(DisassembleTool::new(cap.clone())));
        registry.register(Arc::new(DecompileTool::new(cap)));
        registry.register(Arc::new(DelegateTool::new()));
        registry.register(Arc::new(FinishTaskTool::new()));
        registry.register(Arc::new(GeneratePromptTool::new()));

        registry.define_toolset(
            "planner",
            vec!["delegate".into(), "submit_flag".into(), "giveup".into()],
        );
        registry.define_toolset(
            "executor",
            vec![
                "run_command".into(),
                "create_file".into(),
                "submit_flag".into(),
                "giveup".into(),
                "finish_task".into(),
                "disassemble".into(),
                "decompile".into(),
            ],
        );
        registry.define_toolset(
            "autoprompter",
            vec!["generate_prompt".into(), "run_command".into()],
        );
        registry.define_toolset(
            "single",
            vec![
                "run_command".into(),
                "create_file".into(),
                "submit_flag".into(),
                "giveup".into(),
                "disassemble".into(),
                "decompile".into(),
            ],
        );
    }

    /// Brings up the challenge's service container(s), if any. Called by the
    /// coordinator before `setup`, mirroring the original source's
    /// `challenge.start_challenge_container()` happening in its context
    /// manager's `__enter__` ahead of `environment.setup()`.
    pub async fn start_challenge(&self) -> Result<String, RuntimeError> {
        self.runtime.start_challenge(&self.challenge).await
    }

    /// Starts the working container, runs every tool's `setup`, then copies
    /// every challenge file into `ctf_files/<name>` under the container home.
    pub async fn setup(&self) -> Result<(), RuntimeError> {
        log::info!(target: "environment", "starting working container {}", self.container_image);
        let handle = self.runtime.start(&self.container_image, &self.network).await?;
        *self.container.write().await = Some(handle);

        {
            let registry = self.tools.read().await;
            for tool in registry.all().values() {
                if let Err(e) = tool.setup().await {
                    log::warn!(target: "environment", "tool {} setup failed: {}", tool.name(), e);
                }
            }
        }

        for file in &self.challenge.files {
            let host_path = self.challenge.challenge_dir.join(file);
            let container_path = format!("ctf_files/{}", file);
            self.copy_in(&host_path, &container_path)
                .await
                .map_err(|e| RuntimeError::CopyFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Tears down in reverse order: tools first (so they may clean up while
    /// the container is still alive), then the working container, then the
    /// challenge container.
    pub async fn teardown(&self, error: Option<&str>) {
        {
            let registry = self.tools.read().await;
            for tool in registry.all().values() {
                tool.teardown(error).await;
            }
        }
        if let Some(handle) = self.container.read().await.clone() {
            if let Err(e) = self.runtime.stop(&handle).await {
                log::warn!(target: "environment", "failed to stop working container: {}", e);
            }
        }
        if let Err(e) = self.runtime.stop_challenge(&self.challenge).await {
            log::warn!(target: "environment", "failed to stop challenge container: {}", e);
        }
    }

    /// Looks up `call.name`, invokes it with `call.parsed_arguments`, and
    /// wraps the result into a `ToolResult` keyed to `call.id`. Callers are
    /// responsible for having already parsed the call's arguments.
    pub async fn run_tool(&self, call: &ToolCall) -> ToolResult {
        let parsed = call.parsed_arguments.clone().unwrap_or_default();
        let registry = self.tools.read().await;
        let result = match registry.get(&call.name) {
            Some(tool) => tool.call(parsed).await,
            None => json!({"error": format!("Unknown tool {}", call.name)}),
        };
        ToolResult::for_call(call, result)
    }

    pub async fn get_toolset(&self, name: &str) -> HashMap<String, Arc<dyn Tool>> {
        self.tools.read().await.get_toolset(name)
    }

    /// Looks up a single registered tool by name, used by the agent loop to
    /// validate/coerce a call's arguments before dispatch.
    pub async fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    pub fn solved(&self) -> bool {
        self.solved.load(Ordering::SeqCst)
    }

    pub fn giveup(&self) -> bool {
        self.giveup.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolEnvironment for Environment {
    async fn exec(&self, command: &str, timeout: Duration) -> ExecResult {
        let handle = self
            .container
            .read()
            .await
            .clone()
            .expect("exec called before Environment::setup");
        self.runtime.exec(&handle, command, timeout).await
    }

    async fn copy_in(&self, host_path: &Path, container_path: &str) -> std::io::Result<String> {
        let handle = self
            .container
            .read()
            .await
            .clone()
            .expect("copy_in called before Environment::setup");
        self.runtime
            .copy_in(&handle, host_path, container_path)
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }

    fn mark_solved(&self) {
        self.solved.store(true, Ordering::SeqCst);
    }

    fn mark_giveup(&self) {
        self.giveup.store(true, Ordering::SeqCst);
    }

    fn flag(&self) -> String {
        self.challenge.flag().to_string()
    }
}
