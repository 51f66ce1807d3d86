//! Thin process-spawning layer over the `docker`/`docker compose` CLI.
//!
//! Grounded on the donor's `tools/bash.rs` concurrent dual-stream-read idiom
//! (`tokio::join!` over two readers to avoid pipe-buffer deadlock), reworked
//! so that a timeout kills the child and still returns whatever had already
//! been written to its pipes, rather than dropping the whole future.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::challenge::Challenge;

/// Cap on bytes buffered per stream before a command's output is considered
/// "enough"; mirrors the donor's output-size-capping convention in
/// `tools/bash.rs`.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed on timeout and never exited.
    pub returncode: Option<i32>,
    pub timed_out: bool,
}

/// Opaque handle to a running container, typically its docker-assigned id.
pub type ContainerHandle = String;

#[derive(Debug)]
pub enum RuntimeError {
    StartFailed(String),
    StopFailed(String),
    CopyFailed(String),
    ComposeFailed(String),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::StartFailed(m) => write!(f, "failed to start container: {}", m),
            RuntimeError::StopFailed(m) => write!(f, "failed to stop container: {}", m),
            RuntimeError::CopyFailed(m) => write!(f, "failed to copy into container: {}", m),
            RuntimeError::ComposeFailed(m) => write!(f, "docker compose failed: {}", m),
        }
    }
}
impl std::error::Error for RuntimeError {}

/// Lifecycle and exec surface for the working container, and for whatever
/// challenge-side service container(s) a run needs. A failed `start` is
/// fatal to the run (`RuntimeError`); `exec` never raises for nonzero exit
/// or timeout, it always returns a structured [`ExecResult`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn start(&self, image: &str, network: &str) -> Result<ContainerHandle, RuntimeError>;

    async fn exec(
        &self,
        handle: &ContainerHandle,
        command: &str,
        timeout: Duration,
    ) -> ExecResult;

    async fn copy_in(
        &self,
        handle: &ContainerHandle,
        host_path: &std::path::Path,
        container_path: &str,
    ) -> Result<String, RuntimeError>;

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError>;

    /// Brings up the challenge's service container(s), if any, returning
    /// collected server logs for inclusion in the run record (empty string
    /// if the challenge has no server). No-op for `ServerType::None`
    /// challenges that are also not composed.
    async fn start_challenge(&self, challenge: &Challenge) -> Result<String, RuntimeError>;

    async fn stop_challenge(&self, challenge: &Challenge) -> Result<(), RuntimeError>;
}

/// Home directory inside the working container that relative `copy_in`
/// destinations are resolved under.
pub const CONTAINER_HOME: &str = "/home/ctfplayer";

fn clean_output(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).replace("\r\n", "\n")
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() >= cap {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    buf
}

/// Concrete `ContainerRuntime` that shells out to the `docker` CLI, mirroring
/// the original Python implementation's `docker run -d --rm --network ...
/// --platform linux/amd64`, `docker exec`, `docker cp -aq`, `docker stop`
/// invocations one-for-one.
#[derive(Debug, Clone, Default)]
pub struct DockerRuntime;

impl DockerRuntime {
    pub fn new() -> Self {
        DockerRuntime
    }

    async fn run_capturing(&self, mut cmd: Command) -> Result<(bool, String, String), RuntimeError> {
        let output = cmd
            .output()
            .await
            .map_err(|e| RuntimeError::StartFailed(e.to_string()))?;
        Ok((
            output.status.success(),
            clean_output(output.stdout),
            clean_output(output.stderr),
        ))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, image: &str, network: &str) -> Result<ContainerHandle, RuntimeError> {
        let mut cmd = Command::new("docker");
        cmd.args([
            "run", "-d", "--rm", "--network", network, "--platform", "linux/amd64", image,
        ]);
        let (ok, stdout, stderr) = self.run_capturing(cmd).await?;
        if !ok {
            return Err(RuntimeError::StartFailed(stderr));
        }
        Ok(stdout.trim().to_string())
    }

    async fn exec(&self, handle: &ContainerHandle, command: &str, timeout: Duration) -> ExecResult {
        let mut cmd = Command::new("docker");
        cmd.args(["exec", handle, "bash", "-c", command])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ExecResult {
                    stdout: String::new(),
                    stderr: e.to_string(),
                    returncode: None,
                    timed_out: false,
                }
            }
        };
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let stdout_task = tokio::spawn(read_capped(stdout, MAX_OUTPUT_BYTES));
        let stderr_task = tokio::spawn(read_capped(stderr, MAX_OUTPUT_BYTES));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let (stdout_bytes, stderr_bytes) = tokio::join!(stdout_task, stderr_task);
                ExecResult {
                    stdout: clean_output(stdout_bytes.unwrap_or_default()),
                    stderr: clean_output(stderr_bytes.unwrap_or_default()),
                    returncode: status.code(),
                    timed_out: false,
                }
            }
            Ok(Err(e)) => ExecResult {
                stdout: String::new(),
                stderr: e.to_string(),
                returncode: None,
                timed_out: false,
            },
            Err(_elapsed) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                let (stdout_bytes, stderr_bytes) = tokio::join!(stdout_task, stderr_task);
                ExecResult {
                    stdout: clean_output(stdout_bytes.unwrap_or_default()),
                    stderr: clean_output(stderr_bytes.unwrap_or_default()),
                    returncode: None,
                    timed_out: true,
                }
            }
        }
    }

    async fn copy_in(
        &self,
        handle: &ContainerHandle,
        host_path: &std::path::Path,
        container_path: &str,
    ) -> Result<String, RuntimeError> {
        let path = std::path::Path::new(container_path);
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::path::Path::new(CONTAINER_HOME).join(path)
        };
        if let Some(parent) = resolved.parent() {
            let mut mkdir = Command::new("docker");
            mkdir.args(["exec", handle, "mkdir", "-p", &parent.to_string_lossy()]);
            let _ = self.run_capturing(mkdir).await;
        }
        let dest = format!("{}:{}", handle, resolved.to_string_lossy());
        let mut cp = Command::new("docker");
        cp.args(["cp", "-aq", &host_path.to_string_lossy(), &dest]);
        let (ok, _out, err) = self.run_capturing(cp).await?;
        if !ok {
            return Err(RuntimeError::CopyFailed(err));
        }
        Ok(resolved.to_string_lossy().to_string())
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        let mut cmd = Command::new("docker");
        cmd.args(["stop", handle]);
        let (ok, _out, err) = self.run_capturing(cmd).await?;
        if !ok {
            // Stop is idempotent: a container that's already gone is not an error.
            if err.contains("No such container") {
                return Ok(());
            }
            return Err(RuntimeError::StopFailed(err));
        }
        Ok(())
    }

    async fn start_challenge(&self, challenge: &Challenge) -> Result<String, RuntimeError> {
        if challenge.compose {
            let compose_file = challenge.challenge_dir.join("docker-compose.yml");
            let mut cmd = Command::new("docker");
            cmd.args([
                "compose",
                "-f",
                &compose_file.to_string_lossy(),
                "up",
                "-d",
                "--force-recreate",
            ]);
            let (ok, _out, err) = self.run_capturing(cmd).await?;
            if !ok {
                return Err(RuntimeError::ComposeFailed(err));
            }
        } else if matches!(
            challenge.server_type,
            crate::challenge::ServerType::Nc | crate::challenge::ServerType::Web
        ) {
            let mut cmd = Command::new("docker");
            cmd.args(["start", &challenge.name]);
            let _ = self.run_capturing(cmd).await;
        }
        let mut logs_cmd = Command::new("docker");
        logs_cmd.args(["logs", &challenge.name]);
        let (_ok, out, _err) = self
            .run_capturing(logs_cmd)
            .await
            .unwrap_or((true, String::new(), String::new()));
        Ok(out)
    }

    async fn stop_challenge(&self, challenge: &Challenge) -> Result<(), RuntimeError> {
        if challenge.compose {
            let compose_file = challenge.challenge_dir.join("docker-compose.yml");
            let mut cmd = Command::new("docker");
            cmd.args([
                "compose",
                "-f",
                &compose_file.to_string_lossy(),
                "down",
                "-v",
            ]);
            let (ok, _out, err) = self.run_capturing(cmd).await?;
            if !ok {
                return Err(RuntimeError::ComposeFailed(err));
            }
        } else if matches!(
            challenge.server_type,
            crate::challenge::ServerType::Nc | crate::challenge::ServerType::Web
        ) {
            let mut cmd = Command::new("docker");
            cmd.args(["stop", &challenge.name]);
            let _ = self.run_capturing(cmd).await;
        }
        Ok(())
    }
}
