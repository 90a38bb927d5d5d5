use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ExecutionOutcome, ExecutorContext, ExecutorPlugin, truncate_captured};
use crate::domain::ActionApproval;
use crate::error::{Error, Result};

const MAX_CAPTURE_BYTES: usize = 128 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const UV_SYNC_MIN_TIMEOUT_SECS: u64 = 120;

/// Wire envelope piped to the subprocess's stdin.
#[derive(Debug, Serialize)]
struct StdinEnvelope<'a> {
    version: &'static str,
    action_approval: &'a ActionApproval,
}

/// Shape the subprocess's stdout is parsed as, if it happens to be JSON.
#[derive(Debug, Deserialize)]
struct StdoutEnvelope {
    message: Option<String>,
    plugin: Option<String>,
}

/// Optional `uv`-managed Python environment wrapping the target command.
#[derive(Debug, Clone)]
pub struct UvConfig {
    pub project_dir: String,
    pub locked: bool,
    pub sync_eagerly: bool,
}

/// Runs a configured external command/script as a subprocess, passing the
/// approval as JSON on stdin and parsing its stdout for a result.
pub struct ExternalCommandPlugin {
    runner_command: Option<Vec<String>>,
    command: Vec<String>,
    timeout_secs: u64,
    uv: Option<UvConfig>,
    synced: std::sync::atomic::AtomicBool,
}

impl Default for ExternalCommandPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalCommandPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            runner_command: None,
            command: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            uv: None,
            synced: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Configure the target command (e.g. `["python3", "handler.py"]`).
    #[must_use]
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Wrap the target with a runner (e.g. `["uv", "run", "--"]`).
    #[must_use]
    pub fn with_runner_command(mut self, runner: Vec<String>) -> Self {
        self.runner_command = Some(runner);
        self
    }

    /// Bootstrap the target's Python environment with `uv` before running it.
    #[must_use]
    pub fn with_uv_config(mut self, uv: UvConfig) -> Self {
        self.uv = Some(uv);
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Run `uv sync` immediately, for plugins configured to bootstrap their
    /// environment at process startup rather than on first execution.
    pub async fn bootstrap_if_eager(&self) -> Result<()> {
        if self.uv.as_ref().is_some_and(|uv| uv.sync_eagerly) {
            self.ensure_uv_synced().await?;
        }
        Ok(())
    }

    async fn ensure_uv_synced(&self) -> Result<()> {
        let Some(uv) = &self.uv else { return Ok(()) };
        if self.synced.load(std::sync::atomic::Ordering::Acquire) {
            return Ok(());
        }
        let mut cmd = Command::new("uv");
        cmd.args(["sync", "--project", &uv.project_dir, "--no-dev"]);
        if uv.locked {
            cmd.arg("--locked");
        }
        let status = tokio::time::timeout(
            Duration::from_secs(UV_SYNC_MIN_TIMEOUT_SECS.max(self.timeout_secs)),
            cmd.status(),
        )
        .await
        .map_err(|_| Error::internal("uv sync timed out"))?
        .map_err(|e| Error::internal(format!("uv sync failed to start: {e}")))?;
        if !status.success() {
            return Err(Error::internal("uv sync exited with a non-zero status"));
        }
        self.synced.store(true, std::sync::atomic::Ordering::Release);
        Ok(())
    }

    fn build_command(&self, uv: Option<&UvConfig>) -> Result<Command> {
        let mut argv: Vec<String> = Vec::new();
        if let Some(runner) = &self.runner_command {
            argv.extend(runner.iter().cloned());
        }
        if let Some(uv) = uv {
            argv.extend(
                ["uv", "run", "--project", &uv.project_dir, "--no-sync", "--"]
                    .iter()
                    .map(|s| (*s).to_owned()),
            );
        }
        argv.extend(self.command.iter().cloned());

        let Some((program, args)) = argv.split_first() else {
            return Err(Error::internal("external command plugin has no command configured"));
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl ExecutorPlugin for ExternalCommandPlugin {
    fn plugin_key(&self) -> &'static str {
        "external_command"
    }

    fn action_types(&self) -> &'static [&'static str] {
        &["external_command", "run_script"]
    }

    async fn execute(
        &self,
        ctx: &ExecutorContext,
        approval: &ActionApproval,
    ) -> Result<ExecutionOutcome> {
        self.ensure_uv_synced().await?;

        let mut cmd = self.build_command(self.uv.as_ref())?;
        let stdin_payload = serde_json::to_vec(&StdinEnvelope {
            version: "v1",
            action_approval: approval,
        })?;

        let timeout_secs = if self.timeout_secs == DEFAULT_TIMEOUT_SECS {
            ctx.default_timeout_secs.max(DEFAULT_TIMEOUT_SECS)
        } else {
            self.timeout_secs
        };

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::internal(format!("failed to spawn external command: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&stdin_payload)
                .await
                .map_err(|e| Error::internal(format!("failed to write stdin: {e}")))?;
        }

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();

        let run = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
            let status = child.wait().await?;
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            if let Some(mut out) = stdout_handle {
                tokio::io::AsyncReadExt::read_to_end(&mut out, &mut stdout_buf).await.ok();
            }
            if let Some(mut err) = stderr_handle {
                tokio::io::AsyncReadExt::read_to_end(&mut err, &mut stderr_buf).await.ok();
            }
            Ok::<_, std::io::Error>((status, stdout_buf, stderr_buf))
        })
        .await
        .map_err(|_| Error::internal(format!("external command timed out after {timeout_secs}s")))?
        .map_err(|e| Error::internal(format!("external command execution failed: {e}")))?;

        let (status, stdout_buf, stderr_buf) = run;
        let stdout = truncate_captured(&String::from_utf8_lossy(&stdout_buf), MAX_CAPTURE_BYTES);
        let stderr = truncate_captured(&String::from_utf8_lossy(&stderr_buf), MAX_CAPTURE_BYTES);

        if !status.success() {
            return Err(Error::internal(format!(
                "external command exited with {:?}: {stderr}",
                status.code()
            )));
        }

        if let Ok(parsed) = serde_json::from_str::<StdoutEnvelope>(stdout.trim()) {
            return Ok(ExecutionOutcome {
                plugin: parsed.plugin.unwrap_or_default(),
                message: parsed.message.unwrap_or(stdout),
            });
        }

        let compacted = if let Ok(value) = serde_json::from_str::<Value>(stdout.trim()) {
            value.to_string()
        } else {
            stdout.trim().to_owned()
        };

        Ok(ExecutionOutcome {
            plugin: String::new(),
            message: compacted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_command_errors_with_no_target() {
        let plugin = ExternalCommandPlugin::new();
        let err = plugin.build_command(None).unwrap_err();
        assert!(err.to_string().contains("no command configured"));
    }

    #[test]
    fn build_command_prefixes_runner_and_uv() {
        let plugin = ExternalCommandPlugin::new()
            .with_command(vec!["handler.py".to_owned()])
            .with_runner_command(vec!["python3".to_owned()]);
        let cmd = plugin.build_command(None).unwrap();
        assert_eq!(cmd.as_std().get_program().to_str(), Some("python3"));
    }
}
